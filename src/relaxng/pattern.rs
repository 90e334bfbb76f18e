// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Simplified patterns and their derivatives.
//!
//! A compiled schema is one start pattern plus a table of element
//! declarations. References were resolved during compilation, so the only
//! indirection left is [`Pattern::Element`] pointing into that table, which
//! is what allows recursive content models.
//!
//! Matching computes the derivative of a pattern with respect to each piece
//! of a document in turn: start tags, attributes, text, end tags. The
//! document matches if what is left at the end is nullable, and fails at the
//! first piece whose derivative is [`Pattern::NotAllowed`].

use std::{fmt, rc::Rc};

use super::datatype::Datatype;

/// Namespace qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub ns: String,
    pub local: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_empty() {
            write!(fmt, "{}", self.local)
        } else {
            write!(fmt, "{{{}}}{}", self.ns, self.local)
        }
    }
}

/// Set of names an element or attribute pattern accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameClass {
    AnyName(Option<Box<NameClass>>),
    NsName(String, Option<Box<NameClass>>),
    Name(QName),
    Choice(Box<NameClass>, Box<NameClass>),
}

impl NameClass {
    pub fn contains(&self, name: &QName) -> bool {
        match self {
            NameClass::AnyName(except) => !except.as_ref().is_some_and(|nc| nc.contains(name)),
            NameClass::NsName(ns, except) => {
                *ns == name.ns && !except.as_ref().is_some_and(|nc| nc.contains(name))
            }
            NameClass::Name(expect) => expect == name,
            NameClass::Choice(lhs, rhs) => lhs.contains(name) || rhs.contains(name),
        }
    }
}

impl fmt::Display for NameClass {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameClass::AnyName(_) => write!(fmt, "*"),
            NameClass::NsName(ns, _) => write!(fmt, "{{{ns}}}*"),
            NameClass::Name(name) => write!(fmt, "{name}"),
            NameClass::Choice(lhs, rhs) => write!(fmt, "{lhs} | {rhs}"),
        }
    }
}

/// Simplified pattern.
///
/// Datatypes live in the [`Grammar`] table and are referred to by index, so
/// patterns stay comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Empty,
    NotAllowed,
    Text,
    Choice(Rc<Pattern>, Rc<Pattern>),
    Interleave(Rc<Pattern>, Rc<Pattern>),
    Group(Rc<Pattern>, Rc<Pattern>),
    OneOrMore(Rc<Pattern>),
    List(Rc<Pattern>),
    Data(usize),
    DataExcept(usize, Rc<Pattern>),
    Value(usize, String),
    Attribute(Rc<NameClass>, Rc<Pattern>),
    Element(usize),
    After(Rc<Pattern>, Rc<Pattern>),
}

pub fn empty() -> Rc<Pattern> {
    Rc::new(Pattern::Empty)
}

pub fn not_allowed() -> Rc<Pattern> {
    Rc::new(Pattern::NotAllowed)
}

pub fn text() -> Rc<Pattern> {
    Rc::new(Pattern::Text)
}

pub fn choice(lhs: Rc<Pattern>, rhs: Rc<Pattern>) -> Rc<Pattern> {
    if *lhs == Pattern::NotAllowed || lhs == rhs {
        return rhs;
    }

    if *rhs == Pattern::NotAllowed {
        return lhs;
    }

    Rc::new(Pattern::Choice(lhs, rhs))
}

pub fn group(lhs: Rc<Pattern>, rhs: Rc<Pattern>) -> Rc<Pattern> {
    if *lhs == Pattern::NotAllowed || *rhs == Pattern::NotAllowed {
        return not_allowed();
    }

    if *lhs == Pattern::Empty {
        return rhs;
    }

    if *rhs == Pattern::Empty {
        return lhs;
    }

    Rc::new(Pattern::Group(lhs, rhs))
}

pub fn interleave(lhs: Rc<Pattern>, rhs: Rc<Pattern>) -> Rc<Pattern> {
    if *lhs == Pattern::NotAllowed || *rhs == Pattern::NotAllowed {
        return not_allowed();
    }

    if *lhs == Pattern::Empty {
        return rhs;
    }

    if *rhs == Pattern::Empty {
        return lhs;
    }

    Rc::new(Pattern::Interleave(lhs, rhs))
}

pub fn one_or_more(pattern: Rc<Pattern>) -> Rc<Pattern> {
    if matches!(*pattern, Pattern::NotAllowed | Pattern::Empty) {
        return pattern;
    }

    Rc::new(Pattern::OneOrMore(pattern))
}

pub fn after(lhs: Rc<Pattern>, rhs: Rc<Pattern>) -> Rc<Pattern> {
    if *lhs == Pattern::NotAllowed || *rhs == Pattern::NotAllowed {
        return not_allowed();
    }

    Rc::new(Pattern::After(lhs, rhs))
}

/// Declared element: its name class and content model.
#[derive(Debug, Clone)]
pub struct ElementDecl {
    pub name: NameClass,
    pub content: Rc<Pattern>,
}

/// Compiled schema.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub start: Rc<Pattern>,
    pub elements: Vec<ElementDecl>,
    pub datatypes: Vec<Datatype>,
}

pub fn nullable(pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Empty | Pattern::Text => true,
        Pattern::Group(lhs, rhs) | Pattern::Interleave(lhs, rhs) => {
            nullable(lhs) && nullable(rhs)
        }
        Pattern::Choice(lhs, rhs) => nullable(lhs) || nullable(rhs),
        Pattern::OneOrMore(pattern) => nullable(pattern),
        _ => false,
    }
}

/// Check if text consists of XML whitespace only.
pub fn is_whitespace(text: &str) -> bool {
    text.chars().all(|chr| matches!(chr, ' ' | '\t' | '\n' | '\r'))
}

impl Grammar {
    pub fn text_deriv(&self, pattern: &Rc<Pattern>, text: &str) -> Rc<Pattern> {
        match &**pattern {
            Pattern::Choice(lhs, rhs) => choice(self.text_deriv(lhs, text), self.text_deriv(rhs, text)),
            Pattern::Interleave(lhs, rhs) => choice(
                interleave(self.text_deriv(lhs, text), rhs.clone()),
                interleave(lhs.clone(), self.text_deriv(rhs, text)),
            ),
            Pattern::Group(lhs, rhs) => {
                let deriv = group(self.text_deriv(lhs, text), rhs.clone());
                if nullable(lhs) {
                    choice(deriv, self.text_deriv(rhs, text))
                } else {
                    deriv
                }
            }
            Pattern::After(lhs, rhs) => after(self.text_deriv(lhs, text), rhs.clone()),
            Pattern::OneOrMore(inner) => group(
                self.text_deriv(inner, text),
                choice(pattern.clone(), empty()),
            ),
            Pattern::Text => pattern.clone(),
            Pattern::Value(datatype, value) => {
                if self.datatypes[*datatype].equal(value, text) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::Data(datatype) => {
                if self.datatypes[*datatype].allows(text) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::DataExcept(datatype, except) => {
                if self.datatypes[*datatype].allows(text)
                    && !nullable(&self.text_deriv(except, text))
                {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::List(inner) => {
                let deriv = text
                    .split_ascii_whitespace()
                    .fold(inner.clone(), |deriv, token| self.text_deriv(&deriv, token));
                if nullable(&deriv) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            _ => not_allowed(),
        }
    }

    pub fn start_tag_open_deriv(&self, pattern: &Rc<Pattern>, name: &QName) -> Rc<Pattern> {
        match &**pattern {
            Pattern::Choice(lhs, rhs) => choice(
                self.start_tag_open_deriv(lhs, name),
                self.start_tag_open_deriv(rhs, name),
            ),
            Pattern::Element(index) => {
                let decl = &self.elements[*index];
                if decl.name.contains(name) {
                    after(decl.content.clone(), empty())
                } else {
                    not_allowed()
                }
            }
            Pattern::Interleave(lhs, rhs) => choice(
                apply_after(&self.start_tag_open_deriv(lhs, name), &|deriv: Rc<Pattern>| {
                    interleave(deriv, rhs.clone())
                }),
                apply_after(&self.start_tag_open_deriv(rhs, name), &|deriv: Rc<Pattern>| {
                    interleave(lhs.clone(), deriv)
                }),
            ),
            Pattern::OneOrMore(inner) => {
                apply_after(&self.start_tag_open_deriv(inner, name), &|deriv: Rc<Pattern>| {
                    group(deriv, choice(pattern.clone(), empty()))
                })
            }
            Pattern::Group(lhs, rhs) => {
                let deriv = apply_after(&self.start_tag_open_deriv(lhs, name), &|deriv: Rc<Pattern>| {
                    group(deriv, rhs.clone())
                });
                if nullable(lhs) {
                    choice(deriv, self.start_tag_open_deriv(rhs, name))
                } else {
                    deriv
                }
            }
            Pattern::After(lhs, rhs) => {
                apply_after(&self.start_tag_open_deriv(lhs, name), &|deriv: Rc<Pattern>| {
                    after(deriv, rhs.clone())
                })
            }
            _ => not_allowed(),
        }
    }

    pub fn att_deriv(&self, pattern: &Rc<Pattern>, name: &QName, value: &str) -> Rc<Pattern> {
        match &**pattern {
            Pattern::After(lhs, rhs) => after(self.att_deriv(lhs, name, value), rhs.clone()),
            Pattern::Choice(lhs, rhs) => choice(
                self.att_deriv(lhs, name, value),
                self.att_deriv(rhs, name, value),
            ),
            Pattern::Group(lhs, rhs) => choice(
                group(self.att_deriv(lhs, name, value), rhs.clone()),
                group(lhs.clone(), self.att_deriv(rhs, name, value)),
            ),
            Pattern::Interleave(lhs, rhs) => choice(
                interleave(self.att_deriv(lhs, name, value), rhs.clone()),
                interleave(lhs.clone(), self.att_deriv(rhs, name, value)),
            ),
            Pattern::OneOrMore(inner) => group(
                self.att_deriv(inner, name, value),
                choice(pattern.clone(), empty()),
            ),
            Pattern::Attribute(name_class, content) => {
                if name_class.contains(name) && self.value_match(content, value) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            _ => not_allowed(),
        }
    }

    fn value_match(&self, pattern: &Rc<Pattern>, value: &str) -> bool {
        (nullable(pattern) && is_whitespace(value)) || nullable(&self.text_deriv(pattern, value))
    }

    pub fn start_tag_close_deriv(&self, pattern: &Rc<Pattern>) -> Rc<Pattern> {
        match &**pattern {
            Pattern::After(lhs, rhs) => after(self.start_tag_close_deriv(lhs), rhs.clone()),
            Pattern::Choice(lhs, rhs) => choice(
                self.start_tag_close_deriv(lhs),
                self.start_tag_close_deriv(rhs),
            ),
            Pattern::Group(lhs, rhs) => group(
                self.start_tag_close_deriv(lhs),
                self.start_tag_close_deriv(rhs),
            ),
            Pattern::Interleave(lhs, rhs) => interleave(
                self.start_tag_close_deriv(lhs),
                self.start_tag_close_deriv(rhs),
            ),
            Pattern::OneOrMore(inner) => one_or_more(self.start_tag_close_deriv(inner)),
            Pattern::Attribute(..) => not_allowed(),
            _ => pattern.clone(),
        }
    }

    pub fn end_tag_deriv(&self, pattern: &Rc<Pattern>) -> Rc<Pattern> {
        match &**pattern {
            Pattern::Choice(lhs, rhs) => choice(self.end_tag_deriv(lhs), self.end_tag_deriv(rhs)),
            Pattern::After(lhs, rhs) if nullable(lhs) => rhs.clone(),
            _ => not_allowed(),
        }
    }
}

fn apply_after(pattern: &Rc<Pattern>, func: &dyn Fn(Rc<Pattern>) -> Rc<Pattern>) -> Rc<Pattern> {
    match &**pattern {
        Pattern::After(lhs, rhs) => after(lhs.clone(), func(rhs.clone())),
        Pattern::Choice(lhs, rhs) => choice(apply_after(lhs, func), apply_after(rhs, func)),
        _ => not_allowed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name(local: &str) -> QName {
        QName::new("", local)
    }

    fn element(grammar: &mut Grammar, local: &str, content: Rc<Pattern>) -> Rc<Pattern> {
        grammar.elements.push(ElementDecl {
            name: NameClass::Name(name(local)),
            content,
        });
        Rc::new(Pattern::Element(grammar.elements.len() - 1))
    }

    fn grammar() -> Grammar {
        Grammar {
            start: not_allowed(),
            elements: Vec::new(),
            datatypes: vec![Datatype::token()],
        }
    }

    fn empty_element(grammar: &Grammar, pattern: &Rc<Pattern>, local: &str) -> Rc<Pattern> {
        let deriv = grammar.start_tag_open_deriv(pattern, &name(local));
        let deriv = grammar.start_tag_close_deriv(&deriv);
        let deriv = choice(deriv.clone(), grammar.text_deriv(&deriv, ""));
        grammar.end_tag_deriv(&deriv)
    }

    #[test]
    fn smart_constructors_simplify() {
        let text = text();
        assert_eq!(choice(not_allowed(), text.clone()), text);
        assert_eq!(choice(text.clone(), text.clone()), text);
        assert_eq!(group(empty(), text.clone()), text);
        assert_eq!(*group(text.clone(), not_allowed()), Pattern::NotAllowed);
        assert_eq!(*interleave(not_allowed(), text), Pattern::NotAllowed);
    }

    #[test]
    fn nullable_patterns() {
        assert!(nullable(&Pattern::Empty));
        assert!(nullable(&choice(empty(), not_allowed())));
        assert!(!nullable(&Pattern::Data(0)));
        assert!(nullable(&Pattern::OneOrMore(text())));
    }

    #[test]
    fn group_enforces_order() {
        let mut grammar = grammar();
        let a = element(&mut grammar, "a", empty());
        let b = element(&mut grammar, "b", empty());
        let sequence = group(a, b);

        let deriv = empty_element(&grammar, &sequence, "a");
        let deriv = empty_element(&grammar, &deriv, "b");
        assert!(nullable(&deriv));

        let deriv = empty_element(&grammar, &sequence, "b");
        assert_eq!(*deriv, Pattern::NotAllowed);
    }

    #[test]
    fn interleave_accepts_any_order() {
        let mut grammar = grammar();
        let a = element(&mut grammar, "a", empty());
        let b = element(&mut grammar, "b", empty());
        let both = interleave(a, b);

        let deriv = empty_element(&grammar, &both, "b");
        assert!(!nullable(&deriv));
        let deriv = empty_element(&grammar, &deriv, "a");
        assert!(nullable(&deriv));
    }

    #[test]
    fn attribute_values() {
        let grammar = grammar();
        let attribute = Rc::new(Pattern::Attribute(
            Rc::new(NameClass::Name(name("arch"))),
            Rc::new(Pattern::Value(0, "x86_64".into())),
        ));

        let deriv = grammar.att_deriv(&attribute, &name("arch"), " x86_64 ");
        assert_eq!(*deriv, Pattern::Empty);
        let deriv = grammar.att_deriv(&attribute, &name("arch"), "aarch64");
        assert_eq!(*deriv, Pattern::NotAllowed);
        let deriv = grammar.start_tag_close_deriv(&attribute);
        assert_eq!(*deriv, Pattern::NotAllowed);
    }

    #[test]
    fn list_tokens() {
        let grammar = grammar();
        let list = Rc::new(Pattern::List(one_or_more(Rc::new(Pattern::Data(0)))));
        assert_eq!(*grammar.text_deriv(&list, "a b  c"), Pattern::Empty);
        assert_eq!(*grammar.text_deriv(&list, "   "), Pattern::NotAllowed);
    }

    #[test]
    fn name_classes() {
        let any_but_foo = NameClass::AnyName(Some(Box::new(NameClass::Name(name("foo")))));
        assert!(any_but_foo.contains(&name("bar")));
        assert!(!any_but_foo.contains(&name("foo")));

        let ns = NameClass::NsName("urn:x".into(), None);
        assert!(ns.contains(&QName::new("urn:x", "y")));
        assert!(!ns.contains(&name("y")));
    }
}
