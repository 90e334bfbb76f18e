// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Schema parsing and compilation.
//!
//! Reads the XML syntax of RelaxNG into an intermediate tree that still
//! carries named references, then resolves those references into the
//! simplified [`Grammar`] that the derivative engine runs on.

use roxmltree::{Document, Node, ParsingOptions};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};
use tracing::debug;

use super::{
    datatype::{Datatype, BUILTIN_LIBRARY},
    pattern::{
        choice, empty, group, interleave, not_allowed, one_or_more, text, ElementDecl, Grammar,
        NameClass, Pattern, QName,
    },
    Error, Result,
};

/// Namespace of RelaxNG schema elements.
pub const RNG_NS: &str = "http://relaxng.org/ns/structure/1.0";

const START: &str = "#start";

pub(super) fn parsing_options() -> ParsingOptions {
    ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    }
}

#[derive(Debug, Clone)]
struct Location {
    path: PathBuf,
    line: u32,
}

#[derive(Debug)]
enum Raw {
    Empty,
    NotAllowed,
    Text,
    Group(Rc<Raw>, Rc<Raw>),
    Interleave(Rc<Raw>, Rc<Raw>),
    Choice(Rc<Raw>, Rc<Raw>),
    OneOrMore(Rc<Raw>),
    List(Rc<Raw>),
    Data(usize, Option<Rc<Raw>>),
    Value(usize, String),
    Attribute(NameClass, Rc<Raw>),
    Element(NameClass, Rc<Raw>),
    Ref(usize, String, Location),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    Choice,
    Interleave,
}

#[derive(Debug, Default)]
struct Define {
    bare: bool,
    combine: Option<Combine>,
    bodies: Vec<Rc<Raw>>,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    defines: HashMap<String, Define>,
}

#[derive(Debug, Clone)]
struct Context {
    ns: String,
    library: String,
    path: PathBuf,
    scope: Option<usize>,
}

impl Context {
    fn inherit(&self, node: Node<'_, '_>) -> Self {
        let mut context = self.clone();
        if let Some(ns) = node.attribute("ns") {
            context.ns = ns.to_string();
        }
        if let Some(library) = node.attribute("datatypeLibrary") {
            context.library = library.to_string();
        }
        context
    }
}

/// Compile schema file.
pub(super) fn compile_file(path: &Path) -> Result<Grammar> {
    let mut parser = SchemaParser::default();
    let context = Context {
        ns: String::new(),
        library: BUILTIN_LIBRARY.to_string(),
        path: path.to_path_buf(),
        scope: None,
    };
    let start = parser.load_pattern(path, &context)?;
    parser.compile(&start)
}

/// Compile schema held in memory, resolving relative references against
/// `path`.
pub(super) fn compile_str(text: &str, path: &Path) -> Result<Grammar> {
    let mut parser = SchemaParser::default();
    let context = Context {
        ns: String::new(),
        library: BUILTIN_LIBRARY.to_string(),
        path: path.to_path_buf(),
        scope: None,
    };
    let document = Document::parse_with_options(text, parsing_options()).map_err(|err| {
        Error::ParseSchema {
            source: err,
            path: path.to_path_buf(),
        }
    })?;
    let start = parser.pattern(document.root_element(), &context)?;
    parser.compile(&start)
}

#[derive(Debug, Default)]
struct SchemaParser {
    scopes: Vec<Scope>,
    datatypes: Vec<Datatype>,
    open_files: Vec<PathBuf>,
}

impl SchemaParser {
    fn read(&mut self, path: &Path) -> Result<String> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.open_files.contains(&canonical) {
            return Err(Error::InvalidSchema {
                path: path.to_path_buf(),
                line: 1,
                message: "schema includes itself".into(),
            });
        }
        self.open_files.push(canonical);
        debug!("loading schema {:?}", path.display());

        fs::read_to_string(path).map_err(|err| Error::ReadSchema {
            source: err,
            path: path.to_path_buf(),
        })
    }

    fn load_pattern(&mut self, path: &Path, context: &Context) -> Result<Rc<Raw>> {
        let text = self.read(path)?;
        let document = Document::parse_with_options(&text, parsing_options()).map_err(|err| {
            Error::ParseSchema {
                source: err,
                path: path.to_path_buf(),
            }
        })?;

        let context = Context {
            path: path.to_path_buf(),
            library: BUILTIN_LIBRARY.to_string(),
            ..context.clone()
        };
        let pattern = self.pattern(document.root_element(), &context)?;
        self.open_files.pop();

        Ok(pattern)
    }

    fn pattern(&mut self, node: Node<'_, '_>, context: &Context) -> Result<Rc<Raw>> {
        if !is_rng(node) {
            return Err(invalid(node, context, "schema root is not a RelaxNG element"));
        }

        let context = context.inherit(node);
        let raw = match node.tag_name().name() {
            "element" => {
                let mut children = rng_children(node);
                let name = match node.attribute("name") {
                    Some(name) => NameClass::Name(qname(node, name, &context.ns, &context)?),
                    None => {
                        let first = children
                            .next()
                            .ok_or_else(|| invalid(node, &context, "element has no name"))?;
                        self.name_class(first, &context)?
                    }
                };
                let content = self.group_of(children, &context)?;
                Raw::Element(name, content)
            }
            "attribute" => {
                let mut children = rng_children(node);
                let name = match node.attribute("name") {
                    Some(name) => {
                        let ns = node.attribute("ns").unwrap_or_default();
                        NameClass::Name(qname(node, name, ns, &context)?)
                    }
                    None => {
                        let first = children
                            .next()
                            .ok_or_else(|| invalid(node, &context, "attribute has no name"))?;
                        self.name_class(first, &context)?
                    }
                };
                let children: Vec<_> = children.collect();
                let content = if children.is_empty() {
                    Rc::new(Raw::Text)
                } else {
                    self.group_of(children.into_iter(), &context)?
                };
                Raw::Attribute(name, content)
            }
            "group" => return self.group_of(rng_children(node), &context),
            "interleave" => {
                return self.fold(rng_children(node), &context, Raw::Empty, Raw::Interleave)
            }
            "choice" => return self.fold(rng_children(node), &context, Raw::NotAllowed, Raw::Choice),
            "optional" => Raw::Choice(self.group_of(rng_children(node), &context)?, Rc::new(Raw::Empty)),
            "zeroOrMore" => Raw::Choice(
                Rc::new(Raw::OneOrMore(self.group_of(rng_children(node), &context)?)),
                Rc::new(Raw::Empty),
            ),
            "oneOrMore" => Raw::OneOrMore(self.group_of(rng_children(node), &context)?),
            "mixed" => Raw::Interleave(
                self.group_of(rng_children(node), &context)?,
                Rc::new(Raw::Text),
            ),
            "list" => Raw::List(self.group_of(rng_children(node), &context)?),
            "empty" => Raw::Empty,
            "text" => Raw::Text,
            "notAllowed" => Raw::NotAllowed,
            "ref" | "parentRef" => {
                let name = required_attribute(node, &context, "name")?;
                let scope = match node.tag_name().name() {
                    "ref" => context.scope,
                    _ => context
                        .scope
                        .and_then(|scope| self.scopes[scope].parent),
                };
                let scope = scope
                    .ok_or_else(|| invalid(node, &context, "reference outside of a grammar"))?;
                Raw::Ref(scope, name.trim().to_string(), location(node, &context))
            }
            "value" => {
                let datatype = match node.attribute("type") {
                    Some(name) => self.datatype(node, &context, name.trim(), &[])?,
                    None => self.push_datatype(Datatype::token()),
                };
                Raw::Value(datatype, text_content(node))
            }
            "data" => {
                let name = required_attribute(node, &context, "type")?;
                let mut params = Vec::new();
                let mut except = None;
                for child in rng_children(node) {
                    match child.tag_name().name() {
                        "param" => {
                            let param = required_attribute(child, &context, "name")?;
                            params.push((param.trim().to_string(), text_content(child)));
                        }
                        "except" => {
                            let context = context.inherit(child);
                            except = Some(self.fold(
                                rng_children(child),
                                &context,
                                Raw::NotAllowed,
                                Raw::Choice,
                            )?);
                        }
                        other => {
                            return Err(invalid(
                                child,
                                &context,
                                &format!("unexpected {other:?} inside data"),
                            ))
                        }
                    }
                }
                let datatype = self.datatype(node, &context, name.trim(), &params)?;
                Raw::Data(datatype, except)
            }
            "externalRef" => {
                let href = required_attribute(node, &context, "href")?;
                let path = resolve_href(&context.path, href);
                return self.load_pattern(&path, &context);
            }
            "grammar" => {
                let scope = self.scopes.len();
                self.scopes.push(Scope {
                    parent: context.scope,
                    defines: HashMap::new(),
                });
                let grammar_context = Context {
                    scope: Some(scope),
                    ..context.clone()
                };
                self.grammar_content(node, &grammar_context, &HashSet::new())?;
                Raw::Ref(scope, START.to_string(), location(node, &context))
            }
            other => {
                return Err(invalid(
                    node,
                    &context,
                    &format!("unknown pattern {other:?}"),
                ))
            }
        };

        Ok(Rc::new(raw))
    }

    fn grammar_content(
        &mut self,
        node: Node<'_, '_>,
        context: &Context,
        overrides: &HashSet<String>,
    ) -> Result<()> {
        for child in rng_children(node) {
            let child_context = context.inherit(child);
            match child.tag_name().name() {
                "start" | "define" => {
                    let name = match child.tag_name().name() {
                        "start" => START.to_string(),
                        _ => required_attribute(child, &child_context, "name")?
                            .trim()
                            .to_string(),
                    };
                    if overrides.contains(&name) {
                        continue;
                    }

                    let combine = match child.attribute("combine").map(str::trim) {
                        None => None,
                        Some("choice") => Some(Combine::Choice),
                        Some("interleave") => Some(Combine::Interleave),
                        Some(other) => {
                            return Err(invalid(
                                child,
                                &child_context,
                                &format!("invalid combine method {other:?}"),
                            ))
                        }
                    };
                    let body = self.group_of(rng_children(child), &child_context)?;
                    self.define(child, &child_context, name, combine, body)?;
                }
                "div" => self.grammar_content(child, &child_context, overrides)?,
                "include" => {
                    let href = required_attribute(child, &child_context, "href")?;
                    let path = resolve_href(&context.path, href);

                    let mut replaced = overrides.clone();
                    collect_overrides(child, &mut replaced);
                    self.include(&path, &child_context, &replaced)?;
                    self.grammar_content(child, &child_context, overrides)?;
                }
                other => {
                    return Err(invalid(
                        child,
                        &child_context,
                        &format!("unexpected {other:?} inside grammar"),
                    ))
                }
            }
        }

        Ok(())
    }

    fn include(&mut self, path: &Path, context: &Context, overrides: &HashSet<String>) -> Result<()> {
        let text = self.read(path)?;
        let document = Document::parse_with_options(&text, parsing_options()).map_err(|err| {
            Error::ParseSchema {
                source: err,
                path: path.to_path_buf(),
            }
        })?;

        let root = document.root_element();
        let context = Context {
            path: path.to_path_buf(),
            library: BUILTIN_LIBRARY.to_string(),
            ..context.clone()
        };
        if !is_rng(root) || root.tag_name().name() != "grammar" {
            return Err(invalid(root, &context, "included schema is not a grammar"));
        }

        let context = context.inherit(root);
        self.grammar_content(root, &context, overrides)?;
        self.open_files.pop();

        Ok(())
    }

    fn define(
        &mut self,
        node: Node<'_, '_>,
        context: &Context,
        name: String,
        combine: Option<Combine>,
        body: Rc<Raw>,
    ) -> Result<()> {
        let scope = context
            .scope
            .ok_or_else(|| invalid(node, context, "definition outside of a grammar"))?;
        let define = self.scopes[scope].defines.entry(name.clone()).or_default();

        match combine {
            None if define.bare => {
                return Err(invalid(
                    node,
                    context,
                    &format!("{} is defined more than once", display_name(&name)),
                ))
            }
            None => define.bare = true,
            Some(combine) if define.combine.is_some_and(|method| method != combine) => {
                return Err(invalid(
                    node,
                    context,
                    &format!("conflicting combine methods for {}", display_name(&name)),
                ))
            }
            Some(combine) => define.combine = Some(combine),
        }
        define.bodies.push(body);

        Ok(())
    }

    fn name_class(&mut self, node: Node<'_, '_>, context: &Context) -> Result<NameClass> {
        let context = context.inherit(node);
        let except = |parser: &mut Self| -> Result<Option<Box<NameClass>>> {
            match rng_children(node).find(|child| child.tag_name().name() == "except") {
                Some(except) => {
                    let context = context.inherit(except);
                    Ok(Some(Box::new(parser.name_class_choice(except, &context)?)))
                }
                None => Ok(None),
            }
        };

        match node.tag_name().name() {
            "name" => Ok(NameClass::Name(qname(
                node,
                text_content(node).trim(),
                &context.ns,
                &context,
            )?)),
            "anyName" => Ok(NameClass::AnyName(except(self)?)),
            "nsName" => Ok(NameClass::NsName(context.ns.clone(), except(self)?)),
            "choice" => self.name_class_choice(node, &context),
            other => Err(invalid(
                node,
                &context,
                &format!("unknown name class {other:?}"),
            )),
        }
    }

    fn name_class_choice(&mut self, node: Node<'_, '_>, context: &Context) -> Result<NameClass> {
        let mut classes = rng_children(node);
        let first = classes
            .next()
            .ok_or_else(|| invalid(node, context, "empty name class choice"))?;
        let mut class = self.name_class(first, context)?;
        for next in classes {
            class = NameClass::Choice(Box::new(class), Box::new(self.name_class(next, context)?));
        }

        Ok(class)
    }

    fn group_of<'a, 'input: 'a>(
        &mut self,
        children: impl Iterator<Item = Node<'a, 'input>>,
        context: &Context,
    ) -> Result<Rc<Raw>> {
        self.fold(children, context, Raw::Empty, Raw::Group)
    }

    fn fold<'a, 'input: 'a>(
        &mut self,
        children: impl Iterator<Item = Node<'a, 'input>>,
        context: &Context,
        unit: Raw,
        combine: fn(Rc<Raw>, Rc<Raw>) -> Raw,
    ) -> Result<Rc<Raw>> {
        let mut folded: Option<Rc<Raw>> = None;
        for child in children {
            let pattern = self.pattern(child, context)?;
            folded = Some(match folded {
                Some(lhs) => Rc::new(combine(lhs, pattern)),
                None => pattern,
            });
        }

        Ok(folded.unwrap_or_else(|| Rc::new(unit)))
    }

    fn datatype(
        &mut self,
        node: Node<'_, '_>,
        context: &Context,
        name: &str,
        params: &[(String, String)],
    ) -> Result<usize> {
        let datatype =
            Datatype::new(&context.library, name, params).map_err(|err| Error::Datatype {
                source: err,
                path: context.path.clone(),
                line: line_of(node),
            })?;

        Ok(self.push_datatype(datatype))
    }

    fn push_datatype(&mut self, datatype: Datatype) -> usize {
        self.datatypes.push(datatype);
        self.datatypes.len() - 1
    }

    fn compile(self, start: &Rc<Raw>) -> Result<Grammar> {
        let mut compiler = Compiler {
            scopes: &self.scopes,
            cache: HashMap::new(),
            active: HashSet::new(),
            elements: Vec::new(),
            pending: Vec::new(),
        };

        let start = compiler.compile(start)?;

        // INVARIANT: Element content is compiled outside of any reference
        // chain, so recursion through elements never trips loop detection.
        while let Some((index, content)) = compiler.pending.pop() {
            let content = compiler.compile(&content)?;
            compiler.elements[index].content = content;
        }

        let elements = compiler.elements;
        Ok(Grammar {
            start,
            elements,
            datatypes: self.datatypes,
        })
    }
}

struct Compiler<'a> {
    scopes: &'a [Scope],
    cache: HashMap<(usize, String), Rc<Pattern>>,
    active: HashSet<(usize, String)>,
    elements: Vec<ElementDecl>,
    pending: Vec<(usize, Rc<Raw>)>,
}

impl Compiler<'_> {
    fn compile(&mut self, raw: &Rc<Raw>) -> Result<Rc<Pattern>> {
        let pattern = match &**raw {
            Raw::Empty => empty(),
            Raw::NotAllowed => not_allowed(),
            Raw::Text => text(),
            Raw::Group(lhs, rhs) => group(self.compile(lhs)?, self.compile(rhs)?),
            Raw::Interleave(lhs, rhs) => interleave(self.compile(lhs)?, self.compile(rhs)?),
            Raw::Choice(lhs, rhs) => choice(self.compile(lhs)?, self.compile(rhs)?),
            Raw::OneOrMore(inner) => one_or_more(self.compile(inner)?),
            Raw::List(inner) => Rc::new(Pattern::List(self.compile(inner)?)),
            Raw::Data(datatype, None) => Rc::new(Pattern::Data(*datatype)),
            Raw::Data(datatype, Some(except)) => {
                Rc::new(Pattern::DataExcept(*datatype, self.compile(except)?))
            }
            Raw::Value(datatype, value) => Rc::new(Pattern::Value(*datatype, value.clone())),
            Raw::Attribute(name, content) => Rc::new(Pattern::Attribute(
                Rc::new(name.clone()),
                self.compile(content)?,
            )),
            Raw::Element(name, content) => {
                self.elements.push(ElementDecl {
                    name: name.clone(),
                    content: not_allowed(),
                });
                let index = self.elements.len() - 1;
                self.pending.push((index, content.clone()));
                Rc::new(Pattern::Element(index))
            }
            Raw::Ref(scope, name, location) => return self.reference(*scope, name, location),
        };

        Ok(pattern)
    }

    fn reference(&mut self, scope: usize, name: &str, location: &Location) -> Result<Rc<Pattern>> {
        let key = (scope, name.to_string());
        if let Some(pattern) = self.cache.get(&key) {
            return Ok(pattern.clone());
        }

        let failure = |message: String| Error::InvalidSchema {
            path: location.path.clone(),
            line: location.line,
            message,
        };

        if self.active.contains(&key) {
            return Err(failure(format!(
                "reference to {} loops without passing through an element",
                display_name(name)
            )));
        }

        let define = self.scopes[scope]
            .defines
            .get(name)
            .ok_or_else(|| failure(format!("undefined reference to {}", display_name(name))))?;
        let method = define.combine.unwrap_or(Combine::Choice);
        let mut bodies = define.bodies.iter().cloned();
        let first = bodies
            .next()
            .ok_or_else(|| failure(format!("undefined reference to {}", display_name(name))))?;
        let body = bodies.fold(first, |lhs, rhs| match method {
            Combine::Choice => Rc::new(Raw::Choice(lhs, rhs)),
            Combine::Interleave => Rc::new(Raw::Interleave(lhs, rhs)),
        });

        self.active.insert(key.clone());
        let pattern = self.compile(&body)?;
        self.active.remove(&key);
        self.cache.insert(key, pattern.clone());

        Ok(pattern)
    }
}

fn is_rng(node: Node<'_, '_>) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(RNG_NS)
}

// Foreign elements are annotations and carry no meaning.
fn rng_children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| is_rng(*child))
}

fn collect_overrides(node: Node<'_, '_>, overrides: &mut HashSet<String>) {
    for child in rng_children(node) {
        match child.tag_name().name() {
            "start" => {
                overrides.insert(START.to_string());
            }
            "define" => {
                if let Some(name) = child.attribute("name") {
                    overrides.insert(name.trim().to_string());
                }
            }
            "div" => collect_overrides(child, overrides),
            _ => {}
        }
    }
}

fn text_content(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect()
}

fn qname(node: Node<'_, '_>, name: &str, default_ns: &str, context: &Context) -> Result<QName> {
    let name = name.trim();
    match name.split_once(':') {
        Some((prefix, local)) => {
            let ns = node.lookup_namespace_uri(Some(prefix)).ok_or_else(|| {
                invalid(
                    node,
                    context,
                    &format!("undeclared namespace prefix {prefix:?}"),
                )
            })?;
            Ok(QName::new(ns, local))
        }
        None => Ok(QName::new(default_ns, name)),
    }
}

fn required_attribute<'a>(node: Node<'a, '_>, context: &Context, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        invalid(
            node,
            context,
            &format!("{:?} misses attribute {name:?}", node.tag_name().name()),
        )
    })
}

fn resolve_href(base: &Path, href: &str) -> PathBuf {
    if href.contains("://") {
        if let Some(path) = reqwest::Url::parse(href)
            .ok()
            .and_then(|url| url.to_file_path().ok())
        {
            return path;
        }
    }

    match base.parent() {
        Some(parent) => parent.join(href),
        None => PathBuf::from(href),
    }
}

fn display_name(name: &str) -> String {
    if name == START {
        "start".to_string()
    } else {
        format!("{name:?}")
    }
}

pub(super) fn line_of(node: Node<'_, '_>) -> u32 {
    node.document().text_pos_at(node.range().start).row
}

fn location(node: Node<'_, '_>, context: &Context) -> Location {
    Location {
        path: context.path.clone(),
        line: line_of(node),
    }
}

fn invalid(node: Node<'_, '_>, context: &Context, message: &str) -> Error {
    Error::InvalidSchema {
        path: context.path.clone(),
        line: line_of(node),
        message: message.to_string(),
    }
}
