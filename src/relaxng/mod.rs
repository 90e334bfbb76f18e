// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! RelaxNG schema engine.
//!
//! Compiles schemas written in the XML syntax of RelaxNG, and checks parsed
//! documents against them. Matching follows the derivative algorithm: each
//! start tag, attribute, text chunk, and end tag of the document transforms
//! the remaining pattern, and the first transformation that leaves nothing
//! acceptable is reported as a violation at that point of the document.
//!
//! ```text
//! let schema = Schema::from_file("schema/osinfo.rng")?;
//! let document = roxmltree::Document::parse(&text)?;
//! schema.validate(&document)?;
//! ```

mod datatype;
mod parse;
mod pattern;
mod xsd_regex;

pub use datatype::{Datatype, DatatypeError, BUILTIN_LIBRARY, XSD_LIBRARY};
pub use parse::RNG_NS;
pub use pattern::QName;

use roxmltree::{Document, Node};
use std::{
    io,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::ErrorKind;
use pattern::{choice, is_whitespace, nullable, Grammar, Pattern};

/// Maximum length of text quoted back in violations.
const QUOTE_LIMIT: usize = 40;

/// Compiled RelaxNG schema.
#[derive(Debug, Clone)]
pub struct Schema {
    grammar: Grammar,
}

impl Schema {
    /// Compile schema file.
    ///
    /// Includes and external references are resolved relative to the file.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadSchema`] or [`Error::ParseSchema`] if a schema
    ///   file cannot be loaded.
    /// - Return [`Error::InvalidSchema`] or [`Error::Datatype`] if the schema
    ///   is not a valid RelaxNG grammar.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let grammar = parse::compile_file(path.as_ref())?;
        Ok(Self { grammar })
    }

    /// Compile schema held in memory.
    ///
    /// Relative references resolve against `path`, which need not exist.
    ///
    /// # Errors
    ///
    /// - Return any error of [`from_file`](Self::from_file).
    pub fn parse(text: &str, path: impl AsRef<Path>) -> Result<Self> {
        let grammar = parse::compile_str(text, path.as_ref())?;
        Ok(Self { grammar })
    }

    /// Validate parsed document.
    ///
    /// # Errors
    ///
    /// - Return [`Violation`] at the first point where the document stops
    ///   matching the schema.
    pub fn validate(&self, document: &Document<'_>) -> Result<(), Violation> {
        let root = document.root_element();
        let residue = self.element_deriv(&self.grammar.start, root)?;
        if !nullable(&residue) {
            return Err(violation(root, "document does not match the schema"));
        }

        Ok(())
    }

    fn element_deriv(
        &self,
        pattern: &Rc<Pattern>,
        node: Node<'_, '_>,
    ) -> Result<Rc<Pattern>, Violation> {
        let grammar = &self.grammar;
        let name = element_name(node);

        let mut deriv = grammar.start_tag_open_deriv(pattern, &name);
        if is_not_allowed(&deriv) {
            return Err(violation(node, &format!("element {name} not allowed here")));
        }

        for attribute in node.attributes() {
            let attribute_name =
                QName::new(attribute.namespace().unwrap_or_default(), attribute.name());
            deriv = grammar.att_deriv(&deriv, &attribute_name, attribute.value());
            if is_not_allowed(&deriv) {
                return Err(violation(
                    node,
                    &format!(
                        "invalid attribute {attribute_name}={} on element {name}",
                        quote(attribute.value())
                    ),
                ));
            }
        }

        deriv = grammar.start_tag_close_deriv(&deriv);
        if is_not_allowed(&deriv) {
            return Err(violation(
                node,
                &format!("element {name} misses a required attribute"),
            ));
        }

        deriv = self.children_deriv(&deriv, node, &name)?;

        deriv = grammar.end_tag_deriv(&deriv);
        if is_not_allowed(&deriv) {
            return Err(violation(node, &format!("element {name} is incomplete")));
        }

        Ok(deriv)
    }

    fn children_deriv(
        &self,
        pattern: &Rc<Pattern>,
        node: Node<'_, '_>,
        name: &QName,
    ) -> Result<Rc<Pattern>, Violation> {
        let grammar = &self.grammar;
        let children = collect_children(node);

        match children.as_slice() {
            [] => {
                let deriv = grammar.text_deriv(pattern, "");
                Ok(choice(pattern.clone(), deriv))
            }
            [Child::Text(text, line)] => {
                let deriv = grammar.text_deriv(pattern, text);
                let deriv = if is_whitespace(text) {
                    choice(pattern.clone(), deriv)
                } else {
                    deriv
                };

                if is_not_allowed(&deriv) {
                    return Err(Violation {
                        line: *line,
                        message: format!("invalid content {} in element {name}", quote(text)),
                    });
                }

                Ok(deriv)
            }
            children => {
                let mut deriv = pattern.clone();
                for child in children {
                    match child {
                        Child::Text(text, _) if is_whitespace(text) => continue,
                        Child::Text(text, line) => {
                            deriv = grammar.text_deriv(&deriv, text);
                            if is_not_allowed(&deriv) {
                                return Err(Violation {
                                    line: *line,
                                    message: format!(
                                        "text {} not allowed in element {name}",
                                        quote(text)
                                    ),
                                });
                            }
                        }
                        Child::Element(child) => deriv = self.element_deriv(&deriv, *child)?,
                    }
                }

                Ok(deriv)
            }
        }
    }
}

#[derive(Debug)]
enum Child<'a, 'input> {
    Text(String, u32),
    Element(Node<'a, 'input>),
}

// Adjacent text nodes merge, comments and processing instructions vanish.
fn collect_children<'a, 'input>(node: Node<'a, 'input>) -> Vec<Child<'a, 'input>> {
    let mut children = Vec::new();
    let mut pending: Option<(String, u32)> = None;

    for child in node.children() {
        if child.is_element() {
            if let Some((text, line)) = pending.take() {
                children.push(Child::Text(text, line));
            }
            children.push(Child::Element(child));
        } else if let Some(text) = child.text().filter(|_| child.is_text()) {
            if let Some((buffer, _)) = pending.as_mut() {
                buffer.push_str(text);
            } else {
                pending = Some((text.to_string(), parse::line_of(child)));
            }
        }
    }

    if let Some((text, line)) = pending {
        children.push(Child::Text(text, line));
    }

    children
}

fn element_name(node: Node<'_, '_>) -> QName {
    let tag = node.tag_name();
    QName::new(tag.namespace().unwrap_or_default(), tag.name())
}

fn is_not_allowed(pattern: &Rc<Pattern>) -> bool {
    **pattern == Pattern::NotAllowed
}

fn quote(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(QUOTE_LIMIT) {
        Some((index, _)) => format!("{:?}...", &text[..index]),
        None => format!("{text:?}"),
    }
}

fn violation(node: Node<'_, '_>, message: &str) -> Violation {
    Violation {
        line: parse::line_of(node),
        message: message.to_string(),
    }
}

/// Document does not conform to schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct Violation {
    /// Line of the offending node, starting at 1.
    pub line: u32,

    /// Description of the mismatch.
    pub message: String,
}

/// Schema compilation error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Schema file cannot be read.
    #[error("failed to read schema {:?}", path.display())]
    ReadSchema {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Schema file is not well-formed XML.
    #[error("failed to parse schema {:?}", path.display())]
    ParseSchema {
        #[source]
        source: roxmltree::Error,
        path: PathBuf,
    },

    /// Schema is not a valid RelaxNG grammar.
    #[error("invalid schema {:?} at line {line}: {message}", path.display())]
    InvalidSchema {
        path: PathBuf,
        line: u32,
        message: String,
    },

    /// Schema uses an unknown datatype or parameter.
    #[error("invalid schema {:?} at line {line}", path.display())]
    Datatype {
        #[source]
        source: DatatypeError,
        path: PathBuf,
        line: u32,
    },
}

impl Error {
    /// Classify error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ReadSchema { .. } => ErrorKind::Io,
            Error::ParseSchema { .. } | Error::InvalidSchema { .. } | Error::Datatype { .. } => {
                ErrorKind::Format
            }
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
