// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database validation.
//!
//! Checks every XML document of a database tree against the RelaxNG schema
//! shipped with the database. Only files ending in `.xml` are parsed, every
//! other regular file is accepted as is. Validation stops at the first
//! failure.

use ignore::WalkBuilder;
use reqwest::Url;
use roxmltree::Document;
use std::{
    fs, io,
    path::{Path, PathBuf},
    string::FromUtf8Error,
};
use tracing::{debug, info, instrument};

use crate::{
    export::EntryKind,
    location::{self, LocationResolver, Tier},
    relaxng::{self, Schema},
    ErrorKind,
};

/// Location of the schema relative to a database location.
pub const SCHEMA_FILE: &str = "schema/osinfo.rng";

/// Suffix of files that get validated.
pub const DOCUMENT_SUFFIX: &str = ".xml";

/// Database validator.
///
/// Holds one compiled schema for any number of validation runs.
#[derive(Debug, Clone)]
pub struct Validator {
    schema: Schema,
    verbose: bool,
}

impl Validator {
    /// Construct new validator from schema file.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Schema`] if the schema cannot be compiled.
    #[instrument(skip(schema), level = "debug")]
    pub fn new(schema: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let schema = Schema::from_file(schema)?;
        Ok(Self::from_schema(schema))
    }

    /// Construct new validator from compiled schema.
    pub fn from_schema(schema: Schema) -> Self {
        Self {
            schema,
            verbose: false,
        }
    }

    /// Toggle verbose reporting.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Validate every target in order.
    ///
    /// # Errors
    ///
    /// - Return the first error of [`validate_path`](Self::validate_path).
    pub fn validate_all<P: AsRef<Path>>(&self, targets: &[P]) -> Result<()> {
        for target in targets {
            self.validate_path(target)?;
        }

        Ok(())
    }

    /// Validate directory tree or single file.
    ///
    /// Symbolic links are followed.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Walk`] if the tree cannot be traversed.
    /// - Return [`Error::UnsupportedFileType`] if the tree holds a special
    ///   file.
    /// - Return any error of [`validate_file`](Self::validate_file).
    #[instrument(skip(self, target), level = "debug")]
    pub fn validate_path(&self, target: impl AsRef<Path>) -> Result<()> {
        let target = target.as_ref();
        let walker = WalkBuilder::new(target)
            .standard_filters(false)
            .follow_links(true)
            .sort_by_file_name(|lhs, rhs| lhs.cmp(rhs))
            .build();

        for entry in walker {
            let entry = entry.map_err(|err| Error::Walk {
                source: err,
                path: target.to_path_buf(),
            })?;

            let kind = entry
                .file_type()
                .map(EntryKind::from)
                .unwrap_or(EntryKind::Unsupported);
            match kind {
                EntryKind::Directory => continue,
                EntryKind::Regular | EntryKind::SymbolicLink => self.validate_file(entry.path())?,
                EntryKind::Unsupported => {
                    return Err(Error::UnsupportedFileType {
                        path: entry.path().to_path_buf(),
                    })
                }
            }
        }

        Ok(())
    }

    /// Validate single file.
    ///
    /// Files whose name does not end in `.xml` are accepted without being
    /// read.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadDocument`] if the file cannot be read.
    /// - Return [`Error::DecodeDocument`] if the file is not UTF-8.
    /// - Return [`Error::ParseDocument`] if the file is not well-formed XML.
    /// - Return [`Error::Invalid`] if the document violates the schema.
    pub fn validate_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !is_document(path) {
            debug!("skipping {:?}", path.display());
            return Ok(());
        }

        let uri = file_uri(path);
        if self.verbose {
            info!("processing {uri}");
        } else {
            debug!("processing {uri}");
        }

        let bytes = fs::read(path).map_err(|err| Error::ReadDocument {
            source: err,
            uri: uri.clone(),
        })?;
        let text = String::from_utf8(bytes).map_err(|err| Error::DecodeDocument {
            source: err,
            uri: uri.clone(),
        })?;
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let document =
            Document::parse_with_options(&text, options).map_err(|err| Error::ParseDocument {
                line: err.pos().row,
                source: err,
                uri: uri.clone(),
            })?;

        self.schema
            .validate(&document)
            .map_err(|violation| Error::Invalid {
                uri,
                line: violation.line,
                message: violation.message,
            })
    }
}

/// Check if file is subject to validation.
pub fn is_document(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with(DOCUMENT_SUFFIX))
}

/// Interpret validation target argument.
///
/// Accepts plain paths and `file://` URIs.
///
/// # Errors
///
/// - Return [`Error::InvalidTarget`] if a URI does not name a local file.
pub fn target_from_arg(arg: &str) -> Result<PathBuf> {
    if !arg.contains("://") {
        return Ok(PathBuf::from(arg));
    }

    Url::parse(arg)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| Error::InvalidTarget {
            arg: arg.to_string(),
        })
}

/// Select validation targets.
///
/// Explicit targets are validated as given. Without any, the database
/// location of the tier is validated instead.
///
/// # Errors
///
/// - Return [`Error::ConflictingTargets`] if targets are given together
///   with an explicit tier.
/// - Return [`Error::InvalidTarget`] if a target is not a local file.
/// - Return [`Error::Location`] if the tier cannot be resolved.
pub fn select_targets(
    resolver: &LocationResolver,
    tier: &Tier,
    args: &[String],
) -> Result<Vec<PathBuf>> {
    if args.is_empty() {
        return Ok(vec![resolver.resolve(tier)?.into_path_buf()]);
    }

    if tier.is_explicit() {
        return Err(Error::ConflictingTargets);
    }

    args.iter().map(|arg| target_from_arg(arg)).collect()
}

/// Render path as `file://` URI for diagnostics.
pub fn file_uri(path: &Path) -> String {
    std::path::absolute(path)
        .ok()
        .and_then(|path| Url::from_file_path(path).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Database validation error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Schema cannot be compiled.
    #[error(transparent)]
    Schema(#[from] relaxng::Error),

    /// Target cannot be traversed.
    #[error("cannot read directory tree at {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Target holds something other than files and directories.
    #[error("unable to handle file type of {:?}", path.display())]
    UnsupportedFileType { path: PathBuf },

    /// Database location cannot be resolved.
    #[error(transparent)]
    Location(#[from] location::Error),

    /// Targets given together with a database location option.
    #[error("paths cannot be combined with a database location option")]
    ConflictingTargets,

    /// Target argument is neither a path nor a local file URI.
    #[error("{arg:?} is not a local file")]
    InvalidTarget { arg: String },

    /// Document cannot be read.
    #[error("unable to read {uri}")]
    ReadDocument {
        #[source]
        source: io::Error,
        uri: String,
    },

    /// Document is not UTF-8 encoded.
    #[error("unable to decode {uri} as UTF-8")]
    DecodeDocument {
        #[source]
        source: FromUtf8Error,
        uri: String,
    },

    /// Document is not well-formed XML.
    #[error("unable to parse XML document {uri}:{line}")]
    ParseDocument {
        #[source]
        source: roxmltree::Error,
        uri: String,
        line: u32,
    },

    /// Document violates the schema.
    #[error("unable to validate XML document {uri}:{line}: {message}")]
    Invalid {
        uri: String,
        line: u32,
        message: String,
    },
}

impl Error {
    /// Classify error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Schema(error) => error.kind(),
            Error::Location(error) => error.kind(),
            Error::Walk { .. } | Error::ReadDocument { .. } => ErrorKind::Io,
            Error::UnsupportedFileType { .. }
            | Error::DecodeDocument { .. }
            | Error::ParseDocument { .. }
            | Error::Invalid { .. } => ErrorKind::Format,
            Error::ConflictingTargets | Error::InvalidTarget { .. } => ErrorKind::Configuration,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
