// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tooling to distribute the osinfo database.
//!
//! The osinfo database is a small versioned tree of XML documents that can be
//! installed into one of three standard __tiers__: system-wide, local-admin,
//! or per-user. A custom directory may also stand in for any of them. This
//! crate provides the pieces needed to move that tree around:
//!
//! - [`location`] maps a requested tier to an absolute directory.
//! - [`export`] packs a database tree into a pax tar archive compressed with
//!   xz.
//! - [`import`] unpacks such an archive again, optionally downloading it
//!   first.
//! - [`release`] discovers published releases and decides whether an update
//!   is needed.
//! - [`validate`] checks every XML document of a tree against the RelaxNG
//!   schema shipped with the database, using the engine in [`relaxng`].
//!
//! Every operation is synchronous and fails fast. The first error aborts the
//! whole pipeline.

pub mod export;
pub mod import;
pub mod location;
pub mod relaxng;
pub mod release;
pub mod validate;

pub use export::{ArchiveTarget, ArchiveWriter, ExportOptions};
pub use import::{ArchiveReader, ArchiveSource, ImportRequest};
pub use location::{DatabaseLocation, LocationResolver, Tier, TierFlags};
pub use release::{HttpGet, ReleaseChannel, ReleaseMetadata, ReqwestTransport, UpdatePlan};
pub use validate::Validator;

/// Name of the marker file holding the installed database version.
pub const VERSION_FILE: &str = "VERSION";

/// Name of the license file optionally bundled into archives.
pub const LICENSE_FILE: &str = "LICENSE";

/// Broad classification of every failure the crate can report.
///
/// Each module has its own error type. They all map onto one of these kinds
/// through their `kind` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Conflicting or unexpected caller configuration.
    Configuration,

    /// Filesystem read, write, stat, or enumeration failure.
    Io,

    /// Malformed archive, document, schema, or metadata.
    Format,

    /// Transport failure or unsuccessful HTTP status.
    Network,

    /// Requested file is missing from every searched location.
    NotFound,
}
