// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database archive creation.
//!
//! Packs a database tree into a single pax tar archive compressed with xz.
//! Every member is placed beneath one top-level directory named
//! `osinfo-db-<version>`, followed by a synthesized `VERSION` file and an
//! optional `LICENSE` file.
//!
//! # Filtering
//!
//! Directories are always archived, whether or not they hold anything worth
//! keeping. Files are archived only when they are neither hidden nor backup
//! copies, and their name ends in `.rng`, `.xml`, or `.ids`. Anything that is
//! not a directory, regular file, or symbolic link aborts the export.
//!
//! # Reproducibility
//!
//! One timestamp is captured per export and stamped onto every member, and
//! children are visited in file name order. Exporting the same tree twice with
//! the same version and timestamp yields byte-identical archives.

use chrono::Utc;
use ignore::{DirEntry, WalkBuilder};
use std::{
    fs::{self, File, FileType},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tar::{Builder, EntryType, Header};
use tracing::{debug, info, instrument};
use xz2::write::XzEncoder;

use crate::{ErrorKind, LICENSE_FILE, VERSION_FILE};

/// Name of the database, used as archive prefix.
pub const DB_NAME: &str = "osinfo-db";

/// Suffixes of files worth archiving.
pub const ARCHIVED_SUFFIXES: [&str; 3] = [".rng", ".xml", ".ids"];

/// Buffer size used to stream file content into the archive.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

const XZ_PRESET: u32 = 6;
const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Destination of an exported archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTarget {
    /// Process standard output.
    Stdout,

    /// Named file, replaced if it exists.
    File(PathBuf),
}

impl ArchiveTarget {
    /// Determine archive target from optional caller argument.
    ///
    /// No argument means `<prefix>.tar.xz` in the working directory. An
    /// argument of `-` means standard output.
    pub fn from_arg(arg: Option<&Path>, options: &ExportOptions) -> Self {
        match arg {
            Some(path) if path.as_os_str() == "-" => Self::Stdout,
            Some(path) => Self::File(path.to_path_buf()),
            None => Self::File(PathBuf::from(format!("{}.tar.xz", options.prefix()))),
        }
    }
}

/// Settings of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Version string stored in `VERSION` and used in the archive prefix.
    pub version: String,

    /// Optional license file bundled as `LICENSE`.
    pub license: Option<PathBuf>,

    /// Report every archived member.
    pub verbose: bool,

    /// Seconds since the epoch stamped onto every member.
    pub timestamp: u64,
}

impl ExportOptions {
    /// Construct new export options.
    ///
    /// Derives the version from today's UTC date as `YYYYMMDD` when none is
    /// given. Captures the archive timestamp.
    pub fn new(version: Option<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        Self {
            version: version.unwrap_or_else(default_version),
            license: None,
            verbose: false,
            timestamp,
        }
    }

    /// Bundle license file.
    pub fn with_license(mut self, license: Option<PathBuf>) -> Self {
        self.license = license;
        self
    }

    /// Toggle verbose reporting.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Override captured archive timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Top-level directory name inside the archive.
    pub fn prefix(&self) -> String {
        format!("{DB_NAME}-{}", self.version)
    }
}

/// Default version string, today's UTC date as `YYYYMMDD`.
pub fn default_version() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

/// Kind of filesystem object met during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    SymbolicLink,
    Directory,
    Unsupported,
}

impl EntryKind {
    fn classify(entry: &DirEntry) -> Self {
        match entry.file_type() {
            Some(file_type) if file_type.is_file() && entry.path_is_symlink() => {
                EntryKind::SymbolicLink
            }
            Some(file_type) => EntryKind::from(file_type),
            None => EntryKind::Unsupported,
        }
    }
}

impl From<FileType> for EntryKind {
    fn from(file_type: FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::Regular
        } else if file_type.is_symlink() {
            EntryKind::SymbolicLink
        } else {
            EntryKind::Unsupported
        }
    }
}

/// Database archive writer.
///
/// Holds exactly one output stream for the lifetime of an export. Entries are
/// written strictly in traversal order.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    options: ExportOptions,
}

impl ArchiveWriter {
    /// Construct new archive writer.
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    /// Options this writer exports with.
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Export database tree to archive target.
    ///
    /// A failed export may leave a partially written file behind.
    ///
    /// # Errors
    ///
    /// - Return [`Error::CreateTarget`] if the target file cannot be created.
    /// - Return any error of [`build`](Self::build).
    #[instrument(skip(self, source), level = "debug")]
    pub fn write_to(&self, source: impl AsRef<Path>, target: &ArchiveTarget) -> Result<()> {
        match target {
            ArchiveTarget::Stdout => {
                let mut sink = self.build(source, io::stdout().lock())?;
                sink.flush().map_err(|err| Error::FinishArchive { source: err })
            }
            ArchiveTarget::File(path) => {
                let file = File::create(path).map_err(|err| Error::CreateTarget {
                    source: err,
                    path: path.clone(),
                })?;
                let mut sink = self.build(source, BufWriter::new(file))?;
                sink.flush().map_err(|err| Error::FinishArchive { source: err })
            }
        }
    }

    /// Serialize database tree into archive stream.
    ///
    /// Traverses the source tree depth first, then appends `VERSION` and the
    /// optional `LICENSE` before finalizing the container. Returns the sink
    /// once the compression footer has been written.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Walk`] if the source tree cannot be traversed.
    /// - Return [`Error::UnsupportedFileType`] if the source tree holds a
    ///   special file.
    /// - Return [`Error::ReadSource`] if a member cannot be read.
    /// - Return [`Error::WriteEntry`] if the archive cannot be written.
    pub fn build<W: Write>(&self, source: impl AsRef<Path>, sink: W) -> Result<W> {
        let source = source.as_ref();
        let prefix = self.options.prefix();
        let mut archive = Builder::new(XzEncoder::new(sink, XZ_PRESET));

        // INVARIANT: Sorted traversal keeps repeated exports byte-identical.
        let walker = WalkBuilder::new(source)
            .standard_filters(false)
            .follow_links(true)
            .sort_by_file_name(|lhs, rhs| lhs.cmp(rhs))
            .build();

        for entry in walker {
            let entry = entry.map_err(|err| Error::Walk {
                source: err,
                path: source.to_path_buf(),
            })?;
            self.append_entry(&mut archive, source, &prefix, &entry)?;
        }

        self.append_version(&mut archive, &prefix)?;
        if let Some(license) = &self.options.license {
            self.append_license(&mut archive, &prefix, license)?;
        }

        let encoder = archive
            .into_inner()
            .map_err(|err| Error::FinishArchive { source: err })?;
        encoder
            .finish()
            .map_err(|err| Error::FinishArchive { source: err })
    }

    fn append_entry<W: Write>(
        &self,
        archive: &mut Builder<W>,
        base: &Path,
        prefix: &str,
        entry: &DirEntry,
    ) -> Result<()> {
        let path = entry.path();
        let relative = relative_entry_path(base, path)?;
        let entry_path = if relative.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{relative}")
        };

        match EntryKind::classify(entry) {
            EntryKind::Regular | EntryKind::SymbolicLink => {
                let name = entry.file_name().to_string_lossy();
                if is_backup(&name) {
                    debug!("ignoring backup file {:?}", path.display());
                    return Ok(());
                }

                if is_hidden(&name) {
                    debug!("ignoring hidden file {:?}", path.display());
                    return Ok(());
                }

                if !is_archived(&name) {
                    return Ok(());
                }

                let size = fs::metadata(path)
                    .map_err(|err| Error::ReadSource {
                        source: err,
                        path: path.to_path_buf(),
                    })?
                    .len();
                let file = File::open(path).map_err(|err| Error::ReadSource {
                    source: err,
                    path: path.to_path_buf(),
                })?;
                let data = BufReader::with_capacity(COPY_BUFFER_SIZE, file).take(size);

                self.report('r', &entry_path);
                self.append(archive, EntryType::Regular, &entry_path, size, data)
            }
            EntryKind::Directory => {
                self.report('d', &entry_path);
                self.append(archive, EntryType::Directory, &entry_path, 0, io::empty())
            }
            EntryKind::Unsupported => Err(Error::UnsupportedFileType {
                path: path.to_path_buf(),
            }),
        }
    }

    fn append_version<W: Write>(&self, archive: &mut Builder<W>, prefix: &str) -> Result<()> {
        let entry_path = format!("{prefix}/{VERSION_FILE}");
        let version = self.options.version.as_bytes();

        self.report('r', &entry_path);
        self.append(
            archive,
            EntryType::Regular,
            &entry_path,
            version.len() as u64,
            version,
        )
    }

    fn append_license<W: Write>(
        &self,
        archive: &mut Builder<W>,
        prefix: &str,
        license: &Path,
    ) -> Result<()> {
        let entry_path = format!("{prefix}/{LICENSE_FILE}");
        let size = fs::metadata(license)
            .map_err(|err| Error::ReadSource {
                source: err,
                path: license.to_path_buf(),
            })?
            .len();
        let file = File::open(license).map_err(|err| Error::ReadSource {
            source: err,
            path: license.to_path_buf(),
        })?;
        let data = BufReader::with_capacity(COPY_BUFFER_SIZE, file).take(size);

        self.report('r', &entry_path);
        self.append(archive, EntryType::Regular, &entry_path, size, data)
    }

    fn append<W: Write>(
        &self,
        archive: &mut Builder<W>,
        kind: EntryType,
        entry_path: &str,
        size: u64,
        data: impl Read,
    ) -> Result<()> {
        let mode = if kind == EntryType::Directory {
            DIR_MODE
        } else {
            FILE_MODE
        };

        let mut header = Header::new_ustar();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(self.options.timestamp);

        // INVARIANT: Access, change, and modify times all equal the archive
        // timestamp.
        let stamp = self.options.timestamp.to_string();
        let times = [
            ("atime", stamp.as_bytes()),
            ("ctime", stamp.as_bytes()),
            ("mtime", stamp.as_bytes()),
        ];

        archive
            .append_pax_extensions(times)
            .and_then(|_| archive.append_data(&mut header, entry_path, data))
            .map_err(|err| Error::WriteEntry {
                source: err,
                entry: entry_path.to_string(),
            })
    }

    fn report(&self, tag: char, entry_path: &str) {
        if self.options.verbose {
            info!("{tag} {entry_path}");
        } else {
            debug!("{tag} {entry_path}");
        }
    }
}

/// Check if file name marks a backup copy.
pub fn is_backup(name: &str) -> bool {
    name.ends_with('~')
}

/// Check if file name marks a hidden file.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Check if file name carries one of the archived suffixes.
pub fn is_archived(name: &str) -> bool {
    ARCHIVED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn relative_entry_path(base: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::NonUtf8Path {
                path: path.to_path_buf(),
            })?;
        parts.push(part);
    }

    Ok(parts.join("/"))
}

/// Archive creation error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Source tree cannot be traversed.
    #[error("cannot read directory tree at {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Source tree holds something other than files and directories.
    #[error("cannot archive special file type {:?}", path.display())]
    UnsupportedFileType { path: PathBuf },

    /// Source path cannot be represented in an archive entry name.
    #[error("cannot archive non UTF-8 path {:?}", path.display())]
    NonUtf8Path { path: PathBuf },

    /// Member content or metadata cannot be read.
    #[error("cannot read file {:?}", path.display())]
    ReadSource {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Target archive file cannot be created.
    #[error("cannot open archive {:?}", path.display())]
    CreateTarget {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Archive member cannot be written.
    #[error("cannot write archive entry {entry:?}")]
    WriteEntry {
        #[source]
        source: io::Error,
        entry: String,
    },

    /// Archive trailer or compression footer cannot be written.
    #[error("cannot finish writing archive")]
    FinishArchive {
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Classify error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFileType { .. } | Error::NonUtf8Path { .. } => ErrorKind::Format,
            Error::Walk { .. }
            | Error::ReadSource { .. }
            | Error::CreateTarget { .. }
            | Error::WriteEntry { .. }
            | Error::FinishArchive { .. } => ErrorKind::Io,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
