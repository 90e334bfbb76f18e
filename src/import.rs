// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database archive extraction.
//!
//! Unpacks archives produced by [`export`](crate::export) into a database
//! location. The first path segment of every member names the archive prefix
//! and is discarded, so `osinfo-db-20240101/os/foo.xml` lands at `os/foo.xml`
//! beneath the target directory.
//!
//! Extraction is not transactional. Members written before a failure stay on
//! disk.

use std::{
    error::Error as StdError,
    fmt,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Component, Path, PathBuf},
};
use tar::{Archive, EntryType};
use tracing::{debug, info, instrument, warn};
use xz2::read::XzDecoder;

use crate::{
    location::DatabaseLocation,
    release::{self, HttpGet, ReleaseChannel},
    validate, ErrorKind,
};

/// URL schemes fetched over the network instead of read from disk.
pub const REMOTE_SCHEMES: [&str; 2] = ["http://", "https://"];

/// Origin of an archive to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Process standard input.
    Stdin,

    /// Local archive file, never removed.
    File(PathBuf),

    /// Remote archive, downloaded into the cache first.
    Url(String),
}

impl ArchiveSource {
    /// Determine archive source from optional caller argument.
    ///
    /// No argument or `-` means standard input. Arguments starting with
    /// `http://` or `https://` are downloaded. Local `file://` URIs name the
    /// file they point at. Anything else is a local path.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None | Some("-") => Self::Stdin,
            Some(arg) if is_remote(arg) => Self::Url(arg.to_string()),
            Some(arg) => Self::File(
                validate::target_from_arg(arg).unwrap_or_else(|_| PathBuf::from(arg)),
            ),
        }
    }
}

/// Where an import takes its archive from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRequest {
    /// Archive named by the caller, or standard input.
    Archive(ArchiveSource),

    /// Archive published on a release channel.
    Release(ReleaseChannel),
}

impl ImportRequest {
    /// Determine import request from archive argument and release channel.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ConflictingSource`] if both are given.
    pub fn from_args(archive: Option<&str>, channel: Option<ReleaseChannel>) -> Result<Self> {
        match (archive, channel) {
            (Some(archive), Some(channel)) => Err(Error::ConflictingSource {
                archive: archive.to_string(),
                channel,
            }),
            (None, Some(channel)) => Ok(Self::Release(channel)),
            (archive, None) => Ok(Self::Archive(ArchiveSource::from_arg(archive))),
        }
    }
}

impl fmt::Display for ArchiveSource {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveSource::Stdin => write!(fmt, "standard input"),
            ArchiveSource::File(path) => write!(fmt, "{}", path.display()),
            ArchiveSource::Url(url) => write!(fmt, "{url}"),
        }
    }
}

/// Check if archive argument must be fetched over the network.
pub fn is_remote(arg: &str) -> bool {
    REMOTE_SCHEMES.iter().any(|scheme| arg.starts_with(scheme))
}

/// Database archive reader.
///
/// Holds exactly one input stream for the lifetime of an import.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    verbose: bool,
    cache_dir: Option<PathBuf>,
}

impl Default for ArchiveReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveReader {
    /// Construct new archive reader.
    ///
    /// Downloads are stored in the per-user cache directory.
    pub fn new() -> Self {
        Self {
            verbose: false,
            cache_dir: dirs::cache_dir(),
        }
    }

    /// Toggle verbose reporting.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Override directory that downloads are stored in.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Extract archive into database location.
    ///
    /// Remote archives are downloaded into the cache directory first, and
    /// removed again once extraction ends, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - Return [`Error::OpenArchive`] if a local archive cannot be opened.
    /// - Return [`Error::Download`] or [`Error::StoreDownload`] if a remote
    ///   archive cannot be fetched.
    /// - Return any error of [`unpack`](Self::unpack).
    #[instrument(skip(self, transport), level = "debug")]
    pub fn extract(
        &self,
        source: &ArchiveSource,
        target: &DatabaseLocation,
        transport: &dyn HttpGet,
    ) -> Result<()> {
        match source {
            ArchiveSource::Stdin => self.unpack(io::stdin().lock(), target),
            ArchiveSource::File(path) => {
                let file = File::open(path).map_err(|err| Error::OpenArchive {
                    source: err,
                    path: path.clone(),
                })?;
                self.unpack(BufReader::new(file), target)
            }
            ArchiveSource::Url(url) => {
                let download = self.download(url, transport)?;
                let file = File::open(download.path()).map_err(|err| Error::OpenArchive {
                    source: err,
                    path: download.path().to_path_buf(),
                })?;
                self.unpack(BufReader::new(file), target)
            }
        }
    }

    /// Unpack archive stream into database location.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadArchive`] if the stream cannot be read.
    /// - Return [`Error::CorruptArchive`] if the container is corrupt.
    /// - Return [`Error::UnsafeEntryPath`] if a member would escape the
    ///   target directory.
    /// - Return [`Error::UnsupportedEntryType`] if a member is neither a
    ///   regular file nor a directory.
    /// - Return [`Error::CreateDirectory`] or [`Error::WriteFile`] if a
    ///   member cannot be written.
    pub fn unpack(&self, reader: impl Read, target: &DatabaseLocation) -> Result<()> {
        let mut archive = Archive::new(XzDecoder::new(reader));
        let entries = archive.entries().map_err(read_error)?;

        for entry in entries {
            let mut entry = entry.map_err(read_error)?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let kind = entry.header().entry_type();

            match kind {
                EntryType::XGlobalHeader => {
                    debug!("skipping pax global header {name:?}");
                }
                EntryType::Directory => {
                    let path = entry_destination(target.as_path(), &name)?;
                    self.report('d', &name);
                    fs::create_dir_all(&path)
                        .map_err(|err| Error::CreateDirectory { source: err, path })?;
                }
                EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                    let path = entry_destination(target.as_path(), &name)?;
                    self.report('r', &name);
                    write_file(&mut entry, path)?;
                }
                _ => return Err(Error::UnsupportedEntryType { entry: name }),
            }
        }

        Ok(())
    }

    fn download(&self, url: &str, transport: &dyn HttpGet) -> Result<Download> {
        let cache_dir = self.cache_dir.as_ref().ok_or(Error::NoCacheDir)?;
        let name = download_name(url).ok_or_else(|| Error::DownloadName {
            url: url.to_string(),
        })?;
        fs::create_dir_all(cache_dir).map_err(|err| Error::StoreDownload {
            source: err,
            path: cache_dir.clone(),
        })?;

        let path = cache_dir.join(name);
        let file = File::create(&path).map_err(|err| Error::StoreDownload {
            source: err,
            path: path.clone(),
        })?;

        // INVARIANT: Guard exists before the first byte arrives so partial
        // downloads are removed too.
        let download = Download { path };
        let mut sink = BufWriter::new(file);
        let size = transport.get(url, &mut sink)?;
        sink.flush().map_err(|err| Error::StoreDownload {
            source: err,
            path: download.path.clone(),
        })?;
        debug!("downloaded {size} bytes into {:?}", download.path.display());

        Ok(download)
    }

    fn report(&self, tag: char, name: &str) {
        if self.verbose {
            info!("{tag} {name}");
        } else {
            debug!("{tag} {name}");
        }
    }
}

/// Downloaded archive, removed once dropped.
#[derive(Debug)]
struct Download {
    path: PathBuf,
}

impl Download {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("cannot remove download {:?}: {err}", self.path.display());
        }
    }
}

fn download_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let (_, path) = path.split_once('/')?;

    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .filter(|segment| *segment != "." && *segment != "..")
}

/// Discard archive prefix from member name.
///
/// Names without any `/` map onto the target root itself.
pub fn strip_prefix_component(name: &str) -> &str {
    match name.split_once('/') {
        Some((_, rest)) => rest,
        None => "",
    }
}

fn entry_destination(target: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(strip_prefix_component(name));
    let mut destination = target.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => destination.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafeEntryPath {
                    entry: name.to_string(),
                })
            }
        }
    }

    Ok(destination)
}

fn write_file(data: &mut impl Read, path: PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::CreateDirectory {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }

    let file = File::create(&path).map_err(|err| Error::WriteFile {
        source: err,
        path: path.clone(),
    })?;
    let mut sink = BufWriter::new(file);
    io::copy(data, &mut sink)
        .and_then(|_| sink.flush())
        .map_err(|err| {
            if is_os_error(&err) {
                Error::WriteFile { source: err, path }
            } else {
                Error::CorruptArchive { source: err }
            }
        })
}

fn read_error(err: io::Error) -> Error {
    if is_os_error(&err) {
        Error::ReadArchive { source: err }
    } else {
        Error::CorruptArchive { source: err }
    }
}

/// Check if I/O error stems from the operating system.
///
/// Decoders report corrupt input as I/O errors too, those carry no OS error
/// code anywhere in their chain.
pub fn is_os_error(error: &io::Error) -> bool {
    if error.raw_os_error().is_some() {
        return true;
    }

    let mut inner = error.get_ref().map(|err| err as &(dyn StdError + 'static));
    while let Some(err) = inner {
        if err.downcast_ref::<io::Error>().is_some_and(is_os_error) {
            return true;
        }
        inner = err.source();
    }

    false
}

/// Archive extraction error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local archive cannot be opened.
    #[error("cannot open archive {:?}", path.display())]
    OpenArchive {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Archive named together with a release channel.
    #[error("archive {archive:?} cannot be combined with the {channel:?} release channel")]
    ConflictingSource {
        archive: String,
        channel: ReleaseChannel,
    },

    /// Archive stream cannot be read from the system.
    #[error("cannot read archive stream")]
    ReadArchive {
        #[source]
        source: io::Error,
    },

    /// Container or member data is corrupt.
    #[error("cannot decode archive")]
    CorruptArchive {
        #[source]
        source: io::Error,
    },

    /// Member is neither a regular file nor a directory.
    #[error("unsupported file type for {entry:?}")]
    UnsupportedEntryType { entry: String },

    /// Member would land outside of the target directory.
    #[error("refusing to extract {entry:?} outside of target directory")]
    UnsafeEntryPath { entry: String },

    /// Directory cannot be created.
    #[error("cannot create directory {:?}", path.display())]
    CreateDirectory {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Regular file cannot be written.
    #[error("cannot write to {:?}", path.display())]
    WriteFile {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// No per-user cache directory to download into.
    #[error("cannot determine cache directory")]
    NoCacheDir,

    /// Remote URL has no file name to download into.
    #[error("cannot derive download file name from {url}")]
    DownloadName { url: String },

    /// Downloaded archive cannot be stored.
    #[error("could not download file {:?}", path.display())]
    StoreDownload {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Remote archive cannot be fetched.
    #[error(transparent)]
    Download(#[from] release::Error),
}

impl Error {
    /// Classify error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CorruptArchive { .. }
            | Error::UnsupportedEntryType { .. }
            | Error::UnsafeEntryPath { .. } => ErrorKind::Format,
            Error::OpenArchive { .. }
            | Error::ReadArchive { .. }
            | Error::CreateDirectory { .. }
            | Error::WriteFile { .. }
            | Error::NoCacheDir
            | Error::StoreDownload { .. } => ErrorKind::Io,
            Error::ConflictingSource { .. } | Error::DownloadName { .. } => {
                ErrorKind::Configuration
            }
            Error::Download(error) => error.kind(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
