// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Published release discovery.
//!
//! The osinfo project publishes two JSON documents describing downloadable
//! database archives: one for the latest release, and one for the latest
//! nightly build. Both share the same layout:
//!
//! ```json
//! {"release": {"version": "20240101", "archive": "https://..."}}
//! ```
//!
//! The `version` member is only needed for the latest release, where it is
//! compared against the `VERSION` marker of the installed database to decide
//! if a download is worth it at all. Versions compare byte-wise, never as
//! dates or semantic versions.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};
use tracing::{debug, info, instrument};

use crate::{location::DatabaseLocation, ErrorKind, VERSION_FILE};

/// Metadata document of the latest published release.
pub const LATEST_URL: &str = "https://db.libosinfo.org/latest.json";

/// Metadata document of the latest nightly build.
pub const NIGHTLY_URL: &str = "https://db.libosinfo.org/nightly.json";

/// Blocking HTTP GET.
///
/// Layer of indirection over the HTTP transport so release discovery and
/// downloads can be driven without a network.
pub trait HttpGet {
    /// Stream body of successful GET request into sink.
    ///
    /// Returns number of bytes written.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Status`] if the server answers with a non-success
    ///   status.
    /// - Return [`Error::Transport`] if the request cannot be completed.
    fn get(&self, url: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// HTTP transport through reqwest.
///
/// Built once per run and handed to every operation that needs the network.
/// Requests block for their full duration with no timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    progress: bool,
}

impl ReqwestTransport {
    /// Construct new reqwest transport.
    ///
    /// # Errors
    ///
    /// - Return [`Error::BuildClient`] if the HTTP client cannot be set up.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(None::<Duration>)
            .build()
            .map_err(Error::BuildClient)?;

        Ok(Self {
            client,
            progress: false,
        })
    }

    /// Toggle download progress bar.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn progress_bar(&self, length: Option<u64>) -> Result<ProgressBar> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }

        let bar = match length {
            Some(length) => ProgressBar::new(length),
            None => ProgressBar::new_spinner(),
        };
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(bar)
    }
}

impl HttpGet for ReqwestTransport {
    #[instrument(skip(self, sink), level = "debug")]
    fn get(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| Error::Transport {
                source: err,
                url: url.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let bar = self.progress_bar(response.content_length())?;
        bar.set_message(url.to_string());
        let mut writer = bar.wrap_write(sink);
        let written = response
            .copy_to(&mut writer)
            .map_err(|err| Error::Transport {
                source: err,
                url: url.to_string(),
            })?;
        bar.finish_and_clear();
        debug!("received {written} bytes from {url}");

        Ok(written)
    }
}

/// Published release feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseChannel {
    /// Latest stable release, installed only when newer.
    Latest,

    /// Latest nightly build, installed unconditionally.
    Nightly,
}

impl ReleaseChannel {
    /// Metadata document URL of this channel.
    pub fn url(self) -> &'static str {
        match self {
            ReleaseChannel::Latest => LATEST_URL,
            ReleaseChannel::Nightly => NIGHTLY_URL,
        }
    }
}

/// Release description extracted from a metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMetadata {
    /// Published version, present whenever it was requested.
    pub version: Option<String>,

    /// Location of the release archive.
    pub archive: String,
}

impl ReleaseMetadata {
    /// Parse release metadata document.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Parse`] if the body is not valid JSON of the expected
    ///   shape.
    /// - Return [`Error::MissingField`] if `release`, `release.archive`, or a
    ///   requested `release.version` is absent.
    pub fn from_json(body: &[u8], url: &str, require_version: bool) -> Result<Self> {
        let document: ReleaseDocument =
            serde_json::from_slice(body).map_err(|err| Error::Parse {
                source: err,
                url: url.to_string(),
            })?;

        let missing = |field: &'static str| Error::MissingField {
            field,
            url: url.to_string(),
        };

        let release = document.release.ok_or_else(|| missing("release"))?;
        if require_version && release.version.is_none() {
            return Err(missing("version"));
        }
        let archive = release.archive.ok_or_else(|| missing("archive"))?;

        Ok(Self {
            version: release.version,
            archive,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseDocument {
    release: Option<ReleaseFields>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFields {
    version: Option<String>,
    archive: Option<String>,
}

/// Outcome of comparing the installed database with a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePlan {
    /// Installed database is at least as new as the release.
    UpToDate,

    /// Release archive at this location should be imported.
    Download(String),
}

/// Fetch and parse release metadata document.
///
/// # Errors
///
/// - Return [`Error::Status`] or [`Error::Transport`] if the document
///   cannot be retrieved.
/// - Return [`Error::Parse`] or [`Error::MissingField`] if the document is
///   malformed.
#[instrument(skip(transport), level = "debug")]
pub fn fetch_release(
    transport: &dyn HttpGet,
    url: &str,
    require_version: bool,
) -> Result<ReleaseMetadata> {
    let mut body = Vec::new();
    transport.get(url, &mut body)?;
    ReleaseMetadata::from_json(&body, url, require_version)
}

/// Read version marker of an installed database.
///
/// An absent marker means nothing is installed yet.
///
/// # Errors
///
/// - Return [`Error::ReadVersion`] if the marker exists but cannot be read.
pub fn installed_version(location: &DatabaseLocation) -> Result<Option<String>> {
    let path = location.join(VERSION_FILE);
    match fs::read(&path) {
        Ok(content) => Ok(Some(String::from_utf8_lossy(&content).into_owned())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::ReadVersion { source: err, path }),
    }
}

/// Decide if latest release should replace installed database.
pub fn plan_latest(installed: Option<&str>, release: &ReleaseMetadata) -> UpdatePlan {
    match (installed, release.version.as_deref()) {
        (Some(installed), Some(published)) if installed >= published => UpdatePlan::UpToDate,
        _ => UpdatePlan::Download(release.archive.clone()),
    }
}

/// Determine what to import for a release channel.
///
/// Nightly builds are always downloaded. The latest release is downloaded only
/// when it is newer than the database installed at `location`.
///
/// # Errors
///
/// - Return any error of [`fetch_release`] or [`installed_version`].
pub fn check_release(
    transport: &dyn HttpGet,
    channel: ReleaseChannel,
    location: &DatabaseLocation,
) -> Result<UpdatePlan> {
    match channel {
        ReleaseChannel::Nightly => {
            let release = fetch_release(transport, channel.url(), false)?;
            Ok(UpdatePlan::Download(release.archive))
        }
        ReleaseChannel::Latest => {
            let installed = installed_version(location)?;
            let release = fetch_release(transport, channel.url(), true)?;
            let plan = plan_latest(installed.as_deref(), &release);
            if plan == UpdatePlan::UpToDate {
                info!(
                    "installed version {} is up to date",
                    installed.as_deref().unwrap_or_default()
                );
            }

            Ok(plan)
        }
    }
}

/// Release discovery and transport error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client cannot be constructed.
    #[error("cannot set up HTTP client")]
    BuildClient(#[source] reqwest::Error),

    /// Request cannot be completed.
    #[error("could not access {url}")]
    Transport {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// Server answered with a non-success status.
    #[error("could not access {url}: {status} {reason}")]
    Status {
        url: String,
        status: u16,
        reason: String,
    },

    /// Response body cannot be stored.
    #[error("could not store content of {url}")]
    WriteBody {
        #[source]
        source: io::Error,
        url: String,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    ProgressTemplate(#[from] indicatif::style::TemplateError),

    /// Metadata document is not valid JSON of the expected shape.
    #[error("failed to parse the content of {url}")]
    Parse {
        #[source]
        source: serde_json::Error,
        url: String,
    },

    /// Metadata document lacks a required member.
    #[error("failed to read the {field:?} member of {url}")]
    MissingField { field: &'static str, url: String },

    /// Installed version marker cannot be read.
    #[error("failed to read installed version from {:?}", path.display())]
    ReadVersion {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

impl Error {
    /// Classify error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BuildClient(_) | Error::Transport { .. } | Error::Status { .. } => {
                ErrorKind::Network
            }
            Error::Parse { .. } | Error::MissingField { .. } => ErrorKind::Format,
            Error::WriteBody { .. } | Error::ReadVersion { .. } => ErrorKind::Io,
            Error::ProgressTemplate(_) => ErrorKind::Configuration,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use simple_test_case::test_case;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct FakeTransport {
        routes: HashMap<String, (u16, Vec<u8>)>,
    }

    impl FakeTransport {
        fn route(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(url.to_string(), (status, body.as_bytes().to_vec()));
            self
        }
    }

    impl HttpGet for FakeTransport {
        fn get(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
            match self.routes.get(url) {
                Some((200, body)) => {
                    sink.write_all(body).map_err(|err| Error::WriteBody {
                        source: err,
                        url: url.to_string(),
                    })?;
                    Ok(body.len() as u64)
                }
                Some((status, _)) => Err(Error::Status {
                    url: url.to_string(),
                    status: *status,
                    reason: "Service Unavailable".into(),
                }),
                None => Err(Error::Status {
                    url: url.to_string(),
                    status: 404,
                    reason: "Not Found".into(),
                }),
            }
        }
    }

    const LATEST: &str = indoc! {r#"
        {
            "release": {
                "version": "20200101",
                "archive": "https://example.org/osinfo-db-20200101.tar.xz"
            }
        }
    "#};

    #[test]
    fn parse_release_metadata() -> anyhow::Result<()> {
        let result = ReleaseMetadata::from_json(LATEST.as_bytes(), LATEST_URL, true)?;
        let expect = ReleaseMetadata {
            version: Some("20200101".into()),
            archive: "https://example.org/osinfo-db-20200101.tar.xz".into(),
        };
        assert_eq!(result, expect);

        Ok(())
    }

    #[test_case(r#"{"nope": {}}"#, "release"; "missing release")]
    #[test_case(r#"{"release": {"version": "1"}}"#, "archive"; "missing archive")]
    #[test_case(r#"{"release": {"archive": "x"}}"#, "version"; "missing version")]
    #[test]
    fn parse_reports_missing_field(body: &str, expect: &str) {
        let error = ReleaseMetadata::from_json(body.as_bytes(), LATEST_URL, true).unwrap_err();
        match &error {
            Error::MissingField { field, url } => {
                assert_eq!(*field, expect);
                assert_eq!(url, LATEST_URL);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(error.kind(), ErrorKind::Format);
    }

    #[test]
    fn parse_nightly_without_version() -> anyhow::Result<()> {
        let result = ReleaseMetadata::from_json(br#"{"release": {"archive": "x"}}"#, NIGHTLY_URL, false)?;
        assert_eq!(result.version, None);
        assert_eq!(result.archive, "x");

        Ok(())
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let error = ReleaseMetadata::from_json(b"<html>", LATEST_URL, true).unwrap_err();
        assert!(matches!(error, Error::Parse { .. }));
    }

    #[test_case(Some("20200101"), false; "same version")]
    #[test_case(Some("20200102"), false; "newer installed")]
    #[test_case(Some("20191231"), true; "older installed")]
    #[test_case(None, true; "nothing installed")]
    #[test]
    fn latest_version_gating(installed: Option<&str>, download: bool) {
        let release = ReleaseMetadata {
            version: Some("20200101".into()),
            archive: "https://example.org/db.tar.xz".into(),
        };

        let plan = plan_latest(installed, &release);
        if download {
            assert_eq!(plan, UpdatePlan::Download("https://example.org/db.tar.xz".into()));
        } else {
            assert_eq!(plan, UpdatePlan::UpToDate);
        }
    }

    #[test]
    fn check_latest_reads_installed_version() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let location = DatabaseLocation::new(dir.path());
        let transport = FakeTransport::default().route(LATEST_URL, 200, LATEST);

        let plan = check_release(&transport, ReleaseChannel::Latest, &location)?;
        assert!(matches!(plan, UpdatePlan::Download(_)));

        fs::write(location.join(VERSION_FILE), "20200101")?;
        let plan = check_release(&transport, ReleaseChannel::Latest, &location)?;
        assert_eq!(plan, UpdatePlan::UpToDate);

        Ok(())
    }

    #[test]
    fn check_nightly_always_downloads() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let location = DatabaseLocation::new(dir.path());
        fs::write(location.join(VERSION_FILE), "99999999")?;
        let transport = FakeTransport::default().route(
            NIGHTLY_URL,
            200,
            r#"{"release": {"archive": "https://example.org/nightly.tar.xz"}}"#,
        );

        let plan = check_release(&transport, ReleaseChannel::Nightly, &location)?;
        assert_eq!(plan, UpdatePlan::Download("https://example.org/nightly.tar.xz".into()));

        Ok(())
    }

    #[test]
    fn fetch_reports_unsuccessful_status() {
        let transport = FakeTransport::default().route(LATEST_URL, 503, "");
        let error = fetch_release(&transport, LATEST_URL, true).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Network);
        assert!(error.to_string().contains(LATEST_URL));
        assert!(error.to_string().contains("503"));
    }
}
