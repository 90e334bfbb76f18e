// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{scratch, FakeTransport, TreeFixture};

use anyhow::Result;
use indoc::formatdoc;
use osinfo_db_tools::{
    release::{check_release, LATEST_URL, NIGHTLY_URL},
    ArchiveReader, ArchiveSource, DatabaseLocation, ErrorKind, ReleaseChannel, UpdatePlan,
    VERSION_FILE,
};
use simple_test_case::test_case;
use std::fs;

const ARCHIVE_URL: &str = "https://releases.example.org/osinfo-db-20200101.tar.xz";

fn latest_json(version: &str) -> String {
    formatdoc! {r#"
        {{
          "release": {{
            "version": "{version}",
            "archive": "{url}"
          }}
        }}
    "#, version = version, url = ARCHIVE_URL}
}

fn nightly_json() -> String {
    formatdoc! {r#"
        {{ "release": {{ "archive": "{url}" }} }}
    "#, url = ARCHIVE_URL}
}

fn published() -> Result<Vec<u8>> {
    let tree = TreeFixture::new()?;
    tree.write("os/fedoraproject.org/fedora-40.xml", "<libosinfo/>")?;
    tree.export("20200101")
}

/// Run import the way the command line does for a release channel.
fn import_channel(
    transport: &FakeTransport,
    channel: ReleaseChannel,
    location: &DatabaseLocation,
    cache: &std::path::Path,
) -> Result<bool> {
    match check_release(transport, channel, location)? {
        UpdatePlan::UpToDate => Ok(false),
        UpdatePlan::Download(url) => {
            let source = ArchiveSource::from_arg(Some(&url));
            ArchiveReader::new()
                .with_cache_dir(cache)
                .extract(&source, location, transport)?;
            Ok(true)
        }
    }
}

#[test_case(Some("20200101"), false; "same version")]
#[test_case(Some("20200102"), false; "newer installed")]
#[test_case(Some("20191231"), true; "older installed")]
#[test_case(None, true; "nothing installed")]
#[test]
fn latest_gates_on_installed_version(installed: Option<&str>, downloads: bool) -> Result<()> {
    let (scratch_dir, db) = scratch()?;
    let cache = scratch_dir.path().join("cache");
    fs::create_dir_all(&db)?;
    if let Some(installed) = installed {
        fs::write(db.join(VERSION_FILE), installed)?;
    }

    let transport = FakeTransport::default()
        .route(LATEST_URL, 200, latest_json("20200101"))
        .route(ARCHIVE_URL, 200, published()?);
    let location = DatabaseLocation::new(&db);

    let imported = import_channel(&transport, ReleaseChannel::Latest, &location, &cache)?;
    assert_eq!(imported, downloads);

    if downloads {
        assert_eq!(transport.requests(), vec![LATEST_URL, ARCHIVE_URL]);
        assert_eq!(fs::read_to_string(db.join(VERSION_FILE))?, "20200101");
        assert!(db.join("os/fedoraproject.org/fedora-40.xml").is_file());
        assert!(!cache.join("osinfo-db-20200101.tar.xz").exists());
    } else {
        assert_eq!(transport.requests(), vec![LATEST_URL]);
        assert_eq!(fs::read_to_string(db.join(VERSION_FILE))?, installed.unwrap_or_default());
    }

    Ok(())
}

#[test]
fn nightly_always_downloads() -> Result<()> {
    let (scratch_dir, db) = scratch()?;
    let cache = scratch_dir.path().join("cache");
    fs::create_dir_all(&db)?;
    fs::write(db.join(VERSION_FILE), "99999999")?;

    let transport = FakeTransport::default()
        .route(NIGHTLY_URL, 200, nightly_json())
        .route(ARCHIVE_URL, 200, published()?);
    let location = DatabaseLocation::new(&db);

    assert!(import_channel(&transport, ReleaseChannel::Nightly, &location, &cache)?);
    assert_eq!(fs::read_to_string(db.join(VERSION_FILE))?, "20200101");

    Ok(())
}

#[test]
fn latest_requires_version_field() -> Result<()> {
    let (_scratch_dir, db) = scratch()?;
    let transport = FakeTransport::default().route(LATEST_URL, 200, nightly_json());
    let location = DatabaseLocation::new(&db);

    let error = check_release(&transport, ReleaseChannel::Latest, &location).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Format);
    assert!(error.to_string().contains("version"), "{error}");

    Ok(())
}

#[test]
fn failed_download_leaves_no_cache_file() -> Result<()> {
    let (scratch_dir, db) = scratch()?;
    let cache = scratch_dir.path().join("cache");
    let transport = FakeTransport::default()
        .route(NIGHTLY_URL, 200, nightly_json())
        .route(ARCHIVE_URL, 503, Vec::new());
    let location = DatabaseLocation::new(&db);

    let error = import_channel(&transport, ReleaseChannel::Nightly, &location, &cache).unwrap_err();
    let error = error.downcast::<osinfo_db_tools::import::Error>()?;
    assert_eq!(error.kind(), ErrorKind::Network);
    assert!(!cache.join("osinfo-db-20200101.tar.xz").exists());
    assert!(!db.exists());

    Ok(())
}
