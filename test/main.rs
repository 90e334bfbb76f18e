// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod channel;
mod schema;

use anyhow::Result;
use ignore::WalkBuilder;
use osinfo_db_tools::{
    release::{Error as ReleaseError, Result as ReleaseResult},
    ArchiveWriter, ExportOptions, HttpGet,
};
use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Fixed archive timestamp used by every fixture export.
pub(crate) const TIMESTAMP: u64 = 1_704_067_200;

pub(crate) struct TreeFixture {
    dir: TempDir,
}

impl TreeFixture {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn write(&self, name: impl AsRef<Path>, contents: impl AsRef<str>) -> Result<()> {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents.as_ref())?;
        Ok(())
    }

    pub(crate) fn read(&self, name: impl AsRef<Path>) -> Result<String> {
        Ok(fs::read_to_string(self.dir.path().join(name))?)
    }

    /// Relative paths of every regular file, sorted.
    pub(crate) fn files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in WalkBuilder::new(self.dir.path())
            .standard_filters(false)
            .build()
        {
            let entry = entry?;
            if entry.file_type().is_some_and(|kind| kind.is_file()) {
                let relative = entry.path().strip_prefix(self.dir.path())?;
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        files.sort();

        Ok(files)
    }

    pub(crate) fn export(&self, version: &str) -> Result<Vec<u8>> {
        let options = ExportOptions::new(Some(version.into())).with_timestamp(TIMESTAMP);
        Ok(ArchiveWriter::new(options).build(self.path(), Vec::new())?)
    }
}

/// In-memory HTTP transport that records every requested URL.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: HashMap<String, (u16, Vec<u8>)>,
    requests: RefCell<Vec<String>>,
}

impl FakeTransport {
    pub(crate) fn route(mut self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.routes.insert(url.to_string(), (status, body.into()));
        self
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl HttpGet for FakeTransport {
    fn get(&self, url: &str, sink: &mut dyn Write) -> ReleaseResult<u64> {
        self.requests.borrow_mut().push(url.to_string());
        match self.routes.get(url) {
            Some((200, body)) => {
                sink.write_all(body).map_err(|err| ReleaseError::WriteBody {
                    source: err,
                    url: url.to_string(),
                })?;
                Ok(body.len() as u64)
            }
            Some((status, _)) => Err(ReleaseError::Status {
                url: url.to_string(),
                status: *status,
                reason: "Service Unavailable".into(),
            }),
            None => Err(ReleaseError::Status {
                url: url.to_string(),
                status: 404,
                reason: "Not Found".into(),
            }),
        }
    }
}

pub(crate) fn scratch() -> Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("db");
    Ok((dir, path))
}
