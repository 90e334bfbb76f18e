// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database location resolution.
//!
//! The osinfo database can be installed into one of three standard __tiers__:
//!
//! - __System__: primary system-wide location for operating system vendors
//!   shipping the database in their native package format.
//! - __Local__: secondary system-wide location for administrators providing
//!   an updated database to every user.
//! - __User__: private location for unprivileged users providing an updated
//!   database to the applications they run.
//!
//! A custom directory may stand in for any of them. Each tier has a
//! compiled-in base path that can be overridden through an environment
//! variable, and every resolved path can be placed beneath a __root prefix__
//! to address a chroot or image tree.
//!
//! Resolution never touches the filesystem. The returned location may not
//! exist yet, which is fine for import since it creates the tree on demand.

use std::{
    env,
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Component, Path, PathBuf},
};
use tracing::{debug, instrument};

use crate::ErrorKind;

/// Environment variable overriding the system tier base path.
pub const SYSTEM_DIR_ENV: &str = "OSINFO_SYSTEM_DIR";

/// Environment variable overriding the local tier base path.
pub const LOCAL_DIR_ENV: &str = "OSINFO_LOCAL_DIR";

/// Environment variable overriding the user tier base path.
pub const USER_DIR_ENV: &str = "OSINFO_USER_DIR";

/// Compiled-in system tier base path.
pub const DEFAULT_SYSTEM_DIR: &str = "/usr/share/osinfo";

/// Compiled-in local tier base path.
pub const DEFAULT_LOCAL_DIR: &str = "/etc/osinfo";

/// Directory name of the user tier inside the user's configuration directory.
pub const USER_DIR_NAME: &str = "osinfo";

/// Requested database tier.
///
/// Exactly one tier can be selected at a time. Leaving the tier
/// [`Unspecified`](Tier::Unspecified) lets the resolver pick one based on
/// the privilege of the running process.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Tier {
    /// No explicit request: local tier when privileged, user tier otherwise.
    #[default]
    Unspecified,

    /// Primary system-wide location.
    System,

    /// Secondary system-wide location.
    Local,

    /// Per-user location.
    User,

    /// Ad-hoc directory taken verbatim.
    Custom(PathBuf),
}

impl Tier {
    /// Collapse command line style tier flags into one tier.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ConflictingTiers`] if more than one flag is set.
    pub fn from_flags(flags: TierFlags) -> Result<Self> {
        let TierFlags {
            user,
            local,
            system,
            dir,
        } = flags;

        let count = [user, local, system, dir.is_some()]
            .into_iter()
            .filter(|set| *set)
            .count();
        if count > 1 {
            return Err(Error::ConflictingTiers);
        }

        Ok(match (dir, user, local, system) {
            (Some(dir), ..) => Tier::Custom(dir),
            (None, true, ..) => Tier::User,
            (None, _, true, _) => Tier::Local,
            (None, _, _, true) => Tier::System,
            _ => Tier::Unspecified,
        })
    }

    /// Check if caller explicitly picked this tier.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Tier::Unspecified)
    }
}

impl TryFrom<TierFlags> for Tier {
    type Error = Error;

    fn try_from(flags: TierFlags) -> Result<Self> {
        Tier::from_flags(flags)
    }
}

/// Independent tier flags as a caller would receive them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TierFlags {
    /// Select the user tier.
    pub user: bool,

    /// Select the local tier.
    pub local: bool,

    /// Select the system tier.
    pub system: bool,

    /// Select a custom directory.
    pub dir: Option<PathBuf>,
}

/// Resolved absolute path of a database tier.
///
/// Created fresh by every resolution, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLocation(PathBuf);

impl DatabaseLocation {
    /// Construct new database location.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat database location as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Path of a file relative to this location.
    pub fn join(&self, file: impl AsRef<Path>) -> PathBuf {
        self.0.join(file)
    }

    /// Convert into owned [`PathBuf`].
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for DatabaseLocation {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl Display for DatabaseLocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Map tiers to database locations.
///
/// Holds the process-wide root prefix and privilege level. Both are fixed for
/// the lifetime of a run.
#[derive(Debug, Clone)]
pub struct LocationResolver {
    root: PathBuf,
    privileged: bool,
}

impl LocationResolver {
    /// Construct new resolver for root prefix.
    ///
    /// An empty root prefix means no prefix at all. Privilege is detected from
    /// the effective user of the running process.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            privileged: is_privileged(),
        }
    }

    /// Override detected privilege level.
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Root prefix placed in front of every resolved path.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Resolve tier into database location.
    ///
    /// Does not check if the location exists.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NoConfigDir`] if the user tier is needed but the
    ///   user's configuration directory cannot be determined.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve(&self, tier: &Tier) -> Result<DatabaseLocation> {
        let base = match tier {
            Tier::Custom(dir) => dir.clone(),
            Tier::System => system_base(),
            Tier::Local => local_base(),
            Tier::User => user_base()?,
            Tier::Unspecified if self.privileged => local_base(),
            Tier::Unspecified => user_base()?,
        };

        let location = DatabaseLocation::new(prefix_root(&self.root, &base));
        debug!("resolved {tier:?} to {location}");

        Ok(location)
    }

    /// Locate file relative to a database location.
    ///
    /// An explicit tier searches only that tier. Otherwise the user, local,
    /// and system tiers are searched in that order, and the first location
    /// where the file exists wins.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if no searched location has the file.
    /// - Return [`Error::NoConfigDir`] if the user tier is searched but the
    ///   user's configuration directory cannot be determined.
    pub fn find(&self, tier: &Tier, file: impl AsRef<Path>) -> Result<PathBuf> {
        let order = match tier {
            Tier::Unspecified => vec![Tier::User, Tier::Local, Tier::System],
            explicit => vec![explicit.clone()],
        };

        self.locate(order, file.as_ref())
    }

    /// Locate file relative to a database location, falling back to broader
    /// tiers.
    ///
    /// The requested tier is searched first, followed by every tier that is
    /// more widely shared than it: custom falls back to user, user to local,
    /// and local to system. With no explicit tier this is the same search as
    /// [`find`](Self::find).
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if no searched location has the file.
    /// - Return [`Error::NoConfigDir`] if the user tier is searched but the
    ///   user's configuration directory cannot be determined.
    pub fn find_with_fallback(&self, tier: &Tier, file: impl AsRef<Path>) -> Result<PathBuf> {
        let order = match tier {
            Tier::Custom(dir) => vec![
                Tier::Custom(dir.clone()),
                Tier::User,
                Tier::Local,
                Tier::System,
            ],
            Tier::User | Tier::Unspecified => vec![Tier::User, Tier::Local, Tier::System],
            Tier::Local => vec![Tier::Local, Tier::System],
            Tier::System => vec![Tier::System],
        };

        self.locate(order, file.as_ref())
    }

    fn locate(&self, order: Vec<Tier>, file: &Path) -> Result<PathBuf> {
        for tier in order {
            let candidate = self.resolve(&tier)?.join(file);
            if candidate.exists() {
                debug!("found {:?} in {tier:?} tier", file.display());
                return Ok(candidate);
            }
        }

        Err(Error::NotFound {
            file: file.to_path_buf(),
        })
    }
}

fn system_base() -> PathBuf {
    env_override(SYSTEM_DIR_ENV).unwrap_or_else(|| PathBuf::from(DEFAULT_SYSTEM_DIR))
}

fn local_base() -> PathBuf {
    env_override(LOCAL_DIR_ENV).unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR))
}

fn user_base() -> Result<PathBuf> {
    match env_override(USER_DIR_ENV) {
        Some(path) => Ok(path),
        None => dirs::config_dir()
            .map(|path| path.join(USER_DIR_NAME))
            .ok_or(Error::NoConfigDir),
    }
}

fn env_override(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|value: &OsString| !value.is_empty())
        .map(PathBuf::from)
}

// INVARIANT: Root prefix is concatenated, not joined.
//   - "/foo" + "/usr/share/osinfo" must give "/foo/usr/share/osinfo".
fn prefix_root(root: &Path, path: &Path) -> PathBuf {
    if root.as_os_str().is_empty() {
        return path.to_path_buf();
    }

    let mut prefixed = root.to_path_buf();
    prefixed.extend(
        path.components()
            .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_))),
    );
    prefixed
}

#[cfg(unix)]
fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_privileged() -> bool {
    false
}

/// Location resolution error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// More than one tier was requested.
    #[error("only one of --user, --local, --system, and --dir can be used")]
    ConflictingTiers,

    /// User's configuration directory cannot be determined.
    #[error("cannot determine absolute path to user's configuration directory")]
    NoConfigDir,

    /// File is absent from every searched location.
    #[error("unable to locate {:?} in any database location", file.display())]
    NotFound { file: PathBuf },
}

impl Error {
    /// Classify error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConflictingTiers => ErrorKind::Configuration,
            Error::NoConfigDir => ErrorKind::Io,
            Error::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;
    use std::fs;

    fn flags(user: bool, local: bool, system: bool, dir: Option<&str>) -> TierFlags {
        TierFlags {
            user,
            local,
            system,
            dir: dir.map(PathBuf::from),
        }
    }

    #[test_case(flags(false, false, false, None), Tier::Unspecified; "no flags")]
    #[test_case(flags(true, false, false, None), Tier::User; "user")]
    #[test_case(flags(false, true, false, None), Tier::Local; "local")]
    #[test_case(flags(false, false, true, None), Tier::System; "system")]
    #[test_case(flags(false, false, false, Some("/foo")), Tier::Custom("/foo".into()); "custom")]
    #[test]
    fn tier_from_single_flag(input: TierFlags, expect: Tier) {
        assert_eq!(Tier::from_flags(input).unwrap(), expect);
    }

    #[test_case(flags(true, true, false, None); "user and local")]
    #[test_case(flags(false, true, true, None); "local and system")]
    #[test_case(flags(true, false, false, Some("/foo")); "user and custom")]
    #[test_case(flags(true, true, true, Some("/foo")); "everything")]
    #[test]
    fn tier_from_conflicting_flags(input: TierFlags) {
        let error = Tier::from_flags(input).unwrap_err();
        assert!(matches!(error, Error::ConflictingTiers));
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test_case("", "/usr/share/osinfo", "/usr/share/osinfo"; "no root")]
    #[test_case("/foo/bar", "/usr/share/osinfo", "/foo/bar/usr/share/osinfo"; "absolute path")]
    #[test_case("/foo/bar", "positive", "/foo/bar/positive"; "relative path")]
    #[test_case("/", "/etc/osinfo", "/etc/osinfo"; "slash root")]
    #[test]
    fn root_prefix_concatenates(root: &str, path: &str, expect: &str) {
        assert_eq!(prefix_root(Path::new(root), Path::new(path)), PathBuf::from(expect));
    }

    #[sealed_test(env = [
        ("OSINFO_SYSTEM_DIR", "/sys/db"),
        ("OSINFO_LOCAL_DIR", "/local/db"),
        ("OSINFO_USER_DIR", "/user/db"),
    ])]
    fn resolve_honors_environment_overrides() -> anyhow::Result<()> {
        let resolver = LocationResolver::new("/root").with_privileged(false);

        assert_eq!(resolver.resolve(&Tier::System)?.as_path(), Path::new("/root/sys/db"));
        assert_eq!(resolver.resolve(&Tier::Local)?.as_path(), Path::new("/root/local/db"));
        assert_eq!(resolver.resolve(&Tier::User)?.as_path(), Path::new("/root/user/db"));
        assert_eq!(
            resolver.resolve(&Tier::Custom("/custom".into()))?.as_path(),
            Path::new("/root/custom")
        );

        Ok(())
    }

    #[sealed_test]
    fn resolve_falls_back_to_compiled_defaults() -> anyhow::Result<()> {
        env::remove_var(SYSTEM_DIR_ENV);
        env::remove_var(LOCAL_DIR_ENV);
        let resolver = LocationResolver::new("");

        assert_eq!(resolver.resolve(&Tier::System)?.as_path(), Path::new(DEFAULT_SYSTEM_DIR));
        assert_eq!(resolver.resolve(&Tier::Local)?.as_path(), Path::new(DEFAULT_LOCAL_DIR));

        Ok(())
    }

    #[sealed_test(env = [("OSINFO_LOCAL_DIR", "/local/db"), ("OSINFO_USER_DIR", "/user/db")])]
    fn resolve_unspecified_depends_on_privilege() -> anyhow::Result<()> {
        let unprivileged = LocationResolver::new("").with_privileged(false);
        assert_eq!(unprivileged.resolve(&Tier::Unspecified)?.as_path(), Path::new("/user/db"));

        let privileged = LocationResolver::new("").with_privileged(true);
        assert_eq!(privileged.resolve(&Tier::Unspecified)?.as_path(), Path::new("/local/db"));

        // Explicit tiers ignore privilege.
        assert_eq!(privileged.resolve(&Tier::User)?.as_path(), Path::new("/user/db"));
        assert_eq!(unprivileged.resolve(&Tier::Local)?.as_path(), Path::new("/local/db"));

        Ok(())
    }

    #[sealed_test(env = [
        ("OSINFO_SYSTEM_DIR", "system"),
        ("OSINFO_LOCAL_DIR", "local"),
        ("OSINFO_USER_DIR", "user"),
    ])]
    fn find_searches_user_then_local_then_system() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("local/schema"))?;
        fs::create_dir_all(root.path().join("system/schema"))?;
        fs::write(root.path().join("local/schema/osinfo.rng"), "local")?;
        fs::write(root.path().join("system/schema/osinfo.rng"), "system")?;
        fs::create_dir_all(root.path().join("user"))?;

        let resolver = LocationResolver::new(root.path()).with_privileged(false);
        let found = resolver.find(&Tier::Unspecified, "schema/osinfo.rng")?;
        assert_eq!(found, root.path().join("local/schema/osinfo.rng"));

        // Explicit tier searches only itself.
        let error = resolver.find(&Tier::User, "schema/osinfo.rng").unwrap_err();
        assert!(matches!(error, Error::NotFound { .. }));

        let found = resolver.find(&Tier::System, "schema/osinfo.rng")?;
        assert_eq!(found, root.path().join("system/schema/osinfo.rng"));

        Ok(())
    }

    #[sealed_test(env = [
        ("OSINFO_SYSTEM_DIR", "system"),
        ("OSINFO_LOCAL_DIR", "local"),
        ("OSINFO_USER_DIR", "user"),
    ])]
    fn find_reports_missing_file() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let resolver = LocationResolver::new(root.path());

        let error = resolver.find(&Tier::Unspecified, "schema/osinfo.rng").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(error.to_string().contains("schema/osinfo.rng"));

        Ok(())
    }

    #[sealed_test(env = [
        ("OSINFO_SYSTEM_DIR", "system"),
        ("OSINFO_LOCAL_DIR", "local"),
        ("OSINFO_USER_DIR", "user"),
    ])]
    fn find_with_fallback_widens_search() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("system/schema"))?;
        fs::write(root.path().join("system/schema/osinfo.rng"), "system")?;
        let resolver = LocationResolver::new(root.path());

        for tier in [
            Tier::User,
            Tier::Local,
            Tier::System,
            Tier::Custom("custom".into()),
        ] {
            let found = resolver.find_with_fallback(&tier, "schema/osinfo.rng")?;
            assert_eq!(found, root.path().join("system/schema/osinfo.rng"));
        }

        fs::create_dir_all(root.path().join("custom/schema"))?;
        fs::write(root.path().join("custom/schema/osinfo.rng"), "custom")?;
        let found = resolver.find_with_fallback(&Tier::Custom("custom".into()), "schema/osinfo.rng")?;
        assert_eq!(found, root.path().join("custom/schema/osinfo.rng"));

        Ok(())
    }
}
