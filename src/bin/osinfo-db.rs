// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use osinfo_db_tools::{
    release::{check_release, ReleaseChannel, UpdatePlan},
    validate::{select_targets, SCHEMA_FILE},
    ArchiveReader, ArchiveSource, ArchiveTarget, ArchiveWriter, ExportOptions, ImportRequest,
    LocationResolver, ReqwestTransport, Tier, TierFlags, Validator,
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  osinfo-db [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Path(opts) => run_path(opts),
            Command::Export(opts) => run_export(opts),
            Command::Import(opts) => run_import(opts),
            Command::Validate(opts) => run_validate(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show database location of a tier.
    #[command(override_usage = "osinfo-db path [options]")]
    Path(PathOptions),

    /// Export database into archive.
    #[command(override_usage = "osinfo-db export [options] [<archive>]")]
    Export(ExportCliOptions),

    /// Import database from archive.
    #[command(override_usage = "osinfo-db import [options] [<archive>]")]
    Import(ImportOptions),

    /// Validate database against its schema.
    #[command(override_usage = "osinfo-db validate [options] [<path>]...")]
    Validate(ValidateOptions),
}

#[derive(Args, Clone, Debug, Default)]
struct TierOptions {
    /// Use the per-user database location.
    #[arg(short, long)]
    pub user: bool,

    /// Use the local administrator database location.
    #[arg(short, long)]
    pub local: bool,

    /// Use the system database location.
    #[arg(short, long)]
    pub system: bool,

    /// Use a custom database location.
    #[arg(short, long, value_name = "path")]
    pub dir: Option<PathBuf>,

    /// Place every database location beneath this root directory.
    #[arg(short, long, value_name = "path")]
    pub root: Option<PathBuf>,
}

impl TierOptions {
    fn split(self) -> Result<(LocationResolver, Tier)> {
        let resolver = LocationResolver::new(self.root.unwrap_or_default());
        let tier = Tier::from_flags(TierFlags {
            user: self.user,
            local: self.local,
            system: self.system,
            dir: self.dir,
        })?;

        Ok((resolver, tier))
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PathOptions {
    #[command(flatten)]
    pub tier: TierOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ExportCliOptions {
    #[command(flatten)]
    pub tier: TierOptions,

    /// Report every archived file.
    #[arg(short, long)]
    pub verbose: bool,

    /// Version string of the archive, today's date by default.
    #[arg(long, value_name = "version")]
    pub version: Option<String>,

    /// License file to bundle into the archive.
    #[arg(long, value_name = "file")]
    pub license: Option<PathBuf>,

    /// Archive to write, `-` for standard output.
    #[arg(value_name = "archive")]
    pub archive: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ImportOptions {
    #[command(flatten)]
    pub tier: TierOptions,

    /// Report every extracted file.
    #[arg(short, long)]
    pub verbose: bool,

    /// Import latest release if newer than the installed database.
    #[arg(long, group = "channel")]
    pub latest: bool,

    /// Import latest nightly build.
    #[arg(long, group = "channel")]
    pub nightly: bool,

    /// Archive path or URL to read, `-` for standard input.
    #[arg(value_name = "archive")]
    pub archive: Option<String>,
}

impl ImportOptions {
    fn channel(&self) -> Option<ReleaseChannel> {
        if self.latest {
            Some(ReleaseChannel::Latest)
        } else if self.nightly {
            Some(ReleaseChannel::Nightly)
        } else {
            None
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ValidateOptions {
    #[command(flatten)]
    pub tier: TierOptions,

    /// Report every validated document.
    #[arg(short, long)]
    pub verbose: bool,

    /// Files, directories, or `file://` URIs to validate instead of a tier.
    #[arg(value_name = "path")]
    pub targets: Vec<String>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            exit(if error.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_path(opts: PathOptions) -> Result<()> {
    let (resolver, tier) = opts.tier.split()?;
    let location = resolver.resolve(&tier)?;
    println!("{location}");

    Ok(())
}

fn run_export(opts: ExportCliOptions) -> Result<()> {
    let (resolver, tier) = opts.tier.split()?;
    let source = resolver.resolve(&tier)?;

    let options = ExportOptions::new(opts.version)
        .with_license(opts.license)
        .with_verbose(opts.verbose);
    let target = ArchiveTarget::from_arg(opts.archive.as_deref(), &options);
    ArchiveWriter::new(options).write_to(&source, &target)?;

    Ok(())
}

fn run_import(opts: ImportOptions) -> Result<()> {
    let request = ImportRequest::from_args(opts.archive.as_deref(), opts.channel())?;
    let (resolver, tier) = opts.tier.split()?;
    let target = resolver.resolve(&tier)?;
    let transport = ReqwestTransport::new()?.with_progress(true);
    let reader = ArchiveReader::new().with_verbose(opts.verbose);

    let source = match request {
        ImportRequest::Release(channel) => match check_release(&transport, channel, &target)? {
            UpdatePlan::UpToDate => return Ok(()),
            UpdatePlan::Download(url) => ArchiveSource::from_arg(Some(&url)),
        },
        ImportRequest::Archive(source) => source,
    };

    info!("importing {source} into {target}");
    reader.extract(&source, &target, &transport)?;

    Ok(())
}

fn run_validate(opts: ValidateOptions) -> Result<()> {
    let (resolver, tier) = opts.tier.split()?;
    let targets = select_targets(&resolver, &tier, &opts.targets)?;

    let schema = resolver.find_with_fallback(&tier, SCHEMA_FILE)?;
    let validator = Validator::new(schema)?.with_verbose(opts.verbose);
    validator.validate_all(&targets)?;

    Ok(())
}
