//! fieldsync - keep device configurations and the registry in step.
//!
//! Devices are named by identifiers such as `LAB:EXP:MMS:01`. A range
//! like `LAB:EXP:MMS:01-04`, or a bare trailing number after a full
//! identifier, names several devices at once.

mod prompter;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldsync_core::{FileBackend, LiveDirectory, SyncConfig};
use fieldsync_engine::{
    ApplyMode, ApplyOptions, BatchReport, ImportOptions, Linkage, Plan, SaveOptions, SyncEngine,
};
use fieldsync_legacy::DirectorySource;

use crate::prompter::TerminalPrompter;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Save, apply and compare device configurations against the registry")]
struct Cli {
    /// Configuration file (defaults to ./fieldsync.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Which devices an operation runs on.
#[derive(Args, Debug)]
struct Target {
    /// Device identifiers, ranges and domain names
    #[arg(required = true)]
    devices: Vec<String>,

    /// Domains to use, comma separated
    #[arg(long, value_delimiter = ',')]
    domain: Vec<String>,

    /// Device type (defaults to the configured one)
    #[arg(long)]
    device_type: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save live device values into the registry
    Save {
        #[command(flatten)]
        target: Target,

        /// Keep object and configuration names as they are
        #[arg(long)]
        norename: bool,
    },

    /// Push the saved configuration to devices with a serial number
    Apply {
        #[command(flatten)]
        target: Target,

        /// New name for the object
        #[arg(long)]
        name: Option<String>,
    },

    /// Push a named configuration to devices without a serial number
    Dmapply {
        #[command(flatten)]
        target: Target,

        /// New name for the object
        #[arg(long)]
        name: Option<String>,

        /// Configuration to apply, looked up in the registry of the domain
        /// holding the device (the first domain for a new device)
        #[arg(long = "cfg")]
        config_name: Option<String>,

        /// Do not ask before applying
        #[arg(short, long)]
        yes: bool,
    },

    /// Compare the registry with live devices
    Diff {
        #[command(flatten)]
        target: Target,
    },

    /// Import legacy configuration files
    Import {
        /// Domains to import into, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        domain: Vec<String>,

        /// Device type (defaults to the configured one)
        #[arg(long)]
        device_type: Option<String>,

        /// Overwrite records that already exist
        #[arg(long)]
        update: bool,

        /// Read legacy files from this directory
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Replace a serial number in the registry
    Changesn {
        old: String,
        new: String,

        /// Domains to search, comma separated (defaults to all)
        #[arg(long, value_delimiter = ',')]
        domain: Vec<String>,

        /// Device type (defaults to the configured one)
        #[arg(long)]
        device_type: Option<String>,
    },
}

type Engine = SyncEngine<FileBackend, LiveDirectory, TerminalPrompter>;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn build_engine(config: SyncConfig) -> Result<Engine> {
    let live_root = config
        .live_root
        .clone()
        .context("no live_root configured, devices cannot be reached")?;
    let backend = FileBackend::from_config(&config);
    info!(
        "Registry at {}, devices at {}",
        backend.root().display(),
        live_root.display()
    );
    Ok(SyncEngine::new(
        config,
        backend,
        LiveDirectory::new(live_root),
        TerminalPrompter,
    ))
}

/// Print every failure and turn them into the exit status.
fn finish<T>(report: &BatchReport<T>, action: &str) -> Result<()> {
    let failed: Vec<_> = report.failures().collect();
    for outcome in &failed {
        if let Err(e) = &outcome.result {
            match &outcome.domain {
                Some(domain) => eprintln!("{} ({}): {}", outcome.identifier, domain, e),
                None => eprintln!("{}: {}", outcome.identifier, e),
            }
        }
    }
    if !failed.is_empty() {
        bail!(
            "{} of {} {} failed",
            failed.len(),
            report.outcomes.len(),
            action
        );
    }
    Ok(())
}

fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Save { target, norename } => {
            let plan = engine.plan(&target.devices, &target.domain, target.device_type.as_deref())?;
            let opts = SaveOptions { rename: !norename };
            let report = engine.save_many(&plan, &opts);
            for outcome in &report.outcomes {
                let Ok(saved) = &outcome.result else { continue };
                let how = match saved.linkage {
                    Linkage::Reused(config) => format!("updated {}", config),
                    Linkage::Created(config) => format!("created {}", config),
                };
                println!(
                    "{} saved to {} as {} ({})",
                    outcome.identifier, saved.domain, saved.object, how
                );
                if !saved.changes.entries.is_empty() {
                    print!("{}", saved.changes);
                }
            }
            finish(&report, "saves")
        }

        Command::Apply { target, name } => {
            let plan = engine.plan(&target.devices, &target.domain, target.device_type.as_deref())?;
            let opts = ApplyOptions {
                name,
                ..Default::default()
            };
            apply(engine, &plan, &opts, ApplyMode::Smart)
        }

        Command::Dmapply {
            target,
            name,
            config_name,
            yes,
        } => {
            let plan = engine.plan(&target.devices, &target.domain, target.device_type.as_deref())?;
            let opts = ApplyOptions {
                name,
                config: config_name,
                confirm: !yes,
            };
            apply(engine, &plan, &opts, ApplyMode::Dumb)
        }

        Command::Diff { target } => {
            let plan = engine.plan(&target.devices, &target.domain, target.device_type.as_deref())?;
            let report = engine.diff_many(&plan);
            for outcome in &report.outcomes {
                if let Ok(changes) = &outcome.result {
                    println!(
                        "{} ({}):",
                        outcome.identifier,
                        outcome.domain.as_deref().unwrap_or("?")
                    );
                    print!("{}", changes);
                }
            }
            finish(&report, "comparisons")
        }

        Command::Import {
            domain,
            device_type,
            update,
            path,
        } => {
            let device_type = engine
                .config()
                .resolve_device_type(device_type.as_deref())?
                .clone();
            let source = DirectorySource::new(engine.config(), &device_type);
            let opts = ImportOptions { update, path };
            let mut failed = 0;
            for result in engine.import(&source, &domain, &device_type, &opts)? {
                match result {
                    Ok(report) => {
                        failed += report.failed.len();
                        print!("{}", report);
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}", e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} legacy record(s) or domain(s) could not be imported", failed);
            }
            Ok(())
        }

        Command::Changesn {
            old,
            new,
            domain,
            device_type,
        } => {
            let device_type = engine
                .config()
                .resolve_device_type(device_type.as_deref())?
                .clone();
            let report = engine.change_identity(&old, &new, &domain, &device_type)?;
            print!("{}", report);
            if report.changed.is_empty() && report.failed.is_empty() {
                println!("{} not found in {}", old, report.untouched.join(", "));
            }
            if !report.failed.is_empty() {
                bail!("identity change failed in {} domain(s)", report.failed.len());
            }
            Ok(())
        }
    }
}

fn apply(engine: &Engine, plan: &Plan, opts: &ApplyOptions, mode: ApplyMode) -> Result<()> {
    let report = engine.apply_many(plan, opts, mode);
    for outcome in &report.outcomes {
        let Ok(applied) = &outcome.result else { continue };
        println!(
            "{} configured from {} ({}{})",
            outcome.identifier,
            applied.domain,
            applied.config,
            if applied.relocated { ", relocated" } else { "" }
        );
        match &applied.changes {
            Some(changes) => print!("{}", changes),
            None => println!("  could not re-read the device"),
        }
    }
    finish(&report, "applies")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = SyncConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    debug!(
        "Domains {}, device types {}",
        config.domains.join(","),
        config
            .device_types
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );

    let engine = build_engine(config)?;
    run(&engine, cli.command)
}
