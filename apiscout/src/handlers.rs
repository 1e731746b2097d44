use anyhow::{Context, Result, bail};
use apiscout_core::config::{
    CONFIG_FILE_NAME, CliOverrides, DATABASE_FILE_NAME, DEFAULT_CONFIG_DIR, DriverKind, FileConfig,
    RunConfig, default_config_text,
};
use apiscout_core::crawl::execute_crawl;
use apiscout_core::data::Database;
use apiscout_core::report::format_console_summary;
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Log level for a `-v` count. `RUST_LOG` takes precedence when set.
pub fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

pub fn init_tracing(verbose: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(verbosity_filter(verbose))),
        )
        .with_target(false)
        .try_init();
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Explicit `--config` path, else the default config file when it exists.
pub fn config_path_for(explicit: Option<&PathBuf>, config_dir: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(expand_path(&path.to_string_lossy())),
        None => {
            let default = config_dir.join(CONFIG_FILE_NAME);
            default.exists().then_some(default)
        }
    }
}

/// The database written by `apiscout init`, when present.
pub fn default_database_path(config_dir: &Path) -> Option<PathBuf> {
    let path = config_dir.join(DATABASE_FILE_NAME);
    Database::exists(&path).then_some(path)
}

pub fn overrides_from_args(args: &ArgMatches) -> Result<CliOverrides> {
    let driver = args
        .get_one::<String>("driver")
        .map(|d| d.parse::<DriverKind>())
        .transpose()?;

    Ok(CliOverrides {
        max_pages: args.get_one::<usize>("max-pages").copied(),
        max_depth: args.get_one::<usize>("depth").copied(),
        timeout_ms: args.get_one::<u64>("timeout").copied(),
        delay_ms: args.get_one::<u64>("delay").copied(),
        driver,
        output_dir: args.get_one::<PathBuf>("output").cloned(),
        database: args
            .get_one::<PathBuf>("db")
            .map(|p| expand_path(&p.to_string_lossy())),
    })
}

/// Resolve flags, the config file and the defaults into one run.
pub fn build_run_config(args: &ArgMatches, config_dir: &Path) -> Result<RunConfig> {
    let domain = args
        .get_one::<String>("domain")
        .context("--domain is required")?;

    let file = config_path_for(args.get_one::<PathBuf>("config"), config_dir)
        .map(|path| {
            debug!("Loading config from {}", path.display());
            FileConfig::load(&path)
        })
        .transpose()?;

    let mut config = RunConfig::resolve(domain, file, overrides_from_args(args)?)?;
    if config.database.is_none() {
        config.database = default_database_path(config_dir);
    }
    Ok(config)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub config_file: PathBuf,
    pub database: PathBuf,
    pub replaced_existing: bool,
}

/// Create the config directory, write the default config and a fresh database.
pub fn initialize_config_dir(config_dir: &Path, force: bool) -> Result<InitOutcome> {
    let config_file = config_dir.join(CONFIG_FILE_NAME);
    let database = config_dir.join(DATABASE_FILE_NAME);
    let existing = config_file.exists() || Database::exists(&database);

    if existing && !force {
        bail!(
            "{} already contains an apiscout setup (use --force to overwrite)",
            config_dir.display()
        );
    }

    fs::create_dir_all(config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    fs::write(&config_file, default_config_text()?)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;

    if Database::exists(&database) {
        Database::drop(&database)
            .with_context(|| format!("Failed to remove {}", database.display()))?;
    }
    Database::new(&database)
        .with_context(|| format!("Failed to create database {}", database.display()))?;

    Ok(InitOutcome {
        config_file,
        database,
        replaced_existing: existing,
    })
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub fn handle_init(args: &ArgMatches) {
    print_divider();
    println!("{}", "  APISCOUT INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_DIR);
    let force = args.get_flag("force");
    let config_dir = expand_path(dir);

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );

    match initialize_config_dir(&config_dir, force) {
        Ok(outcome) => {
            if outcome.replaced_existing {
                println!("{} Replaced the existing setup", "⚠".yellow());
            }
            println!(
                "{} Config file: {}",
                "✓".green().bold(),
                outcome.config_file.display()
            );
            println!(
                "{} Database: {}",
                "✓".green().bold(),
                outcome.database.display()
            );
            println!();
            println!("{}", "apiscout initialization complete!".green().bold());
            print_divider();
        }
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}

pub async fn handle_crawl(args: &ArgMatches, quiet: bool) {
    init_tracing(args.get_count("verbose"));

    let config_dir = expand_path(DEFAULT_CONFIG_DIR);
    let config = match build_run_config(args, &config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            std::process::exit(1);
        }
    };

    if !quiet {
        println!("Scanning {}", config.target.bright_white().bold());
        println!(
            "Driver: {}  Max pages: {}  Max depth: {}",
            config.driver,
            config
                .limits
                .max_pages
                .map_or("unlimited".to_string(), |m| m.to_string()),
            config
                .limits
                .max_depth
                .map_or("unlimited".to_string(), |d| d.to_string()),
        );
        println!();
    }

    match execute_crawl(&config, !quiet).await {
        Ok(output) => {
            println!();
            print!("{}", format_console_summary(&output));
        }
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}
