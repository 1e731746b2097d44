use apiscout::handlers::*;
use apiscout_core::config::{CONFIG_FILE_NAME, DATABASE_FILE_NAME, DriverKind, FileConfig};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Mirror of the `crawl` subcommand's arguments.
fn crawl_matches(argv: &[&str]) -> ArgMatches {
    let value = |name: &'static str| Arg::new(name).long(name);
    Command::new("crawl")
        .arg(value("domain").short('d'))
        .arg(value("max-pages").value_parser(clap::value_parser!(usize)))
        .arg(value("depth").value_parser(clap::value_parser!(usize)))
        .arg(value("timeout").value_parser(clap::value_parser!(u64)))
        .arg(value("delay").value_parser(clap::value_parser!(u64)))
        .arg(value("output").value_parser(clap::value_parser!(PathBuf)))
        .arg(value("config").value_parser(clap::value_parser!(PathBuf)))
        .arg(value("db").value_parser(clap::value_parser!(PathBuf)))
        .arg(value("driver"))
        .arg(Arg::new("verbose").short('v').action(ArgAction::Count))
        .try_get_matches_from(std::iter::once("crawl").chain(argv.iter().copied()))
        .unwrap()
}

#[test]
fn test_verbosity_filter_levels() {
    assert_eq!(verbosity_filter(0), "warn");
    assert_eq!(verbosity_filter(1), "info");
    assert_eq!(verbosity_filter(2), "debug");
    assert_eq!(verbosity_filter(7), "debug");
}

#[test]
fn test_expand_path_tilde() {
    let expanded = expand_path("~/.config/apiscout/");
    assert!(!expanded.to_string_lossy().starts_with('~'));
}

#[test]
fn test_overrides_from_args() {
    let matches = crawl_matches(&[
        "-d", "example.com", "--max-pages", "12", "--depth", "2", "--timeout", "9000",
        "--delay", "0", "--driver", "browser", "--output", "out",
    ]);
    let overrides = overrides_from_args(&matches).unwrap();

    assert_eq!(overrides.max_pages, Some(12));
    assert_eq!(overrides.max_depth, Some(2));
    assert_eq!(overrides.timeout_ms, Some(9000));
    assert_eq!(overrides.delay_ms, Some(0));
    assert_eq!(overrides.driver, Some(DriverKind::Browser));
    assert_eq!(overrides.output_dir, Some(PathBuf::from("out")));
    assert_eq!(overrides.database, None);
}

#[test]
fn test_config_path_prefers_explicit() {
    let dir = TempDir::new().unwrap();
    let explicit = PathBuf::from("/tmp/custom.toml");
    assert_eq!(
        config_path_for(Some(&explicit), dir.path()),
        Some(explicit.clone())
    );
}

#[test]
fn test_config_path_falls_back_to_existing_default() {
    let dir = TempDir::new().unwrap();
    assert_eq!(config_path_for(None, dir.path()), None);

    fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
    assert_eq!(
        config_path_for(None, dir.path()),
        Some(dir.path().join(CONFIG_FILE_NAME))
    );
}

#[test]
fn test_initialize_config_dir() {
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join("apiscout");

    let outcome = initialize_config_dir(&config_dir, false).unwrap();

    assert!(!outcome.replaced_existing);
    assert_eq!(outcome.config_file, config_dir.join(CONFIG_FILE_NAME));
    assert!(outcome.database.exists());
    FileConfig::load(&outcome.config_file).unwrap();
}

#[test]
fn test_initialize_refuses_to_overwrite_without_force() {
    let dir = TempDir::new().unwrap();
    initialize_config_dir(dir.path(), false).unwrap();

    let err = initialize_config_dir(dir.path(), false).unwrap_err();
    assert!(err.to_string().contains("--force"));

    let outcome = initialize_config_dir(dir.path(), true).unwrap();
    assert!(outcome.replaced_existing);
}

#[test]
fn test_build_run_config_uses_config_dir_defaults() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[crawl]\nmax_pages = 7\ndelay_ms = 250\n",
    )
    .unwrap();
    fs::write(dir.path().join(DATABASE_FILE_NAME), "").unwrap();

    let matches = crawl_matches(&["-d", "example.com", "--delay", "10"]);
    let config = build_run_config(&matches, dir.path()).unwrap();

    assert_eq!(config.target, "https://example.com/");
    assert_eq!(config.limits.max_pages, Some(7));
    assert_eq!(config.limits.delay.as_millis(), 10);
    assert_eq!(config.database, Some(dir.path().join(DATABASE_FILE_NAME)));
}

#[test]
fn test_build_run_config_explicit_db_wins() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(DATABASE_FILE_NAME), "").unwrap();

    let matches = crawl_matches(&["-d", "example.com", "--db", "/tmp/other.db"]);
    let config = build_run_config(&matches, dir.path()).unwrap();
    assert_eq!(config.database, Some(PathBuf::from("/tmp/other.db")));
}

#[test]
fn test_build_run_config_reports_bad_config_file() {
    let dir = TempDir::new().unwrap();
    let config_file = dir.path().join("broken.toml");
    fs::write(&config_file, "crawl = 12").unwrap();

    let matches = crawl_matches(&[
        "-d", "example.com", "--config", config_file.to_str().unwrap(),
    ]);
    let err = build_run_config(&matches, dir.path()).unwrap_err();
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn test_build_run_config_rejects_hostless_target() {
    let dir = TempDir::new().unwrap();
    let matches = crawl_matches(&["-d", "http://"]);
    assert!(build_run_config(&matches, dir.path()).is_err());
}
