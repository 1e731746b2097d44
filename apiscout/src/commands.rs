use crate::CLAP_STYLING;
use apiscout_core::config::DEFAULT_CONFIG_DIR;
use clap::{arg, command};
use std::path::PathBuf;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("apiscout")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("apiscout")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Creates the apiscout config directory, default config and scan database")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location of the apiscout config directory")
                        .default_value(DEFAULT_CONFIG_DIR),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite an existing config file and database at the location.")
                        .required(false),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a site, watch its traffic for API endpoints and classify each one \
                by whether it requires authentication.",
                )
                .arg(
                    arg!(-d --"domain" <DOMAIN>)
                        .required(true)
                        .help("Root origin to scan, e.g. https://example.com or example.com"),
                )
                .arg(
                    arg!(-p --"max-pages" <NUM>)
                        .required(false)
                        .help("Stop after this many pages (default: unlimited)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-t --"timeout" <MS>)
                        .required(false)
                        .help("Per-page navigation timeout in milliseconds (default: 30000)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-w --"delay" <MS>)
                        .required(false)
                        .help("Pause between pages in milliseconds (default: 1000)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"depth" <NUM>)
                        .required(false)
                        .help("Maximum link depth from the root page (default: unlimited)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-o --"output" <DIR>)
                        .required(false)
                        .help("Directory for the TXT and JSON reports (default: results)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-c --"config" <FILE>)
                        .required(false)
                        .help("Config file (default: ~/.config/apiscout/apiscout.toml if present)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"db" <FILE>)
                        .required(false)
                        .help("Record the scan in this SQLite database")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"driver" <DRIVER>)
                        .required(false)
                        .help("Page driver: http (static) or browser (headless Chromium)")
                        .value_parser(["http", "browser"]),
                )
                .arg(
                    arg!(-v --"verbose" ...)
                        .required(false)
                        .help("Increase log output (-v info, -vv debug)"),
                ),
        )
}
