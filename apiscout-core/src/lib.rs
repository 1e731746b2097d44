use colored::Colorize;

pub mod config;
pub mod crawl;
pub mod data;
pub mod report;

pub fn print_banner() {
    let banner = format!(
        r#"
    ┌─────────────────────────────────────────┐
    │  apiscout v{:<29}│
    │  API endpoint discovery & auth triage   │
    └─────────────────────────────────────────┘
    "#,
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", banner.cyan());
    println!(
        "    {}\n",
        "For authorized security testing only.".bright_black()
    );
}
