mod match_panel;
mod monitor;
mod shared;
mod utils;

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use simple_error::SimpleResult;

use self::match_panel::validate_and_fix_match_panel_settings;
pub use self::match_panel::MatchPanelSettings;
use self::monitor::validate_and_fix_monitor_settings;
pub use self::monitor::{MonitorSettings, write_monitor_settings};
use self::shared::validate_and_fix_shared_settings;
pub use self::shared::SharedSettings;

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor a directory of read batches, calling SVs incrementally until the target detection
    /// rate is reached or no new reads arrive
    Monitor(MonitorSettings),

    /// Match SV calls from a VCF against an SV panel and report the detection rate
    MatchPanel(MatchPanelSettings),
}

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(propagate_version = true, rename_all = "kebab_case")]
pub struct Settings {
    #[command(flatten)]
    pub shared: SharedSettings,

    #[command(subcommand)]
    pub command: Commands,
}

impl Settings {
    /// Directory for the log file, if the command writes one
    pub fn get_work_dir(&self) -> Option<&Utf8Path> {
        match &self.command {
            Commands::Monitor(x) => Some(&x.work_dir),
            Commands::MatchPanel(_) => None,
        }
    }
}

/// Validate settings and update parameters that can't be processed by clap
///
pub fn validate_and_fix_settings_impl(mut settings: Settings) -> SimpleResult<Settings> {
    settings.shared = validate_and_fix_shared_settings(settings.shared)?;

    settings.command = match settings.command {
        Commands::Monitor(x) => {
            let x = validate_and_fix_monitor_settings(x)?;
            Commands::Monitor(x)
        }
        Commands::MatchPanel(x) => {
            let x = validate_and_fix_match_panel_settings(x)?;
            Commands::MatchPanel(x)
        }
    };

    Ok(settings)
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
pub fn validate_and_fix_settings(settings: Settings) -> Settings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("Invalid command-line setting: {msg}");
            std::process::exit(exitcode::USAGE);
        }
    }
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}
