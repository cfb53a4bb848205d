use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::TimeZone;
use clap::{Parser, Subcommand};

use checkinpilot::config::Config;

#[derive(Parser)]
#[command(
    name = "checkinpilot",
    about = "Unattended daily web check-in with a persistent browser session",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scheduled check-in cycle (attempts + retries)
    Run,

    /// Seed the persistent browser session via a manual login
    Authorize,

    /// Show recent run history
    History {
        /// Number of most recent rows to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show configured check-in times and their next occurrence
    Schedule,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    checkinpilot::logging::init(&config.logging.level, &config.resolved_log_file())?;

    let code = match cli.command {
        Commands::Run => checkinpilot::checkin::run(&config).await,
        Commands::Authorize => checkinpilot::authorize::run(&config).await,
        Commands::History { limit } => {
            print_history(&config, limit)?;
            0
        }
        Commands::Schedule => {
            print_schedule(&config)?;
            0
        }
    };

    Ok(if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_history(config: &Config, limit: usize) -> Result<()> {
    let entries = checkinpilot::history::read_history(&config.paths.history_file)?;
    if entries.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:<32} | {:<8} | {:<15} | {:<16} | Notes",
        "Timestamp", "Stage", "Result", "Error"
    );
    println!(
        "{:-<32}-|-{:-<8}-|-{:-<15}-|-{:-<16}-|-{:-<40}",
        "", "", "", "", ""
    );
    for entry in entries.iter().rev().take(limit) {
        println!(
            "{:<32} | {:<8} | {:<15} | {:<16} | {}",
            entry.ts, entry.stage, entry.result, entry.error_code, entry.notes
        );
    }
    Ok(())
}

fn print_schedule(config: &Config) -> Result<()> {
    let tz = config.tz()?;
    let now = chrono::Utc::now().with_timezone(&tz);

    println!("Timezone: {}", config.timezone);
    if config.schedule.times.is_empty() {
        println!("No check-in times configured.");
        return Ok(());
    }

    println!("{:<8} | Next run", "Time");
    println!("{:-<8}-|-{:-<25}", "", "");
    for time in &config.schedule.times {
        match next_occurrence(&now, time) {
            Some(next) => println!("{:<8} | {}", time, next.format("%Y-%m-%d %H:%M %Z")),
            None => println!("{:<8} | invalid time (expected HH:MM)", time),
        }
    }
    Ok(())
}

/// The next wall-clock occurrence of `HH:MM` after `now`, in `now`'s zone.
fn next_occurrence(
    now: &chrono::DateTime<chrono_tz::Tz>,
    hhmm: &str,
) -> Option<chrono::DateTime<chrono_tz::Tz>> {
    let time = chrono::NaiveTime::parse_from_str(hhmm, "%H:%M").ok()?;
    let tz = now.timezone();
    let today = now.date_naive().and_time(time);

    if let Some(candidate) = tz.from_local_datetime(&today).earliest() {
        if candidate > *now {
            return Some(candidate);
        }
    }
    tz.from_local_datetime(&(today + chrono::Duration::days(1)))
        .earliest()
}
