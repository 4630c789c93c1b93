mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "looptutor-cli")]
#[command(about = "LoopTutor CLI - Check, run and grade iteration exercises", long_about = None)]
struct Cli {
    /// Validator config file (defaults to config/validator.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a submission for syntax errors without running it
    Check {
        /// Source file
        file: PathBuf,
    },

    /// List likely iteration mistakes in a submission
    Mistakes {
        /// Source file
        file: PathBuf,

        /// Concept name enabling concept-specific rules (e.g. BasicListIteration)
        #[arg(short, long)]
        concept: Option<String>,
    },

    /// Run a submission in the sandbox and print its output
    Run {
        /// Source file
        file: PathBuf,

        /// File whose statements are prepended as test input
        #[arg(short, long)]
        input_file: Option<PathBuf>,
    },

    /// Grade a submission against a problem's test cases
    Validate {
        /// Problem name
        #[arg(short, long)]
        problem: String,

        /// Source file
        file: PathBuf,

        /// Problem bank (defaults to content/problems.json)
        #[arg(short, long)]
        bank: Option<PathBuf>,

        /// Grade one run against the solution's expected output instead of every test case
        #[arg(long, default_value = "false")]
        single: bool,

        /// Print the full verdict as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List problems in the bank
    List {
        /// Only problems at this difficulty (1-3)
        #[arg(short, long)]
        level: Option<u8>,

        /// Problem bank (defaults to content/problems.json)
        #[arg(short, long)]
        bank: Option<PathBuf>,
    },

    /// Grade every reference solution against its own problem
    Audit {
        /// Problem bank (defaults to content/problems.json)
        #[arg(short, long)]
        bank: Option<PathBuf>,

        /// Problems audited at once
        #[arg(long, default_value = "4")]
        parallel: usize,
    },
}

const DEFAULT_LOG_FILTER: &str = "info";

/// `RUST_LOG` directives when present and valid, else the default level.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_tracing(json: bool) {
    let filter = log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { file } => {
            commands::check_file(&file)?;
        }
        Commands::Mistakes { file, concept } => {
            commands::show_mistakes(&file, concept.as_deref())?;
        }
        Commands::Run { file, input_file } => {
            commands::run_file(&config, &file, input_file.as_deref())?;
        }
        Commands::Validate {
            problem,
            file,
            bank,
            single,
            json,
        } => {
            commands::validate_file(&config, &problem, &file, bank.as_deref(), single, json)?;
        }
        Commands::List { level, bank } => {
            commands::list_problems(bank.as_deref(), level)?;
        }
        Commands::Audit { bank, parallel } => {
            commands::audit(&config, bank.as_deref(), parallel).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            log_filter(Some("debug".to_string())).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
    }
}
