use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use ipasgo_cli::activity_log::ActivityLog;
use ipasgo_cli::config::{DEFAULT_WEBDRIVER_URL, WEBDRIVER_URL_ENV};
use ipasgo_cli::portal::{PortalSession, ThirtyfourBrowser};
use ipasgo_cli::record_store::RecordStore;
use ipasgo_cli::runner;
use ipasgo_cli::summary::{print_summary, summarize, summary_json};

#[derive(Parser)]
#[command(name = "ipasgo-cli")]
#[command(about = "IPASGO procedure confirmation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to the portal and confirm procedures row by row
    Run {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "Planilha1")]
        sheet: String,

        #[arg(long, default_value = "salvamento_datas_confirmacao.txt")]
        log_file: PathBuf,

        /// TOML file overriding locators, timings or the login URL
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        webdriver_url: Option<String>,

        #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
        headless: bool,

        /// First spreadsheet line to process (line 1 is the header)
        #[arg(long)]
        start_line: Option<usize>,

        /// Last spreadsheet line to process, inclusive
        #[arg(long)]
        end_line: Option<usize>,
    },

    /// Show what previous runs wrote to the spreadsheet
    Summary {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "Planilha1")]
        sheet: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = execute(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            file,
            sheet,
            log_file,
            config,
            webdriver_url,
            headless,
            start_line,
            end_line,
        } => {
            let plan = runner::prepare_run(
                |key| std::env::var(key).ok(),
                &file,
                &sheet,
                config.as_deref(),
                start_line,
                end_line,
            )?;

            let webdriver_url = webdriver_url
                .or_else(|| std::env::var(WEBDRIVER_URL_ENV).ok())
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string());

            info!(
                "Connecting to WebDriver at {} to process {} rows of {:?}",
                webdriver_url,
                plan.rows.len(),
                file
            );
            let browser = ThirtyfourBrowser::connect(&webdriver_url, headless).await?;

            let session = PortalSession::new(
                browser,
                plan.store,
                ActivityLog::new(log_file),
                plan.config,
                plan.credentials,
            );

            let report = runner::run(session, plan.rows).await?;
            report.display();
        }

        Commands::Summary { file, sheet, json } => {
            let store = RecordStore::open(&file, &sheet)
                .with_context(|| format!("Failed to load {:?}", file))?;

            let rows = summarize(&store);
            if json {
                println!("{}", summary_json(&rows)?);
            } else if rows.is_empty() {
                info!("No rows found in {:?}", file);
            } else {
                print_summary(&rows);
            }
        }
    }

    Ok(())
}
