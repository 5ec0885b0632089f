mod scan;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tagscan_core::{contact_owner_message, whatsapp_link, Severity};
use tracing_subscriber::EnvFilter;

use crate::scan::ScanArgs;

#[derive(Debug, Parser)]
#[command(name = "tagscan-cli")]
#[command(about = "Pet tag scan notification command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scan visit against the configured backend and webhook
    Scan(ScanArgs),
    /// Print the WhatsApp link behind the contact-owner button
    ContactLink {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        pet: String,
        #[arg(long)]
        maps_link: Option<String>,
    },
    /// Print the loaded configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan(args) => {
            let config = tagscan_core::load_app_config()?;
            let snapshot = scan::run_scan(&config, &args).await?;
            print!("{}", scan::render_snapshot(&snapshot));
            let failed = snapshot
                .outcome
                .is_some_and(|o| o.severity == Severity::Error);
            if failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::ContactLink {
            phone,
            pet,
            maps_link,
        } => {
            let message = contact_owner_message(&pet, maps_link.as_deref());
            let link = whatsapp_link(&phone, &message)
                .ok_or_else(|| anyhow::anyhow!("phone number '{phone}' contains no digits"))?;
            println!("{link}");
        }
        Commands::Config => {
            let config = tagscan_core::load_app_config()?;
            println!("{config:#?}");
        }
    }

    Ok(ExitCode::SUCCESS)
}
