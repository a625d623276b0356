use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ranch_sync::{SyncConfig, SyncService};

#[derive(Debug, Parser)]
#[command(name = "ranch-cli")]
#[command(about = "Registration sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass.
    Sync {
        #[arg(value_enum, default_value_t = Pipeline::All)]
        pipeline: Pipeline,
    },
    /// Apply database migrations.
    Migrate,
    /// Serve the HTTP trigger surface (and the scheduler, when enabled).
    Serve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Pipeline {
    Forms,
    Memberships,
    Registrants,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Sync {
        pipeline: Pipeline::All,
    }) {
        Commands::Sync { pipeline } => {
            let config = SyncConfig::from_env()?;
            let pool = ranch_sync::connect_pool(&config.database_url).await?;
            let service = SyncService::from_config(config, pool)?;
            match pipeline {
                Pipeline::Forms => {
                    let report = service.sync_forms().await?;
                    println!(
                        "forms sync complete: run_id={} total={} synced={} drops={}",
                        report.run_id,
                        report.total,
                        report.synced,
                        report.drops.values().sum::<u64>()
                    );
                }
                Pipeline::Memberships => {
                    let report = service.sync_memberships().await?;
                    println!(
                        "memberships sync complete: run_id={} fetched={} synced={}",
                        report.run_id, report.fetched, report.synced
                    );
                }
                Pipeline::Registrants => {
                    let report = service.sync_registrants().await?;
                    println!(
                        "registrants sync complete: run_id={} forms={}",
                        report.run_id, report.form_count
                    );
                }
                Pipeline::All => {
                    service.sync_all().await?;
                    println!("sync complete: forms, memberships, registrants");
                }
            }
        }
        Commands::Migrate => {
            let database_url = ranch_sync::database_url_from_env();
            let pool = ranch_sync::connect_pool(&database_url).await?;
            ranch_sync::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            ranch_web::serve_from_env().await?;
        }
    }

    Ok(())
}
