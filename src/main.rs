use clap::{Parser, Subcommand};
use miette::Result;
use orgauthz::authz::Authz;
use orgauthz::hr::HrService;
use orgauthz::settings::{FactBackend, Settings};
use orgauthz::{jobs, seed, storage, web};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "orgauthz",
    version,
    about = "HR service with an organizational authorization core"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP APIs and background jobs (default)
    Serve,
    /// Load companies and users from a JSON file, then exit
    Seed {
        /// Organization file
        file: String,
    },
    /// Rebuild role facts from the database, then exit
    Resync,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database + migrations)
    let db = storage::init(&settings.database).await?;

    let authz = Authz::from_settings(db.clone(), &settings.authz);

    // a process-local fact store starts empty
    if settings.authz.store == FactBackend::Memory {
        let summary = authz.sync.reconcile_all().await?;
        tracing::info!(
            companies = summary.companies,
            facts = summary.repair.applied,
            "Rebuilt in-memory facts"
        );
    }

    let hr = HrService::new(db.clone(), authz.clone());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Seed { file } => {
            seed::seed_from_file(&hr, &file).await?;
        }
        Command::Resync => {
            let report = jobs::run_job(&db, &authz.sync, jobs::RECONCILE).await?;
            tracing::info!(applied = report.applied, failed = report.failed, "Resync finished");
        }
        Command::Serve => {
            if let Some(path) = &settings.seed.path {
                seed::seed_from_file(&hr, &path.to_string_lossy()).await?;
            }

            let _scheduler = if settings.jobs.enabled {
                Some(jobs::init_scheduler(db.clone(), authz.sync.clone(), &settings.jobs).await?)
            } else {
                tracing::info!("Background jobs disabled");
                None
            };

            web::serve(settings, db, authz).await?;
        }
    }
    Ok(())
}
