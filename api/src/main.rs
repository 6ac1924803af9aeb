use std::sync::Arc;

use actix_web::{web, HttpServer};
use anyhow::{anyhow, Context};
use api::{
    app,
    config::{Config, StoreBackend},
    security::RateLimiter,
    state::AppState,
};
use clap::{Parser, Subcommand};
use common::{
    db::{establish_connection, run_migrations},
    seed::seed_tasks,
    store::{MemoryStore, PgStore, RestStore},
    Store,
};
use dotenv::dotenv;
use market::PriceFeed;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "miniapp-api", about = "Telegram mini app game server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Insert the default tasks and exit
    Seed,
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("DATABASE_URL must be set for the postgres store"))?;
            let pool = establish_connection(url, config.db_max_connections)
                .await
                .context("connecting to postgres")?;
            run_migrations(&pool).await.context("running migrations")?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Rest => {
            let (url, key) = config
                .supabase_url
                .as_deref()
                .zip(config.supabase_service_key.as_deref())
                .ok_or_else(|| {
                    anyhow!("SUPABASE_URL and SUPABASE_SERVICE_KEY must be set for the rest store")
                })?;
            Arc::new(RestStore::new(url, key))
        }
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    if config.store_backend == StoreBackend::Memory {
        let seeded = seed_tasks(store.as_ref()).await?;
        info!("Seeded {} tasks into the in-memory store", seeded);
    }

    let mut feed = PriceFeed::new(config.feed.clone()).context("building price feed")?;
    if config.price_stream_enabled {
        info!("Subscribing to {} trade stream", config.feed.symbol);
        feed = feed.with_stream();
    }

    let address = config.server_address();
    let limiter = RateLimiter::new(config.rate_limit as usize);
    let state = web::Data::new(AppState::new(store, Arc::new(feed), config));

    info!("Starting HTTP server on {}", address);
    HttpServer::new(move || app(state.clone(), limiter.clone()))
        .bind(&address)?
        .run()
        .await?;
    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;
            let pool = establish_connection(url, config.db_max_connections).await?;
            run_migrations(&pool).await?;
            info!("Migrations applied");
            Ok(())
        }
        Command::Seed => {
            let store = open_store(&config).await?;
            let inserted = seed_tasks(store.as_ref()).await?;
            info!("Inserted {} default tasks", inserted);
            Ok(())
        }
    }
}
