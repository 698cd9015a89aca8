use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use tenant_tiles::cache::TileCache;
use tenant_tiles::postgis::PostgisFetcher;
use tenant_tiles::server::router;
use tenant_tiles::service::TileService;
use tenant_tiles::tenant::HeaderTenantResolver;
use tenant_tiles::{Result, TileServerConfig};

/// How often expired tiles are swept out of the cache.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Layer configuration (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// PostGIS connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Address to serve tiles on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Size of the database connection pool
    #[arg(long, default_value_t = 10)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = TileServerConfig::load(&args.config)?;
    let catalog = Arc::new(config.catalog());
    log::info!("loaded {} layers from {}", catalog.len(), args.config.display());

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .connect(&args.database_url)
        .await?;

    let fetcher = Arc::new(PostgisFetcher::new(pool, &catalog));
    let cache = Arc::new(TileCache::new(config.cache_ttl(), config.cache_max_entries));
    let service = TileService::new(&config, catalog, fetcher, cache.clone());
    let tenants = HeaderTenantResolver::new(&config.tenant_header)?;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                log::debug!("purged {} expired tiles, {} cached", purged, cache.len());
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    log::info!("serving tiles on {}", args.listen);
    axum::serve(listener, router(service, Arc::new(tenants))).await?;

    Ok(())
}
