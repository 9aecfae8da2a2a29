use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use road_camera_proxy::apis::{build_adapter, FetchOutcome};
use road_camera_proxy::app::cache_store::CacheStore;
use road_camera_proxy::app::ports::{CacheTier, CounterStorePort, HistoryStorePort, HttpClientPort};
use road_camera_proxy::config::Config;
use road_camera_proxy::constants::all_resources;
use road_camera_proxy::infra::clock::SystemClock;
use road_camera_proxy::infra::http_client::ReqwestHttp;
use road_camera_proxy::infra::memory_cache::MemoryCache;
use road_camera_proxy::infra::sqlite_store::SqliteStore;
use road_camera_proxy::server::{self, AppState};
use road_camera_proxy::{logging, metrics};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "road_camera_proxy")]
#[command(about = "Caching proxy for Taiwanese open data (CCTV, weather, air quality, radar)")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy server
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one source adapter once and print what it produced (no cache write)
    Fetch {
        /// Resource key, e.g. freeway-cctv
        resource: String,
    },
    /// List resource keys with their TTLs and upstream minimum intervals
    Resources,
}

fn http_client(config: &Config) -> anyhow::Result<Arc<dyn HttpClientPort>> {
    let http = ReqwestHttp::new(Duration::from_secs(config.upstream.timeout_seconds))
        .context("failed to build HTTP client")?;
    Ok(Arc::new(http))
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    metrics::init_metrics();

    let http = http_client(&config)?;
    let fast: Arc<dyn CacheTier> = Arc::new(MemoryCache::new());
    let sqlite = if config.storage.durable {
        Some(
            SqliteStore::open(&config.storage.db_path)
                .with_context(|| format!("failed to open {}", config.storage.db_path.display()))?,
        )
    } else {
        warn!("durable cache disabled; cache, view counts and weather history are lost on restart");
        None
    };

    let durable = sqlite.clone().map(|s| Arc::new(s) as Arc<dyn CacheTier>);
    let store = Arc::new(
        CacheStore::new(fast, durable)
            .with_tier_timeout(Duration::from_millis(config.storage.tier_timeout_ms)),
    );
    let records = match sqlite {
        Some(s) => s,
        None => SqliteStore::open_in_memory()?,
    };
    let counters: Arc<dyn CounterStorePort> = Arc::new(records.clone());
    let history: Arc<dyn HistoryStorePort> = Arc::new(records);

    let state = AppState::build(&config, http, store, counters, history, Arc::new(SystemClock))?;
    let host = config.server.host.parse().context("invalid server.host")?;
    let addr = SocketAddr::new(host, port.unwrap_or(config.server.port));
    server::run(state, addr).await
}

async fn fetch_once(config: Config, resource: &str) -> anyhow::Result<()> {
    let http = http_client(&config)?;
    let adapter = build_adapter(resource, http, &config.upstream)
        .ok_or_else(|| anyhow!("unknown resource '{}', see `resources`", resource))?;

    info!(resource, "fetching once");
    match adapter.fetch().await {
        FetchOutcome::Records(records) => {
            println!("{}: {} records", resource, records.len());
            if let Some(first) = records.first() {
                println!("{}", serde_json::to_string_pretty(first)?);
            }
            Ok(())
        }
        FetchOutcome::Empty { skipped } => Err(anyhow!(
            "{}: upstream answered but no record survived ({} dropped)",
            resource,
            skipped
        )),
        FetchOutcome::Failed(e) => Err(anyhow!(e).context(format!("{} fetch failed", resource))),
    }
}

fn list_resources() {
    println!(
        "{:<24} {:<40} {:>8} {:>8}",
        "KEY", "ROUTE", "MIN_INT", "TTL"
    );
    for policy in all_resources() {
        let route = match policy.selector {
            Some(sel) => format!("{}?{}={}", policy.route, sel.param, sel.value),
            None => policy.route.to_string(),
        };
        println!(
            "{:<24} {:<40} {:>7}s {:>7}s",
            policy.key,
            route,
            policy.upstream_min_interval.as_secs(),
            policy.ttl.as_secs()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Fetch { resource } => fetch_once(config, &resource).await,
        Commands::Resources => {
            list_resources();
            Ok(())
        }
    }
}
