use std::sync::Arc;
use std::sync::atomic::Ordering;

use job_worker::config::{StoreConfig, WorkerConfig};
use job_worker::error::Result;
use job_worker::executor::ShellExecutor;
use job_worker::publish::ArtifactPublisher;
use job_worker::store::{JobStore, LibSqlJobStore, PgJobStore};
use job_worker::worker::{Worker, WorkerDeps};

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env()?;

    eprintln!("Job worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Store: {}", config.store.describe());
    eprintln!("   Storage: {}", config.storage.endpoint_url());
    eprintln!("   Bucket: {}", config.publish.bucket);

    // ── Job store ───────────────────────────────────────────────────────
    let store: Arc<dyn JobStore> = match &config.store {
        StoreConfig::LibSql { path } => Arc::new(LibSqlJobStore::open(path).await?),
        StoreConfig::Postgres { .. } => Arc::new(PgJobStore::from_config(&config.store)?),
    };

    if let Err(e) = store.ping().await {
        eprintln!("Error: Job store unreachable ({}): {}", config.store.describe(), e);
        std::process::exit(1);
    }
    tracing::info!(store = %config.store.describe(), "Job store reachable");

    // ── Publisher and executor ──────────────────────────────────────────
    if let Err(e) = config.storage.validate() {
        tracing::warn!(error = %e, "Object storage configuration incomplete");
    }
    let publisher = Arc::new(ArtifactPublisher::from_config(
        &config.storage,
        config.publish.link_ttl,
    ));
    let executor = Arc::new(ShellExecutor::new(&config.executor));

    // ── Worker ──────────────────────────────────────────────────────────
    let deps = WorkerDeps {
        store,
        executor,
        publisher,
    };
    let mut worker = Worker::new(deps, config.publish.clone(), &config.run);

    let shutdown = worker.shutdown_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing current cycle");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    worker.run().await;
    Ok(())
}
