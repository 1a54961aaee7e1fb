use object_pool::config::PoolConfig;
use object_pool::membership::MembershipService;
use object_pool::node::{HttpTransport, PoolNode, handlers};
use object_pool::object::{BlockObjectHandler, HandlerRegistry};
use object_pool::publish::PublishDaemon;
use object_pool::store::{BlobStore, FsBlobStore, MemoryBlobStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// HTTP listens this many ports above the gossip port.
const HTTP_PORT_OFFSET: u16 = 1000;

fn http_addr_for(bind_addr: SocketAddr) -> anyhow::Result<SocketAddr> {
    let Some(http_port) = bind_addr.port().checked_add(HTTP_PORT_OFFSET) else {
        anyhow::bail!(
            "--bind port {} leaves no room for the HTTP port",
            bind_addr.port()
        );
    };
    Ok(SocketAddr::new(bind_addr.ip(), http_port))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>] [--config <file>] \
             [--data-dir <dir>] [--capacity <bytes>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];
    let mut config_path: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut capacity: Option<u64> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--bind", Some(value)) => bind_addr = Some(value.parse()?),
            ("--seed", Some(value)) => seed_nodes.push(value.parse()?),
            ("--config", Some(value)) => config_path = Some(PathBuf::from(value)),
            ("--data-dir", Some(value)) => data_dir = Some(PathBuf::from(value)),
            ("--capacity", Some(value)) => capacity = Some(value.parse()?),
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    let Some(bind_addr) = bind_addr else {
        anyhow::bail!("--bind is required");
    };

    let mut config = match &config_path {
        Some(path) => PoolConfig::from_file(path)?,
        None => PoolConfig::default(),
    };
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }
    if let Some(capacity) = capacity {
        config.store_capacity_bytes = capacity;
    }

    tracing::info!("Starting pool node on {}", bind_addr);
    if !seed_nodes.is_empty() {
        tracing::info!("Seed nodes: {:?}", seed_nodes);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip). HTTP listens above gossip:
    let http_addr = http_addr_for(bind_addr)?;
    let membership = MembershipService::bind(bind_addr, http_addr, seed_nodes).await?;
    let address = membership.local_node().address();
    tracing::info!("Node ID: {}", address.id);
    membership.start();

    // 2. Local object store backend:
    let backend: Arc<dyn BlobStore> = match &config.data_dir {
        Some(dir) => {
            tracing::info!("Storing objects under {}", dir.display());
            Arc::new(FsBlobStore::open(dir, config.store_capacity_bytes)?)
        }
        None => {
            tracing::info!("Storing objects in memory");
            Arc::new(MemoryBlobStore::new(config.store_capacity_bytes))
        }
    };

    // 3. Object types and the pool node:
    let blocks = BlockObjectHandler::new();
    let registry = HandlerRegistry::new();
    registry.register(blocks.clone());

    let transport = Arc::new(HttpTransport::new(
        config.request_timeout(),
        config.retry_attempts,
    ));
    let node = PoolNode::new(
        address,
        config,
        backend,
        membership.clone(),
        transport,
        registry,
    );

    // 4. Publish daemon:
    let daemon = PublishDaemon::new(node.clone());
    daemon.start();

    // 5. Spawn stats reporter:
    let stats_node = node.clone();
    let stats_daemon = daemon.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));

        loop {
            interval.tick().await;
            let store = stats_node.store();
            tracing::info!(
                "Pool stats: {} alive nodes, {} objects ({} of {} bytes), {} publish records",
                stats_node.known_nodes().len(),
                store.len(),
                store.capacity_used(),
                store.capacity(),
                stats_node.publishers().record_count()
            );
            tracing::debug!("Daemon stats: {:?}", stats_daemon.stats());
        }
    });

    // 6. Start HTTP server:
    let app = handlers::router(node, blocks, daemon);

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
