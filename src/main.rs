// Loopback demo: a camera and a monitor in one process, talking through an
// in-memory document store over real peer connections.

use anyhow::Context;
use camlink_lib::media::TestPatternDevices;
use camlink_lib::peer::WebRtcFactory;
use camlink_lib::signaling::MemoryStore;
use camlink_lib::{logger, EngineDeps, LinkConfig, LinkEngine, LocalArchive};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

const SESSION_ID: &str = "security-cam123";
const DEMO_DURATION: Duration = Duration::from_secs(45);

fn engine(config: &LinkConfig, store: &Arc<MemoryStore>, archive: &LocalArchive) -> LinkEngine {
    LinkEngine::new(EngineDeps {
        config: config.clone(),
        store: store.clone(),
        peers: Arc::new(WebRtcFactory::new(config.ice_servers.clone())),
        devices: Arc::new(TestPatternDevices::default()),
        archive: archive.clone(),
    })
}

fn trace_status(label: &'static str, mut rx: watch::Receiver<camlink_lib::LinkStatus>) {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            info!("[{label}] {:?} / {:?}: {}", status.mode, status.state, status.message);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LinkConfig::from_env().context("load configuration")?;
    logger::init(&config);

    let archive = LocalArchive::open(&config.archive_path)
        .with_context(|| format!("open archive {}", config.archive_path.display()))?;
    let store = Arc::new(MemoryStore::new());

    let source = engine(&config, &store, &archive);
    let viewer = engine(&config, &store, &archive);
    trace_status("camera", source.status());
    trace_status("monitor", viewer.status());

    source.start_source(SESSION_ID).await?;
    viewer.start_viewer(SESSION_ID).await?;

    tokio::select! {
        _ = tokio::time::sleep(DEMO_DURATION) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    viewer.terminate().await?;
    source.terminate().await?;
    for rec in source.list_recordings().await? {
        info!("saved {} at {} ({})", rec.id, rec.timestamp, rec.size_label);
    }
    Ok(())
}
