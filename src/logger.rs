use crate::config::LinkConfig;
use once_cell::sync::OnceCell;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

/// Переменная окружения с фильтром логов
pub const LOG_ENV: &str = "CAMLINK_LOG";

static INIT: OnceCell<bool> = OnceCell::new();

fn default_directive() -> &'static str {
    if cfg!(debug_assertions) {
        "camlink_lib=debug,camlink=debug"
    } else {
        "warn"
    }
}

/// Installs the global fmt subscriber once. Returns whether logging is on.
pub fn init(config: &LinkConfig) -> bool {
    *INIT.get_or_init(|| {
        if !config.logging_enabled {
            return false;
        }
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(default_directive()));
        // в тестах подписчик мог уже поставить кто-то другой
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    })
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub async fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index, init.username_fragment
        );
    }
}

/// Быстрый снимок getStats → выбранная пара
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
