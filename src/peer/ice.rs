use crate::peer::connection::MediaTransport;
use crate::peer::types::IceCandidate;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Отпечаток кандидата: sha256 от сериализованного JSON
pub fn fingerprint(candidate: &IceCandidate) -> String {
    let json = serde_json::to_vec(candidate).unwrap_or_else(|_| candidate.candidate.clone().into_bytes());
    hex::encode(Sha256::digest(&json))
}

/// Set of remote candidates already handed to the transport for one direction.
#[derive(Debug, Default)]
pub struct CandidateLedger {
    applied: HashSet<String>,
}

impl CandidateLedger {
    /// Returns true the first time a candidate is seen.
    pub fn admit(&mut self, candidate: &IceCandidate) -> bool {
        self.applied.insert(fingerprint(candidate))
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn clear(&mut self) {
        self.applied.clear();
    }
}

/// Применяет ещё не применённые кандидаты. До установки remote description
/// ничего не делает: кандидаты остаются в документе и придут со следующим снимком.
pub async fn apply_new_candidates(
    transport: &dyn MediaTransport,
    ledger: &mut CandidateLedger,
    candidates: &[IceCandidate],
) -> usize {
    if candidates.is_empty() || !transport.has_remote_description().await {
        return 0;
    }

    let mut applied = 0;
    for candidate in candidates {
        if !ledger.admit(candidate) {
            continue;
        }
        debug!(candidate = %candidate.candidate, "applying remote candidate");
        // ошибки не фатальны: кандидаты избыточны
        if let Err(e) = transport.add_ice_candidate(candidate.clone()).await {
            warn!("failed to add remote candidate: {e}");
        }
        applied += 1;
    }
    if applied > 0 {
        analyze_candidates(candidates);
    }
    applied
}

pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if !candidates.is_empty() && relay_count == 0 {
        debug!("No TURN relay candidates found, connection through symmetric NAT may fail");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::fake::FakeTransport;
    use crate::peer::types::SessionDescription;

    fn cand(n: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 5000{n} typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn ledger_admits_each_candidate_once() {
        let mut ledger = CandidateLedger::default();
        assert!(ledger.admit(&cand(1)));
        assert!(!ledger.admit(&cand(1)));
        assert!(ledger.admit(&cand(2)));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn candidates_wait_for_remote_description() {
        let transport = FakeTransport::new();
        let mut ledger = CandidateLedger::default();
        let batch = vec![cand(1), cand(2)];

        assert_eq!(apply_new_candidates(&transport, &mut ledger, &batch).await, 0);
        assert!(ledger.is_empty());

        transport
            .set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert_eq!(apply_new_candidates(&transport, &mut ledger, &batch).await, 2);
        // повторная доставка того же снимка
        assert_eq!(apply_new_candidates(&transport, &mut ledger, &batch).await, 0);
        assert_eq!(transport.applied_candidates().len(), 2);
    }

    #[tokio::test]
    async fn any_delivery_order_yields_same_applied_set() {
        let orders: Vec<Vec<u16>> = vec![vec![1, 2, 3], vec![3, 1, 2, 1], vec![2, 2, 3, 1, 3]];
        let mut results = Vec::new();
        for order in orders {
            let transport = FakeTransport::new();
            transport
                .set_remote_description(SessionDescription::answer("v=0"))
                .await
                .unwrap();
            let mut ledger = CandidateLedger::default();
            for n in order {
                apply_new_candidates(&transport, &mut ledger, &[cand(n)]).await;
            }
            let mut applied: Vec<String> = transport
                .applied_candidates()
                .into_iter()
                .map(|c| c.candidate)
                .collect();
            assert_eq!(applied.len(), 3);
            applied.sort();
            results.push(applied);
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }
}
