use crate::peer::types::ServerConfig;
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// `rec_<ts>_<random>` для локальной записи, `rec_remote_<ts>_<random>` для удалённой
pub fn recording_id(prefix: &str, timestamp: i64) -> String {
    format!("{prefix}_{timestamp}_{}", random_id())
}

/// Размер чанка в мегабайтах, два знака после запятой
pub fn size_label(bytes: usize) -> String {
    format!("{:.2} MB", bytes as f64 / 1_048_576.0)
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Wall-clock milliseconds anchored to the tokio clock at creation, so that
/// pulses, negotiation ids and recording timestamps advance with virtual time
/// under a paused runtime.
#[derive(Clone)]
pub struct Clock {
    base_wall_ms: i64,
    base: Instant,
    last_token: Arc<AtomicI64>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            base_wall_ms: chrono::Utc::now().timestamp_millis(),
            base: Instant::now(),
            last_token: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.base_wall_ms + self.base.elapsed().as_millis() as i64
    }

    /// Monotonic negotiation token: the current time, bumped past the last
    /// token handed out.
    pub fn next_token(&self) -> i64 {
        let now = self.now_millis();
        let mut prev = self.last_token.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_token
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn size_label_uses_binary_megabytes() {
        assert_eq!(size_label(1_048_576), "1.00 MB");
        assert_eq!(size_label(10_000), "0.01 MB");
        assert_eq!(size_label(3_670_016), "3.50 MB");
    }

    #[test]
    fn recording_ids_carry_prefix_and_timestamp() {
        let id = recording_id("rec_remote", 1234);
        assert!(id.starts_with("rec_remote_1234_"));
        assert_ne!(id, recording_id("rec_remote", 1234));
    }

    #[test]
    fn scheme_is_added_only_when_missing() {
        let mut config = ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("u".into()),
            credential: Some("p".into()),
        };
        assert_eq!(add_ice_url_scheme(&config), "turn:relay.example.org:3478");
        config.url = "stun:stun.example.org".into();
        assert_eq!(add_ice_url_scheme(&config), "stun:stun.example.org");
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_strictly_increasing() {
        let clock = Clock::new();
        let a = clock.next_token();
        let b = clock.next_token();
        assert!(b > a);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let c = clock.next_token();
        assert!(c >= a + 2_000);
    }
}
