use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::availability::PlanCatalog;
use crate::engine::EngineOptions;
use crate::limits::*;
use crate::lock::LockSettings;

/// Process settings, read once at start-up from `SLOTKEEP_*` variables.
/// Values that fail to parse fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub lock_ttl: Duration,
    pub acquire_attempts: u32,
    /// Zero disables the sweeper.
    pub lock_sweep_interval: Duration,
    pub utc_offset_minutes: i32,
    pub legacy_reset_seats: bool,
    pub plans: PlanCatalog,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5480,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            lock_ttl: Duration::from_millis(DEFAULT_LOCK_TTL_MS as u64),
            acquire_attempts: DEFAULT_ACQUIRE_ATTEMPTS,
            lock_sweep_interval: Duration::ZERO,
            utc_offset_minutes: 0,
            legacy_reset_seats: true,
            plans: PlanCatalog::standard(),
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let plans = match lookup("SLOTKEEP_PLANS") {
            Some(json) => PlanCatalog::from_json(&json).unwrap_or_else(|e| {
                tracing::warn!("SLOTKEEP_PLANS is not a valid plan catalog ({e}); using defaults");
                d.plans.clone()
            }),
            None => d.plans.clone(),
        };

        Self {
            bind: lookup("SLOTKEEP_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "SLOTKEEP_PORT").unwrap_or(d.port),
            data_dir: lookup("SLOTKEEP_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            max_connections: parsed(&lookup, "SLOTKEEP_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "SLOTKEEP_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            lock_ttl: parsed(&lookup, "SLOTKEEP_LOCK_TTL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.lock_ttl),
            acquire_attempts: parsed(&lookup, "SLOTKEEP_ACQUIRE_ATTEMPTS")
                .filter(|n: &u32| (1..=MAX_ACQUIRE_ATTEMPTS).contains(n))
                .unwrap_or(d.acquire_attempts),
            lock_sweep_interval: parsed(&lookup, "SLOTKEEP_LOCK_SWEEP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.lock_sweep_interval),
            utc_offset_minutes: parsed(&lookup, "SLOTKEEP_UTC_OFFSET_MINUTES")
                .filter(|m: &i32| m.abs() < 24 * 60)
                .unwrap_or(d.utc_offset_minutes),
            legacy_reset_seats: flag(&lookup, "SLOTKEEP_LEGACY_RESET_SEATS")
                .unwrap_or(d.legacy_reset_seats),
            plans,
            metrics_port: parsed(&lookup, "SLOTKEEP_METRICS_PORT"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slots.wal")
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            legacy_reset_seats_on_update: self.legacy_reset_seats,
        }
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            ttl_ms: self.lock_ttl.as_millis() as i64,
            max_attempts: self.acquire_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = config(&[]);
        assert_eq!(c.addr(), "0.0.0.0:5480");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.lock_ttl, Duration::from_secs(600));
        assert_eq!(c.acquire_attempts, 3);
        assert_eq!(c.lock_sweep_interval, Duration::ZERO);
        assert!(c.legacy_reset_seats);
        assert!(c.plans.is_available("maang"));
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.wal_path(), PathBuf::from("./data/slots.wal"));
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("SLOTKEEP_PORT", "7000"),
            ("SLOTKEEP_LOCK_TTL_SECS", "300"),
            ("SLOTKEEP_LOCK_SWEEP_SECS", "30"),
            ("SLOTKEEP_UTC_OFFSET_MINUTES", "330"),
            ("SLOTKEEP_LEGACY_RESET_SEATS", "off"),
            ("SLOTKEEP_METRICS_PORT", "9100"),
            ("SLOTKEEP_PLANS", r#"{"maang": {"available": false, "price": 9999}}"#),
        ]);
        assert_eq!(c.port, 7000);
        assert_eq!(c.lock_settings().ttl_ms, 300_000);
        assert_eq!(c.lock_sweep_interval, Duration::from_secs(30));
        assert_eq!(c.utc_offset().local_minus_utc(), 330 * 60);
        assert!(!c.engine_options().legacy_reset_seats_on_update);
        assert_eq!(c.metrics_port, Some(9100));
        assert!(!c.plans.is_available("maang"));
        assert_eq!(c.plans.get("maang").unwrap().price, Some(9999));
    }

    #[test]
    fn bad_values_fall_back() {
        let c = config(&[
            ("SLOTKEEP_PORT", "not-a-port"),
            ("SLOTKEEP_ACQUIRE_ATTEMPTS", "0"),
            ("SLOTKEEP_UTC_OFFSET_MINUTES", "99999"),
            ("SLOTKEEP_LEGACY_RESET_SEATS", "maybe"),
            ("SLOTKEEP_PLANS", "{broken"),
        ]);
        assert_eq!(c.port, 5480);
        assert_eq!(c.acquire_attempts, 3);
        assert_eq!(c.utc_offset_minutes, 0);
        assert!(c.legacy_reset_seats);
        assert_eq!(c.plans, PlanCatalog::standard());
    }
}
