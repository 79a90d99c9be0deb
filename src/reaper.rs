use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that periodically removes expired holds.
///
/// Expired holds never block a booking, so this is housekeeping: it keeps
/// day partitions small and `holds` lookups honest.
pub async fn run_hold_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// One sweep pass. Returns the number of holds removed.
pub async fn sweep_once(engine: &Engine) -> usize {
    match engine.purge_expired_holds().await {
        Ok(0) => 0,
        Ok(n) => {
            info!(purged = n, "expired holds swept");
            n
        }
        Err(e) => {
            warn!(error = %e, "hold sweep failed");
            0
        }
    }
}

/// Background task that compacts the WAL once enough commits accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Compact when the WAL has grown past `threshold` appends. Returns whether
/// a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "WAL compacted");
            true
        }
        Err(e) => {
            warn!(error = %e, "WAL compaction failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{HoldRequest, ManualClock};
    use crate::model::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotguard_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    async fn engine_with_court(name: &str, clock: Arc<ManualClock>) -> Engine {
        let engine =
            Engine::with_clock(test_wal_path(name), EngineConfig::default(), clock).unwrap();
        engine
            .upsert_resource(Resource {
                id: 1,
                category: "tennis".into(),
                facility_id: 1,
                status: ResourceStatus::Available,
            })
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_holds() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = engine_with_court("sweep.wal", clock.clone()).await;
        let date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();

        let short = engine
            .acquire_hold(&HoldRequest {
                resource_id: 1,
                date,
                start: t(9),
                end: t(10),
                owner: "alice".into(),
                ttl: Some(Duration::from_secs(60)),
            })
            .await
            .unwrap();
        let long = engine
            .acquire_hold(&HoldRequest {
                resource_id: 1,
                date,
                start: t(11),
                end: t(12),
                owner: "bob".into(),
                ttl: Some(Duration::from_secs(600)),
            })
            .await
            .unwrap();

        assert_eq!(sweep_once(&engine).await, 0);

        clock.advance(120_000);
        assert_eq!(sweep_once(&engine).await, 1);
        assert!(engine.hold_status(short.token).await.unwrap().is_none());
        assert!(engine.hold_status(long.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = engine_with_court("compact_threshold.wal", clock).await;

        assert!(!compact_if_needed(&engine, 10).await);
        assert!(compact_if_needed(&engine, 1).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
