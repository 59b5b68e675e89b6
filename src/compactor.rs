use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};

/// Compact the WAL if at least `threshold` events were appended since the
/// last compaction. Returns whether it ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        debug!(appended, threshold, "compaction not due");
        return Ok(false);
    }
    engine.compact_wal().await?;
    Ok(true)
}

/// Background task that keeps the WAL short.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotifyHub, Outbox};
    use std::path::PathBuf;
    use tokio_test::assert_ok;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("esp_reservation_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
        for i in 0..3 {
            assert_ok!(
                engine
                    .create_commission(Ulid::new(), &format!("Commission {i}"), None)
                    .await
            );
        }

        assert!(!assert_ok!(compact_if_due(&engine, 10).await));
        assert_eq!(engine.wal_appends_since_compact().await, 3);
        assert!(assert_ok!(compact_if_due(&engine, 3).await));
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_commissions().len(), 3);
    }

    #[tokio::test]
    async fn background_task_compacts() {
        let path = test_wal_path("background.wal");
        let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap());
        assert_ok!(engine.create_commission(Ulid::new(), "Commission Sport", None).await);

        let task = tokio::spawn(run_compactor(engine.clone(), 1, Duration::from_secs(30)));
        // The first tick fires immediately.
        for _ in 0..100 {
            if engine.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        task.abort();
    }
}
