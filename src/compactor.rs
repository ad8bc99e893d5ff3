use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the tenant's WAL once `threshold` events have been appended since
/// the last snapshot. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appended} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps a tenant's WAL bounded.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if !compact_if_due(&engine, threshold).await {
            debug!("compactor idle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::Wal;
    use chrono_tz::Tz;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("classtime_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Tz::UTC).unwrap();

        for i in 0..3 {
            engine
                .register_student(Ulid::new(), Some(format!("student {i}")))
                .await
                .unwrap();
        }
        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], crate::model::Event::Snapshot(_)));
    }
}
