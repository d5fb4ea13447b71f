//! Process-wide registry of session progress records.
//!
//! Every session only ever touches its own key. The retention sweep removes
//! keys with `remove_if`, which holds the shard lock while it checks the
//! start time, so it cannot interleave with a concurrent `set` on that key.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::OutputStore;
use crate::types::SessionProgress;

#[derive(Clone, Default)]
pub struct ProgressRegistry {
    sessions: Arc<DashMap<String, SessionProgress>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, progress: SessionProgress) {
        self.sessions.insert(progress.session_id.clone(), progress);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionProgress> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Applies `f` to the record in place and returns the updated copy.
    pub fn update<F>(&self, session_id: &str, f: F) -> Option<SessionProgress>
    where
        F: FnOnce(&mut SessionProgress),
    {
        let mut entry = self.sessions.get_mut(session_id)?;
        f(entry.value_mut());
        Some(entry.value().clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionProgress> {
        self.sessions.remove(session_id).map(|(_, progress)| progress)
    }

    pub fn list(&self) -> Vec<SessionProgress> {
        let mut all: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|p| p.start_time);
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops sessions that started more than `retention` ago.
    pub fn sweep(&self, retention: Duration) -> Vec<String> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().start_time < cutoff)
            .map(|e| e.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter_map(|id| {
                self.sessions
                    .remove_if(&id, |_, p| p.start_time < cutoff)
                    .map(|(id, _)| id)
            })
            .collect()
    }
}

/// Periodically sweeps expired sessions and deletes their persisted output.
pub fn spawn_sweeper(
    registry: ProgressRegistry,
    store: OutputStore,
    interval: Duration,
    retention: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            for session_id in registry.sweep(retention) {
                info!(session_id = %session_id, "cleaned up old session");
                if let Err(e) = store.delete(&session_id).await {
                    warn!(session_id = %session_id, error = %e, "failed to delete session output");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExploreTarget, SessionStatus};

    fn progress(id: &str, age: chrono::Duration) -> SessionProgress {
        let target = ExploreTarget::parse("https://vercel.com", None).unwrap();
        let mut p = SessionProgress::new(id, &target, Vec::new());
        p.start_time = Utc::now() - age;
        p
    }

    #[test]
    fn set_get_update_remove() {
        let registry = ProgressRegistry::new();
        assert!(registry.get("s1").is_none());

        registry.set(progress("s1", chrono::Duration::zero()));
        let updated = registry
            .update("s1", |p| {
                p.set_status(SessionStatus::Running).unwrap();
                p.set_overall(33);
            })
            .unwrap();
        assert_eq!(updated.overall_progress, 33);
        assert_eq!(registry.get("s1").unwrap().status, SessionStatus::Running);

        assert!(registry.update("missing", |p| p.set_overall(10)).is_none());
        assert!(registry.remove("s1").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_only_removes_expired_sessions() {
        let registry = ProgressRegistry::new();
        registry.set(progress("old", chrono::Duration::hours(2)));
        registry.set(progress("fresh", chrono::Duration::minutes(5)));

        let removed = registry.sweep(Duration::from_secs(3600));

        assert_eq!(removed, vec!["old".to_string()]);
        assert!(registry.get("fresh").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_interfere() {
        let registry = ProgressRegistry::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("session-{i}");
                registry.set(progress(&id, chrono::Duration::zero()));
                for pct in [10u8, 33, 66, 100] {
                    registry.update(&id, |p| p.set_overall(pct));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 16);
        assert!(registry.list().iter().all(|p| p.overall_progress == 100));
    }

    #[tokio::test]
    async fn sweeper_deletes_persisted_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();
        let session_dir = store.session_dir("old").await.unwrap();
        tokio::fs::write(session_dir.join("step-1-screenshot.png"), b"png")
            .await
            .unwrap();

        let registry = ProgressRegistry::new();
        registry.set(progress("old", chrono::Duration::hours(3)));
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            registry.clone(),
            store.clone(),
            Duration::from_millis(20),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        for _ in 0..100 {
            if registry.is_empty() && !session_dir.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(registry.is_empty());
        assert!(!session_dir.exists());
    }
}
