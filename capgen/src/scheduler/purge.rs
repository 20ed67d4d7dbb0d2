//! Retention purge: evicts terminal jobs from the status table once they
//! age past the retention window. Runs as a background task.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::job::{Job, JobId};

/// Evict terminal jobs whose finish time predates the retention window.
/// Returns the number of evicted records. Retention 0 retains forever.
pub fn purge_once(table: &DashMap<JobId, Job>, retention_secs: u64) -> usize {
    if retention_secs == 0 {
        return 0;
    }
    let cutoff = Utc::now() - ChronoDuration::seconds(retention_secs as i64);
    let before = table.len();
    table.retain(|_, job| {
        !(job.state.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
    });
    before - table.len()
}

/// Spawn the periodic purge task.
pub fn start_background_task(
    table: Arc<DashMap<JobId, Job>>,
    retention_secs: u64,
    interval_secs: u64,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs));
        info!(
            retention_secs,
            interval_secs, "status retention purge started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("status retention purge shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = purge_once(&table, retention_secs);
                    if evicted > 0 {
                        debug!(evicted, "evicted terminal jobs past retention");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobOptions, JobState};
    use std::path::PathBuf;

    fn terminal_job(finished_secs_ago: i64) -> Job {
        let mut job = Job::new(PathBuf::from("/in.mp4"), JobOptions::default());
        job.transition(JobState::Extracting).unwrap();
        job.fail(crate::job::JobError {
            kind: crate::job::FailureKind::ToolFailure,
            message: "boom".to_string(),
        })
        .unwrap();
        job.finished_at = Some(Utc::now() - ChronoDuration::seconds(finished_secs_ago));
        job
    }

    #[test]
    fn evicts_only_aged_terminal_jobs() {
        let table = DashMap::new();

        let old = terminal_job(120);
        let fresh = terminal_job(5);
        let running = Job::new(PathBuf::from("/in.mp4"), JobOptions::default());
        table.insert(old.id, old.clone());
        table.insert(fresh.id, fresh.clone());
        table.insert(running.id, running.clone());

        let evicted = purge_once(&table, 60);
        assert_eq!(evicted, 1);
        assert!(!table.contains_key(&old.id));
        assert!(table.contains_key(&fresh.id));
        assert!(table.contains_key(&running.id));
    }

    #[test]
    fn zero_retention_disables_eviction() {
        let table = DashMap::new();
        let old = terminal_job(10_000);
        table.insert(old.id, old.clone());

        assert_eq!(purge_once(&table, 0), 0);
        assert!(table.contains_key(&old.id));
    }
}
