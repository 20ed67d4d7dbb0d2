//! Per-job resource tracking and cleanup.
//!
//! Every temporary artifact a stage produces is registered against its job;
//! `release_all` runs on every terminal transition and removes the job's
//! scratch directory wholesale. A startup scan reclaims scratch left behind
//! by a crashed or killed process once it ages past the grace period.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::Result;
use crate::job::JobId;

/// Kinds of artifacts a job can acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Mono 16 kHz WAV handed to the ASR collaborator.
    ExtractedAudio,
    /// Raw ASR output.
    TranscriptJson,
    /// Rendered subtitle track (extension depends on output mode).
    RenderedTrack(&'static str),
}

impl ArtifactKind {
    fn file_name(&self) -> String {
        match self {
            Self::ExtractedAudio => "audio.wav".to_string(),
            Self::TranscriptJson => "transcript.json".to_string(),
            Self::RenderedTrack(ext) => format!("track.{ext}"),
        }
    }
}

/// Tracks scratch artifacts per job and owns the on-disk layout:
/// `<work_dir>/jobs/<job_id>/` for scratch, `<work_dir>/outputs/` for
/// results that must survive cleanup.
pub struct ResourceManager {
    work_dir: PathBuf,
    registry: DashMap<JobId, Vec<PathBuf>>,
}

impl ResourceManager {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            registry: DashMap::new(),
        }
    }

    /// Create the work-dir layout. Called once at startup.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.jobs_root()).await?;
        tokio::fs::create_dir_all(self.outputs_root()).await?;
        Ok(())
    }

    fn jobs_root(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }

    fn outputs_root(&self) -> PathBuf {
        self.work_dir.join("outputs")
    }

    pub fn job_dir(&self, id: JobId) -> PathBuf {
        self.jobs_root().join(id.to_string())
    }

    /// Register a scratch artifact of the given kind and hand back its path.
    /// The job's scratch directory is created on first acquisition.
    pub async fn acquire(&self, id: JobId, kind: ArtifactKind) -> Result<PathBuf> {
        let dir = self.job_dir(id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(kind.file_name());
        self.registry.entry(id).or_default().push(path.clone());
        debug!(job_id = %id, path = %path.display(), "acquired scratch artifact");
        Ok(path)
    }

    /// Path for a job's published output; not subject to cleanup.
    pub fn output_path(&self, id: JobId, extension: &str) -> PathBuf {
        self.outputs_root().join(format!("{id}.{extension}"))
    }

    /// Release everything registered under the job, scratch directory
    /// included. Best-effort: failures are logged, never propagated, so a
    /// terminal transition always completes.
    pub async fn release_all(&self, id: JobId) {
        let registered = self.registry.remove(&id).map(|(_, v)| v).unwrap_or_default();
        for path in registered {
            if !path.exists() {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(job_id = %id, path = %path.display(), "failed to remove artifact: {e}");
            }
        }
        let dir = self.job_dir(id);
        if dir.exists() {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(job_id = %id, "scratch directory removed"),
                Err(e) => warn!(job_id = %id, "failed to remove scratch directory: {e}"),
            }
        }
    }

    /// Reclaim scratch directories older than the grace period. Run at
    /// startup to sweep up after a crashed or killed predecessor.
    pub async fn scan_orphans(&self, grace: Duration) -> Result<usize> {
        let root = self.jobs_root();
        if !root.exists() {
            return Ok(0);
        }

        let mut reclaimed = 0usize;
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if !Self::older_than(&path, grace).await {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    info!(path = %path.display(), "reclaimed orphaned scratch directory");
                    reclaimed += 1;
                }
                Err(e) => warn!(path = %path.display(), "failed to reclaim orphan: {e}"),
            }
        }
        Ok(reclaimed)
    }

    async fn older_than(path: &Path, grace: Duration) -> bool {
        match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age >= grace)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn acquire_creates_scratch_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(tmp.path());
        manager.init().await.unwrap();

        let id = Uuid::new_v4();
        let audio = manager.acquire(id, ArtifactKind::ExtractedAudio).await.unwrap();
        assert!(audio.ends_with(format!("jobs/{id}/audio.wav")));
        assert!(manager.job_dir(id).exists());
    }

    #[tokio::test]
    async fn release_all_removes_scratch() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(tmp.path());
        manager.init().await.unwrap();

        let id = Uuid::new_v4();
        let audio = manager.acquire(id, ArtifactKind::ExtractedAudio).await.unwrap();
        tokio::fs::write(&audio, b"pcm").await.unwrap();

        manager.release_all(id).await;
        assert!(!audio.exists());
        assert!(!manager.job_dir(id).exists());
    }

    #[tokio::test]
    async fn release_all_spares_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(tmp.path());
        manager.init().await.unwrap();

        let id = Uuid::new_v4();
        let out = manager.output_path(id, "mp4");
        tokio::fs::write(&out, b"video").await.unwrap();

        manager.release_all(id).await;
        assert!(out.exists());
    }

    #[tokio::test]
    async fn orphan_scan_respects_grace_period() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(tmp.path());
        manager.init().await.unwrap();

        let id = Uuid::new_v4();
        let dir = manager.job_dir(id);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("audio.wav"), b"left behind").await.unwrap();

        // Fresh directory survives a long grace period.
        let reclaimed = manager.scan_orphans(Duration::from_secs(3_600)).await.unwrap();
        assert_eq!(reclaimed, 0);
        assert!(dir.exists());

        // Zero grace reclaims it.
        let reclaimed = manager.scan_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(reclaimed, 1);
        assert!(!dir.exists());
    }
}
