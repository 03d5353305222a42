//! In-memory job registry.
//!
//! Records live in a [`DashMap`]; every mutation happens under the entry lock
//! so readers only ever see whole snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::model::{DeliveryMode, Job, JobId, JobSpec, JobStatus, ResultLocator};
use crate::error::{Error, Result};
use crate::platform::Platform;

const ENTITY: &str = "Download";

/// Concurrent job store with atomic state transitions.
#[derive(Debug)]
pub struct JobStore {
    jobs: DashMap<JobId, Job>,
    next_id: AtomicU64,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Store a new pending job and return its id.
    pub fn insert(&self, spec: JobSpec, platform: Platform, mode: DeliveryMode) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job::new(id, spec, platform, mode, Utc::now());
        self.jobs.insert(id, job);
        debug!(job_id = id, %platform, "Job created");
        id
    }

    pub fn get(&self, id: JobId) -> Result<Job> {
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found(ENTITY, id))
    }

    /// Record a progress value reported for a pending job.
    ///
    /// The value is clamped to `[0, 100]` and rounded half to even. Lower
    /// values than the stored one are dropped. Reaching 100 completes the job.
    /// Terminal jobs are returned unchanged.
    pub fn update_progress(&self, id: JobId, value: f64) -> Result<Job> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(ENTITY, id))?;

        if !value.is_finite() {
            return Err(Error::InvalidValue(format!(
                "progress must be finite, got {value}"
            )));
        }

        let job = entry.value_mut();
        if job.is_terminal() {
            return Ok(job.clone());
        }

        let progress = normalize_progress(value);
        if progress >= job.progress {
            job.progress = progress;
            if progress == 100 {
                job.status = JobStatus::Completed;
                job.finished_at = Some(Utc::now());
                debug!(job_id = id, "Job completed by progress");
            }
        } else {
            trace!(job_id = id, progress, stored = job.progress, "Dropping stale progress");
        }

        Ok(job.clone())
    }

    /// Move a job to a terminal status.
    ///
    /// Returns `true` if this call performed the transition. A job that is
    /// already terminal is left alone, except that a completed job without a
    /// locator accepts one from a later completion.
    pub fn set_terminal(
        &self,
        id: JobId,
        status: JobStatus,
        locator: Option<ResultLocator>,
    ) -> Result<bool> {
        self.transition(id, status, locator, None)
    }

    /// Fail a job with a short user-facing reason.
    pub fn fail(&self, id: JobId, reason: impl Into<String>) -> Result<bool> {
        self.transition(id, JobStatus::Failed, None, Some(reason.into()))
    }

    fn transition(
        &self,
        id: JobId,
        status: JobStatus,
        locator: Option<ResultLocator>,
        reason: Option<String>,
    ) -> Result<bool> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(ENTITY, id))?;

        if !status.is_terminal() {
            return Err(Error::InvalidValue(
                "terminal status must be completed or failed".to_string(),
            ));
        }

        let job = entry.value_mut();
        if job.is_terminal() {
            if job.status == JobStatus::Completed
                && status == JobStatus::Completed
                && job.result_locator.is_none()
                && locator.is_some()
            {
                job.result_locator = locator;
                debug!(job_id = id, "Locator attached to completed job");
            }
            return Ok(false);
        }

        job.status = status;
        job.finished_at = Some(Utc::now());
        match status {
            JobStatus::Completed => {
                job.progress = 100;
                job.result_locator = locator;
            }
            JobStatus::Failed => {
                job.error = Some(reason.unwrap_or_else(|| "download failed".to_string()));
            }
            JobStatus::Pending => {}
        }
        debug!(job_id = id, %status, "Job finished");

        Ok(true)
    }

    pub fn remove(&self, id: JobId) -> Result<Job> {
        self.jobs
            .remove(&id)
            .map(|(_, job)| job)
            .ok_or_else(|| Error::not_found(ENTITY, id))
    }

    /// Remove every job and return the ids that were dropped.
    ///
    /// Jobs inserted while the clear is running may survive it; they are never
    /// reported as removed.
    pub fn clear(&self) -> Vec<JobId> {
        let mut removed = Vec::with_capacity(self.jobs.len());
        self.jobs.retain(|id, _| {
            removed.push(*id);
            false
        });
        removed.sort_unstable();
        removed
    }

    /// Record the size in bytes of a job's finished artifact.
    pub fn set_file_size(&self, id: JobId, bytes: u64) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(ENTITY, id))?;
        entry.value_mut().file_size = Some(bytes);
        Ok(())
    }

    /// Most recent jobs first; equal timestamps keep insertion order.
    pub fn list_recent(&self, limit: usize) -> Vec<Job> {
        let mut jobs = self.snapshot();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        jobs.truncate(limit);
        jobs
    }

    /// Jobs with the given status, in insertion order.
    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn snapshot(&self) -> Vec<Job> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Clamp to `[0, 100]` and round half to even.
fn normalize_progress(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round_ties_even() as u8
}
