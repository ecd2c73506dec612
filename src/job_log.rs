//! Job lifecycle hooks for task-queue hosts.
//!
//! The worker calls [`job_started`] just before handing control to the job
//! body; the returned guard reports the terminal state and releases the
//! job slot afterwards, even when the body panicked.

use std::time::Instant;

use tracing::{debug, error, info};

use crate::context::{self, JobInfo};
use crate::record::ErrorInfo;

/// Terminal state reported by the host for one job run.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success,
    /// The job failed; carry the captured error when there is one.
    Failed(Option<ErrorInfo>),
}

/// Scope guard for one background job execution.
pub struct JobLogGuard {
    job_id: String,
    name: String,
    started: Instant,
    finished: bool,
}

/// Fill the job slot for the current unit of work and announce the run.
///
/// The announcement is a debug line: on busy queues the interesting lines
/// are the terminal ones.
pub fn job_started(job_id: impl Into<String>, name: impl Into<String>) -> JobLogGuard {
    let job_id = job_id.into();
    let name = name.into();

    context::set_job_info(JobInfo {
        id: job_id.clone(),
        name: name.clone(),
    });

    debug!("Job {:?} started: {}", job_id, name);

    JobLogGuard {
        job_id,
        name,
        started: Instant::now(),
        finished: false,
    }
}

impl JobLogGuard {
    /// Report the terminal state (info for success, error for failure,
    /// with the captured error fields attached), then release the job
    /// slot.
    pub fn finished(mut self, outcome: JobOutcome) {
        let duration = self.started.elapsed().as_secs_f64();
        match outcome {
            JobOutcome::Success => {
                info!(
                    "Job {:?} succeeded: {}, duration={:.4}s",
                    self.job_id, self.name, duration
                );
            }
            JobOutcome::Failed(Some(err)) => {
                let kind = err.error_type.as_deref().unwrap_or("Error");
                match &err.stack_trace {
                    Some(stack) => error!(
                        error_type = kind,
                        error_message = %err.message,
                        error_stack_trace = %stack,
                        "Job {:?} failed: {}, duration={:.4}s",
                        self.job_id,
                        self.name,
                        duration
                    ),
                    None => error!(
                        error_type = kind,
                        error_message = %err.message,
                        "Job {:?} failed: {}, duration={:.4}s",
                        self.job_id,
                        self.name,
                        duration
                    ),
                }
            }
            JobOutcome::Failed(None) => {
                error!(
                    "Job {:?} failed: {}, duration={:.4}s",
                    self.job_id, self.name, duration
                );
            }
        }
        self.finished = true;
    }
}

impl Drop for JobLogGuard {
    fn drop(&mut self) {
        if !self.finished {
            error!("Job {:?} aborted: {}", self.job_id, self.name);
        }
        context::clear_job_info();
    }
}
