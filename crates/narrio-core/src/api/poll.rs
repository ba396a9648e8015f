//! Wait for a remote task to reach a terminal status.
//!
//! Checks immediately, then sleeps per the `PollSchedule` between checks.
//! Unrecognized statuses count as pending.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::{JobStatus, JobStatusResponse, RemoteJobApi};
use crate::config::PollSchedule;
use crate::error::ApiError;

/// Poll `task_id` until it completes.
///
/// Returns the final status response on completion, `ApiError::TaskFailed`
/// when the backend fails the task and `ApiError::TimedOut` once `limit`
/// has passed. Transport errors end the wait immediately.
pub async fn wait_for_task<A>(
    api: &A,
    task_id: &str,
    schedule: &PollSchedule,
    limit: Duration,
) -> Result<JobStatusResponse, ApiError>
where
    A: RemoteJobApi + ?Sized,
{
    match tokio::time::timeout(limit, poll_loop(api, task_id, schedule)).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::TimedOut(limit.as_secs())),
    }
}

async fn poll_loop<A>(
    api: &A,
    task_id: &str,
    schedule: &PollSchedule,
) -> Result<JobStatusResponse, ApiError>
where
    A: RemoteJobApi + ?Sized,
{
    let started = Instant::now();
    let mut last_status = None;

    loop {
        let response = api.get_job_status(task_id).await?;

        if last_status != Some(response.status) {
            if response.status == JobStatus::Unknown {
                warn!(
                    "Task {} reported an unrecognized status; treating it as pending",
                    task_id
                );
            } else {
                info!(
                    "Task {} status → {} (elapsed {}s)",
                    task_id,
                    response.status,
                    started.elapsed().as_secs()
                );
            }
            last_status = Some(response.status);
        }

        match response.status {
            JobStatus::Completed => return Ok(response),
            JobStatus::Failed => {
                let message = response.error.unwrap_or_default().trim().to_string();
                return Err(ApiError::TaskFailed(message));
            }
            JobStatus::Pending | JobStatus::Processing | JobStatus::Unknown => {
                sleep(schedule.interval_for(started.elapsed())).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::ScriptedApi;

    fn status(status: JobStatus) -> Result<JobStatusResponse, ApiError> {
        Ok(JobStatusResponse::new(status))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_is_immediate() {
        let api = ScriptedApi::new();
        api.script_task("t", vec![status(JobStatus::Completed)]);

        let started = Instant::now();
        let response = wait_for_task(api.as_ref(), "t", &PollSchedule::default(), Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(response.status, JobStatus::Completed);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(api.status_calls("t"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_carries_message() {
        let api = ScriptedApi::new();
        api.script_task(
            "t",
            vec![status(JobStatus::Processing), Ok(JobStatusResponse::failed(" render error "))],
        );

        let err = wait_for_task(api.as_ref(), "t", &PollSchedule::default(), Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::TaskFailed("render error".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_on_endless_pending() {
        let api = ScriptedApi::new();

        let err = wait_for_task(api.as_ref(), "t", &PollSchedule::default(), Duration::from_secs(45))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::TimedOut(45));
        // 0, 4, ..., 28, 32, 38, 44
        assert_eq!(api.status_calls("t"), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_ends_wait() {
        let api = ScriptedApi::new();
        api.script_task("t", vec![Err(ApiError::Network("reset".into()))]);

        let err = wait_for_task(api.as_ref(), "t", &PollSchedule::default(), Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Network("reset".into()));
    }
}
