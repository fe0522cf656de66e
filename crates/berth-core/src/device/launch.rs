//! Launching an installed app through debugserver.
//!
//! Launching right after installation can race the device finishing the
//! install; debugserver then reports `EBusy` or `ENotFound` for a second or
//! so. The launch is therefore driven by a small state machine that retries
//! those two outcomes a bounded number of times with a fixed pause, and fails
//! immediately on anything else.
//!
//! ```text
//!   Attempting(n) --OK--------------------------> Succeeded(n)
//!   Attempting(n) --EBusy/ENotFound, n < max----> Retrying(n) --delay--> Attempting(n+1)
//!   Attempting(n) --EBusy/ENotFound, n == max---> Failed(RetriesExceeded)
//!   Attempting(n) --other code------------------> Failed(Rejected)
//! ```

use std::time::Duration;

use tracing::{debug, info};

use super::pipeline::DeviceDeployError;
use super::{AppLaunchInfo, DeviceError, DeviceSession, ProcessControl};

/// Outcome of one launch request, as reported by debugserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Success,
    Busy,
    NotFound,
    Failure(String),
}

impl LaunchOutcome {
    /// Classify a debugserver launch status code.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "OK" => LaunchOutcome::Success,
            "EBusy" => LaunchOutcome::Busy,
            "ENotFound" => LaunchOutcome::NotFound,
            other => LaunchOutcome::Failure(other.to_string()),
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, LaunchOutcome::Busy | LaunchOutcome::NotFound)
    }
}

/// Retry bound and pacing for [`launch_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPolicy {
    /// Total launch attempts, including the first.
    pub max_attempts: u32,
    /// Pause between a transient failure and the next attempt.
    pub retry_delay: Duration,
    /// Pause between installation and the first attempt.
    pub settle_delay: Duration,
    /// Transfer size configured on every debugserver channel.
    pub max_packet_size: usize,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            settle_delay: Duration::from_millis(200),
            max_packet_size: 1024,
        }
    }
}

/// Why a launch ended in [`LaunchState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    /// debugserver rejected the launch with a non-transient code.
    Rejected(String),
    /// Every attempt hit a transient outcome.
    RetriesExceeded { attempts: u32 },
}

/// States of the launch state machine. Attempt numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchState {
    Attempting { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded { attempt: u32 },
    Failed(LaunchFailure),
}

impl LaunchState {
    pub fn start() -> Self {
        LaunchState::Attempting { attempt: 1 }
    }

    /// Transition out of `Attempting` given the attempt's outcome.
    ///
    /// Other states are terminal or waiting and are returned unchanged.
    pub fn on_outcome(self, outcome: &LaunchOutcome, policy: &LaunchPolicy) -> Self {
        let LaunchState::Attempting { attempt } = self else {
            return self;
        };
        match outcome {
            LaunchOutcome::Success => LaunchState::Succeeded { attempt },
            o if o.is_transient() && attempt < policy.max_attempts => {
                LaunchState::Retrying { attempt }
            }
            o if o.is_transient() => {
                LaunchState::Failed(LaunchFailure::RetriesExceeded { attempts: attempt })
            }
            LaunchOutcome::Failure(message) => {
                LaunchState::Failed(LaunchFailure::Rejected(message.clone()))
            }
            LaunchOutcome::Busy | LaunchOutcome::NotFound => self,
        }
    }

    /// Leave `Retrying` for the next attempt.
    pub fn retry(self) -> Self {
        match self {
            LaunchState::Retrying { attempt } => LaunchState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }
}

/// Launch the app described by `app`, retrying transient failures.
///
/// Returns the open channel of the successful attempt; channels of failed
/// attempts are closed before the next attempt starts.
pub async fn launch_with_retry(
    session: &mut dyn DeviceSession,
    app: &AppLaunchInfo,
    policy: &LaunchPolicy,
) -> Result<Box<dyn ProcessControl>, DeviceDeployError> {
    let mut state = LaunchState::start();

    loop {
        let LaunchState::Attempting { attempt } = state else {
            break;
        };
        debug!(attempt, executable = %app.executable_name, "launch attempt");

        let (mut channel, outcome) = attempt_launch(session, app, policy)
            .await
            .map_err(|e| DeviceDeployError::Launch(e.to_string()))?;

        state = state.on_outcome(&outcome, policy);
        match state {
            LaunchState::Succeeded { attempt } => {
                info!(attempt, "app launched");
                return Ok(channel);
            }
            LaunchState::Retrying { .. } => {
                channel.close().await;
                debug!(
                    ?outcome,
                    delay = ?policy.retry_delay,
                    "device busy or app not found, retrying"
                );
                tokio::time::sleep(policy.retry_delay).await;
                state = state.retry();
            }
            _ => channel.close().await,
        }
    }

    match state {
        LaunchState::Failed(LaunchFailure::RetriesExceeded { attempts }) => {
            Err(DeviceDeployError::RetriesExceeded { attempts })
        }
        LaunchState::Failed(LaunchFailure::Rejected(message)) => {
            Err(DeviceDeployError::Launch(message))
        }
        other => Err(DeviceDeployError::Launch(format!(
            "unexpected launch state {other:?}"
        ))),
    }
}

/// Open a channel and run one launch request on it.
///
/// On a protocol error the channel is closed before the error is returned.
async fn attempt_launch(
    session: &mut dyn DeviceSession,
    app: &AppLaunchInfo,
    policy: &LaunchPolicy,
) -> Result<(Box<dyn ProcessControl>, LaunchOutcome), DeviceError> {
    let mut channel = session.process_control().await?;
    match request_launch(channel.as_mut(), app, policy).await {
        Ok(code) => Ok((channel, LaunchOutcome::from_code(&code))),
        Err(e) => {
            channel.close().await;
            Err(e)
        }
    }
}

async fn request_launch(
    channel: &mut dyn ProcessControl,
    app: &AppLaunchInfo,
    policy: &LaunchPolicy,
) -> Result<String, DeviceError> {
    channel.set_max_packet_size(policy.max_packet_size).await?;
    channel.set_working_dir(&app.container_path).await?;
    channel
        .launch(&app.executable_path, &app.executable_name)
        .await?;
    channel.launch_status().await
}
