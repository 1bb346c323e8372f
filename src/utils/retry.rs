use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};

/// Retry policy for lock commands: a bounded number of attempts, each
/// followed by a fixed settle delay before the device state is re-read.
///
/// The settle delay is tuned to the real-world latency of the wireless
/// command channel; tests inject millisecond values.
#[derive(Debug, Clone)]
pub struct VerifyRetryConfig {
    pub max_attempts: u32,
    pub settle_delay: Duration,
}

impl Default for VerifyRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle_delay: Duration::from_secs(10),
        }
    }
}

/// What one attempt's action reported before verification.
#[derive(Debug)]
pub enum Attempt {
    /// The desired end-state already holds; no command was needed.
    Satisfied,
    /// A command was issued; verify after the settle delay.
    Issued,
    /// A precondition failed in a way more attempts cannot fix.
    Abort(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    Success { attempts: u32 },
    Exhausted { attempts: u32 },
    Aborted { attempts: u32, reason: String },
}

impl RetryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts }
            | RetryOutcome::Exhausted { attempts }
            | RetryOutcome::Aborted { attempts, .. } => *attempts,
        }
    }
}

/// Runs the shared retry-with-verification loop.
///
/// Each attempt performs the mutating `action`, waits out the settle delay so
/// the device can apply and report state, then calls `verify` against the
/// live device state. The first attempt that verifies returns immediately. A
/// hardware error from `action` counts as a failed command for that attempt;
/// verification still runs, because the command may have landed anyway.
pub async fn retry_with_verification<A, AFut, V, VFut>(
    config: &VerifyRetryConfig,
    mut action: A,
    mut verify: V,
) -> RetryOutcome
where
    A: FnMut(u32) -> AFut,
    AFut: std::future::Future<Output = Result<Attempt>>,
    V: FnMut() -> VFut,
    VFut: std::future::Future<Output = Result<bool>>,
{
    for attempt in 1..=config.max_attempts {
        match action(attempt).await {
            Ok(Attempt::Satisfied) => {
                debug!("Attempt {}: end-state already holds", attempt);
                return RetryOutcome::Success { attempts: attempt };
            }
            Ok(Attempt::Issued) => {}
            Ok(Attempt::Abort(reason)) => {
                warn!("Attempt {}: aborting, {}", attempt, reason);
                return RetryOutcome::Aborted {
                    attempts: attempt,
                    reason,
                };
            }
            Err(e) => {
                warn!("Attempt {}: command error: {}", attempt, e);
            }
        }

        tokio::time::sleep(config.settle_delay).await;

        match verify().await {
            Ok(true) => return RetryOutcome::Success { attempts: attempt },
            Ok(false) => {
                debug!("Attempt {}: verification found stale state", attempt);
            }
            Err(e) => {
                warn!("Attempt {}: verification read failed: {}", attempt, e);
            }
        }
    }

    RetryOutcome::Exhausted {
        attempts: config.max_attempts,
    }
}
