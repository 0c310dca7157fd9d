//! Classified retry and backoff for statistics calls
//!
//! Every failed call is classified into exactly one [`FailureClass`]. The
//! class fixes the policy:
//!
//! | Class | Policy |
//! |---|---|
//! | `ConnectionReset` | sleep 60s, rebuild client, retry same credential, at most 10 retries |
//! | `ServiceUnavailable` | sleep 30s, retry same credential, at most 10 retries |
//! | `AuthorizationInvalid` | rotate to the next credential and retry immediately |
//! | `Unclassified` | fail immediately |
//!
//! Each class keeps its own counter, reset whenever the class changes. Caps
//! and waits are constants.
//!
//! # State machine
//!
//! ```text
//! Idle -> Calling -> Succeeded
//!                 -> Backoff(class, n) -> Calling
//!                 -> RotatingCredential -> Calling
//!                 -> Failed
//! ```

use crate::api::{ApiError, ApiSession, ChannelListResponse, SessionError};
use crate::credentials::PoolError;
use crate::error::{ErrorKind, HarvestError};
use crate::ChannelId;
use std::time::Duration;
use tracing::{error, info, warn};

pub mod retry_message;

pub use retry_message::RetryContext;

/// Wait after a connection reset
pub const CONNECTION_RESET_WAIT: Duration = Duration::from_secs(60);

/// Wait after a service-unavailable or internal-error response
pub const SERVICE_UNAVAILABLE_WAIT: Duration = Duration::from_secs(30);

/// Retries allowed per transient class before the call fails
pub const MAX_TRANSIENT_RETRIES: u32 = 10;

/// Ceiling on transient retries within one call across class changes
pub const MAX_TRANSIENT_RETRIES_PER_CALL: u32 = 100;

/// Classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Low-level network reset
    ConnectionReset,
    /// Temporary unavailability or internal error upstream
    ServiceUnavailable,
    /// Upstream rejected the credential
    AuthorizationInvalid,
    /// Anything else
    Unclassified,
}

/// What to do after a failure of a given class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Sleep, then retry with the same credential
    SameCredential {
        /// Wait before retrying
        wait: Duration,
        /// Retries allowed before failing
        max_retries: u32,
    },
    /// Move to the next credential and retry immediately
    RotateCredential,
    /// Fail without retrying
    Abort,
}

impl FailureClass {
    /// Classify a raw API error
    pub fn classify(err: &ApiError) -> Self {
        match err {
            ApiError::ConnectionReset(_) => Self::ConnectionReset,
            ApiError::ServiceUnavailable { .. } => Self::ServiceUnavailable,
            ApiError::AuthorizationInvalid { .. } => Self::AuthorizationInvalid,
            ApiError::Other(_) => Self::Unclassified,
        }
    }

    /// Policy attached to this class
    pub fn policy(&self) -> RetryPolicy {
        match self {
            Self::ConnectionReset => RetryPolicy::SameCredential {
                wait: CONNECTION_RESET_WAIT,
                max_retries: MAX_TRANSIENT_RETRIES,
            },
            Self::ServiceUnavailable => RetryPolicy::SameCredential {
                wait: SERVICE_UNAVAILABLE_WAIT,
                max_retries: MAX_TRANSIENT_RETRIES,
            },
            Self::AuthorizationInvalid => RetryPolicy::RotateCredential,
            Self::Unclassified => RetryPolicy::Abort,
        }
    }

    /// Error taxonomy kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionReset => ErrorKind::TransientNetwork,
            Self::ServiceUnavailable => ErrorKind::TransientUpstream,
            Self::AuthorizationInvalid => ErrorKind::AuthorizationInvalid,
            Self::Unclassified => ErrorKind::Unclassified,
        }
    }

    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::ServiceUnavailable => "service_unavailable",
            Self::AuthorizationInvalid => "authorization_invalid",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Request in flight
    Calling,
    /// Last call returned a response
    Succeeded,
    /// Waiting before a same-credential retry
    Backoff {
        /// Class being retried
        reason: FailureClass,
        /// Consecutive failures of this class
        count: u32,
    },
    /// Switching to the next credential
    RotatingCredential,
    /// Terminal failure
    Failed,
}

/// Outcome of feeding one failure into the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sleep then retry with the same credential
    Retry {
        /// Wait before retrying
        wait: Duration,
        /// Consecutive failures of this class so far
        attempt: u32,
    },
    /// Rotate credential and retry immediately
    Rotate,
    /// Give up
    Fail {
        /// Consecutive failures of the final class
        attempts: u32,
    },
}

/// Counters accumulated across all calls made by one engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackoffStats {
    /// Channel lookups started
    pub calls: u64,
    /// HTTP attempts made
    pub attempts: u64,
    /// Backoff sleeps taken
    pub sleeps: u64,
    /// Total time spent sleeping
    pub slept: Duration,
    /// Credential rotations
    pub rotations: u64,
    /// Calls that ended in `Failed`
    pub failures: u64,
}

/// Per-worker retry state machine
#[derive(Debug)]
pub struct BackoffEngine {
    state: CallState,
    class: Option<FailureClass>,
    count: u32,
    transient_total: u32,
    stats: BackoffStats,
}

impl Default for BackoffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffEngine {
    /// Create an idle engine
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            class: None,
            count: 0,
            transient_total: 0,
            stats: BackoffStats::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Accumulated counters
    pub fn stats(&self) -> &BackoffStats {
        &self.stats
    }

    /// Reset per-call counters before a new channel lookup
    pub fn begin_call(&mut self) {
        self.state = CallState::Calling;
        self.class = None;
        self.count = 0;
        self.transient_total = 0;
    }

    /// Feed one classified failure and get the next step
    pub fn on_failure(&mut self, class: FailureClass) -> Decision {
        if self.class != Some(class) {
            self.class = Some(class);
            self.count = 0;
        }
        self.count += 1;

        match class.policy() {
            RetryPolicy::SameCredential { wait, max_retries } => {
                if self.count > max_retries
                    || self.transient_total >= MAX_TRANSIENT_RETRIES_PER_CALL
                {
                    self.state = CallState::Failed;
                    Decision::Fail {
                        attempts: self.count,
                    }
                } else {
                    self.transient_total += 1;
                    self.state = CallState::Backoff {
                        reason: class,
                        count: self.count,
                    };
                    Decision::Retry {
                        wait,
                        attempt: self.count,
                    }
                }
            }
            RetryPolicy::RotateCredential => {
                self.state = CallState::RotatingCredential;
                Decision::Rotate
            }
            RetryPolicy::Abort => {
                self.state = CallState::Failed;
                Decision::Fail {
                    attempts: self.count,
                }
            }
        }
    }

    /// Fetch statistics for one channel, retrying and rotating per policy
    ///
    /// # Errors
    /// - [`HarvestError::TransientNetwork`] / [`HarvestError::TransientUpstream`] when a cap is hit
    /// - [`HarvestError::CredentialsExhausted`] when every credential was rejected
    /// - [`HarvestError::Unclassified`] for any other failure
    pub async fn execute(
        &mut self,
        session: &mut ApiSession,
        channel_id: &ChannelId,
    ) -> Result<ChannelListResponse, HarvestError> {
        self.begin_call();
        self.stats.calls += 1;

        // An exhausted session keeps its last client; it must not be used again.
        if let Err(PoolError::Exhausted { tried }) = session.pool().current() {
            self.state = CallState::Failed;
            self.stats.failures += 1;
            error!(channel_id = %channel_id, tried, "No active credential left");
            return Err(HarvestError::CredentialsExhausted { tried });
        }

        loop {
            self.state = CallState::Calling;
            self.stats.attempts += 1;

            let err = match session.client().fetch_statistics(channel_id).await {
                Ok(response) => {
                    self.state = CallState::Succeeded;
                    crate::metrics::record_api_call("success");
                    return Ok(response);
                }
                Err(err) => err,
            };

            let class = FailureClass::classify(&err);
            crate::metrics::record_api_call(class.as_str());

            match self.on_failure(class) {
                Decision::Retry { wait, attempt } => {
                    let ctx = RetryContext::new(
                        attempt,
                        MAX_TRANSIENT_RETRIES,
                        class,
                        wait,
                        channel_id.as_str(),
                        err.to_string(),
                    );
                    warn!(
                        channel_id = %channel_id,
                        class = class.as_str(),
                        attempt,
                        error = %err,
                        "{}",
                        ctx.format_retry()
                    );
                    crate::metrics::record_retry(class.as_str(), wait);

                    tokio::time::sleep(wait).await;
                    self.stats.sleeps += 1;
                    self.stats.slept += wait;

                    if class == FailureClass::ConnectionReset {
                        session
                            .rebuild()
                            .map_err(|e| self.session_failure(e, channel_id))?;
                    }
                }
                Decision::Rotate => {
                    let rejected = session
                        .pool()
                        .current()
                        .map(|c| c.label())
                        .unwrap_or_default();
                    match session.rotate() {
                        Ok(next) => {
                            self.stats.rotations += 1;
                            crate::metrics::record_rotation();
                            info!(
                                channel_id = %channel_id,
                                rejected = %rejected,
                                next = %next.label(),
                                error = %err,
                                "Credential rejected, rotating"
                            );
                        }
                        Err(PoolError::Exhausted { tried }) => {
                            self.state = CallState::Failed;
                            self.stats.failures += 1;
                            error!(
                                channel_id = %channel_id,
                                rejected = %rejected,
                                tried,
                                "{}",
                                RetryContext::new(
                                    self.count,
                                    tried as u32,
                                    class,
                                    Duration::ZERO,
                                    channel_id.as_str(),
                                    err.to_string()
                                )
                                .format_failure()
                            );
                            return Err(HarvestError::CredentialsExhausted { tried });
                        }
                    }
                }
                Decision::Fail { attempts } => {
                    self.stats.failures += 1;
                    let ctx = RetryContext::new(
                        attempts,
                        MAX_TRANSIENT_RETRIES,
                        class,
                        Duration::ZERO,
                        channel_id.as_str(),
                        err.to_string(),
                    );
                    error!(channel_id = %channel_id, class = class.as_str(), "{}", ctx.format_failure());
                    return Err(terminal_error(class, attempts, channel_id, &err, session));
                }
            }
        }
    }

    fn session_failure(&mut self, err: SessionError, channel_id: &ChannelId) -> HarvestError {
        self.state = CallState::Failed;
        self.stats.failures += 1;
        match err {
            SessionError::Pool(PoolError::Exhausted { tried }) => {
                HarvestError::CredentialsExhausted { tried }
            }
            SessionError::Client(e) => HarvestError::Unclassified {
                channel_id: channel_id.to_string(),
                message: e.to_string(),
            },
        }
    }
}

fn terminal_error(
    class: FailureClass,
    attempts: u32,
    channel_id: &ChannelId,
    err: &ApiError,
    session: &ApiSession,
) -> HarvestError {
    let channel_id = channel_id.to_string();
    let message = err.to_string();
    match class {
        FailureClass::ConnectionReset => HarvestError::TransientNetwork {
            channel_id,
            attempts,
            message,
        },
        FailureClass::ServiceUnavailable => HarvestError::TransientUpstream {
            channel_id,
            attempts,
            message,
        },
        FailureClass::AuthorizationInvalid => HarvestError::CredentialsExhausted {
            tried: session.pool().len(),
        },
        FailureClass::Unclassified => HarvestError::Unclassified {
            channel_id,
            message,
        },
    }
}
