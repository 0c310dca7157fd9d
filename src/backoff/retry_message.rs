//! Retry message formatting for the backoff engine.
//!
//! Keeps retry, rotation and failure log lines consistent and gives the operator
//! a remediation hint when a call finally fails.

use super::FailureClass;
use std::time::Duration;

impl FailureClass {
    /// User-friendly description used inside retry log messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection reset by peer",
            Self::ServiceUnavailable => "service unavailable",
            Self::AuthorizationInvalid => "credential rejected",
            Self::Unclassified => "unexpected error",
        }
    }

    /// Suggested remediation after a fatal failure
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "Check network stability between the worker and the API",
            Self::ServiceUnavailable => "The API may be degraded, re-run the producer later",
            Self::AuthorizationInvalid => {
                "Add credentials or wait for daily quotas to reset, then re-run the producer"
            }
            Self::Unclassified => "Inspect the error above, the call was not retried",
        }
    }
}

/// Context for one retry decision
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum retries for this class
    pub max_attempts: u32,
    /// Class that triggered the decision
    pub class: FailureClass,
    /// Wait before the next attempt
    pub wait: Duration,
    /// Channel being fetched
    pub channel_id: String,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Create a context
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        class: FailureClass,
        wait: Duration,
        channel_id: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            class,
            wait,
            channel_id: channel_id.into(),
            error_message: error_message.into(),
        }
    }

    /// Standard retry line
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt,
            self.max_attempts,
            self.class.description(),
            self.wait.as_secs_f64(),
            self.channel_id
        )
    }

    /// Multi-line failure summary with suggestions
    pub fn format_failure(&self) -> String {
        [
            format!(
                "[FAILED] Channel {} failed after {} attempts ({})",
                self.channel_id,
                self.attempt,
                self.class.description()
            ),
            format!("  Last error: {}", self.error_message),
            format!("  Suggestion: {}", self.class.suggestion()),
        ]
        .join("\n")
    }
}
