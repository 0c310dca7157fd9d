//! API credential pool
//!
//! Workers running in parallel are all configured with the same credential
//! list. Each pool shuffles its copy once at construction so that they do not
//! all burn through the same key first. The pool only moves forward: a
//! credential marked invalid is never handed out again in the same run.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credential validity within the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    /// Usable
    #[default]
    Active,
    /// Rejected by the API
    Invalid,
}

/// One API key together with its owning account and project
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// API developer key
    pub developer_key: String,
    /// Owning account email
    pub email: String,
    /// Owning project
    pub project: String,
    /// Validity in the current run
    #[serde(default, skip_serializing)]
    pub status: CredentialStatus,
}

impl Credential {
    /// Create an active credential
    pub fn new(
        developer_key: impl Into<String>,
        email: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            developer_key: developer_key.into(),
            email: email.into(),
            project: project.into(),
            status: CredentialStatus::Active,
        }
    }

    /// Log-safe label: `project/email (...abcd)`
    pub fn label(&self) -> String {
        let tail: String = self
            .developer_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{}/{} (...{})", self.project, self.email, tail)
    }

    /// Whether the credential can still be used
    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label())
            .field("status", &self.status)
            .finish()
    }
}

/// Credential pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No active credential remains
    #[error("credentials exhausted after trying {tried}")]
    Exhausted {
        /// Number of credentials that were tried
        tried: usize,
    },
}

/// Ordered, single-owner set of credentials
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    index: usize,
    advances: u32,
}

impl CredentialPool {
    /// Create a pool in random order
    pub fn shuffled(credentials: Vec<Credential>) -> Result<Self, PoolError> {
        Self::shuffled_with(credentials, &mut rand::thread_rng())
    }

    /// Create a pool shuffled with the given RNG
    pub fn shuffled_with<R: Rng + ?Sized>(
        mut credentials: Vec<Credential>,
        rng: &mut R,
    ) -> Result<Self, PoolError> {
        credentials.shuffle(rng);
        Self::in_order(credentials)
    }

    /// Create a pool that hands out credentials in the given order
    pub fn in_order(credentials: Vec<Credential>) -> Result<Self, PoolError> {
        if credentials.is_empty() {
            return Err(PoolError::Exhausted { tried: 0 });
        }
        let credentials = credentials
            .into_iter()
            .map(|mut c| {
                c.status = CredentialStatus::Active;
                c
            })
            .collect();
        Ok(Self {
            credentials,
            index: 0,
            advances: 0,
        })
    }

    /// Active credential
    pub fn current(&self) -> Result<&Credential, PoolError> {
        self.credentials
            .get(self.index)
            .filter(|c| c.is_active())
            .ok_or(PoolError::Exhausted {
                tried: self.credentials.len(),
            })
    }

    /// Mark the current credential invalid and move to the next one
    pub fn advance(&mut self) -> Result<&Credential, PoolError> {
        if let Some(current) = self.credentials.get_mut(self.index) {
            current.status = CredentialStatus::Invalid;
        }
        // Never wraps: once past the end the pool stays exhausted.
        self.index = (self.index + 1).min(self.credentials.len());
        self.advances += 1;
        self.current()
    }

    /// Number of credentials not yet invalidated
    pub fn remaining(&self) -> usize {
        self.credentials.iter().filter(|c| c.is_active()).count()
    }

    /// Total credentials in the pool
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether the pool was built without credentials (never true once constructed)
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// How many times [`advance`](Self::advance) was called
    pub fn advances(&self) -> u32 {
        self.advances
    }

    /// All credentials in pool order
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }
}
