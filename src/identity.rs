//! Learner identity resolution
//!
//! Asks the auth collaborator once per page session who is using it and
//! exposes the answer as [`LearnerIdentity`]. Until the answer arrives the
//! learner is treated as anonymous; auth failures also degrade to anonymous
//! with a sign-in prompt rather than surfacing an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::ProgressError;

/// Opaque learner identifier issued by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(String);

impl LearnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is using this session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnerIdentity {
    Identified(LearnerId),
    Anonymous,
}

impl LearnerIdentity {
    pub fn identified(id: impl Into<String>) -> Self {
        LearnerIdentity::Identified(LearnerId::new(id))
    }

    pub fn learner_id(&self) -> Option<&LearnerId> {
        match self {
            LearnerIdentity::Identified(id) => Some(id),
            LearnerIdentity::Anonymous => None,
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self, LearnerIdentity::Identified(_))
    }
}

/// User payload returned by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
}

/// External auth collaborator: `getCurrentUser() -> {id} | null`
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<AuthUser>, ProgressError>;
}

/// Auth provider with a fixed answer (CLI sessions, tests)
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    user: Option<AuthUser>,
}

impl StaticAuthProvider {
    pub fn signed_in(id: impl Into<String>) -> Self {
        Self {
            user: Some(AuthUser { id: id.into() }),
        }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn current_user(&self) -> Result<Option<AuthUser>, ProgressError> {
        Ok(self.user.clone())
    }
}

/// Outcome of resolving the session's learner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub identity: LearnerIdentity,
    /// Show the non-blocking "sign in to save progress" affordance
    pub prompt_sign_in: bool,
}

impl Resolution {
    fn anonymous() -> Self {
        Self {
            identity: LearnerIdentity::Anonymous,
            prompt_sign_in: true,
        }
    }
}

/// Resolves the learner exactly once per page session
pub struct IdentityResolver {
    provider: Arc<dyn AuthProvider>,
    timeout: Duration,
    resolved: OnceCell<Resolution>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn AuthProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            resolved: OnceCell::new(),
        }
    }

    /// Resolve the learner. The auth collaborator is called at most once;
    /// later calls return the cached answer.
    pub async fn resolve(&self) -> &Resolution {
        self.resolved
            .get_or_init(|| async {
                match tokio::time::timeout(self.timeout, self.provider.current_user()).await {
                    Ok(Ok(Some(user))) if !user.id.is_empty() => {
                        debug!(learner_id = %user.id, "Learner identified");
                        Resolution {
                            identity: LearnerIdentity::identified(user.id),
                            prompt_sign_in: false,
                        }
                    }
                    Ok(Ok(_)) => {
                        debug!("No signed-in learner");
                        Resolution::anonymous()
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Auth lookup failed, continuing anonymously");
                        Resolution::anonymous()
                    }
                    Err(_) => {
                        warn!(timeout_ms = self.timeout.as_millis() as u64, "Auth lookup timed out, continuing anonymously");
                        Resolution::anonymous()
                    }
                }
            })
            .await
    }

    /// Identity as currently known; `Anonymous` while still resolving
    pub fn current(&self) -> LearnerIdentity {
        self.resolved
            .get()
            .map(|r| r.identity.clone())
            .unwrap_or(LearnerIdentity::Anonymous)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }
}
