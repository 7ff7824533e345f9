//! Who is practising: the identity seam every fetch and report goes through.

use async_trait::async_trait;
use drill_core::model::UserId;

use crate::error::DeliveryError;

/// The signed-in learner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
}

/// Identity provider seam. Returns `None` when nobody is signed in.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Option<CurrentUser>;
}

/// Resolve the current user id or fail with `DeliveryError::AuthRequired`.
///
/// # Errors
///
/// Returns `DeliveryError::AuthRequired` when no user is signed in.
pub async fn require_user(auth: &dyn AuthProvider) -> Result<UserId, DeliveryError> {
    auth.current_user()
        .await
        .map(|user| user.id)
        .ok_or(DeliveryError::AuthRequired)
}

/// Fixed identity, for local use and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user: Option<CurrentUser>,
}

impl StaticAuth {
    #[must_use]
    pub fn signed_in(id: UserId) -> Self {
        Self {
            user: Some(CurrentUser { id }),
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user(&self) -> Option<CurrentUser> {
        self.user.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anonymous_requires_sign_in() {
        let err = require_user(&StaticAuth::anonymous()).await.unwrap_err();
        assert_eq!(err, DeliveryError::AuthRequired);
    }

    #[tokio::test]
    async fn signed_in_resolves_id() {
        let id = UserId::generate();
        assert_eq!(require_user(&StaticAuth::signed_in(id)).await.unwrap(), id);
    }
}
