// # Static Identity
//
// Fixed-user implementation of Identity, for the daemon, demos and tests.
// Real deployments plug in their auth collaborator instead.

use async_trait::async_trait;

use crate::Error;
use crate::traits::identity::{Identity, UserId};

/// Identity that always reports the same user, or none
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user_id: Option<UserId>,
}

impl StaticIdentity {
    /// An identity signed in as `user_id`
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    /// An identity with nobody signed in
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }
}

#[async_trait]
impl Identity for StaticIdentity {
    async fn current_user_id(&self) -> Result<UserId, Error> {
        match &self.user_id {
            Some(user_id) if !user_id.is_empty() => Ok(user_id.clone()),
            Some(_) => Err(Error::unauthenticated("user id is empty")),
            None => Err(Error::unauthenticated("no user signed in")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_identity() {
        let user = StaticIdentity::new("u1").current_user_id().await.unwrap();
        assert_eq!(user, UserId::new("u1"));

        let err = StaticIdentity::anonymous().current_user_id().await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));

        let err = StaticIdentity::new("").current_user_id().await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
    }
}
