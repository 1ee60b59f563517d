//! The authenticated caller.
//!
//! Users are owned by an external identity provider. The core only ever sees an
//! [`Actor`], which adapters build from whatever credential they validated, and
//! which is passed explicitly into every operation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SalvorError};

id_type!(
    /// Identifier of a user in the external identity provider.
    UserId,
    "user id"
);

/// Authenticated identity performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub is_moderator: bool,
}

impl Actor {
    /// A regular (non-moderator) user.
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_moderator: false,
        }
    }

    /// A moderator.
    pub fn moderator(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_moderator: true,
        }
    }

    /// Fails unless this actor is `owner`.
    pub fn require_owner(&self, owner: UserId, action: &str) -> Result<()> {
        if self.user_id != owner {
            return Err(SalvorError::Unauthorized(format!(
                "only the creator can {action} this request (actor {}, creator {})",
                self.user_id, owner
            )));
        }
        Ok(())
    }

    /// Fails unless this actor is a moderator.
    pub fn require_moderator(&self, action: &str) -> Result<()> {
        if !self.is_moderator {
            return Err(SalvorError::Unauthorized(format!(
                "only a moderator can {action} requests (actor {})",
                self.user_id
            )));
        }
        Ok(())
    }

    /// Creator or any moderator.
    pub fn can_view(&self, owner: UserId) -> bool {
        self.is_moderator || self.user_id == owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_user_id() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId(42));
        assert_eq!(" 7 ".parse::<UserId>().unwrap(), UserId(7));
        for bad in ["0", "-3", "abc", ""] {
            let err = bad.parse::<UserId>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "input {:?}", bad);
        }
    }

    #[test]
    fn test_owner_and_moderator_guards() {
        let alice = Actor::user(1);
        let moderator = Actor::moderator(9);

        assert!(alice.require_owner(UserId(1), "form").is_ok());
        assert_eq!(
            alice.require_owner(UserId(2), "form").unwrap_err().kind(),
            ErrorKind::Authorization
        );
        assert!(alice.require_moderator("resolve").is_err());
        assert!(moderator.require_moderator("resolve").is_ok());

        assert!(alice.can_view(UserId(1)));
        assert!(!alice.can_view(UserId(2)));
        assert!(moderator.can_view(UserId(2)));
    }
}
