use crate::errors::AuthError;
use crate::ids::UserId;

/// Verified identity carried by a bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    pub user_id: UserId,
}

impl Claims {
    /// Reject claims issued for a different user than the one addressed.
    pub fn ensure_user(&self, path_user: UserId) -> Result<(), AuthError> {
        if self.user_id == path_user {
            Ok(())
        } else {
            Err(AuthError::UserMismatch {
                token_user: self.user_id,
                path_user,
            })
        }
    }
}

/// Validates a bearer credential. Token issuance lives elsewhere.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}
