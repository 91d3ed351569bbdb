use crate::models::AuthUser;
use crate::{Store, StoreError};

pub const ADMIN_ROLE: &str = "admin";

/// Who may invoke an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    User,
    Admin,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("admin role required")]
    Forbidden,
    #[error("could not verify caller: {0}")]
    Store(#[from] StoreError),
}

/// Verifies the caller for the required access level. Public access never
/// touches the store.
pub async fn authorize(
    store: &dyn Store,
    token: Option<&str>,
    access: Access,
) -> Result<Option<AuthUser>, AuthError> {
    if access == Access::Public {
        return Ok(None);
    }

    let token = token.ok_or(AuthError::MissingToken)?;
    let user = store
        .verify_token(token)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if access == Access::Admin && !store.has_role(&user.id, ADMIN_ROLE).await? {
        tracing::warn!(user_id = %user.id, "Admin access denied");
        return Err(AuthError::Forbidden);
    }

    Ok(Some(user))
}
