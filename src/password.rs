//! Administrator password policy and changes.
//!
//! Hashing happens inside the store's procedures; this side only enforces
//! the policy and never sees a stored password.

use thiserror::Error;
use uuid::Uuid;

use crate::{error::StoreError, store::AdminStore};

const SYMBOLS: &str = "@$!%*?&";
const MIN_LENGTH: usize = 8;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("A nova senha e a confirmação não coincidem.")]
    Mismatch,

    #[error("A senha deve ter 8+ caracteres, maiúscula, minúscula, número e símbolo.")]
    Weak,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PasswordError {
    pub fn user_message(&self) -> String {
        match self {
            PasswordError::Store(StoreError::Unauthorized) => "Sessão inválida.".to_string(),
            PasswordError::Store(StoreError::Rejected(message)) => message.clone(),
            PasswordError::Store(_) => "Erro ao alterar a senha.".to_string(),
            e => e.to_string(),
        }
    }
}

/// At least eight characters drawn from letters, digits and `@$!%*?&`,
/// with one of each: lowercase, uppercase, digit, symbol.
pub fn is_strong(password: &str) -> bool {
    password.chars().count() >= MIN_LENGTH
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || SYMBOLS.contains(c))
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| SYMBOLS.contains(c))
}

pub fn validate_new_password(new: &str, confirmation: &str) -> Result<(), PasswordError> {
    if new != confirmation {
        return Err(PasswordError::Mismatch);
    }
    if !is_strong(new) {
        return Err(PasswordError::Weak);
    }
    Ok(())
}

/// Change the signed-in administrator's own password.
pub async fn change_password<S: AdminStore>(
    store: &S,
    current: &str,
    new: &str,
    confirmation: &str,
) -> Result<(), PasswordError> {
    validate_new_password(new, confirmation)?;
    store.change_own_password(current, new).await?;
    tracing::info!("Administrator password changed");
    Ok(())
}

/// Reset another administrator's password.
pub async fn reset_password<S: AdminStore>(
    store: &S,
    admin_id: Uuid,
    new: &str,
) -> Result<(), PasswordError> {
    if !is_strong(new) {
        return Err(PasswordError::Weak);
    }
    store.reset_admin_password(admin_id, new).await?;
    tracing::info!(admin = %admin_id, "Administrator password reset");
    Ok(())
}
