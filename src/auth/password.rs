use tracing::warn;

use crate::error::AppError;

/// Salted one-way hash for a credential. The plaintext is never stored or logged.
pub fn hash_password(plain: &str, cost: u32) -> Result<String, AppError> {
    Ok(bcrypt::hash(plain, cost)?)
}

/// Checks `plain` against a stored hash. A stored value that is not a valid
/// hash counts as a mismatch.
pub fn verify_password(plain: &str, stored_hash: &str) -> bool {
    match bcrypt::verify(plain, stored_hash) {
        Ok(matches) => matches,
        Err(e) => {
            warn!(error = %e, "Stored credential is not a usable hash");
            false
        }
    }
}
