//! Claim code generation
//!
//! A code is the first twelve hex digits of a random v4 UUID, upper-cased.
//! Uniqueness is enforced by storage; callers regenerate on collision.

use uuid::Uuid;

use crate::domain::value_objects::{ClaimCode, CLAIM_CODE_MIN_LEN};

/// Attempts before giving up on finding an unused code.
pub const MAX_CLAIM_CODE_ATTEMPTS: usize = 5;

pub fn generate() -> ClaimCode {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(CLAIM_CODE_MIN_LEN);
    code.make_ascii_uppercase();
    ClaimCode::from_generated(code)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn codes_are_twelve_uppercase_alphanumerics() {
        for _ in 0..1000 {
            let code = generate();
            assert_eq!(code.as_str().len(), 12);
            assert!(code.as_str().chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn thousand_codes_are_pairwise_unique() {
        let codes: HashSet<String> = (0..1000).map(|_| generate().into_inner()).collect();
        assert_eq!(codes.len(), 1000);
    }
}
