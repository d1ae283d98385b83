//! Algorithm pinning.
//!
//! A deployment verifies tokens with exactly one asymmetric algorithm. Any token declaring a different algorithm is
//! rejected before a key is even looked up, which rules out downgrade and key confusion attacks where a token is
//! re-signed with `none` or with an HMAC keyed by the public key.

use jsonwebtoken::Algorithm;

use crate::error::{AuthorizationFailure, ConfigError, FailureKind};

/// Algorithms that are never accepted, neither as pinned algorithm nor in a token header.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms that may be pinned.
pub const ASYMMETRIC_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// JWA name of an algorithm, as it appears in the `alg` header.
pub fn algorithm_name(algorithm: Algorithm) -> String {
    format!("{algorithm:?}")
}

/// Checks that `algorithm` is suitable for pinning.
///
/// # Errors
///
/// Returns [`ConfigError::SymmetricAlgorithm`] for HMAC algorithms.
pub fn validate_pinned_algorithm(algorithm: Algorithm) -> Result<(), ConfigError> {
    if ASYMMETRIC_ALGORITHMS.contains(&algorithm) {
        Ok(())
    } else {
        Err(ConfigError::SymmetricAlgorithm(algorithm_name(algorithm)))
    }
}

/// Checks the `alg` a token declares against the pinned algorithm.
///
/// The comparison is on the raw header string, so unknown names are rejected the same way as known but different
/// ones.
pub fn check_token_algorithm(
    declared: &str,
    pinned: Algorithm,
) -> Result<(), AuthorizationFailure> {
    if FORBIDDEN_ALGORITHMS
        .iter()
        .any(|forbidden| forbidden.eq_ignore_ascii_case(declared))
    {
        return Err(AuthorizationFailure::new(
            FailureKind::UnsupportedAlgorithm,
            format!("Algorithm '{declared}' is not allowed."),
        ));
    }

    let expected = algorithm_name(pinned);
    if declared != expected {
        return Err(AuthorizationFailure::new(
            FailureKind::UnsupportedAlgorithm,
            format!("Algorithm '{declared}' is not supported, expected '{expected}'."),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use jsonwebtoken::Algorithm;

    use super::*;

    #[test]
    fn test_asymmetric_algorithms_can_be_pinned() {
        for algorithm in ASYMMETRIC_ALGORITHMS {
            assert!(validate_pinned_algorithm(*algorithm).is_ok());
        }
    }

    #[test]
    fn test_symmetric_algorithms_cannot_be_pinned() {
        for algorithm in [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512] {
            assert!(matches!(
                validate_pinned_algorithm(algorithm),
                Err(ConfigError::SymmetricAlgorithm(_))
            ));
        }
    }

    #[test]
    fn test_pinned_algorithm_accepted() {
        assert!(check_token_algorithm("RS256", Algorithm::RS256).is_ok());
        assert!(check_token_algorithm("ES256", Algorithm::ES256).is_ok());
    }

    #[test]
    fn test_other_asymmetric_algorithm_rejected() {
        let failure = check_token_algorithm("RS512", Algorithm::RS256).unwrap_err();
        assert_eq!(failure.kind(), FailureKind::UnsupportedAlgorithm);
        assert!(failure.message().contains("expected 'RS256'"));
    }

    #[test]
    fn test_forbidden_algorithms_rejected() {
        for alg in FORBIDDEN_ALGORITHMS.iter().chain(&["None", "NONE", "hs256"]) {
            let failure = check_token_algorithm(alg, Algorithm::RS256).unwrap_err();
            assert_eq!(failure.kind(), FailureKind::UnsupportedAlgorithm);
            assert!(failure.message().contains("is not allowed"), "{alg}");
        }
    }

    #[test]
    fn test_algorithm_name_is_case_sensitive() {
        let failure = check_token_algorithm("rs256", Algorithm::RS256).unwrap_err();
        assert_eq!(failure.kind(), FailureKind::UnsupportedAlgorithm);
    }
}
