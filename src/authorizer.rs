use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{
    decode, errors::ErrorKind, jwk::AlgorithmParameters, Algorithm, DecodingKey, Validation,
};
use serde::Deserialize;
use url::Url;

use crate::{
    claims::ClaimSet,
    error::{AuthorizationFailure, ConfigError, FailureKind},
    jwk_set::{KeyDescriptor, KeySetResolver},
    validation::{algorithm_name, check_token_algorithm, validate_pinned_algorithm},
};

/// Settings the authorizer validates tokens against.
///
/// Deserializable so that it can be loaded by whatever configuration mechanism the service uses.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthorizerConfig {
    /// Expected `iss`, e.g. `https://tenant.auth0.com/`.
    pub issuer: Url,
    /// Expected `aud`.
    pub audience: String,
    /// The only algorithm tokens may be signed with.
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,
    /// Clock skew tolerated when checking `exp` and `nbf`, in seconds.
    #[serde(default)]
    pub leeway: u64,
}

fn default_algorithm() -> Algorithm {
    Algorithm::RS256
}

impl AuthorizerConfig {
    pub fn new(issuer: Url, audience: impl Into<String>) -> Self {
        Self {
            issuer,
            audience: audience.into(),
            algorithm: default_algorithm(),
            leeway: 0,
        }
    }

    /// Configuration for an identity provider whose issuer is `https://{domain}/`.
    pub fn from_issuer_domain(
        domain: &str,
        audience: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let issuer = Url::parse(&format!("https://{domain}/"))?;
        Ok(Self::new(issuer, audience))
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }
}

/// Decides whether a request's bearer token grants a given permission.
///
/// Holds no per-request state; a single instance is meant to be shared by all routes.
pub struct TokenAuthorizer {
    key_set: Arc<dyn KeySetResolver>,
    config: AuthorizerConfig,
    validation: Validation,
}

impl TokenAuthorizer {
    pub fn new(
        config: AuthorizerConfig,
        key_set: impl KeySetResolver + 'static,
    ) -> Result<Self, ConfigError> {
        validate_pinned_algorithm(config.algorithm)?;
        if config.audience.is_empty() {
            return Err(ConfigError::EmptyAudience);
        }

        let mut validation = Validation::new(config.algorithm);
        validation.set_audience(&[&config.audience]);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);
        validation.validate_nbf = true;
        validation.leeway = config.leeway;

        Ok(Self {
            key_set: Arc::new(key_set),
            config,
            validation,
        })
    }

    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Verifies the bearer token in `authorization_header` and checks that it grants `required_permission`.
    ///
    /// `authorization_header` is the raw value of the `Authorization` header, `None` if the request had none.
    #[tracing::instrument(name = "authorize", skip_all, fields(permission = %required_permission))]
    pub async fn authorize(
        &self,
        authorization_header: Option<&str>,
        required_permission: &str,
    ) -> Result<ClaimSet, AuthorizationFailure> {
        let result = self
            .verify(authorization_header, required_permission)
            .await;

        match &result {
            Ok(claims) => tracing::debug!(subject = claims.subject(), "request authorized"),
            Err(failure) if failure.kind().is_client_error() => tracing::debug!(
                code = failure.kind().code(),
                reason = failure.message(),
                "request rejected"
            ),
            Err(failure) => tracing::warn!(
                code = failure.kind().code(),
                "unable to authorize request"
            ),
        }
        result
    }

    async fn verify(
        &self,
        authorization_header: Option<&str>,
        required_permission: &str,
    ) -> Result<ClaimSet, AuthorizationFailure> {
        let token = extract_bearer(authorization_header)?;

        // Only the header is read before the signature is checked, to pick the key.
        let header = decode_token_header(token)?;
        check_token_algorithm(&header.alg, self.config.algorithm)?;

        let jwk = self
            .key_set
            .resolve(&header.kid)
            .await
            .map_err(|err| {
                tracing::warn!(kid = %header.kid, error = %err, "failed to obtain JWK set");
                AuthorizationFailure::from(err)
            })?
            .ok_or_else(|| {
                AuthorizationFailure::new(
                    FailureKind::UnknownSigningKey,
                    "Unable to find the appropriate key.",
                )
            })?;
        let decoding_key = self.decoding_key(&jwk, &header.kid)?;

        let payload = decode::<serde_json::Value>(token, &decoding_key, &self.validation)
            .map_err(classify_jwt_error)?
            .claims;

        let claims = ClaimSet::from_verified(payload)?;
        if !claims.has_permission(required_permission) {
            return Err(AuthorizationFailure::new(
                FailureKind::InsufficientPermission,
                "Permission not found.",
            ));
        }
        Ok(claims)
    }

    fn decoding_key(
        &self,
        jwk: &KeyDescriptor,
        kid: &str,
    ) -> Result<DecodingKey, AuthorizationFailure> {
        let expected = algorithm_name(self.config.algorithm);
        if let Some(key_algorithm) = &jwk.common.key_algorithm {
            if format!("{key_algorithm:?}") != expected {
                return Err(AuthorizationFailure::new(
                    FailureKind::UnknownSigningKey,
                    format!("Key '{kid}' is not meant for {expected}."),
                ));
            }
        }

        if !key_fits_algorithm(&jwk.algorithm, self.config.algorithm) {
            return Err(AuthorizationFailure::new(
                FailureKind::UnknownSigningKey,
                format!("Key '{kid}' cannot verify {expected} signatures."),
            ));
        }

        DecodingKey::from_jwk(jwk).map_err(|err| {
            tracing::warn!(kid, error = %err, "JWK set contains an unusable key");
            AuthorizationFailure::new(
                FailureKind::UnknownSigningKey,
                "Unable to find the appropriate key.",
            )
        })
    }
}

fn key_fits_algorithm(key: &AlgorithmParameters, algorithm: Algorithm) -> bool {
    match key {
        AlgorithmParameters::RSA(_) => matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        AlgorithmParameters::EllipticCurve(_) => {
            matches!(algorithm, Algorithm::ES256 | Algorithm::ES384)
        }
        AlgorithmParameters::OctetKeyPair(_) => algorithm == Algorithm::EdDSA,
        _ => false,
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-sensitively and the value must consist of exactly two space-separated parts.
pub fn extract_bearer(authorization_header: Option<&str>) -> Result<&str, AuthorizationFailure> {
    let header = authorization_header
        .ok_or_else(|| AuthorizationFailure::malformed_header("Authorization header is expected."))?;

    let parts: Vec<&str> = header.split(' ').collect();
    match parts.as_slice() {
        [scheme, ..] if *scheme != "Bearer" => Err(AuthorizationFailure::malformed_header(
            "Authorization header must start with \"Bearer\".",
        )),
        ["Bearer"] | ["Bearer", ""] => Err(AuthorizationFailure::malformed_header(
            "Token not found.",
        )),
        ["Bearer", token] => Ok(*token),
        _ => Err(AuthorizationFailure::malformed_header(
            "Authorization header must be bearer token.",
        )),
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    kid: Option<String>,
}

struct TokenHeader {
    alg: String,
    kid: String,
}

fn decode_token_header(token: &str) -> Result<TokenHeader, AuthorizationFailure> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header, _, _] = segments.as_slice() else {
        return Err(AuthorizationFailure::invalid_structure(
            "Token must consist of three segments.",
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthorizationFailure::invalid_structure("Unable to decode token header."))?;
    let header: RawHeader = serde_json::from_slice(&bytes)
        .map_err(|_| AuthorizationFailure::invalid_structure("Unable to parse token header."))?;

    let kid = header
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| AuthorizationFailure::invalid_structure("Token header has no key identifier."))?;

    Ok(TokenHeader {
        alg: header.alg,
        kid,
    })
}

fn classify_jwt_error(err: jsonwebtoken::errors::Error) -> AuthorizationFailure {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthorizationFailure::new(
            FailureKind::InvalidSignature,
            "Unable to verify the token signature.",
        ),
        ErrorKind::ExpiredSignature => AuthorizationFailure::claim("Token expired."),
        ErrorKind::ImmatureSignature => AuthorizationFailure::claim("Token is not valid yet."),
        ErrorKind::InvalidAudience => AuthorizationFailure::claim("Incorrect audience."),
        ErrorKind::InvalidIssuer => AuthorizationFailure::claim("Incorrect issuer."),
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthorizationFailure::claim(format!("Token is missing the '{claim}' claim."))
        }
        ErrorKind::InvalidAlgorithm => AuthorizationFailure::new(
            FailureKind::UnsupportedAlgorithm,
            "Token algorithm is not supported.",
        ),
        ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
            AuthorizationFailure::new(
                FailureKind::UnknownSigningKey,
                "Unable to find the appropriate key.",
            )
        }
        _ => AuthorizationFailure::invalid_structure("Unable to parse authentication token."),
    }
}
