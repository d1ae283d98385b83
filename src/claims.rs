use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthorizationFailure, FailureKind};

/// Claims of a token whose signature and standard claims have been verified.
///
/// Only the authorizer constructs these, so holding a `ClaimSet` means the token was trusted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClaimSet {
    #[serde(rename = "sub", skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: Audience,
    #[serde(rename = "exp")]
    expires_at: u64,
    #[serde(rename = "iat", skip_serializing_if = "Option::is_none")]
    issued_at: Option<u64>,
    permissions: BTreeSet<String>,
    #[serde(flatten)]
    additional: Map<String, Value>,
}

/// `aud` may be a single string or an array; the original shape is kept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct RawClaims {
    sub: Option<String>,
    iss: String,
    aud: Audience,
    exp: u64,
    iat: Option<u64>,
    permissions: Option<BTreeSet<String>>,
    #[serde(flatten)]
    additional: Map<String, Value>,
}

impl ClaimSet {
    /// Builds the claim set from a payload that already passed signature and standard claim validation.
    pub(crate) fn from_verified(payload: Value) -> Result<Self, AuthorizationFailure> {
        let raw: RawClaims = serde_json::from_value(payload).map_err(|err| {
            AuthorizationFailure::invalid_structure(format!("Unable to parse token claims: {err}."))
        })?;

        let permissions = raw.permissions.ok_or_else(|| {
            AuthorizationFailure::new(
                FailureKind::PermissionsClaimMissing,
                "Permissions not included in JWT.",
            )
        })?;

        Ok(Self {
            subject: raw.sub,
            issuer: raw.iss,
            audience: raw.aud,
            expires_at: raw.exp,
            issued_at: raw.iat,
            permissions,
            additional: raw.additional,
        })
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &[String] {
        match &self.audience {
            Audience::One(audience) => std::slice::from_ref(audience),
            Audience::Many(audiences) => audiences,
        }
    }

    /// Expiry, in seconds since the Unix epoch.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Issue time, in seconds since the Unix epoch.
    pub fn issued_at(&self) -> Option<u64> {
        self.issued_at
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// Exact, case-sensitive match against the granted permissions.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Any claim not covered by the accessors above, e.g. `azp` or custom namespaced claims.
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.additional.get(claim)
    }
}
