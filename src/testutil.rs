//! RSA signing helpers for unit tests.

use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{jwk::JwkSet, Algorithm, EncodingKey, Header};
use openssl::rsa::Rsa;
use url::Url;

use crate::{
    authorizer::{AuthorizerConfig, TokenAuthorizer},
    jwk_set::StaticKeySet,
};

pub const KID: &str = "42";
pub const AUDIENCE: &str = "https://drinks.example.com";

pub fn issuer() -> Url {
    Url::parse("https://tenant.example.com/").unwrap()
}

pub struct TestSigner {
    rsa: Rsa<openssl::pkey::Private>,
}

impl TestSigner {
    pub fn new() -> Self {
        Self {
            rsa: Rsa::generate(2048).unwrap(),
        }
    }

    pub fn jwk_set(&self) -> JwkSet {
        serde_json::from_value(serde_json::json!({"keys": [{
            "kty": "RSA",
            "kid": KID,
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(self.rsa.n().to_vec()),
            "e": URL_SAFE_NO_PAD.encode(self.rsa.e().to_vec()),
        }]}))
        .unwrap()
    }

    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KID.to_string());
        let key = EncodingKey::from_rsa_der(&self.rsa.private_key_to_der().unwrap());
        jsonwebtoken::encode(&header, claims, &key).unwrap()
    }

    pub fn authorizer(&self) -> TokenAuthorizer {
        TokenAuthorizer::new(
            AuthorizerConfig::new(issuer(), AUDIENCE),
            StaticKeySet::new(self.jwk_set()),
        )
        .unwrap()
    }
}

pub fn claims(permissions: &[&str]) -> serde_json::Value {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap();
    let expires_at = now + Duration::from_secs(3600);
    serde_json::json!({
        "sub": "auth0|1234567890",
        "iss": issuer(),
        "aud": AUDIENCE,
        "iat": now.as_secs(),
        "exp": expires_at.as_secs(),
        "permissions": permissions,
    })
}
