use std::time::{Duration, SystemTime};

use axum_jose_rbac::{AuthorizerConfig, RemoteJwkSet, TokenAuthorizer};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use openssl::{pkey::Private, rsa::Rsa};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const AUDIENCE: &str = "drinks";

pub struct SigningKey {
    pub kid: String,
    rsa: Rsa<Private>,
}

impl SigningKey {
    pub fn generate(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
            rsa: Rsa::generate(2048).unwrap(),
        }
    }

    pub fn jwk(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "kid": self.kid,
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(self.rsa.n().to_vec()),
            "e": URL_SAFE_NO_PAD.encode(self.rsa.e().to_vec()),
        })
    }

    pub fn sign(&self, claims: &serde_json::Value) -> String {
        self.sign_with_kid(&self.kid, claims)
    }

    pub fn sign_with_kid(&self, kid: &str, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_der(&self.rsa.private_key_to_der().unwrap());
        jsonwebtoken::encode(&header, claims, &key).unwrap()
    }
}

/// Identity provider publishing the given keys at `/.well-known/jwks.json`.
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    pub async fn start(keys: &[&SigningKey]) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(".well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
            .mount(&server)
            .await;
        Self { server }
    }

    /// Provider whose key endpoint is not mounted yet.
    pub async fn empty() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn issuer(&self) -> Url {
        Url::parse(&format!("{}/", self.server.uri())).unwrap()
    }

    pub fn remote_jwk_set(&self) -> RemoteJwkSet {
        RemoteJwkSet::builder(self.issuer().join(".well-known/jwks.json").unwrap())
            .build()
            .unwrap()
    }

    pub fn authorizer(&self) -> TokenAuthorizer {
        TokenAuthorizer::new(
            AuthorizerConfig::new(self.issuer(), AUDIENCE),
            self.remote_jwk_set(),
        )
        .unwrap()
    }

    pub fn claims(&self, permissions: &[&str]) -> serde_json::Value {
        let now = now();
        serde_json::json!({
            "sub": "auth0|5f1c2d",
            "iss": self.issuer(),
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 3600,
            "azp": "drinks-frontend",
            "permissions": permissions,
        })
    }
}

pub fn jwks(keys: &[&SigningKey]) -> serde_json::Value {
    let keys: Vec<_> = keys.iter().map(|key| key.jwk()).collect();
    serde_json::json!({ "keys": keys })
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn delay() -> Duration {
    Duration::from_millis(200)
}
