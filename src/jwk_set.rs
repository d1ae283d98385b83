use std::sync::Arc;

use futures::future::BoxFuture;
use jsonwebtoken::jwk::{Jwk, JwkSet};

use crate::error::KeySetError;

/// A public key published by the identity provider, tagged with its `kid`.
pub type KeyDescriptor = Jwk;

/// Capability to look up the verification key a token was signed with.
///
/// `Ok(None)` means no key carries the requested identifier. `Err` is reserved for failures to obtain the key set at
/// all, which are not the client's fault.
pub trait KeySetResolver: Send + Sync {
    fn resolve<'a>(&'a self, kid: &'a str)
        -> BoxFuture<'a, Result<Option<KeyDescriptor>, KeySetError>>;
}

impl<R: KeySetResolver + ?Sized> KeySetResolver for Arc<R> {
    fn resolve<'a>(
        &'a self,
        kid: &'a str,
    ) -> BoxFuture<'a, Result<Option<KeyDescriptor>, KeySetError>> {
        (**self).resolve(kid)
    }
}

/// Fixed, in-memory key set. Never changes after construction.
#[derive(Clone, Debug)]
pub struct StaticKeySet {
    keys: JwkSet,
}

impl StaticKeySet {
    pub fn new(keys: JwkSet) -> Self {
        Self { keys }
    }

    /// Parses a JWKS document (`{"keys": [...]}`).
    pub fn from_json(document: &str) -> Result<Self, KeySetError> {
        let keys = serde_json::from_str(document).map_err(KeySetError::InvalidDocument)?;
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[Jwk] {
        &self.keys.keys
    }
}

impl From<JwkSet> for StaticKeySet {
    fn from(keys: JwkSet) -> Self {
        Self::new(keys)
    }
}

impl KeySetResolver for StaticKeySet {
    fn resolve<'a>(
        &'a self,
        kid: &'a str,
    ) -> BoxFuture<'a, Result<Option<KeyDescriptor>, KeySetError>> {
        let found = self.keys.find(kid).cloned();
        Box::pin(async move { Ok(found) })
    }
}
