//! Permission-enforcing authorization [middleware for `axum`](https://docs.rs/axum/latest/axum/middleware/index.html),
//! following [JSON Object Signing and Encryption (JOSE)](https://datatracker.ietf.org/wg/jose/charter/) standards.
//!
//! ## Overview
//!
//! Identity providers such as Auth0 issue [JSON Web Tokens (JWT)](https://datatracker.ietf.org/doc/html/rfc7519)
//! whose payload carries a `permissions` claim when role-based access control is enabled for the API. This crate
//! verifies such tokens against the provider's published [JSON Web Key (JWK)](https://datatracker.ietf.org/doc/html/rfc7517)
//! set and checks that they grant the permission a route requires.
//!
//! For every request, a [`TokenAuthorizer`]:
//!
//! 1. extracts the token from an `Authorization: Bearer <token>` header,
//! 2. decodes the token header and rejects any algorithm other than the single pinned one,
//! 3. looks up the signing key by its `kid` through a [`KeySetResolver`],
//! 4. verifies the signature and the `exp`, `aud` and `iss` claims,
//! 5. checks the `permissions` claim for the required permission.
//!
//! The result is either a verified [`ClaimSet`] or an [`AuthorizationFailure`] that renders as
//! `{"success": false, "error": <status>, "message": <description>}`.
//!
//! ## Features
//!
//! - **Algorithm pinning**: Tokens signed with any algorithm but the configured asymmetric one are rejected before a
//!   key is looked up.
//! - **Caching**: The remote JWK set is fetched once and shared by all requests. Concurrent requests against an empty
//!   cache trigger a single fetch. Optionally, the set expires after a time-to-live.
//! - **Key rotation**: Optionally, a token signed with an unknown `kid` triggers a throttled re-fetch of the JWK set.
//! - **Rate Limiting**: Outgoing requests to fetch JWK sets can be rate limited to avoid running into server-side
//!   rate limits of your OpenID Connect provider or OAuth2 authorization server.
//! - **Classified failures**: Client errors (401, 403, and 400 for tokens issued without RBAC) are distinguished from
//!   an unreachable identity provider (503).
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use axum::{routing::get, Router};
//! use axum_jose_rbac::{
//!     AuthorizerConfig, ClaimSet, RemoteJwkSetBuilder, RequirePermissionLayer, TokenAuthorizer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthorizerConfig::from_issuer_domain("your-tenant.auth0.com", "drinks")?;
//!
//!     // The provider publishes its keys at `https://your-tenant.auth0.com/.well-known/jwks.json`.
//!     let remote_jwk_set = RemoteJwkSetBuilder::for_issuer(&config.issuer)?
//!         .with_timeout(Duration::from_secs(5))
//!         .with_refresh_on_unknown_kid(Duration::from_secs(60))
//!         .build()?;
//!     remote_jwk_set.prefetch().await?;
//!
//!     let authorizer = Arc::new(TokenAuthorizer::new(config, remote_jwk_set)?);
//!
//!     let router = Router::new().route(
//!         "/drinks-detail",
//!         get(|claims: ClaimSet| async move { format!("Hello {}!", claims.subject().unwrap_or("?")) })
//!             .layer(RequirePermissionLayer::new(authorizer, "get:drinks-detail")),
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```
//!
//! Handlers that do not go through the layer can call [`TokenAuthorizer::authorize`] directly with the raw header
//! value.

pub mod authorization;
pub mod authorizer;
pub mod claims;
pub mod error;
pub mod jwk_set;
pub mod remote_jwk_set;
pub mod validation;

pub use authorization::RequirePermissionLayer;
pub use authorizer::{extract_bearer, AuthorizerConfig, TokenAuthorizer};
pub use claims::ClaimSet;
pub use error::{AuthorizationFailure, ConfigError, FailureKind, KeySetError};
pub use jwk_set::{KeyDescriptor, KeySetResolver, StaticKeySet};
pub use remote_jwk_set::{RemoteJwkSet, RemoteJwkSetBuilder};

#[cfg(test)]
mod testutil;
