use std::{
    sync::Arc,
    task::{Context, Poll},
};

use axum::extract::{FromRequestParts, Request};
use axum::http::{header::AUTHORIZATION, request::Parts};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::Layer;
use tower_service::Service;

use crate::{authorizer::TokenAuthorizer, claims::ClaimSet, error::AuthorizationFailure};

/// Protects the wrapped routes with a required permission.
///
/// Authorized requests carry their [`ClaimSet`] in the request extensions, where handlers can extract it. Rejected
/// requests are answered with the JSON error envelope and never reach the inner service.
#[derive(Clone)]
pub struct RequirePermissionLayer {
    authorizer: Arc<TokenAuthorizer>,
    permission: Arc<str>,
}

impl RequirePermissionLayer {
    pub fn new(authorizer: Arc<TokenAuthorizer>, permission: impl Into<Arc<str>>) -> Self {
        Self {
            authorizer,
            permission: permission.into(),
        }
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            authorizer: self.authorizer.clone(),
            permission: self.permission.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    authorizer: Arc<TokenAuthorizer>,
    permission: Arc<str>,
}

impl<S> Service<Request> for RequirePermissionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // Move the original service into the closure instead of its clone. This makes sure that the original service is
        // `call`ed instead of the cloned one, which might not be ready yet (`poll_ready` hasn't been called on the
        // clone yet).
        // See [docs](https://docs.rs/tower/latest/tower/trait.Service.html#be-careful-when-cloning-inner-services).
        let inner_clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner_clone);

        let authorizer = self.authorizer.clone();
        let permission = self.permission.clone();
        Box::pin(async move {
            let authorize_result = match authorization_header(&req) {
                Ok(header) => authorizer.authorize(header.as_deref(), &permission).await,
                Err(failure) => Err(failure),
            };
            match authorize_result {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(failure) => Ok(failure.into_response()),
            }
        })
    }
}

fn authorization_header(req: &Request) -> Result<Option<String>, AuthorizationFailure> {
    req.headers()
        .get(AUTHORIZATION)
        .map(|value| {
            value.to_str().map(str::to_owned).map_err(|_| {
                AuthorizationFailure::malformed_header("Authorization header must be bearer token.")
            })
        })
        .transpose()
}

impl<S> FromRequestParts<S> for ClaimSet
where
    S: Send + Sync,
{
    type Rejection = AuthorizationFailure;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Only present when a `RequirePermissionLayer` authorized the request.
        parts
            .extensions
            .get::<ClaimSet>()
            .cloned()
            .ok_or_else(|| AuthorizationFailure::malformed_header("Authorization header is expected."))
    }
}
