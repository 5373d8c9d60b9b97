//! Custom Axum extractors.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use courier_core::envelope::AuthenticationContext;

/// The authenticated caller, if an upstream layer identified one.
///
/// Authentication itself happens before the gateway: a layer that verifies
/// the caller inserts an [`AuthenticationContext`] into the request
/// extensions, and the gateway forwards it with the request. Absence is not
/// a rejection; the request is forwarded anonymously.
///
/// # Example
///
/// ```ignore
/// async fn handler(Authenticated(auth): Authenticated) -> String {
///     auth.map_or_else(|| "anonymous".to_string(), |auth| auth.principal)
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Authenticated(pub Option<AuthenticationContext>);

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthenticationContext>().cloned()))
    }
}
