//! Verifiers — predicates deciding whether a live response may be cached.
//!
//! A [`CachingTransport`](crate::transport::CachingTransport) runs its
//! verifiers in order after every miss. The first one returning `false`
//! keeps the response out of the cache; an empty list caches everything.

use std::sync::Arc;

use crate::http::{Method, Request, Response};

/// A shared, type-erased verifier.
///
/// ```
/// use replay::verify::{self, Verifier};
///
/// let small_bodies: Verifier = verify::from_fn(|_req, res| {
///     res.headers().content_length().is_some_and(|len| len < 1024)
/// });
/// ```
pub type Verifier = Arc<dyn Fn(&Request, &Response) -> bool + Send + Sync + 'static>;

/// Wraps a closure as a [`Verifier`].
pub fn from_fn<F>(f: F) -> Verifier
where
    F: Fn(&Request, &Response) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Accepts responses with a status code in `200..300`.
pub fn status_in_two_hundreds() -> Verifier {
    from_fn(|_req, res| res.status().is_success())
}

/// Accepts exchanges whose request used `method`.
pub fn request_method(method: Method) -> Verifier {
    from_fn(move |req, _res| *req.method() == method)
}

/// Returns `true` if every verifier accepts, stopping at the first rejection.
pub(crate) fn accepts(verifiers: &[Verifier], request: &Request, response: &Response) -> bool {
    verifiers.iter().all(|verify| verify(request, response))
}
