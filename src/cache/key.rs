//! Cache key derivation.

use std::fmt;
use std::io;

use sha2::{Digest, Sha256};

use crate::http::Request;

/// The string identifying a cacheable exchange.
///
/// Built as `METHOD normalized-url`, followed by a space and the hex SHA-256
/// of the body when the method is body-keyed (see
/// [`Method::is_body_keyed`](crate::http::Method::is_body_keyed)) and the
/// request carries a body.
///
/// # Examples
///
/// ```
/// use replay::cache::CacheKey;
/// use replay::http::Request;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut get = Request::get("http://example.com/items")?;
/// assert_eq!(CacheKey::derive(&mut get).await?.as_str(), "GET http://example.com/items");
///
/// let mut post = Request::post("http://example.com/items", "a")?;
/// let key = CacheKey::derive(&mut post).await?;
/// assert!(key.as_str().starts_with("POST http://example.com/items "));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `request`.
    ///
    /// For body-keyed methods the body is buffered in place, so the request
    /// still carries its full body when it is sent afterwards.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while reading a streaming body.
    pub async fn derive(request: &mut Request) -> io::Result<Self> {
        let mut key = format!("{} {}", request.method(), request.url());

        if request.method().is_body_keyed() && !request.body_ref().is_absent() {
            let body = request.body_mut().buffer().await?;
            key.push(' ');
            key.push_str(&sha256_hex(&body));
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase hex SHA-256 of `data`.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
