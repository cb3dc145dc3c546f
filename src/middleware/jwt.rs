//! HMAC bearer-token authentication.
//!
//! ```rust,no_run
//! use kumo::{Router, middleware};
//!
//! let mut app = Router::new();
//! app.use_middleware(middleware::jwt("my_secret_key"));
//! ```
//!
//! The token is read from `Authorization: <scheme> <token>`; the scheme
//! itself is not checked. The value is split on every single space and the
//! second field is the token, so `Bearer  <token>` (two spaces) carries an
//! empty token and is rejected as [`Error::ExpiredToken`]. On success every string-valued claim is appended
//! to the request headers under the claim's name, so a token carrying
//! `{"role": "admin"}` shows up downstream as `role: admin`.
//!
//! | condition | error |
//! |---|---|
//! | header missing or empty | [`Error::InvalidToken`] |
//! | no space-separated scheme | [`Error::InvalidToken`] |
//! | malformed, bad signature, or expired | [`Error::ExpiredToken`] |
//! | claims not a JSON object | [`Error::InvalidToken`] |

use http::header::{AUTHORIZATION, HeaderName};
use http::HeaderValue;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::handler::BoxFuture;
use crate::middleware::Middleware;
use crate::request::Request;

/// Builds a [`Jwt`] middleware verifying tokens against `secret`.
pub fn jwt(secret: impl AsRef<[u8]>) -> Jwt {
    Jwt::new(secret)
}

/// Bearer-token middleware. See the [module docs](self).
pub struct Jwt {
    key: DecodingKey,
    validation: Validation,
}

impl Jwt {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // `exp` and `nbf` are checked when present but not required
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.leeway = 0;
        Self { key: DecodingKey::from_secret(secret.as_ref()), validation }
    }

    fn authenticate(&self, req: &mut Request) -> Result<()> {
        let value = req.header(AUTHORIZATION.as_str()).unwrap_or("");
        if value.is_empty() {
            return Err(Error::InvalidToken);
        }
        // split on each space, not on runs of whitespace
        let mut parts = value.split(' ');
        let (Some(_scheme), Some(token)) = (parts.next(), parts.next()) else {
            return Err(Error::InvalidToken);
        };

        let data = decode::<Value>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "bearer token rejected");
            Error::ExpiredToken
        })?;
        let Value::Object(claims) = data.claims else {
            return Err(Error::InvalidToken);
        };

        let headers = req.headers_mut();
        for (name, claim) in claims {
            let Value::String(claim) = claim else { continue };
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&claim)) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(claim = %name, "claim cannot be carried as a header; skipped"),
            }
        }
        Ok(())
    }
}

impl Middleware for Jwt {
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.authenticate(req) })
    }
}
