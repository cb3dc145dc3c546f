//! Access logging.

use http::StatusCode;
use tracing::info;

use crate::request::Request;

/// Emits the access line for a finished request.
pub(crate) fn log_request(status: StatusCode, req: &Request) {
    info!(
        status = status.as_u16(),
        host = req.host(),
        method = %req.method(),
        path = req.path(),
        "request"
    );
}
