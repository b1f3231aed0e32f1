use std::sync::Arc;

use http::{Method, StatusCode};
use hyper::{Body, Request, Response};
use log::debug;

use crate::certs::CertificateStore;
use crate::webhook::plain_response;

/// Ready once a certificate is being served. Reads the same store the TLS
/// resolver reads.
pub async fn readiness_handler(
    req: Request<Body>,
    store: Arc<CertificateStore>,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::GET {
        return Ok(plain_response(
            StatusCode::METHOD_NOT_ALLOWED,
            String::new(),
        ));
    }
    if store.is_present() {
        Ok(plain_response(StatusCode::OK, "OK".to_string()))
    } else {
        debug!("Readiness check failed: no certificate loaded");
        Ok(plain_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Certificate not present".to_string(),
        ))
    }
}
