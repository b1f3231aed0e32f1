use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderValue, Method, StatusCode};
use hyper::{Body, Request, Response};
use log::{error, info, warn};

use crate::admission::{AdmissionCodec, AdmissionOutcome};
use crate::errors::AdmissionError;
use crate::injector::{mutate, ClusterEnvironment};
use crate::server::PeerInfo;

const APPLICATION_JSON: &str = "application/json";
const TIMEOUT_BODY: &str = "server timeout";

/// Everything a `/mutate` call needs, built once in main.
pub struct InjectorContext {
    pub environment: ClusterEnvironment,
    pub codec: AdmissionCodec,
    pub timeout: Duration,
}

pub fn plain_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json_response(body: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    response
}

fn error_response(e: AdmissionError) -> Response<Body> {
    error!("{}", e);
    plain_response(e.status_code(), format!("{}\n", e))
}

fn content_type(req: &Request<Body>) -> String {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn admit(body: &[u8], context: &InjectorContext) -> Result<Vec<u8>, AdmissionError> {
    let review = context.codec.decode(body)?;
    let patch = mutate(&review.request, &context.environment)?;
    info!(
        "Admitting pod {:?} with {} patches",
        review.request.name,
        patch.0.len()
    );
    let outcome = AdmissionOutcome::allow(&review.request.uid, patch);
    context.codec.encode(&outcome, review.version)
}

/// Reads, validates and answers one AdmissionReview. Never denies: every
/// failure is a plain text HTTP error.
pub async fn mutate_handler(
    req: Request<Body>,
    context: Arc<InjectorContext>,
) -> Result<Response<Body>, hyper::Error> {
    let content_type = content_type(&req);
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            error!("can't read request body: {}", e);
            return Err(e);
        }
    };
    if body.is_empty() {
        return Ok(error_response(AdmissionError::EmptyBody));
    }
    if content_type != APPLICATION_JSON {
        return Ok(error_response(AdmissionError::UnsupportedMediaType(
            content_type,
        )));
    }
    match admit(&body, &context) {
        Ok(bs) => Ok(json_response(bs)),
        Err(e) => Ok(error_response(e)),
    }
}

pub fn log_request(req: &Request<Body>, peer: &PeerInfo) {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or_default();
    info!(
        "{} {}://{}{} {:?} from {}",
        req.method(),
        peer.scheme,
        host,
        req.uri(),
        req.version(),
        peer.remote_addr
    );
}

/// Answers 503 when `handler` does not finish within `timeout`. The handler
/// future is dropped at that point.
pub async fn with_timeout<F>(timeout: Duration, handler: F) -> Result<Response<Body>, hyper::Error>
where
    F: Future<Output = Result<Response<Body>, hyper::Error>>,
{
    match tokio::time::timeout(timeout, handler).await {
        Ok(response) => response,
        Err(_) => {
            warn!("Request timed out after {:?}", timeout);
            Ok(plain_response(
                StatusCode::SERVICE_UNAVAILABLE,
                TIMEOUT_BODY.to_string(),
            ))
        }
    }
}

pub async fn webhook_router(
    req: Request<Body>,
    context: Arc<InjectorContext>,
    peer: PeerInfo,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/mutate") => {
            log_request(&req, &peer);
            let timeout = context.timeout;
            with_timeout(timeout, mutate_handler(req, context)).await
        }
        _ => Ok(plain_response(StatusCode::NOT_FOUND, String::new())),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use http::header::CONTENT_TYPE;
    use http::{Method, StatusCode};
    use hyper::{Body, Request, Response};
    use serde_json::{json, Value};

    use super::{mutate_handler, webhook_router, with_timeout, InjectorContext};
    use crate::admission::tests::admission_review;
    use crate::admission::{AdmissionCodec, AdmissionResponseEnvelope};
    use crate::injector::tests::expected_pod_patch;
    use crate::injector::ClusterEnvironment;
    use crate::server::PeerInfo;

    fn context() -> Arc<InjectorContext> {
        Arc::new(InjectorContext {
            environment: ClusterEnvironment::new("foobar"),
            codec: AdmissionCodec::default(),
            timeout: Duration::from_secs(1),
        })
    }

    fn peer() -> PeerInfo {
        PeerInfo {
            scheme: "https",
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 34567)),
        }
    }

    fn request(method: Method, path: &str, content_type: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("https://localhost{}", path));
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        builder.body(Body::from(body)).expect("Unable to build request")
    }

    async fn send(req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response: Response<Body> = webhook_router(req, context(), peer())
            .await
            .expect("Handler failed");
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .expect("Unable to read response body");
        (status, body.to_vec())
    }

    fn review_body(api_version: &str, namespace: &str) -> Vec<u8> {
        serde_json::to_vec(&admission_review(api_version, namespace))
            .expect("Unable to serialize review")
    }

    #[tokio::test]
    async fn test_mutate_errors() {
        let tests = vec![
            (
                request(Method::POST, "/mutate", Some("text/plain"), review_body("admission.k8s.io/v1", "default")),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "invalid Content-Type, expect `application/json`\n".to_string(),
            ),
            (
                request(Method::POST, "/mutate", None, review_body("admission.k8s.io/v1", "default")),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "invalid Content-Type, expect `application/json`\n".to_string(),
            ),
            (
                request(Method::POST, "/mutate", Some("application/json; charset=utf-8"), review_body("admission.k8s.io/v1", "default")),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "invalid Content-Type, expect `application/json`\n".to_string(),
            ),
            (
                request(Method::POST, "/mutate", Some("application/json"), vec![]),
                StatusCode::BAD_REQUEST,
                "empty body\n".to_string(),
            ),
            (
                request(Method::POST, "/mutate", Some("text/plain"), vec![]),
                StatusCode::BAD_REQUEST,
                "empty body\n".to_string(),
            ),
            (
                request(Method::GET, "/mutate", Some("application/json"), vec![]),
                StatusCode::NOT_FOUND,
                String::new(),
            ),
            (
                request(Method::POST, "/validate", Some("application/json"), vec![]),
                StatusCode::NOT_FOUND,
                String::new(),
            ),
        ];
        for (n, (req, status, body)) in tests.into_iter().enumerate() {
            let (s, b) = send(req).await;
            assert_eq!(s, status, "Test mutate errors [#{}] failed", n);
            assert_eq!(String::from_utf8_lossy(&b), body, "Test mutate errors [#{}] failed", n);
        }
    }

    #[tokio::test]
    async fn test_mutate_undecodable_body() {
        for body in [b"{}".to_vec(), b"not json".to_vec(), br#"{"apiVersion":"v1","kind":"Pod"}"#.to_vec()] {
            let (status, b) = send(request(Method::POST, "/mutate", Some("application/json"), body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let b = String::from_utf8_lossy(&b).to_string();
            assert!(b.starts_with("could not decode request body: "), "Unexpected body {}", b);
            assert!(b.ends_with('\n'));
        }
    }

    #[tokio::test]
    async fn test_mutate_without_object() {
        let mut review = admission_review("admission.k8s.io/v1", "default");
        review["request"]
            .as_object_mut()
            .expect("request is an object")
            .remove("object");
        let body = serde_json::to_vec(&review).expect("Unable to serialize review");
        let (status, b) = send(request(Method::POST, "/mutate", Some("application/json"), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&b).starts_with("object not present in request body: "));
    }

    #[tokio::test]
    async fn test_mutate_default_namespace() {
        for api_version in ["admission.k8s.io/v1", "admission.k8s.io/v1beta1"] {
            let (status, b) = send(request(
                Method::POST,
                "/mutate",
                Some("application/json"),
                review_body(api_version, "default"),
            ))
            .await;
            assert_eq!(status, StatusCode::OK);
            let envelope: AdmissionResponseEnvelope =
                serde_json::from_slice(&b).expect("Unable to parse response");
            assert_eq!(envelope.api_version, api_version);
            assert_eq!(envelope.response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
            assert!(envelope.response.allowed);
            assert_eq!(envelope.response.patch_type.as_deref(), Some("JSONPatch"));
            let patch: Value = serde_json::from_slice(
                &envelope.response.patch.expect("Patch not present").0,
            )
            .expect("Unable to parse patch");
            assert_eq!(patch, expected_pod_patch());
            assert_eq!(
                patch[0],
                json!({"op": "add", "path": "/spec/containers/0/env", "value": [
                    {"name": "NEW_RELIC_METADATA_KUBERNETES_CLUSTER_NAME", "value": "foobar"}
                ]})
            );
        }
    }

    #[tokio::test]
    async fn test_mutate_reserved_namespace() {
        let (status, b) = send(request(
            Method::POST,
            "/mutate",
            Some("application/json"),
            review_body("admission.k8s.io/v1", "kube-system"),
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        let envelope: AdmissionResponseEnvelope =
            serde_json::from_slice(&b).expect("Unable to parse response");
        assert!(envelope.response.allowed);
        assert!(envelope.response.patch.is_none());
        assert!(envelope.response.patch_type.is_none());
    }

    #[tokio::test]
    async fn test_mutate_body_read_error() {
        let (sender, body) = Body::channel();
        sender.abort();
        let req = Request::builder()
            .method(Method::POST)
            .uri("https://localhost/mutate")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .expect("Unable to build request");
        assert!(mutate_handler(req, context()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let response = with_timeout(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, hyper::Error>(Response::new(Body::from("late")))
        })
        .await
        .expect("Handler failed");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .expect("Unable to read response body");
        assert_eq!(&body[..], b"server timeout");

        let response = with_timeout(Duration::from_millis(100), async {
            Ok::<_, hyper::Error>(Response::new(Body::from("on time")))
        })
        .await
        .expect("Handler failed");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
