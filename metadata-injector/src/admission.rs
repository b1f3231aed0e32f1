use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::ByteString;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde::{Deserialize, Serialize};

use crate::errors::AdmissionError;

pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
pub const JSON_PATCH_TYPE: &str = "JSONPatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionApiVersion {
    V1,
    V1Beta1,
}

impl AdmissionApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionApiVersion::V1 => "admission.k8s.io/v1",
            AdmissionApiVersion::V1Beta1 => "admission.k8s.io/v1beta1",
        }
    }
}

/// What the handler decided for one request, independent of the envelope
/// shape it is sent back in.
#[derive(Debug)]
pub struct AdmissionOutcome {
    pub uid: String,
    pub allowed: bool,
    pub patch: Patch,
}

impl AdmissionOutcome {
    pub fn allow(uid: &str, patch: Patch) -> Self {
        AdmissionOutcome {
            uid: uid.to_string(),
            allowed: true,
            patch,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponseBody {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<ByteString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponseEnvelope {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponseBody,
}

pub struct DecodedReview {
    pub version: AdmissionApiVersion,
    pub request: AdmissionRequest<Pod>,
}

/// Decoder and encoder for the AdmissionReview versions this webhook speaks.
/// Built once at startup and shared by every request.
#[derive(Debug, Clone)]
pub struct AdmissionCodec {
    versions: Vec<AdmissionApiVersion>,
}

impl Default for AdmissionCodec {
    fn default() -> Self {
        AdmissionCodec::new(vec![AdmissionApiVersion::V1, AdmissionApiVersion::V1Beta1])
    }
}

impl AdmissionCodec {
    pub fn new(versions: Vec<AdmissionApiVersion>) -> Self {
        AdmissionCodec { versions }
    }

    pub fn version(&self, api_version: &str) -> Option<AdmissionApiVersion> {
        self.versions
            .iter()
            .find(|v| v.as_str() == api_version)
            .copied()
    }

    pub fn decode(&self, body: &[u8]) -> Result<DecodedReview, AdmissionError> {
        let review = serde_json::from_slice::<AdmissionReview<Pod>>(body)
            .map_err(|e| AdmissionError::DecodeFailed(e.to_string()))?;
        if review.types.kind != ADMISSION_REVIEW_KIND {
            return Err(AdmissionError::DecodeFailed(format!(
                "unexpected kind {}",
                review.types.kind
            )));
        }
        let version = self.version(&review.types.api_version).ok_or_else(|| {
            AdmissionError::DecodeFailed(format!(
                "unsupported apiVersion {}",
                review.types.api_version
            ))
        })?;
        match review.request {
            Some(request) if request.object.is_some() => Ok(DecodedReview { version, request }),
            _ => Err(AdmissionError::ObjectMissing(
                String::from_utf8_lossy(body).to_string(),
            )),
        }
    }

    pub fn encode(
        &self,
        outcome: &AdmissionOutcome,
        version: AdmissionApiVersion,
    ) -> Result<Vec<u8>, AdmissionError> {
        let (patch, patch_type) = if outcome.patch.0.is_empty() {
            (None, None)
        } else {
            let bs = serde_json::to_vec(&outcome.patch)
                .map_err(|e| AdmissionError::EncodeFailed(e.to_string()))?;
            (Some(ByteString(bs)), Some(JSON_PATCH_TYPE.to_string()))
        };
        let envelope = AdmissionResponseEnvelope {
            api_version: version.as_str().to_string(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
            response: AdmissionResponseBody {
                uid: outcome.uid.clone(),
                allowed: outcome.allowed,
                patch,
                patch_type,
            },
        };
        serde_json::to_vec(&envelope).map_err(|e| AdmissionError::EncodeFailed(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use json_patch::{AddOperation, Patch, PatchOperation};
    use serde_json::{json, Value};

    use super::{
        AdmissionApiVersion, AdmissionCodec, AdmissionOutcome, AdmissionResponseEnvelope,
    };
    use crate::errors::AdmissionError;
    use crate::injector::tests::pod;

    pub(crate) fn admission_review(api_version: &str, namespace: &str) -> Value {
        let pod = pod!(namespace);
        json!({
            "apiVersion": api_version,
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "requestResource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "test-123-123",
                "namespace": namespace,
                "operation": "CREATE",
                "userInfo": {
                    "username": "admin",
                    "uid": "014fbff9a07c",
                    "groups": ["system:authenticated", "my-admin-group"],
                },
                "object": pod,
                "dryRun": false,
            }
        })
    }

    #[test]
    fn test_decode_versions() {
        let codec = AdmissionCodec::default();
        let tests = vec![
            ("admission.k8s.io/v1", AdmissionApiVersion::V1),
            ("admission.k8s.io/v1beta1", AdmissionApiVersion::V1Beta1),
        ];
        for (api_version, expected) in tests {
            let body = serde_json::to_vec(&admission_review(api_version, "default"))
                .expect("Unable to serialize review");
            let decoded = codec
                .decode(&body)
                .unwrap_or_else(|e| panic!("Unable to decode {}: {}", api_version, e));
            assert_eq!(decoded.version, expected);
            assert_eq!(decoded.request.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
            assert_eq!(decoded.request.namespace.as_deref(), Some("default"));
        }
    }

    #[test]
    fn test_decode_errors() {
        let codec = AdmissionCodec::default();

        let e = codec.decode(b"{not json").err().expect("Expected decode error");
        assert!(matches!(e, AdmissionError::DecodeFailed(_)));

        let body = serde_json::to_vec(&admission_review("admission.k8s.io/v2", "default"))
            .expect("Unable to serialize review");
        let e = codec.decode(&body).err().expect("Expected decode error");
        assert_eq!(
            e,
            AdmissionError::DecodeFailed("unsupported apiVersion admission.k8s.io/v2".to_string())
        );

        let only_v1 = AdmissionCodec::new(vec![AdmissionApiVersion::V1]);
        let body = serde_json::to_vec(&admission_review("admission.k8s.io/v1beta1", "default"))
            .expect("Unable to serialize review");
        assert!(matches!(
            only_v1.decode(&body),
            Err(AdmissionError::DecodeFailed(_))
        ));

        let mut review = admission_review("admission.k8s.io/v1", "default");
        review["request"]
            .as_object_mut()
            .expect("request is an object")
            .remove("object");
        let body = serde_json::to_vec(&review).expect("Unable to serialize review");
        let e = codec.decode(&body).err().expect("Expected missing object");
        assert_eq!(
            e,
            AdmissionError::ObjectMissing(String::from_utf8_lossy(&body).to_string())
        );

        let body = br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview"}"#;
        assert!(matches!(
            codec.decode(body),
            Err(AdmissionError::ObjectMissing(_))
        ));
    }

    #[test]
    fn test_encode_with_patch() {
        let codec = AdmissionCodec::default();
        let patch = Patch(vec![PatchOperation::Add(AddOperation {
            path: "/spec/containers/0/env".to_string(),
            value: json!([{"name": "A", "value": "b"}]),
        })]);
        for version in [AdmissionApiVersion::V1, AdmissionApiVersion::V1Beta1] {
            let bs = codec
                .encode(&AdmissionOutcome::allow("uid-1", patch.clone()), version)
                .expect("Unable to encode response");
            let envelope: AdmissionResponseEnvelope =
                serde_json::from_slice(&bs).expect("Unable to parse response");
            assert_eq!(envelope.api_version, version.as_str());
            assert_eq!(envelope.kind, "AdmissionReview");
            assert_eq!(envelope.response.uid, "uid-1");
            assert!(envelope.response.allowed);
            assert_eq!(envelope.response.patch_type.as_deref(), Some("JSONPatch"));
            let patch_bytes = envelope.response.patch.expect("Patch not present").0;
            let patch_value: Value =
                serde_json::from_slice(&patch_bytes).expect("Unable to parse patch");
            assert_eq!(
                patch_value,
                json!([{"op": "add", "path": "/spec/containers/0/env", "value": [{"name": "A", "value": "b"}]}])
            );
        }
    }

    #[test]
    fn test_encode_without_patch() {
        let codec = AdmissionCodec::default();
        let bs = codec
            .encode(
                &AdmissionOutcome::allow("uid-2", Patch(vec![])),
                AdmissionApiVersion::V1,
            )
            .expect("Unable to encode response");
        let value: Value = serde_json::from_slice(&bs).expect("Unable to parse response");
        assert_eq!(
            value,
            json!({
                "apiVersion": "admission.k8s.io/v1",
                "kind": "AdmissionReview",
                "response": {"uid": "uid-2", "allowed": true},
            })
        );
    }
}
