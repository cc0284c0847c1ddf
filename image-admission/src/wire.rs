//! Minimal JSON envelope for the `admission.k8s.io/v1` AdmissionReview wire
//! format. The incoming pod is decoded separately via `k8s_openapi`'s typed
//! `Pod`; the envelope itself is hand-modeled since its `object` field is
//! untyped and varies by admitted kind.
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct AdmissionReview {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub operation: String,
    #[serde(default)]
    pub object: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct AdmissionReviewResponse {
    #[serde(rename = "apiVersion")]
    pub api_version: &'static str,
    pub kind: &'static str,
    pub response: AdmissionResponse,
}

#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(rename = "patchType", skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<&'static str>,
}

impl AdmissionReviewResponse {
    pub fn allow(uid: String) -> Self {
        AdmissionReviewResponse {
            api_version: "admission.k8s.io/v1",
            kind: "AdmissionReview",
            response: AdmissionResponse {
                uid,
                allowed: true,
                patch: None,
                patch_type: None,
            },
        }
    }

    pub fn allow_with_patch(uid: String, patch: &serde_json::Value) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(patch.to_string());
        AdmissionReviewResponse {
            api_version: "admission.k8s.io/v1",
            kind: "AdmissionReview",
            response: AdmissionResponse {
                uid,
                allowed: true,
                patch: Some(encoded),
                patch_type: Some("JSONPatch"),
            },
        }
    }
}
