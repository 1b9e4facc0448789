//! Pod admission webhook
//!
//! Implements the mutating half of `admission.k8s.io/v1`: every container
//! image of an incoming pod is offered to the transformer chain and the
//! changes are answered as a base64 encoded JSON patch.

use axum::{Json, Router, extract::State, routing::post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use harbor_core::{Platform, merge_pull_secrets};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

const OS_LABEL: &str = "kubernetes.io/os";
const ARCH_LABEL: &str = "kubernetes.io/arch";

/// `AdmissionReview` envelope, used for both request and response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub object: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionStatus {
    pub code: u16,
    pub message: String,
}

impl AdmissionResponse {
    fn allowed(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            allowed: true,
            status: None,
            patch: None,
            patch_type: None,
        }
    }

    fn rejected(uid: &str, error: &ApiError) -> Self {
        Self {
            uid: uid.to_string(),
            allowed: false,
            status: Some(AdmissionStatus {
                code: error.status().as_u16(),
                message: error.to_string(),
            }),
            patch: None,
            patch_type: None,
        }
    }

    fn patched(uid: &str, patch: &[PatchOperation]) -> Result<Self, ApiError> {
        let encoded = STANDARD.encode(serde_json::to_vec(patch)?);
        Ok(Self {
            uid: uid.to_string(),
            allowed: true,
            status: None,
            patch: Some(encoded),
            patch_type: Some("JSONPatch".to_string()),
        })
    }
}

// The parts of a pod the webhook reads
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pod {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: Option<String>,
    generate_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    init_containers: Vec<Container>,
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    node_selector: BTreeMap<String, String>,
    image_pull_secrets: Option<Vec<LocalObjectReference>>,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(default)]
    name: String,
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalObjectReference {
    #[serde(default)]
    name: String,
}

/// One RFC 6902 operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: &'static str,
    pub path: String,
    pub value: Value,
}

/// Create admission routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook-v1-pod", post(mutate_pod))
}

/// POST /webhook-v1-pod
async fn mutate_pod(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview>,
) -> Result<Json<AdmissionReview>, ApiError> {
    let request = review
        .request
        .ok_or_else(|| ApiError::BadRequest("AdmissionReview has no request".to_string()))?;

    let response = match mutate(&state, &request).await {
        Ok(patch) if patch.is_empty() => AdmissionResponse::allowed(&request.uid),
        Ok(patch) => {
            if state.settings.verbose {
                info!(
                    "Patch for pod {}: {}",
                    request.uid,
                    serde_json::to_string(&patch)?
                );
            }
            AdmissionResponse::patched(&request.uid, &patch)?
        }
        Err(e) => {
            warn!("Rejecting pod {}: {}", request.uid, e);
            AdmissionResponse::rejected(&request.uid, &e)
        }
    };

    Ok(Json(AdmissionReview {
        api_version: review.api_version,
        kind: review.kind,
        request: None,
        response: Some(response),
    }))
}

/// Compute the patch for one admission request
async fn mutate(state: &AppState, request: &AdmissionRequest) -> Result<Vec<PatchOperation>, ApiError> {
    let object = request
        .object
        .clone()
        .ok_or_else(|| ApiError::BadRequest("admission request has no object".to_string()))?;
    let pod: Pod = serde_json::from_value(object)
        .map_err(|e| ApiError::BadRequest(format!("failed to decode pod: {}", e)))?;

    let platform = pod_platform(&pod.spec, &state.settings.default_platform);
    debug!(
        "Mutating pod {} for {}",
        pod.metadata
            .name
            .as_deref()
            .or(pod.metadata.generate_name.as_deref())
            .unwrap_or("<unnamed>"),
        platform
    );

    let mut patch = Vec::new();
    let mut secrets = Vec::new();

    for (containers, field, kind) in [
        (&pod.spec.init_containers, "initContainers", "init"),
        (&pod.spec.containers, "containers", "normal"),
    ] {
        for (index, container) in containers.iter().enumerate() {
            let Some(image) = container.image.as_deref() else {
                continue;
            };

            let rewrite = state.chain.rewrite(image, &platform).await?;
            if let Some(secret) = rewrite.pull_secret {
                secrets.push(secret);
            }
            if rewrite.image == image {
                continue;
            }

            info!(
                "Rewriting the image of {:?} from {:?} to {:?}",
                container.name, image, rewrite.image
            );
            metrics::counter!("hcw_mutations_image_rewrite_total", "kind" => kind).increment(1);

            patch.push(PatchOperation {
                op: "replace",
                path: format!("/spec/{}/{}/image", field, index),
                value: Value::String(rewrite.image),
            });
        }
    }

    patch.extend(pull_secret_patch(
        pod.spec.image_pull_secrets.as_deref(),
        &secrets,
    ));

    Ok(patch)
}

/// Platform the pod will run on, from its node selector
fn pod_platform(spec: &PodSpec, default: &Platform) -> Platform {
    let os = spec.node_selector.get(OS_LABEL);
    let arch = spec.node_selector.get(ARCH_LABEL);

    match (os, arch) {
        (None, None) => default.clone(),
        (os, arch) => Platform::new(
            os.map(String::as_str).unwrap_or(&default.os),
            arch.map(String::as_str).unwrap_or(&default.architecture),
        ),
    }
}

/// Operations adding the pull secrets the pod does not reference yet
fn pull_secret_patch(
    existing: Option<&[LocalObjectReference]>,
    secrets: &[String],
) -> Vec<PatchOperation> {
    let current: Vec<String> = existing
        .unwrap_or_default()
        .iter()
        .map(|s| s.name.clone())
        .collect();
    let merged = merge_pull_secrets(&current, secrets.iter().map(String::as_str));

    if merged.len() == current.len() {
        return Vec::new();
    }

    match existing {
        Some(_) => merged[current.len()..]
            .iter()
            .map(|name| PatchOperation {
                op: "add",
                path: "/spec/imagePullSecrets/-".to_string(),
                value: serde_json::json!({ "name": name }),
            })
            .collect(),
        None => vec![PatchOperation {
            op: "add",
            path: "/spec/imagePullSecrets".to_string(),
            value: Value::Array(
                merged
                    .iter()
                    .map(|name| serde_json::json!({ "name": name }))
                    .collect(),
            ),
        }],
    }
}
