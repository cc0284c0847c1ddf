use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt, api::ListParams};
use migration_types::{CheckpointRequest, RestoreRequest};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;

use crate::admission::{MatchCandidate, PodIdentity, find_match, resolve_image_patches};
use crate::error::Error;
use crate::wire::{AdmissionRequest, AdmissionReview, AdmissionReviewResponse};

pub struct ServerContext {
    pub client: Client,
}

/// Runs the mutating admission webhook server until the process is killed.
/// There is no graceful-shutdown path here distinct from the other crates'
/// signal handling; the webhook is stateless request-response and the
/// kubelet/apiserver tolerate a dropped connection mid-restart.
pub async fn run(client: Client, port: u16) -> Result<(), Error> {
    println!("{}", "⚙️ starting image admission webhook".green());

    let ctx = Arc::new(ServerContext { client });
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "image-admission listening");
    migration_common::signal_ready();

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, ctx.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(error = %e, "admission connection error");
            }
        });
    }
}

async fn handle(
    req: Request<Incoming>,
    ctx: Arc<ServerContext>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/healthz") => {
            Response::new(Full::new(Bytes::from_static(b"ok")))
        }
        (Method::POST, "/mutate-v1-pod") => match mutate(req, ctx).await {
            Ok(body) => Response::new(Full::new(Bytes::from(body))),
            Err(e) => {
                tracing::warn!(error = %e, "admission request failed; allowing unmodified");
                let mut resp = Response::new(Full::new(Bytes::from_static(
                    br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview","response":{"uid":"","allowed":true}}"#,
                )));
                *resp.status_mut() = StatusCode::OK;
                resp
            }
        },
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from_static(b"not found")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    };

    Ok(response)
}

async fn mutate(req: Request<Incoming>, ctx: Arc<ServerContext>) -> Result<Vec<u8>, Error> {
    let body = req.into_body().collect().await?.to_bytes();
    let review: AdmissionReview = serde_json::from_slice(&body)?;
    let request = review
        .request
        .ok_or_else(|| Error::Precondition("admission review missing request".to_string()))?;

    let response = build_response(&request, &ctx.client).await?;
    Ok(serde_json::to_vec(&response)?)
}

async fn build_response(
    request: &AdmissionRequest,
    client: &Client,
) -> Result<AdmissionReviewResponse, Error> {
    if request.operation != "CREATE" {
        return Ok(AdmissionReviewResponse::allow(request.uid.clone()));
    }

    let Some(object) = &request.object else {
        return Ok(AdmissionReviewResponse::allow(request.uid.clone()));
    };
    let pod: Pod = serde_json::from_value(object.clone())?;

    let Some(namespace) = request.namespace.clone().or_else(|| pod.namespace()) else {
        return Ok(AdmissionReviewResponse::allow(request.uid.clone()));
    };

    let owning_job_name = pod
        .owner_references()
        .iter()
        .find(|r| r.kind == "Job")
        .map(|r| r.name.clone());

    let identity = PodIdentity {
        name: pod.name_any().as_str(),
        generate_name: pod.metadata.generate_name.as_deref(),
        owning_job_name: owning_job_name.as_deref(),
    };

    let candidates = collect_candidates(client, &namespace).await?;
    let Some(matched) = find_match(&candidates, &identity) else {
        return Ok(AdmissionReviewResponse::allow(request.uid.clone()));
    };

    let patch = build_patch(matched, &pod);
    if patch.is_empty() {
        return Ok(AdmissionReviewResponse::allow(request.uid.clone()));
    }

    Ok(AdmissionReviewResponse::allow_with_patch(
        request.uid.clone(),
        &serde_json::Value::Array(patch),
    ))
}

async fn collect_candidates(client: &Client, namespace: &str) -> Result<Vec<MatchCandidate>, Error> {
    let checkpoint_requests: Api<CheckpointRequest> = Api::namespaced(client.clone(), namespace);
    let restore_requests: Api<RestoreRequest> = Api::namespaced(client.clone(), namespace);

    let mut candidates = Vec::new();
    for cr in checkpoint_requests.list(&ListParams::default()).await?.items {
        let name = cr.name_any();
        candidates.push(MatchCandidate::from_checkpoint_request(&cr, &name));
    }
    for rr in restore_requests.list(&ListParams::default()).await?.items {
        let name = rr.name_any();
        candidates.push(MatchCandidate::from_restore_request(&rr, &name));
    }
    Ok(candidates)
}

fn build_patch(candidate: &MatchCandidate, pod: &Pod) -> Vec<serde_json::Value> {
    let mut ops = Vec::new();
    if let Some(spec) = &pod.spec {
        ops.extend(patch_ops_for("/spec/containers", candidate, &spec.containers));
        if let Some(init_containers) = &spec.init_containers {
            ops.extend(patch_ops_for(
                "/spec/initContainers",
                candidate,
                init_containers,
            ));
        }
    }
    ops
}

fn patch_ops_for(
    path_prefix: &str,
    candidate: &MatchCandidate,
    containers: &[k8s_openapi::api::core::v1::Container],
) -> Vec<serde_json::Value> {
    let entries: Vec<(String, String)> = containers
        .iter()
        .map(|c| (c.name.clone(), c.image.clone().unwrap_or_default()))
        .collect();

    resolve_image_patches(candidate, &entries)
        .into_iter()
        .map(|patch| {
            serde_json::json!({
                "op": "replace",
                "path": format!("{path_prefix}/{}/image", patch.container_index),
                "value": patch.image,
            })
        })
        .collect()
}
