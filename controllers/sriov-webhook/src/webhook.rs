//! Admission review handlers.
//!
//! Each handler decodes an `AdmissionReview`, runs the allocation flow on a
//! copy of the admitted object and answers with the annotation patch, if
//! any. Allocation never rejects an object for policy reasons: a denied
//! response only ever means the request could not be processed, with status
//! code 400 for client errors and 500 for server errors.
//!
//! The allocation itself runs on its own task. If the API server gives up on
//! the request and the handler future is dropped, the batch still runs to
//! completion, so no network set is left half reconciled.

use crate::metrics::{AdmissionOutcome, Metrics};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use crds::VirtualMachine;
use ip_manager::{patch_annotation_changes, AllocationOutcome, ErrorClass, IpManager, IpManagerError};
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::Resource;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub manager: Arc<IpManager>,
    pub metrics: Arc<Metrics>,
}

/// An object kind the webhook allocates networks for.
#[async_trait::async_trait]
pub trait Admissible: Resource<DynamicType = ()> + Clone + DeserializeOwned + Send + Sync + 'static {
    /// Metrics and log label
    const LABEL: &'static str;

    async fn allocate(&mut self, manager: &IpManager, dry_run: bool) -> Result<AllocationOutcome, IpManagerError>;
}

#[async_trait::async_trait]
impl Admissible for Pod {
    const LABEL: &'static str = "pod";

    async fn allocate(&mut self, manager: &IpManager, dry_run: bool) -> Result<AllocationOutcome, IpManagerError> {
        manager.allocate_pod_ip(self, dry_run).await
    }
}

#[async_trait::async_trait]
impl Admissible for VirtualMachine {
    const LABEL: &'static str = "virtualmachine";

    async fn allocate(&mut self, manager: &IpManager, dry_run: bool) -> Result<AllocationOutcome, IpManagerError> {
        manager.allocate_vm_ip(self, dry_run).await
    }
}

/// `POST /mutate-pods`
pub async fn mutate_pods(State(state): State<AppState>, body: Bytes) -> Json<AdmissionReview<DynamicObject>> {
    Json(admit::<Pod>(&state, &body).await)
}

/// `POST /mutate-virtualmachines`
pub async fn mutate_virtual_machines(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(admit::<VirtualMachine>(&state, &body).await)
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Result<String, (StatusCode, String)> {
    state.metrics.gather().map_err(|e| {
        error!("Couldn't gather metrics: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// Handles one encoded admission review for kind `K`.
pub async fn admit<K: Admissible>(state: &AppState, body: &[u8]) -> AdmissionReview<DynamicObject> {
    let request = match decode::<K>(body) {
        Ok(request) => request,
        Err(reason) => {
            warn!("Couldn't decode {} admission review: {}", K::LABEL, reason);
            state.metrics.record_admission(K::LABEL, AdmissionOutcome::ClientError);
            return with_code(AdmissionResponse::invalid(reason), 400).into_review();
        }
    };

    let span = info_span!(
        "admission",
        uid = %request.uid,
        kind = K::LABEL,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        name = %request.name,
        request_id = %Uuid::new_v4(),
    );
    respond(state, &request).instrument(span).await.into_review()
}

fn decode<K: Admissible>(body: &[u8]) -> Result<AdmissionRequest<K>, String> {
    let review: AdmissionReview<K> =
        serde_json::from_slice(body).map_err(|e| format!("invalid AdmissionReview: {}", e))?;
    review.try_into().map_err(|e| format!("invalid AdmissionReview: {}", e))
}

async fn respond<K: Admissible>(state: &AppState, request: &AdmissionRequest<K>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    let Some(mut object) = request.object.clone() else {
        debug!("Admission request carries no object, allowing");
        state.metrics.record_admission(K::LABEL, AdmissionOutcome::Skipped);
        return response;
    };

    if object.meta().namespace.as_deref().unwrap_or_default().is_empty() {
        object.meta_mut().namespace = request.namespace.clone();
    }
    let original = object.meta().annotations.clone();

    let started = Instant::now();
    let manager = Arc::clone(&state.manager);
    let dry_run = request.dry_run;
    let allocation = tokio::spawn(
        async move {
            let result = object.allocate(&manager, dry_run).await;
            (object, result)
        }
        .in_current_span(),
    );
    let joined = allocation.await;
    state.metrics.record_allocation_duration(K::LABEL, started.elapsed());

    let (object, outcome) = match joined {
        Ok((object, Ok(outcome))) => (object, outcome),
        Ok((_, Err(e))) => return deny(&state.metrics, K::LABEL, response, &e),
        Err(e) => {
            error!("Allocation task failed: {}", e);
            state.metrics.record_admission(K::LABEL, AdmissionOutcome::ServerError);
            return with_code(response.deny(format!("allocation task failed: {}", e)), 500);
        }
    };

    let patch = match patch_annotation_changes(original.as_ref(), object.meta().annotations.as_ref()) {
        Ok(patch) => patch,
        Err(e) => return deny(&state.metrics, K::LABEL, response, &e),
    };

    let admitted = if outcome.is_allocated() {
        AdmissionOutcome::Allocated
    } else {
        AdmissionOutcome::Skipped
    };

    let Some(patch) = patch else {
        debug!("Admitted without changes: {:?}", outcome);
        state.metrics.record_admission(K::LABEL, admitted);
        return response;
    };

    match response.with_patch(patch) {
        Ok(patched) => {
            info!("Admitted with networks patch (dry_run: {})", request.dry_run);
            state.metrics.record_admission(K::LABEL, admitted);
            patched
        }
        Err(e) => {
            error!("Couldn't encode admission patch: {}", e);
            state.metrics.record_admission(K::LABEL, AdmissionOutcome::ServerError);
            with_code(
                AdmissionResponse::from(request).deny(format!("failed to encode patch: {}", e)),
                500,
            )
        }
    }
}

fn deny(metrics: &Metrics, label: &str, response: AdmissionResponse, error: &IpManagerError) -> AdmissionResponse {
    let outcome = match error.class() {
        ErrorClass::Client => {
            warn!("Rejecting admission: {}", error);
            AdmissionOutcome::ClientError
        }
        ErrorClass::Server => {
            error!("Admission failed: {}", error);
            AdmissionOutcome::ServerError
        }
    };
    metrics.record_admission(label, outcome);
    with_code(response.deny(error.to_string()), error.status_code())
}

fn with_code(mut response: AdmissionResponse, code: u16) -> AdmissionResponse {
    response.result.code = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ip_manager::mock::{MockNetworkStore, MockOperation};
    use ip_manager::{FixedClock, ManagerOptions, NETWORKS_ANNOTATION, SRIOV_NETWORKS_ANNOTATION};
    use serde_json::{json, Value};
    use std::time::Duration;

    const SINGLE_NETWORK: &str = r#"{"subnet":"10.0.0.0/24","resourcename":"sriov-a","ippool":[{"name":"net1","address":"10.0.0.5/24","gateway":"10.0.0.1"}]}"#;

    fn state(store: &MockNetworkStore) -> AppState {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        AppState {
            manager: Arc::new(IpManager::with_clock(
                Arc::new(store.clone()),
                Arc::new(clock),
                ManagerOptions::default(),
            )),
            metrics: Arc::new(Metrics::new().unwrap()),
        }
    }

    fn review(kind: &str, group: &str, resource: &str, object: Value, dry_run: bool) -> Vec<u8> {
        let version = "v1";
        serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": group, "version": version, "kind": kind},
                "resource": {"group": group, "version": version, "resource": resource},
                "name": "web-0",
                "namespace": "ns1",
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "object": object,
                "dryRun": dry_run,
            }
        }))
        .unwrap()
    }

    fn pod_review(annotation: Option<&str>, dry_run: bool) -> Vec<u8> {
        let mut metadata = json!({"name": "web-0", "namespace": "ns1"});
        if let Some(value) = annotation {
            metadata["annotations"] = json!({ SRIOV_NETWORKS_ANNOTATION: value });
        }
        review(
            "Pod",
            "",
            "pods",
            json!({"apiVersion": "v1", "kind": "Pod", "metadata": metadata}),
            dry_run,
        )
    }

    fn response_of(review: AdmissionReview<DynamicObject>) -> Value {
        serde_json::to_value(review).unwrap()["response"].clone()
    }

    // `AdmissionResponse` serializes its patch as a JSON array of bytes
    fn decoded_patch(response: &Value) -> Value {
        let bytes: Vec<u8> = serde_json::from_value(response["patch"].clone()).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_pod_admission_returns_networks_patch() {
        let store = MockNetworkStore::new();
        let state = state(&store);

        let response = response_of(admit::<Pod>(&state, &pod_review(Some(SINGLE_NETWORK), false)).await);

        assert_eq!(response["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(response["allowed"], true);
        assert_eq!(response["patchType"], "JSONPatch");

        let patch = decoded_patch(&response);
        assert_eq!(patch.as_array().unwrap().len(), 1);
        assert_eq!(patch[0]["op"], "replace");
        assert_eq!(patch[0]["path"], "/metadata/annotations");
        assert_eq!(
            patch[0]["value"][NETWORKS_ANNOTATION],
            r#"[{"name":"net1","namespace":"ns1"}]"#
        );
        assert_eq!(patch[0]["value"][SRIOV_NETWORKS_ANNOTATION], SINGLE_NETWORK);

        assert!(store.network("ns1", "net1").is_some());
        assert_eq!(state.metrics.admissions("pod", AdmissionOutcome::Allocated), 1);
    }

    #[tokio::test]
    async fn test_pod_without_request_is_allowed_unchanged() {
        let store = MockNetworkStore::new();
        let state = state(&store);

        let response = response_of(admit::<Pod>(&state, &pod_review(None, false)).await);

        assert_eq!(response["allowed"], true);
        assert!(response.get("patch").map_or(true, Value::is_null));
        assert_eq!(store.calls().total(), 0);
        assert_eq!(state.metrics.admissions("pod", AdmissionOutcome::Skipped), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_is_client_error() {
        let store = MockNetworkStore::new();
        let state = state(&store);

        let response = response_of(admit::<Pod>(&state, &pod_review(Some(r#"{"ippool": [}"#), false)).await);

        assert_eq!(response["allowed"], false);
        assert_eq!(response["status"]["code"], 400);
        assert_eq!(store.calls().total(), 0);
        assert_eq!(state.metrics.admissions("pod", AdmissionOutcome::ClientError), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let store = MockNetworkStore::new();
        store.fail(MockOperation::CreateNetwork);
        let state = state(&store);

        let response = response_of(admit::<Pod>(&state, &pod_review(Some(SINGLE_NETWORK), false)).await);

        assert_eq!(response["allowed"], false);
        assert_eq!(response["status"]["code"], 500);
        assert_eq!(state.metrics.admissions("pod", AdmissionOutcome::ServerError), 1);
    }

    #[tokio::test]
    async fn test_undecodable_review_is_client_error() {
        let store = MockNetworkStore::new();
        let state = state(&store);

        let response = response_of(admit::<Pod>(&state, b"not a review").await);

        assert_eq!(response["allowed"], false);
        assert_eq!(response["status"]["code"], 400);
        assert_eq!(state.metrics.admissions("pod", AdmissionOutcome::ClientError), 1);
    }

    #[tokio::test]
    async fn test_dry_run_patches_without_persisting() {
        let store = MockNetworkStore::new();
        let state = state(&store);

        let response = response_of(admit::<Pod>(&state, &pod_review(Some(SINGLE_NETWORK), true)).await);

        assert_eq!(response["allowed"], true);
        assert_eq!(
            decoded_patch(&response)[0]["value"][NETWORKS_ANNOTATION],
            r#"[{"name":"net1","namespace":"ns1"}]"#
        );
        assert_eq!(store.network_count(), 0);
    }

    #[tokio::test]
    async fn test_virtual_machine_namespace_comes_from_request() {
        let store = MockNetworkStore::new();
        let state = state(&store);
        let vm = json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachine",
            "metadata": {
                "name": "vm1",
                "annotations": { SRIOV_NETWORKS_ANNOTATION: SINGLE_NETWORK },
            },
            "spec": {"running": true, "template": {"spec": {}}},
        });
        let body = review("VirtualMachine", "kubevirt.io", "virtualmachines", vm, false);

        let response = response_of(admit::<VirtualMachine>(&state, &body).await);

        assert_eq!(response["allowed"], true);
        assert!(store.network("ns1", "net1").is_some());
        assert_eq!(store.calls().get_virtual_machine, 0);
        assert_eq!(
            state.metrics.admissions("virtualmachine", AdmissionOutcome::Allocated),
            1
        );
    }

    #[tokio::test]
    async fn test_dropped_admission_still_completes_batch() {
        let store = MockNetworkStore::new();
        store.set_write_latency(Duration::from_millis(50));
        let state = state(&store);
        let two_networks = r#"{"resourcename":"sriov-a","ippool":[{"name":"net1","address":"10.0.0.5/24"},{"name":"net2","address":"10.0.0.6/24"}]}"#;
        let body = pod_review(Some(two_networks), false);

        // Give up after the first write, as the API server would on its deadline
        let abandoned = tokio::time::timeout(Duration::from_millis(70), admit::<Pod>(&state, &body)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.network("ns1", "net1").is_some());
        assert!(store.network("ns1", "net2").is_some());
    }
}
