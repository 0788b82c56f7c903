//! The RPC surface (C8): implements the seven `TestCoordinator` methods
//! generated from `proto/coordinator.proto`, routing each call through the
//! object-state cache and the state machine's notification channel per
//! spec.md §4.7.

use std::sync::Arc;

use coord_core::cache::ObjectStateCache;
use coord_core::context::ActionContext;
use coord_core::notification::{BlockingHandle, Notification, ObjectEvent, ObjectUpdate};
use coord_core::plan::MaskResolver;
use coord_core::resource::{ObservationPoint, ObservedWhen, ResourceKey};
use coord_core::value::Value;
use tokio::sync::mpsc;
use tonic::{Request, Response as GrpcResponse, Status};
use tracing::{info, warn};

pub mod proto {
    tonic::include_proto!("coordinator.v1");
}

use proto::test_coordinator_server::TestCoordinator;
use proto::{
    ApiServerRecvRequest, ControllerGetRequest, ControllerListRequest, ControllerRecvRequest,
    ControllerWriteRequest, Response,
};

const API_ADDED: &str = "API_ADDED";
const API_MODIFIED: &str = "API_MODIFIED";
const API_DELETED: &str = "API_DELETED";
const HEAR_ADDED: &str = "HEAR_ADDED";
const HEAR_DELETED: &str = "HEAR_DELETED";
const WRITE_CREATE: &str = "WRITE_CREATE";
const WRITE_UPDATE: &str = "WRITE_UPDATE";
const WRITE_PATCH: &str = "WRITE_PATCH";
const WRITE_STATUS_UPDATE: &str = "WRITE_STATUS_UPDATE";
const WRITE_STATUS_PATCH: &str = "WRITE_STATUS_PATCH";
const WRITE_DELETE: &str = "WRITE_DELETE";

pub struct CoordinatorService {
    cache: Arc<ObjectStateCache>,
    state_tx: mpsc::Sender<Notification>,
    ctx: Arc<ActionContext>,
    masks: Arc<dyn MaskResolver + Send + Sync>,
}

impl CoordinatorService {
    pub fn new(
        cache: Arc<ObjectStateCache>,
        state_tx: mpsc::Sender<Notification>,
        ctx: Arc<ActionContext>,
        masks: Arc<dyn MaskResolver + Send + Sync>,
    ) -> Self {
        CoordinatorService { cache, state_tx, ctx, masks }
    }

    /// Pushes `notification` onto `stateNotificationCh` and awaits its
    /// release -- the trigger-phase block of spec.md §4.7 step 4.
    async fn send_and_block(&self, notification: Notification, rx: tokio::sync::oneshot::Receiver<()>) {
        if self.state_tx.send(notification).await.is_err() {
            warn!("state notification channel closed; coordinator is shutting down");
            return;
        }
        let _ = rx.await;
    }

    async fn create_and_block(&self, resource_key: ResourceKey, point: ObservationPoint) {
        let (handle, rx) = BlockingHandle::pair();
        let notification = Notification::ObjectCreate(
            ObjectEvent {
                resource_key,
                point,
            },
            handle,
        );
        self.send_and_block(notification, rx).await;
    }

    async fn delete_and_block(&self, resource_key: ResourceKey, point: ObservationPoint) {
        let (handle, rx) = BlockingHandle::pair();
        let notification = Notification::ObjectDelete(
            ObjectEvent {
                resource_key,
                point,
            },
            handle,
        );
        self.send_and_block(notification, rx).await;
    }

    async fn update_and_block(
        &self,
        resource_key: ResourceKey,
        point: ObservationPoint,
        prev_state: Value,
        cur_state: Value,
    ) {
        let mask = self.masks.resolve(&resource_key);
        let (handle, rx) = BlockingHandle::pair();
        let notification = Notification::ObjectUpdate(
            ObjectUpdate {
                resource_key,
                point,
                prev_state,
                cur_state,
                mask,
            },
            handle,
        );
        self.send_and_block(notification, rx).await;
    }

    /// Blocks the caller on the pause-point gate if `(observer, scope)` (or
    /// `(observer, "all")`) is currently locked (spec.md §4.7 step 6).
    async fn pause_or_return_api_server(&self, host: &str, scope: &str) {
        self.ctx.wait_if_api_server_locked(host, scope).await;
    }
}

#[tonic::async_trait]
impl TestCoordinator for CoordinatorService {
    async fn notify_test_before_api_server_recv(
        &self,
        request: Request<ApiServerRecvRequest>,
    ) -> Result<GrpcResponse<Response>, Status> {
        let req = request.into_inner();
        let key = ResourceKey::from_raw(req.resource_key.clone());
        let point = ObservationPoint::new(ObservedWhen::BeforeApiServerRecv, req.api_server_hostname.clone());
        info!(handler = "NotifyTestBeforeAPIServerRecv", op = %req.operation_type, key = %key);
        self.cache.initialize(&req.api_server_hostname, &point, &key);

        match req.operation_type.as_str() {
            API_ADDED => self.create_and_block(key.clone(), point.clone()).await,
            API_MODIFIED => {
                let prev = Value::from_json_str(&self.cache.read(&req.api_server_hostname, &point, &key))
                    .unwrap_or_default();
                let cur = Value::from_json_str(&req.object).unwrap_or_default();
                self.update_and_block(key.clone(), point.clone(), prev, cur).await;
            }
            API_DELETED => self.delete_and_block(key.clone(), point.clone()).await,
            other => warn!(op = other, "unsupported API server operation type"),
        }

        self.cache.write(&req.api_server_hostname, &point, &key, req.object);
        self.pause_or_return_api_server(&req.api_server_hostname, key.as_str()).await;
        Ok(GrpcResponse::new(Response {
            ok: true,
            message: String::new(),
        }))
    }

    async fn notify_test_after_api_server_recv(
        &self,
        request: Request<ApiServerRecvRequest>,
    ) -> Result<GrpcResponse<Response>, Status> {
        let req = request.into_inner();
        let key = ResourceKey::from_raw(req.resource_key.clone());
        let point = ObservationPoint::new(ObservedWhen::AfterApiServerRecv, req.api_server_hostname.clone());
        info!(handler = "NotifyTestAfterAPIServerRecv", op = %req.operation_type, key = %key);
        self.cache.initialize(&req.api_server_hostname, &point, &key);

        match req.operation_type.as_str() {
            API_ADDED => self.create_and_block(key.clone(), point.clone()).await,
            API_MODIFIED => {
                let prev = Value::from_json_str(&self.cache.read(&req.api_server_hostname, &point, &key))
                    .unwrap_or_default();
                let cur = Value::from_json_str(&req.object).unwrap_or_default();
                self.update_and_block(key.clone(), point.clone(), prev, cur).await;
            }
            API_DELETED => self.delete_and_block(key.clone(), point.clone()).await,
            other => warn!(op = other, "unsupported API server operation type"),
        }

        self.cache.write(&req.api_server_hostname, &point, &key, req.object);
        self.pause_or_return_api_server(&req.api_server_hostname, key.as_str()).await;
        Ok(GrpcResponse::new(Response {
            ok: true,
            message: String::new(),
        }))
    }

    async fn notify_test_before_controller_recv(
        &self,
        request: Request<ControllerRecvRequest>,
    ) -> Result<GrpcResponse<Response>, Status> {
        let req = request.into_inner();
        let key = ResourceKey::from_raw(req.resource_key.clone());
        // The observer is the shared informer, not a specific reconciler;
        // `observedBy` is empty at the `*ControllerRecv` points (spec.md §3).
        let point = ObservationPoint::new(ObservedWhen::BeforeControllerRecv, "");
        info!(handler = "NotifyTestBeforeControllerRecv", op = %req.operation_type, key = %key);

        match req.operation_type.as_str() {
            HEAR_ADDED => self.create_and_block(key, point).await,
            HEAR_DELETED => self.delete_and_block(key, point).await,
            other => warn!(op = other, "unsupported controller-recv operation type"),
        }

        Ok(GrpcResponse::new(Response {
            ok: true,
            message: String::new(),
        }))
    }

    async fn notify_test_after_controller_recv(
        &self,
        request: Request<ControllerRecvRequest>,
    ) -> Result<GrpcResponse<Response>, Status> {
        let req = request.into_inner();
        let key = ResourceKey::from_raw(req.resource_key.clone());
        let point = ObservationPoint::new(ObservedWhen::AfterControllerRecv, "");
        info!(handler = "NotifyTestAfterControllerRecv", op = %req.operation_type, key = %key);

        match req.operation_type.as_str() {
            HEAR_ADDED => self.create_and_block(key, point).await,
            HEAR_DELETED => self.delete_and_block(key, point).await,
            other => warn!(op = other, "unsupported controller-recv operation type"),
        }

        Ok(GrpcResponse::new(Response {
            ok: true,
            message: String::new(),
        }))
    }

    async fn notify_test_after_controller_get(
        &self,
        request: Request<ControllerGetRequest>,
    ) -> Result<GrpcResponse<Response>, Status> {
        let req = request.into_inner();
        let key = ResourceKey::from_raw(req.resource_key.clone());
        let point = ObservationPoint::new(ObservedWhen::AfterControllerWrite, "");
        info!(handler = "NotifyTestAfterControllerGet", key = %key, reconciler = %req.reconciler_type);
        // A read-only cache refresh: no trigger fan-out, no blocking.
        self.cache.initialize(&req.reconciler_type, &point, &key);
        self.cache.write(&req.reconciler_type, &point, &key, req.object);
        Ok(GrpcResponse::new(Response {
            ok: true,
            message: String::new(),
        }))
    }

    async fn notify_test_after_controller_list(
        &self,
        request: Request<ControllerListRequest>,
    ) -> Result<GrpcResponse<Response>, Status> {
        let req = request.into_inner();
        let point = ObservationPoint::new(ObservedWhen::AfterControllerWrite, "");
        info!(handler = "NotifyTestAfterControllerList", resource_type = %req.resource_type, reconciler = %req.reconciler_type);

        let list = Value::from_json_str(&req.object_list).unwrap_or_default();
        if let Value::List(items) = list.get("items") {
            for item in items {
                let (name, namespace) = extract_name_namespace(&item);
                let key = ResourceKey::new(&req.resource_type, &namespace, &name);
                self.cache.initialize(&req.reconciler_type, &point, &key);
                self.cache.write(&req.reconciler_type, &point, &key, item.to_json_string());
            }
        }

        Ok(GrpcResponse::new(Response {
            ok: true,
            message: String::new(),
        }))
    }

    async fn notify_test_after_controller_write(
        &self,
        request: Request<ControllerWriteRequest>,
    ) -> Result<GrpcResponse<Response>, Status> {
        let req = request.into_inner();
        let key = ResourceKey::from_raw(req.resource_key.clone());
        let point = ObservationPoint::new(ObservedWhen::AfterControllerWrite, "");
        info!(handler = "NotifyTestAfterControllerWrite", write_type = %req.write_type, key = %key);
        self.cache.initialize(&req.reconciler_type, &point, &key);
        let prev_raw = self.cache.read(&req.reconciler_type, &point, &key);

        match req.write_type.as_str() {
            WRITE_CREATE => self.create_and_block(key.clone(), point.clone()).await,
            WRITE_UPDATE | WRITE_PATCH | WRITE_STATUS_UPDATE | WRITE_STATUS_PATCH => {
                let prev = Value::from_json_str(&prev_raw).unwrap_or_default();
                let cur = Value::from_json_str(&req.object).unwrap_or_default();
                self.update_and_block(key.clone(), point.clone(), prev, cur).await;
            }
            WRITE_DELETE => self.delete_and_block(key.clone(), point.clone()).await,
            other => warn!(write_type = other, "unsupported controller write type"),
        }

        self.cache.write(&req.reconciler_type, &point, &key, req.object);
        Ok(GrpcResponse::new(Response {
            ok: true,
            message: String::new(),
        }))
    }
}

/// Extracts `(name, namespace)` from a decoded object, matching either a
/// Kubernetes-shaped `metadata.{name,namespace}` object or a flat
/// `{name, namespace}` one.
fn extract_name_namespace(object: &Value) -> (String, String) {
    let metadata = object.get("metadata");
    let (name_holder, ns_holder) = if metadata.is_null() {
        (object.get("name"), object.get("namespace"))
    } else {
        (metadata.get("name"), metadata.get("namespace"))
    };
    let as_string = |v: Value| match v {
        Value::Str(s) => s,
        _ => String::new(),
    };
    (as_string(name_holder), as_string(ns_holder))
}
