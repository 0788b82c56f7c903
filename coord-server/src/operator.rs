//! `KubeOperatorControlPlane` (C10): the real `OperatorControlPlane`
//! implementation, backed by a live Kubernetes cluster via `kube`.
//!
//! Grounded on the restart/reconnect flow of the original fault-injection
//! harness: find the controller's pod by its `sievetag` label, resolve its
//! owning workload (a `ReplicaSet`'s owning `Deployment`, or a `StatefulSet`
//! directly), delete and recreate it -- optionally rewriting the
//! `KUBERNETES_SERVICE_HOST` container env var to redirect the controller at
//! a different API server -- then poll until the replacement pod is running.

use std::time::Duration;

use async_trait::async_trait;
use coord_core::action::OperatorControlPlane;
use coord_core::error::OperatorError;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::info;

const LABEL_KEY: &str = "sievetag";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_TIMEOUT: Duration = Duration::from_secs(120);

pub struct KubeOperatorControlPlane {
    client: Client,
}

impl KubeOperatorControlPlane {
    pub fn new(client: Client) -> Self {
        KubeOperatorControlPlane { client }
    }

    async fn find_pod(&self, namespace: &str, controller_label: &str) -> Result<Pod, OperatorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("{LABEL_KEY}={controller_label}"));
        let list = pods
            .list(&lp)
            .await
            .map_err(|e| OperatorError::Request(e.to_string()))?;
        list.items
            .into_iter()
            .next()
            .ok_or_else(|| OperatorError::PodNotFound(controller_label.to_string()))
    }

    async fn wait_for_pod_termination(&self, namespace: &str, controller_label: &str) -> Result<(), OperatorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("{LABEL_KEY}={controller_label}"));
        let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
        loop {
            let list = pods
                .list(&lp)
                .await
                .map_err(|e| OperatorError::Request(e.to_string()))?;
            if list.items.is_empty() {
                info!(controller_label, "operator pod gone");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OperatorError::TimedOut);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_pod_running(&self, namespace: &str, controller_label: &str) -> Result<(), OperatorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("{LABEL_KEY}={controller_label}"));
        let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
        loop {
            let list = pods
                .list(&lp)
                .await
                .map_err(|e| OperatorError::Request(e.to_string()))?;
            let all_running = !list.items.is_empty()
                && list.items.iter().all(|pod| {
                    pod.status
                        .as_ref()
                        .and_then(|s| s.phase.as_deref())
                        .map(|phase| phase == "Running")
                        .unwrap_or(false)
                });
            if all_running {
                info!(controller_label, "operator pod running");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OperatorError::TimedOut);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn rewrite_api_server_env(spec: &mut k8s_openapi::api::core::v1::PodSpec, redirect_to: &str) {
        for container in spec.containers.iter_mut() {
            if let Some(env) = container.env.as_mut() {
                for var in env.iter_mut() {
                    if var.name == "KUBERNETES_SERVICE_HOST" {
                        var.value = Some(redirect_to.to_string());
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl OperatorControlPlane for KubeOperatorControlPlane {
    async fn restart(
        &self,
        namespace: &str,
        controller_label: &str,
        _leading_api_server: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), OperatorError> {
        let pod = self.find_pod(namespace, controller_label).await?;
        let owner = pod
            .metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.first())
            .ok_or(OperatorError::UnsupportedOwnerKind)?
            .clone();

        match owner.kind.as_str() {
            "ReplicaSet" => {
                let replicasets: Api<k8s_openapi::api::apps::v1::ReplicaSet> =
                    Api::namespaced(self.client.clone(), namespace);
                let rs = replicasets
                    .get(&owner.name)
                    .await
                    .map_err(|e| OperatorError::Request(e.to_string()))?;
                let rs_owner = rs
                    .metadata
                    .owner_references
                    .as_ref()
                    .and_then(|refs| refs.first())
                    .ok_or(OperatorError::UnsupportedOwnerKind)?;
                if rs_owner.kind != "Deployment" {
                    return Err(OperatorError::UnsupportedOwnerKind);
                }
                self.restart_deployment(namespace, &rs_owner.name, controller_label, redirect_to)
                    .await
            }
            "StatefulSet" => {
                self.restart_statefulset(namespace, &owner.name, controller_label, redirect_to)
                    .await
            }
            _ => Err(OperatorError::UnsupportedOwnerKind),
        }
    }
}

impl KubeOperatorControlPlane {
    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        controller_label: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), OperatorError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let existing = api.get(name).await.map_err(|e| OperatorError::Request(e.to_string()))?;
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| OperatorError::Request(e.to_string()))?;
        self.wait_for_pod_termination(namespace, controller_label).await?;

        let mut spec = existing.spec.clone();
        if let (Some(redirect), Some(spec)) = (redirect_to, spec.as_mut()) {
            if let Some(pod_spec) = spec.template.spec.as_mut() {
                Self::rewrite_api_server_env(pod_spec, redirect);
            }
        }
        let replacement = Deployment {
            metadata: ObjectMeta {
                name: existing.metadata.name.clone(),
                namespace: existing.metadata.namespace.clone(),
                labels: existing.metadata.labels.clone(),
                ..Default::default()
            },
            spec,
            ..Default::default()
        };
        api.create(&PostParams::default(), &replacement)
            .await
            .map_err(|e| OperatorError::Request(e.to_string()))?;
        self.wait_for_pod_running(namespace, controller_label).await
    }

    async fn restart_statefulset(
        &self,
        namespace: &str,
        name: &str,
        controller_label: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), OperatorError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let existing = api.get(name).await.map_err(|e| OperatorError::Request(e.to_string()))?;
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| OperatorError::Request(e.to_string()))?;
        self.wait_for_pod_termination(namespace, controller_label).await?;

        let mut spec = existing.spec.clone();
        if let (Some(redirect), Some(spec)) = (redirect_to, spec.as_mut()) {
            if let Some(pod_spec) = spec.template.spec.as_mut() {
                Self::rewrite_api_server_env(pod_spec, redirect);
            }
        }
        let replacement = StatefulSet {
            metadata: ObjectMeta {
                name: existing.metadata.name.clone(),
                namespace: existing.metadata.namespace.clone(),
                labels: existing.metadata.labels.clone(),
                ..Default::default()
            },
            spec,
            ..Default::default()
        };
        api.create(&PostParams::default(), &replacement)
            .await
            .map_err(|e| OperatorError::Request(e.to_string()))?;
        self.wait_for_pod_running(namespace, controller_label).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_env_targets_kubernetes_service_host_only() {
        use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec};
        let mut spec = PodSpec {
            containers: vec![Container {
                env: Some(vec![
                    EnvVar {
                        name: "KUBERNETES_SERVICE_HOST".to_string(),
                        value: Some("api-A".to_string()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "OTHER".to_string(),
                        value: Some("unchanged".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        };
        KubeOperatorControlPlane::rewrite_api_server_env(&mut spec, "api-B");
        let env = spec.containers[0].env.as_ref().unwrap();
        assert_eq!(env[0].value.as_deref(), Some("api-B"));
        assert_eq!(env[1].value.as_deref(), Some("unchanged"));
    }
}
