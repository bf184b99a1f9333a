use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use serde_json::json;

use super::convert;
use super::crd;
use crate::domain::error::ClusterError;
use crate::domain::traits::ClusterMutator;
use crate::domain::traits::ClusterObserver;
use crate::domain::types::ClusterObject;
use crate::domain::types::Kind;
use crate::domain::types::ObjectKey;
use crate::domain::types::ObjectRef;
use crate::domain::types::PatchDoc;
use crate::domain::types::PodSnapshot;

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "fleet-controller";

/// Classify a client error by HTTP status.
pub fn map_kube_error(err: kube::Error, key: &ObjectKey) -> Report<ClusterError> {
    let context = match &err {
        kube::Error::Api(response) => match response.code {
            404 => ClusterError::NotFound {
                key: key.to_string(),
            },
            409 => ClusterError::Conflict {
                key: key.to_string(),
            },
            400 | 422 => ClusterError::Permanent {
                message: format!("{key}: {}", response.message),
            },
            _ => ClusterError::transient(format!(
                "{key}: {} ({})",
                response.message, response.code
            )),
        },
        other => ClusterError::transient(format!("{key}: {other}")),
    };
    Report::new(context).attach_printable(err.to_string())
}

/// Observer and mutator backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn jobs(&self, namespace: Option<&str>) -> Api<crd::GpuJob> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn list_key(kind: Kind, namespace: Option<&str>) -> ObjectKey {
    ObjectKey::new(kind, namespace.unwrap_or_default(), "*")
}

#[async_trait]
impl ClusterObserver for KubeCluster {
    #[tracing::instrument(skip_all, fields(key = %key))]
    async fn get(&self, key: &ObjectKey) -> Result<ClusterObject, Report<ClusterError>> {
        let map = |e| map_kube_error(e, key);
        match key.kind {
            Kind::Node => {
                let node = self.nodes().get(&key.name).await.map_err(map)?;
                Ok(convert::cluster_node(&node))
            }
            Kind::Pod => {
                let pod = self
                    .pods(Some(&key.namespace))
                    .get(&key.name)
                    .await
                    .map_err(map)?;
                Ok(convert::cluster_pod(&pod))
            }
            Kind::GpuJob => {
                let job = self
                    .jobs(Some(&key.namespace))
                    .get(&key.name)
                    .await
                    .map_err(map)?;
                Ok(convert::cluster_job(&job))
            }
        }
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
    ) -> Result<Vec<ClusterObject>, Report<ClusterError>> {
        let params = ListParams::default();
        let key = list_key(kind, namespace);
        let map = |e| map_kube_error(e, &key);
        let objects = match kind {
            Kind::Node => self
                .nodes()
                .list(&params)
                .await
                .map_err(map)?
                .items
                .iter()
                .map(convert::cluster_node)
                .collect(),
            Kind::Pod => self
                .pods(namespace)
                .list(&params)
                .await
                .map_err(map)?
                .items
                .iter()
                .map(convert::cluster_pod)
                .collect(),
            Kind::GpuJob => self
                .jobs(namespace)
                .list(&params)
                .await
                .map_err(map)?
                .items
                .iter()
                .map(convert::cluster_job)
                .collect(),
        };
        Ok(objects)
    }

    async fn pods_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<PodSnapshot>, Report<ClusterError>> {
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        let pods = self
            .pods(None)
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, &ObjectKey::node(node_name)))?;
        Ok(pods.items.iter().map(convert::pod_snapshot).collect())
    }
}

#[async_trait]
impl ClusterMutator for KubeCluster {
    #[tracing::instrument(skip_all, fields(key = %object.key()))]
    async fn update(
        &self,
        object: &ClusterObject,
        expected_version: &str,
    ) -> Result<ClusterObject, Report<ClusterError>> {
        let key = object.key();
        let ClusterObject::GpuJob(job) = object else {
            return Err(Report::new(ClusterError::Permanent {
                message: format!("status updates are only supported for GpuJobs, not {key}"),
            }));
        };

        let resource = convert::crd_job(job, expected_version);
        let body = serde_json::to_vec(&resource).change_context(ClusterError::Permanent {
            message: format!("failed to serialize {key}"),
        })?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let updated = self
            .jobs(Some(&job.namespace))
            .replace_status(&job.name, &params, body)
            .await
            .map_err(|e| map_kube_error(e, &key))?;
        Ok(convert::cluster_job(&updated))
    }

    #[tracing::instrument(skip_all, fields(object = %object_ref))]
    async fn patch(
        &self,
        object_ref: &ObjectRef,
        patch: &PatchDoc,
    ) -> Result<(), Report<ClusterError>> {
        let key = object_ref.key();
        match (object_ref.kind, patch) {
            (Kind::Node, PatchDoc::SetTaints(taints)) => {
                let taints: Vec<_> = taints.iter().map(convert::k8s_taint).collect();
                // resourceVersion turns the merge patch into a guarded write
                let body = json!({
                    "metadata": { "resourceVersion": object_ref.version },
                    "spec": { "taints": taints },
                });
                self.nodes()
                    .patch(
                        &object_ref.name,
                        &PatchParams {
                            field_manager: Some(FIELD_MANAGER.to_string()),
                            ..Default::default()
                        },
                        &Patch::Merge(&body),
                    )
                    .await
                    .map_err(|e| map_kube_error(e, &key))?;
                Ok(())
            }
            (kind, patch) => Err(Report::new(ClusterError::Permanent {
                message: format!("cannot apply {patch:?} to a {kind}"),
            })),
        }
    }
}
