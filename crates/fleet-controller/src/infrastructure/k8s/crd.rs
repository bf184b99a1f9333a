//! The `GpuJob` custom resource, `gpufleet.io/v1`.

use error_stack::Report;
use error_stack::ResultExt;
use kube::CustomResource;
use kube::CustomResourceExt;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use super::types::KubernetesError;

pub const GROUP: &str = "gpufleet.io";

fn default_gpu_resource() -> String {
    "nvidia.com/gpu".to_string()
}

fn default_gpu_count() -> u64 {
    1
}

/// A unit of work requesting GPUs, executed by an external job runner.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "gpufleet.io",
    version = "v1",
    kind = "GpuJob",
    plural = "gpujobs",
    shortname = "gj",
    namespaced,
    status = "GpuJobStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"GPUs","type":"integer","jsonPath":".spec.gpuCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GpuJobSpec {
    /// Extended resource name of the requested GPU family.
    #[serde(default = "default_gpu_resource")]
    pub gpu_resource: String,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuJobStatus {
    /// One of Pending, Running, Completed, Failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// RFC 3339 time of the last phase change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reconcile_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<GpuJobCondition>,
    /// Written by the job runner once the workload has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<GpuJobCompletion>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuJobCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuJobCompletion {
    /// Succeeded or Failed.
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Render the CustomResourceDefinition manifest.
pub fn crd_yaml() -> Result<String, Report<KubernetesError>> {
    serde_yaml::to_string(&GpuJob::crd()).change_context(KubernetesError::CrdRender)
}
