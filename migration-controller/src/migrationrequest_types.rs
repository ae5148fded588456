use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One volumeClaimTemplate to shrink and its target capacity.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResizeTarget {
    /// Name of the volumeClaimTemplate on the StatefulSet.
    pub name: String,
    /// Target capacity. Must be strictly smaller than the current request.
    pub new_size: Quantity,
    /// Storage class for the rebuilt claim. Defaults to the original claim's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.migrations.dev",
    version = "v1alpha1",
    kind = "MigrationRequest"
)]
#[kube(namespaced, shortname = "mig", status = "MigrationRequestStatus")]
#[kube(
    printcolumn = r#"{"name":"StatefulSet", "type":"string", "jsonPath":".spec.statefulSetName"}"#
)]
#[kube(printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Replica", "type":"integer", "jsonPath":".status.currentReplica"}"#)]
#[kube(printcolumn = r#"{"name":"Message", "type":"string", "jsonPath":".status.message"}"#)]
#[kube(
    printcolumn = r#"{"name":"Backup", "type":"string", "priority":1, "jsonPath":".status.backupConfigMapName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequestSpec {
    /// Name of the StatefulSet whose claims are migrated.
    pub stateful_set_name: String,
    /// Volumes to shrink, processed in this order for each replica.
    pub volumes: Vec<ResizeTarget>,
}

/// Global migration phase. `Replacing` is a legacy value kept for objects
/// written by older controllers; no new transition produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum MigrationPhase {
    Pending,
    Validating,
    Syncing,
    Replacing,
    Completed,
    Failed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationPhase::Pending => "Pending",
            MigrationPhase::Validating => "Validating",
            MigrationPhase::Syncing => "Syncing",
            MigrationPhase::Replacing => "Replacing",
            MigrationPhase::Completed => "Completed",
            MigrationPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Per-(replica, volume) phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum VolumePhase {
    Pending,
    Syncing,
    Synced,
    Replacing,
    Completed,
    Failed,
}

impl fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumePhase::Pending => "Pending",
            VolumePhase::Syncing => "Syncing",
            VolumePhase::Synced => "Synced",
            VolumePhase::Replacing => "Replacing",
            VolumePhase::Completed => "Completed",
            VolumePhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Migration state of one volume on one replica.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    pub volume_name: String,
    pub replica: i32,
    pub phase: VolumePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_pvc_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_pvc_name: Option<String>,
    /// Original backing PV, retained for operator-driven rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_pv_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequestStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MigrationPhase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<metav1::Condition>,
    /// One entry per (replica, volume) pair, fixed at validation time. The
    /// replica count recorded here, not the live StatefulSet, drives the
    /// cursor afterwards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_statuses: Vec<VolumeStatus>,
    // The cursor fields are always serialized so a merge patch can null them
    // out when the migration completes.
    #[serde(default)]
    pub current_replica: Option<i32>,
    #[serde(default)]
    pub current_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<metav1::Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<metav1::Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_config_map_name: Option<String>,
}
