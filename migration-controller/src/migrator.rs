use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{
    api::{Api, DeleteParams, PostParams},
    Client,
};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::common::{
    is_not_found, migrator_pod_name, ANNOTATION_MANAGED_BY, DEFAULT_MIGRATOR_IMAGE,
    MANAGED_BY_VALUE,
};
use crate::migrationrequest_types::{MigrationRequest, ResizeTarget};
use crate::pvc::migration_labels;
use crate::Error;

const SOURCE_MOUNT_PATH: &str = "/source";
const DEST_MOUNT_PATH: &str = "/dest";

/// Terminal state of the copy pod as observed by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Succeeded,
    Failed,
    /// Not terminal within the deadline; the caller requeues.
    Pending,
}

pub fn migrator_image() -> String {
    env::var("MIGRATOR_IMAGE").unwrap_or_else(|_| DEFAULT_MIGRATOR_IMAGE.to_string())
}

/// Copy pod mounting the original claim read side and the transient claim
/// write side. The worker contract: mirror $SOURCE_PATH into $DEST_PATH
/// preserving ownership and permissions, exit zero iff successful.
pub fn build_migrator_pod(
    mr: &MigrationRequest,
    target: &ResizeTarget,
    replica: i32,
    old_pvc_name: &str,
    new_pvc_name: &str,
    image: &str,
) -> corev1::Pod {
    let request_name = mr.metadata.name.as_deref().unwrap_or_default();
    let name = migrator_pod_name(request_name, &target.name, replica);

    corev1::Pod {
        metadata: metav1::ObjectMeta {
            name: Some(name),
            namespace: mr.metadata.namespace.clone(),
            labels: Some(migration_labels(request_name, &target.name, replica)),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_MANAGED_BY.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(corev1::PodSpec {
            restart_policy: Some("Never".to_string()),
            // Root so files owned by any uid in the source volume stay readable.
            security_context: Some(corev1::PodSecurityContext {
                run_as_user: Some(0),
                run_as_group: Some(0),
                ..Default::default()
            }),
            containers: vec![corev1::Container {
                name: "migrator".to_string(),
                image: Some(image.to_string()),
                image_pull_policy: Some("IfNotPresent".to_string()),
                env: Some(vec![
                    corev1::EnvVar {
                        name: "SOURCE_PATH".to_string(),
                        value: Some(SOURCE_MOUNT_PATH.to_string()),
                        ..Default::default()
                    },
                    corev1::EnvVar {
                        name: "DEST_PATH".to_string(),
                        value: Some(DEST_MOUNT_PATH.to_string()),
                        ..Default::default()
                    },
                ]),
                volume_mounts: Some(vec![
                    corev1::VolumeMount {
                        name: "source".to_string(),
                        mount_path: SOURCE_MOUNT_PATH.to_string(),
                        ..Default::default()
                    },
                    corev1::VolumeMount {
                        name: "dest".to_string(),
                        mount_path: DEST_MOUNT_PATH.to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            volumes: Some(vec![
                corev1::Volume {
                    name: "source".to_string(),
                    persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                        claim_name: old_pvc_name.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                corev1::Volume {
                    name: "dest".to_string(),
                    persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                        claim_name: new_pvc_name.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the copy pod unless it already exists.
pub async fn ensure_migrator_pod(
    client: Client,
    mr: &MigrationRequest,
    target: &ResizeTarget,
    replica: i32,
    old_pvc_name: &str,
    new_pvc_name: &str,
) -> Result<corev1::Pod, Error> {
    let request_name = mr.metadata.name.as_deref().unwrap_or_default();
    let namespace = mr.metadata.namespace.as_deref().unwrap_or_default();
    let name = migrator_pod_name(request_name, &target.name, replica);

    let pod_api = Api::<corev1::Pod>::namespaced(client, namespace);
    if let Some(existing) = pod_api.get_opt(&name).await.map_err(Error::GetPod)? {
        return Ok(existing);
    }

    info!(pod = %name, "Creating migrator pod");
    let pod = build_migrator_pod(
        mr,
        target,
        replica,
        old_pvc_name,
        new_pvc_name,
        &migrator_image(),
    );
    pod_api
        .create(&PostParams::default(), &pod)
        .await
        .map_err(Error::CreatePod)
}

/// Poll the copy pod until it reaches a terminal phase or the deadline
/// passes. A vanished pod also reports Pending; the idempotent create on the
/// next reconciliation brings it back.
pub async fn wait_for_copy(
    client: Client,
    namespace: &str,
    pod_name: &str,
    timeout: Duration,
) -> Result<CopyOutcome, Error> {
    let pod_api = Api::<corev1::Pod>::namespaced(client, namespace);
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        let pod = match pod_api.get_opt(pod_name).await.map_err(Error::GetPod)? {
            Some(pod) => pod,
            None => return Ok(CopyOutcome::Pending),
        };
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Succeeded") => return Ok(CopyOutcome::Succeeded),
            Some("Failed") => return Ok(CopyOutcome::Failed),
            _ => sleep(Duration::from_secs(2)).await,
        }
    }
    Ok(CopyOutcome::Pending)
}

pub async fn cleanup_migrator_pod(
    client: Client,
    namespace: &str,
    pod_name: &str,
) -> Result<(), Error> {
    let pod_api = Api::<corev1::Pod>::namespaced(client, namespace);
    if let Err(e) = pod_api.delete(pod_name, &DeleteParams::default()).await {
        if !is_not_found(&e) {
            return Err(Error::DeletePod(e));
        }
    }
    Ok(())
}
