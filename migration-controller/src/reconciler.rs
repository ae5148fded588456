use chrono::Utc;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::storage::v1 as storagev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    runtime::controller::Action,
    Client, ResourceExt,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::common::{
    backup_config_map_name, is_not_found, original_pvc_name, pod_name, temp_pvc_name,
    ANNOTATION_STS_BACKUP, ANNOTATION_STS_DELETED, FINALIZER_NAME, LABEL_MIGRATION_NAME,
    MESSAGE_MIGRATION_COMPLETED,
};
use crate::migrationrequest_types::{
    MigrationPhase, MigrationRequest, MigrationRequestStatus, ResizeTarget, VolumePhase,
    VolumeStatus,
};
use crate::migrator::{self, CopyOutcome};
use crate::pvc;
use crate::statefulset;
use crate::validation;
use crate::Error;

const POD_TERMINATION_TIMEOUT: Duration = Duration::from_secs(120);
const COPY_TIMEOUT: Duration = Duration::from_secs(3600);
const SHORT_DELAY: Duration = Duration::from_secs(5);
const COPY_POLL_DELAY: Duration = Duration::from_secs(10);

// Context shared with every reconciliation.
pub struct Data {
    pub client: Client,
}

/// Triggered whenever a MigrationRequest changes; progress within a phase is
/// driven by self-requeue.
pub async fn reconcile(mr: Arc<MigrationRequest>, ctx: Arc<Data>) -> Result<Action, Error> {
    let client = &ctx.client;
    let name = mr
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = mr
        .metadata
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    let api = Api::<MigrationRequest>::namespaced(client.clone(), &namespace);

    // Reconcile against the latest object, not the cached copy.
    let mr = match api
        .get_opt(&name)
        .await
        .map_err(Error::GetMigrationRequest)?
    {
        Some(mr) => mr,
        None => {
            info!(request = %name, "MigrationRequest gone, ending reconcile");
            return Ok(Action::await_change());
        }
    };

    if mr.metadata.deletion_timestamp.is_some() {
        return handle_deletion(client.clone(), &api, mr).await;
    }

    if !mr.finalizers().iter().any(|f| f == FINALIZER_NAME) {
        let mut finalizers = mr.finalizers().to_vec();
        finalizers.push(FINALIZER_NAME.to_string());
        patch_metadata(&api, &name, json!({"metadata": {"finalizers": finalizers}})).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    match mr.status.as_ref().and_then(|s| s.phase) {
        None | Some(MigrationPhase::Pending) => handle_pending(&api, mr).await,
        Some(MigrationPhase::Validating) => handle_validating(client.clone(), &api, mr).await,
        Some(MigrationPhase::Syncing) => handle_syncing(client.clone(), &api, mr).await,
        Some(MigrationPhase::Replacing) => handle_replacing(&api, mr).await,
        Some(MigrationPhase::Completed) | Some(MigrationPhase::Failed) => {
            Ok(Action::await_change())
        }
    }
}

pub fn error_policy(_mr: Arc<MigrationRequest>, error: &Error, _ctx: Arc<Data>) -> Action {
    warn!(error = %error, "Reconcile failed");
    Action::requeue(Duration::from_secs(10))
}

async fn persist_status(
    api: &Api<MigrationRequest>,
    name: &str,
    status: &MigrationRequestStatus,
) -> Result<MigrationRequest, Error> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(&json!({ "status": status })),
    )
    .await
    .map_err(Error::UpdateStatus)
}

async fn patch_metadata(
    api: &Api<MigrationRequest>,
    name: &str,
    patch: serde_json::Value,
) -> Result<MigrationRequest, Error> {
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(Error::UpdateMigrationRequest)
}

/// Latch the migration Failed. Terminal: no further requeue.
async fn set_failed(
    api: &Api<MigrationRequest>,
    name: &str,
    status: &mut MigrationRequestStatus,
    message: String,
) -> Result<Action, Error> {
    error!(request = %name, %message, "Migration failed");
    status.phase = Some(MigrationPhase::Failed);
    status.message = Some(message);
    persist_status(api, name, status).await?;
    Ok(Action::await_change())
}

fn update_volume_status(
    status: &mut MigrationRequestStatus,
    volume_name: &str,
    replica: i32,
    phase: VolumePhase,
    message: &str,
) {
    if let Some(vs) = status
        .volume_statuses
        .iter_mut()
        .find(|vs| vs.volume_name == volume_name && vs.replica == replica)
    {
        vs.phase = phase;
        vs.message = Some(message.to_string());
    }
}

/// Next (replica, volume) pair in cursor order: remaining volumes of the
/// current replica first, then the next replica from the first volume. The
/// replica bound comes from the statuses recorded at validation time.
fn next_pair(
    volumes: &[ResizeTarget],
    statuses: &[VolumeStatus],
    replica: i32,
    volume: &str,
) -> Option<(i32, String)> {
    let vol_idx = volumes.iter().position(|v| v.name == volume).unwrap_or(0);
    if vol_idx + 1 < volumes.len() {
        return Some((replica, volumes[vol_idx + 1].name.clone()));
    }

    let max_replica = statuses.iter().map(|vs| vs.replica).max().unwrap_or(0);
    if replica < max_replica {
        return Some((replica + 1, volumes[0].name.clone()));
    }
    None
}

fn advance_cursor(
    status: &mut MigrationRequestStatus,
    volumes: &[ResizeTarget],
    replica: i32,
    volume: &str,
) {
    match next_pair(volumes, &status.volume_statuses, replica, volume) {
        Some((next_replica, next_volume)) => {
            status.message = Some(format!(
                "Migrating replica {} volume {}",
                next_replica, next_volume
            ));
            status.current_replica = Some(next_replica);
            status.current_volume = Some(next_volume);
        }
        None => {
            status.phase = Some(MigrationPhase::Completed);
            status.completion_time = Some(metav1::Time(Utc::now()));
            status.message = Some(MESSAGE_MIGRATION_COMPLETED.to_string());
            status.current_replica = None;
            status.current_volume = None;
            info!("{}", MESSAGE_MIGRATION_COMPLETED);
        }
    }
}

/// Initialize the migration and move on to validation.
async fn handle_pending(api: &Api<MigrationRequest>, mr: MigrationRequest) -> Result<Action, Error> {
    let name = mr.name_any();
    let mut status = mr.status.clone().unwrap_or_default();
    status.start_time = Some(metav1::Time(Utc::now()));
    status.volume_statuses = Vec::new();
    status.phase = Some(MigrationPhase::Validating);
    status.message = Some("Starting validation".to_string());
    persist_status(api, &name, &status).await?;
    Ok(Action::requeue(Duration::ZERO))
}

/// Run the admission checks, then seed the per-pair statuses and the cursor.
async fn handle_validating(
    client: Client,
    api: &Api<MigrationRequest>,
    mr: MigrationRequest,
) -> Result<Action, Error> {
    let name = mr.name_any();
    let namespace = mr.namespace().unwrap_or_default();
    let mut status = mr.status.clone().unwrap_or_default();

    if mr.spec.volumes.is_empty() {
        return set_failed(api, &name, &mut status, "no volumes specified".to_string()).await;
    }

    let sts = match validation::validate_stateful_set_exists(
        client.clone(),
        &namespace,
        &mr.spec.stateful_set_name,
    )
    .await
    {
        Ok(sts) => sts,
        Err(message) => return set_failed(api, &name, &mut status, message).await,
    };

    if let Err(message) = validation::validate_volume_targets(&sts, &mr.spec.volumes) {
        return set_failed(api, &name, &mut status, message).await;
    }

    for target in &mr.spec.volumes {
        if let Err(message) = validation::validate_size_reduction(
            client.clone(),
            &namespace,
            &mr.spec.stateful_set_name,
            target,
        )
        .await
        {
            return set_failed(api, &name, &mut status, message).await;
        }
    }

    if let Err(message) = validation::validate_pdb_allows_disruption(client.clone(), &sts).await {
        return set_failed(api, &name, &mut status, message).await;
    }

    info!(request = %name, "Validation passed, starting sync phase");

    // The replica count is frozen here; the recorded statuses drive the
    // cursor from now on even while the live StatefulSet comes and goes.
    let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    status.volume_statuses = (0..replicas)
        .flat_map(|replica| {
            mr.spec.volumes.iter().map(move |vol| VolumeStatus {
                volume_name: vol.name.clone(),
                replica,
                phase: VolumePhase::Pending,
                old_pvc_name: None,
                new_pvc_name: None,
                old_pv_name: None,
                message: None,
            })
        })
        .collect();

    status.phase = Some(MigrationPhase::Syncing);
    status.current_replica = Some(0);
    status.current_volume = Some(mr.spec.volumes[0].name.clone());
    status.message = Some("Validation complete, starting sync".to_string());
    persist_status(api, &name, &status).await?;
    Ok(Action::requeue(Duration::ZERO))
}

/// Drive the current (replica, volume) pair through copy and swap. Every
/// step is idempotent by name, so re-entry after a crash resumes where the
/// persisted status says.
async fn handle_syncing(
    client: Client,
    api: &Api<MigrationRequest>,
    mr: MigrationRequest,
) -> Result<Action, Error> {
    let name = mr.name_any();
    let namespace = mr.namespace().unwrap_or_default();
    let mut status = mr.status.clone().unwrap_or_default();

    let (replica, vol_name) = match (status.current_replica, status.current_volume.clone()) {
        (Some(replica), Some(volume)) => (replica, volume),
        _ => return Err(Error::CursorMissing),
    };

    // Fast path: pair already swapped before a restart.
    let pair_completed = status
        .volume_statuses
        .iter()
        .any(|vs| {
            vs.volume_name == vol_name && vs.replica == replica && vs.phase == VolumePhase::Completed
        });
    if pair_completed {
        info!(replica, volume = %vol_name, "Volume already completed, advancing to next");
        advance_cursor(&mut status, &mr.spec.volumes, replica, &vol_name);
        persist_status(api, &name, &status).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    let target = match mr.spec.volumes.iter().find(|v| v.name == vol_name) {
        Some(target) => target.clone(),
        None => {
            let message = format!("current volume {} is not a resize target", vol_name);
            return set_failed(api, &name, &mut status, message).await;
        }
    };

    info!(replica, volume = %vol_name, "Processing volume");

    let original_name = original_pvc_name(&vol_name, &mr.spec.stateful_set_name, replica);
    let original_pvc = match pvc::get_pvc(client.clone(), &namespace, &original_name).await? {
        Some(pvc) => pvc,
        None => {
            let message = format!("failed to get original PVC: {} not found", original_name);
            return set_failed(api, &name, &mut status, message).await;
        }
    };

    let temp_name = temp_pvc_name(&vol_name, &mr.spec.stateful_set_name, replica);
    let temp_pvc =
        match pvc::ensure_temp_pvc(client.clone(), &mr, &target, &original_pvc, replica).await {
            Ok(pvc) => pvc,
            Err(e) => {
                let message = format!("failed to create temp PVC: {}", e);
                return set_failed(api, &name, &mut status, message).await;
            }
        };

    // Immediate-binding classes must bind before the copy pod is built;
    // WaitForFirstConsumer classes bind when the copy pod is scheduled.
    let mut wait_for_binding = true;
    if let Some(sc_name) = temp_pvc
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.as_deref())
        .filter(|sc| !sc.is_empty())
    {
        let sc_api = Api::<storagev1::StorageClass>::all(client.clone());
        if let Ok(Some(sc)) = sc_api.get_opt(sc_name).await {
            if sc.volume_binding_mode.as_deref() == Some("WaitForFirstConsumer") {
                wait_for_binding = false;
            }
        }
    }
    let bound = temp_pvc.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Bound");
    if wait_for_binding && !bound {
        info!(pvc = %temp_name, "Waiting for temp PVC to be bound");
        return Ok(Action::requeue(SHORT_DELAY));
    }

    // Retain on the old PV protects the source data for the rest of the
    // sequence and for rollback.
    let old_pv_name = match original_pvc
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.clone())
        .filter(|pv| !pv.is_empty())
    {
        Some(pv) => pv,
        None => {
            let message = format!("original PVC {} is not bound to a PV", original_name);
            return set_failed(api, &name, &mut status, message).await;
        }
    };
    if let Err(e) = pvc::set_retain_on_pv(client.clone(), &old_pv_name).await {
        let message = format!("failed to set retain on PV: {}", e);
        return set_failed(api, &name, &mut status, message).await;
    }

    update_volume_status(
        &mut status,
        &vol_name,
        replica,
        VolumePhase::Syncing,
        "Preparing migration",
    );
    if let Some(vs) = status
        .volume_statuses
        .iter_mut()
        .find(|vs| vs.volume_name == vol_name && vs.replica == replica)
    {
        vs.old_pvc_name = Some(original_name.clone());
        vs.new_pvc_name = Some(temp_name.clone());
        vs.old_pv_name = Some(old_pv_name.clone());
    }

    // Backup, then orphan-delete the StatefulSet; pods and claims stay up.
    // The annotation survives restarts so this happens once per replica round.
    let mut mr = mr;
    let sts_deleted = mr
        .annotations()
        .get(ANNOTATION_STS_DELETED)
        .map(String::as_str)
        == Some("true");
    if !sts_deleted {
        let sts_api = Api::<appsv1::StatefulSet>::namespaced(client.clone(), &namespace);
        if let Some(sts) = sts_api
            .get_opt(&mr.spec.stateful_set_name)
            .await
            .map_err(Error::GetStatefulSet)?
        {
            // Backup must land before the delete: losing the spec here would
            // strand the workload.
            if let Err(e) = statefulset::backup_sts_to_config_map(client.clone(), &mr, &sts).await {
                let message = format!("failed to backup StatefulSet to ConfigMap: {}", e);
                return set_failed(api, &name, &mut status, message).await;
            }
            let backup_name = backup_config_map_name(&name);
            info!(configmap = %backup_name, "StatefulSet spec backed up to ConfigMap");

            if let Err(e) =
                statefulset::delete_sts_orphan(client.clone(), &namespace, &mr.spec.stateful_set_name)
                    .await
            {
                let message = format!("failed to delete StatefulSet: {}", e);
                return set_failed(api, &name, &mut status, message).await;
            }

            mr = patch_metadata(
                api,
                &name,
                json!({"metadata": {"annotations": {
                    ANNOTATION_STS_DELETED: "true",
                    ANNOTATION_STS_BACKUP: backup_name,
                }}}),
            )
            .await?;

            status.backup_config_map_name = Some(backup_name);
            persist_status(api, &name, &status).await?;
        }
    }

    // Evict the replica pod so both claims are unmounted for the copy.
    let replica_pod = pod_name(&mr.spec.stateful_set_name, replica);
    if let Err(e) =
        statefulset::delete_replica_pod(client.clone(), &namespace, &mr.spec.stateful_set_name, replica)
            .await
    {
        warn!(pod = %replica_pod, error = %e, "Failed to delete pod");
    }
    if !statefulset::wait_for_pod_termination(
        client.clone(),
        &namespace,
        &replica_pod,
        POD_TERMINATION_TIMEOUT,
    )
    .await?
    {
        info!(pod = %replica_pod, "Waiting for pod termination");
        return Ok(Action::requeue(SHORT_DELAY));
    }

    let migrator_pod = match migrator::ensure_migrator_pod(
        client.clone(),
        &mr,
        &target,
        replica,
        &original_name,
        &temp_name,
    )
    .await
    {
        Ok(pod) => pod,
        Err(e) => {
            let message = format!("failed to create migrator pod: {}", e);
            return set_failed(api, &name, &mut status, message).await;
        }
    };
    let migrator_name = migrator_pod.name_any();

    match migrator::wait_for_copy(client.clone(), &namespace, &migrator_name, COPY_TIMEOUT).await? {
        CopyOutcome::Succeeded => {}
        CopyOutcome::Failed => {
            return set_failed(api, &name, &mut status, "migration pod failed".to_string()).await;
        }
        CopyOutcome::Pending => {
            info!(pod = %migrator_name, "Migration in progress");
            return Ok(Action::requeue(COPY_POLL_DELAY));
        }
    }

    if let Err(e) = migrator::cleanup_migrator_pod(client.clone(), &namespace, &migrator_name).await
    {
        warn!(pod = %migrator_name, error = %e, "Failed to cleanup migrator pod");
    }

    update_volume_status(
        &mut status,
        &vol_name,
        replica,
        VolumePhase::Synced,
        "Migration complete",
    );

    // Swap immediately for this replica; the others keep running on their
    // old claims until their turn.
    info!(replica, volume = %vol_name, "Replacing PVC for replica");
    if let Err(e) = pvc::replace_pvc(client.clone(), &mr, &target, replica).await {
        let message = format!("failed to replace PVC: {}", e);
        return set_failed(api, &name, &mut status, message).await;
    }
    update_volume_status(
        &mut status,
        &vol_name,
        replica,
        VolumePhase::Completed,
        "PVC replaced",
    );

    // Persist before recreating the StatefulSet so a crash here cannot
    // re-drive the swapped pair.
    persist_status(api, &name, &status).await?;

    let mut restored = match statefulset::sts_from_backup(client.clone(), &namespace, &name).await {
        Ok(sts) => sts,
        Err(e) => {
            let message = format!("failed to get StatefulSet from backup: {}", e);
            return set_failed(api, &name, &mut status, message).await;
        }
    };
    statefulset::apply_resize_targets(&mut restored, &mr.spec.volumes);
    if let Err(e) = statefulset::recreate_sts(client.clone(), &restored).await {
        let message = format!("failed to recreate StatefulSet: {}", e);
        return set_failed(api, &name, &mut status, message).await;
    }
    info!(replica, "StatefulSet recreated, waiting for pod to come back");

    // Clear the annotation so the next replica round deletes and backs up
    // the StatefulSet again.
    patch_metadata(
        api,
        &name,
        json!({"metadata": {"annotations": {ANNOTATION_STS_DELETED: null}}}),
    )
    .await?;

    let pod_api = Api::<corev1::Pod>::namespaced(client.clone(), &namespace);
    match pod_api
        .get_opt(&replica_pod)
        .await
        .map_err(Error::GetPod)?
    {
        None => {
            info!(pod = %replica_pod, "Waiting for pod to be recreated");
            return Ok(Action::requeue(SHORT_DELAY));
        }
        Some(pod) => {
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_default();
            if phase != "Running" {
                info!(pod = %replica_pod, %phase, "Waiting for pod to be running");
                return Ok(Action::requeue(SHORT_DELAY));
            }
        }
    }
    info!(replica, "Replica migration complete, pod is back online");

    advance_cursor(&mut status, &mr.spec.volumes, replica, &vol_name);
    persist_status(api, &name, &status).await?;
    Ok(Action::requeue(Duration::ZERO))
}

/// Legacy phase written by older controllers; short-circuit to Completed.
async fn handle_replacing(
    api: &Api<MigrationRequest>,
    mr: MigrationRequest,
) -> Result<Action, Error> {
    let name = mr.name_any();
    info!(request = %name, "Legacy Replacing phase observed, marking complete");
    let mut status = mr.status.clone().unwrap_or_default();
    status.phase = Some(MigrationPhase::Completed);
    status.completion_time = Some(metav1::Time(Utc::now()));
    status.message = Some(MESSAGE_MIGRATION_COMPLETED.to_string());
    persist_status(api, &name, &status).await?;
    Ok(Action::await_change())
}

/// Release owned side resources, then drop the finalizer. Only not-found is
/// silent; other cleanup errors are logged and do not block deletion.
async fn handle_deletion(
    client: Client,
    api: &Api<MigrationRequest>,
    mr: MigrationRequest,
) -> Result<Action, Error> {
    let name = mr.name_any();
    let namespace = mr.namespace().unwrap_or_default();
    info!(request = %name, "Handling deletion");

    let selector = format!("{}={}", LABEL_MIGRATION_NAME, name);
    let lp = ListParams::default().labels(&selector);

    let pvc_api = Api::<corev1::PersistentVolumeClaim>::namespaced(client.clone(), &namespace);
    match pvc_api.list(&lp).await {
        Ok(pvcs) => {
            for pvc in pvcs.items {
                let pvc_name = pvc.name_any();
                if let Err(e) = pvc_api.delete(&pvc_name, &DeleteParams::default()).await {
                    if !is_not_found(&e) {
                        warn!(pvc = %pvc_name, error = %e, "Failed to delete temp PVC");
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "Failed to list temp PVCs"),
    }

    let pod_api = Api::<corev1::Pod>::namespaced(client.clone(), &namespace);
    match pod_api.list(&lp).await {
        Ok(pods) => {
            for pod in pods.items {
                let pod_name = pod.name_any();
                if let Err(e) = pod_api.delete(&pod_name, &DeleteParams::default()).await {
                    if !is_not_found(&e) {
                        warn!(pod = %pod_name, error = %e, "Failed to delete migrator pod");
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "Failed to list migrator pods"),
    }

    // The backup ConfigMap stays behind; it carries the migration-name label
    // for external lifecycle management.
    let finalizers: Vec<String> = mr
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER_NAME)
        .cloned()
        .collect();
    patch_metadata(api, &name, json!({"metadata": {"finalizers": finalizers}})).await?;
    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn targets(names: &[&str]) -> Vec<ResizeTarget> {
        names
            .iter()
            .map(|n| ResizeTarget {
                name: n.to_string(),
                new_size: Quantity("500Mi".to_string()),
                storage_class: None,
            })
            .collect()
    }

    fn statuses(volumes: &[&str], replicas: i32) -> Vec<VolumeStatus> {
        (0..replicas)
            .flat_map(|replica| {
                volumes.iter().map(move |v| VolumeStatus {
                    volume_name: v.to_string(),
                    replica,
                    phase: VolumePhase::Pending,
                    old_pvc_name: None,
                    new_pvc_name: None,
                    old_pv_name: None,
                    message: None,
                })
            })
            .collect()
    }

    #[test]
    fn cursor_walks_volumes_before_replicas() {
        let vols = targets(&["data", "logs"]);
        let stats = statuses(&["data", "logs"], 2);

        assert_eq!(
            next_pair(&vols, &stats, 0, "data"),
            Some((0, "logs".to_string()))
        );
        assert_eq!(
            next_pair(&vols, &stats, 0, "logs"),
            Some((1, "data".to_string()))
        );
        assert_eq!(
            next_pair(&vols, &stats, 1, "data"),
            Some((1, "logs".to_string()))
        );
        assert_eq!(next_pair(&vols, &stats, 1, "logs"), None);
    }

    #[test]
    fn cursor_covers_every_replica_in_order() {
        let vols = targets(&["data"]);
        let stats = statuses(&["data"], 3);

        let mut pairs = vec![(0, "data".to_string())];
        loop {
            let (replica, volume) = pairs.last().unwrap().clone();
            match next_pair(&vols, &stats, replica, &volume) {
                Some(next) => pairs.push(next),
                None => break,
            }
        }
        assert_eq!(
            pairs,
            vec![
                (0, "data".to_string()),
                (1, "data".to_string()),
                (2, "data".to_string()),
            ]
        );
    }

    #[test]
    fn single_pair_cursor_finishes_immediately() {
        let vols = targets(&["data"]);
        let stats = statuses(&["data"], 1);
        assert_eq!(next_pair(&vols, &stats, 0, "data"), None);
    }

    #[test]
    fn advance_cursor_moves_to_next_pair() {
        let vols = targets(&["data"]);
        let mut status = MigrationRequestStatus {
            phase: Some(MigrationPhase::Syncing),
            volume_statuses: statuses(&["data"], 2),
            current_replica: Some(0),
            current_volume: Some("data".to_string()),
            ..Default::default()
        };

        advance_cursor(&mut status, &vols, 0, "data");
        assert_eq!(status.phase, Some(MigrationPhase::Syncing));
        assert_eq!(status.current_replica, Some(1));
        assert_eq!(status.current_volume.as_deref(), Some("data"));
        assert!(status.message.as_deref().unwrap().contains("replica 1"));
    }

    #[test]
    fn advance_cursor_completes_after_last_pair() {
        let vols = targets(&["data"]);
        let mut status = MigrationRequestStatus {
            phase: Some(MigrationPhase::Syncing),
            volume_statuses: statuses(&["data"], 2),
            current_replica: Some(1),
            current_volume: Some("data".to_string()),
            ..Default::default()
        };

        advance_cursor(&mut status, &vols, 1, "data");
        assert_eq!(status.phase, Some(MigrationPhase::Completed));
        assert!(status.completion_time.is_some());
        assert_eq!(status.current_replica, None);
        assert_eq!(status.current_volume, None);
        assert_eq!(status.message.as_deref(), Some(MESSAGE_MIGRATION_COMPLETED));
    }

    #[test]
    fn volume_status_update_targets_one_pair() {
        let mut status = MigrationRequestStatus {
            volume_statuses: statuses(&["data"], 2),
            ..Default::default()
        };

        update_volume_status(&mut status, "data", 1, VolumePhase::Synced, "Migration complete");

        assert_eq!(status.volume_statuses[0].phase, VolumePhase::Pending);
        assert_eq!(status.volume_statuses[1].phase, VolumePhase::Synced);
        assert_eq!(
            status.volume_statuses[1].message.as_deref(),
            Some("Migration complete")
        );
    }
}
