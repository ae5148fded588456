use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{
    api::{Api, DeleteParams, PostParams, PropagationPolicy},
    Client,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::common::{
    backup_config_map_name, is_already_exists, is_not_found, pod_name, ANNOTATION_MANAGED_BY,
    CONFIG_MAP_KEY_STS_SPEC, LABEL_MIGRATION_NAME, MANAGED_BY_VALUE,
};
use crate::migrationrequest_types::{MigrationRequest, ResizeTarget};
use crate::Error;

/// Delete the StatefulSet while leaving its pods and claims running.
pub async fn delete_sts_orphan(client: Client, namespace: &str, name: &str) -> Result<(), Error> {
    let sts_api = Api::<appsv1::StatefulSet>::namespaced(client, namespace);
    let params = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Orphan),
        ..Default::default()
    };
    info!(statefulset = %name, "Deleting StatefulSet with orphan propagation");
    if let Err(e) = sts_api.delete(name, &params).await {
        if !is_not_found(&e) {
            return Err(Error::DeleteStatefulSet(e));
        }
    }
    Ok(())
}

pub async fn delete_replica_pod(
    client: Client,
    namespace: &str,
    sts_name: &str,
    replica: i32,
) -> Result<(), Error> {
    let name = pod_name(sts_name, replica);
    let pod_api = Api::<corev1::Pod>::namespaced(client, namespace);
    if let Err(e) = pod_api.delete(&name, &DeleteParams::default()).await {
        if !is_not_found(&e) {
            return Err(Error::DeletePod(e));
        }
    }
    Ok(())
}

/// Poll until the pod is gone. Returns false when the deadline passes with
/// the pod still present.
pub async fn wait_for_pod_termination(
    client: Client,
    namespace: &str,
    pod_name: &str,
    timeout: Duration,
) -> Result<bool, Error> {
    let pod_api = Api::<corev1::Pod>::namespaced(client, namespace);
    let deadline = Instant::now() + timeout;
    loop {
        match pod_api.get_opt(pod_name).await.map_err(Error::GetPod)? {
            None => return Ok(true),
            Some(_) if Instant::now() >= deadline => return Ok(false),
            Some(_) => sleep(Duration::from_secs(1)).await,
        }
    }
}

pub fn build_backup_config_map(
    request_name: &str,
    namespace: &str,
    sts_json: String,
) -> corev1::ConfigMap {
    corev1::ConfigMap {
        metadata: metav1::ObjectMeta {
            name: Some(backup_config_map_name(request_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MIGRATION_NAME.to_string(),
                request_name.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_MANAGED_BY.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_MAP_KEY_STS_SPEC.to_string(),
            sts_json,
        )])),
        ..Default::default()
    }
}

/// Serialize the StatefulSet into the backup ConfigMap. Idempotent: an
/// existing backup is never overwritten, so the first replica's snapshot
/// survives later re-entries.
pub async fn backup_sts_to_config_map(
    client: Client,
    mr: &MigrationRequest,
    sts: &appsv1::StatefulSet,
) -> Result<(), Error> {
    let request_name = mr.metadata.name.as_deref().unwrap_or_default();
    let namespace = mr.metadata.namespace.as_deref().unwrap_or_default();
    let cm_name = backup_config_map_name(request_name);

    let cm_api = Api::<corev1::ConfigMap>::namespaced(client, namespace);
    if cm_api
        .get_opt(&cm_name)
        .await
        .map_err(Error::GetConfigMap)?
        .is_some()
    {
        return Ok(());
    }

    let sts_json = serde_json::to_string(sts).map_err(Error::SerializeStatefulSet)?;
    info!(configmap = %cm_name, "Backing up StatefulSet spec");
    cm_api
        .create(
            &PostParams::default(),
            &build_backup_config_map(request_name, namespace, sts_json),
        )
        .await
        .map_err(Error::CreateConfigMap)?;
    Ok(())
}

pub async fn sts_from_backup(
    client: Client,
    namespace: &str,
    request_name: &str,
) -> Result<appsv1::StatefulSet, Error> {
    let cm_name = backup_config_map_name(request_name);
    let cm_api = Api::<corev1::ConfigMap>::namespaced(client, namespace);
    let cm = cm_api
        .get_opt(&cm_name)
        .await
        .map_err(Error::GetConfigMap)?
        .ok_or_else(|| Error::BackupNotFound(cm_name.clone()))?;

    let sts_json = cm
        .data
        .as_ref()
        .and_then(|d| d.get(CONFIG_MAP_KEY_STS_SPEC))
        .ok_or_else(|| Error::BackupKeyMissing(cm_name.clone()))?;
    serde_json::from_str(sts_json).map_err(Error::DeserializeStatefulSet)
}

/// Strip server-assigned identity so the stored object can be created anew.
pub fn sanitize_for_recreate(sts: &appsv1::StatefulSet) -> appsv1::StatefulSet {
    appsv1::StatefulSet {
        metadata: metav1::ObjectMeta {
            name: sts.metadata.name.clone(),
            namespace: sts.metadata.namespace.clone(),
            labels: sts.metadata.labels.clone(),
            annotations: sts.metadata.annotations.clone(),
            ..Default::default()
        },
        spec: sts.spec.clone(),
        status: None,
    }
}

/// Rewrite claim templates matching a resize target to the new capacity and,
/// when set, the override storage class.
pub fn apply_resize_targets(sts: &mut appsv1::StatefulSet, volumes: &[ResizeTarget]) {
    let templates = match sts
        .spec
        .as_mut()
        .and_then(|s| s.volume_claim_templates.as_mut())
    {
        Some(templates) => templates,
        None => return,
    };

    for vct in templates.iter_mut() {
        let Some(target) = volumes
            .iter()
            .find(|v| Some(v.name.as_str()) == vct.metadata.name.as_deref())
        else {
            continue;
        };
        if let Some(spec) = vct.spec.as_mut() {
            spec.resources
                .get_or_insert_with(Default::default)
                .requests
                .get_or_insert_with(Default::default)
                .insert("storage".to_string(), target.new_size.clone());
            if target.storage_class.is_some() {
                spec.storage_class_name = target.storage_class.clone();
            }
        }
    }
}

/// Create the StatefulSet from its sanitized backup. AlreadyExists counts as
/// success so re-entry after a crash is a no-op.
pub async fn recreate_sts(client: Client, sts: &appsv1::StatefulSet) -> Result<(), Error> {
    let namespace = sts.metadata.namespace.as_deref().unwrap_or_default();
    let sts_api = Api::<appsv1::StatefulSet>::namespaced(client, namespace);
    let sanitized = sanitize_for_recreate(sts);
    info!(
        statefulset = sanitized.metadata.name.as_deref().unwrap_or_default(),
        "Recreating StatefulSet from backup"
    );
    match sts_api.create(&PostParams::default(), &sanitized).await {
        Ok(_) => Ok(()),
        Err(e) if is_already_exists(&e) => Ok(()),
        Err(e) => Err(Error::CreateStatefulSet(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn quantity(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn template(name: &str, size: &str) -> corev1::PersistentVolumeClaim {
        corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeClaimSpec {
                resources: Some(corev1::ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        quantity(size),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn sts(name: &str, replicas: i32, templates: Vec<corev1::PersistentVolumeClaim>) -> appsv1::StatefulSet {
        appsv1::StatefulSet {
            metadata: metav1::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "test".to_string())])),
                resource_version: Some("42".to_string()),
                uid: Some("abc-123".to_string()),
                generation: Some(7),
                ..Default::default()
            },
            spec: Some(appsv1::StatefulSetSpec {
                replicas: Some(replicas),
                service_name: format!("{}-headless", name),
                volume_claim_templates: Some(templates),
                ..Default::default()
            }),
            status: Some(Default::default()),
        }
    }

    fn resize(name: &str, new_size: &str, storage_class: Option<&str>) -> ResizeTarget {
        ResizeTarget {
            name: name.to_string(),
            new_size: quantity(new_size),
            storage_class: storage_class.map(str::to_string),
        }
    }

    #[test]
    fn sanitize_strips_server_identity_but_keeps_spec() {
        let original = sts("test-sts", 3, vec![template("data", "1Gi")]);
        let cleaned = sanitize_for_recreate(&original);

        assert_eq!(cleaned.metadata.name, original.metadata.name);
        assert_eq!(cleaned.metadata.labels, original.metadata.labels);
        assert!(cleaned.metadata.resource_version.is_none());
        assert!(cleaned.metadata.uid.is_none());
        assert!(cleaned.metadata.generation.is_none());
        assert!(cleaned.metadata.managed_fields.is_none());
        assert!(cleaned.status.is_none());
        assert_eq!(cleaned.spec, original.spec);
    }

    #[test]
    fn backup_round_trip_preserves_spec() {
        let original = sts("test-sts", 2, vec![template("data", "1Gi")]);
        let json = serde_json::to_string(&original).unwrap();
        let cm = build_backup_config_map("resize-1", "default", json);

        assert_eq!(cm.metadata.name.as_deref(), Some("resize-1-sts-backup"));
        assert_eq!(
            cm.metadata
                .labels
                .as_ref()
                .unwrap()
                .get(LABEL_MIGRATION_NAME)
                .map(String::as_str),
            Some("resize-1")
        );

        let stored = cm.data.unwrap().remove(CONFIG_MAP_KEY_STS_SPEC).unwrap();
        let restored: appsv1::StatefulSet = serde_json::from_str(&stored).unwrap();
        assert_eq!(sanitize_for_recreate(&restored).spec, original.spec);
    }

    #[test]
    fn resize_targets_rewrite_matching_templates_only() {
        let mut workload = sts(
            "test-sts",
            2,
            vec![template("data", "1Gi"), template("logs", "200Mi")],
        );
        apply_resize_targets(&mut workload, &[resize("data", "500Mi", None)]);

        let templates = workload.spec.unwrap().volume_claim_templates.unwrap();
        let request_of = |idx: usize| {
            templates[idx]
                .spec
                .as_ref()
                .unwrap()
                .resources
                .as_ref()
                .unwrap()
                .requests
                .as_ref()
                .unwrap()
                .get("storage")
                .cloned()
                .unwrap()
        };
        assert_eq!(request_of(0), quantity("500Mi"));
        assert_eq!(request_of(1), quantity("200Mi"));
        assert_eq!(templates[1].metadata.name.as_deref(), Some("logs"));
    }

    #[test]
    fn resize_targets_apply_storage_class_override() {
        let mut workload = sts("test-sts", 1, vec![template("data", "1Gi")]);
        apply_resize_targets(&mut workload, &[resize("data", "500Mi", Some("slow"))]);

        let templates = workload.spec.unwrap().volume_claim_templates.unwrap();
        assert_eq!(
            templates[0].spec.as_ref().unwrap().storage_class_name.as_deref(),
            Some("slow")
        );
    }
}
