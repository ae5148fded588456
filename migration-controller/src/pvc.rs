use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{
    api::{Api, DeleteParams, PostParams},
    Client,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::common::{
    is_not_found, original_pvc_name, temp_pvc_name, ANNOTATION_MANAGED_BY, LABEL_MIGRATION_NAME,
    LABEL_REPLICA, LABEL_VOLUME_NAME, MANAGED_BY_VALUE,
};
use crate::migrationrequest_types::{MigrationRequest, ResizeTarget};
use crate::Error;

const RECLAIM_POLICY_RETAIN: &str = "Retain";
const PVC_DELETION_POLL: Duration = Duration::from_secs(60);

pub async fn get_pvc(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<Option<corev1::PersistentVolumeClaim>, Error> {
    let pvc_api = Api::<corev1::PersistentVolumeClaim>::namespaced(client, namespace);
    pvc_api.get_opt(name).await.map_err(Error::GetPvc)
}

/// Labels identifying an object owned by one migration. The migration-name
/// label is the finalizer's cleanup selector.
pub fn migration_labels(
    request_name: &str,
    volume_name: &str,
    replica: i32,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MIGRATION_NAME.to_string(), request_name.to_string()),
        (LABEL_REPLICA.to_string(), replica.to_string()),
        (LABEL_VOLUME_NAME.to_string(), volume_name.to_string()),
    ])
}

/// Transient claim receiving the copied data: new size, access modes copied
/// from the original, storage class overridden when the target says so.
pub fn build_temp_pvc(
    mr: &MigrationRequest,
    target: &ResizeTarget,
    original: &corev1::PersistentVolumeClaim,
    replica: i32,
) -> corev1::PersistentVolumeClaim {
    let request_name = mr.metadata.name.as_deref().unwrap_or_default();
    let name = temp_pvc_name(&target.name, &mr.spec.stateful_set_name, replica);
    let original_spec = original.spec.clone().unwrap_or_default();
    let storage_class_name = target
        .storage_class
        .clone()
        .or(original_spec.storage_class_name);

    corev1::PersistentVolumeClaim {
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
        spec: Some(corev1::PersistentVolumeClaimSpec {
            access_modes: original_spec.access_modes,
            storage_class_name,
            resources: Some(corev1::ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    target.new_size.clone(),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the transient claim unless it already exists.
pub async fn ensure_temp_pvc(
    client: Client,
    mr: &MigrationRequest,
    target: &ResizeTarget,
    original: &corev1::PersistentVolumeClaim,
    replica: i32,
) -> Result<corev1::PersistentVolumeClaim, Error> {
    let namespace = mr.metadata.namespace.as_deref().unwrap_or_default();
    let name = temp_pvc_name(&target.name, &mr.spec.stateful_set_name, replica);

    if let Some(existing) = get_pvc(client.clone(), namespace, &name).await? {
        return Ok(existing);
    }

    info!(pvc = %name, "Creating transient PVC");
    let pvc_api = Api::<corev1::PersistentVolumeClaim>::namespaced(client, namespace);
    pvc_api
        .create(
            &PostParams::default(),
            &build_temp_pvc(mr, target, original, replica),
        )
        .await
        .map_err(Error::CreatePvc)
}

/// Flip the PV's reclaim policy to Retain. No-op when already Retain.
pub async fn set_retain_on_pv(client: Client, pv_name: &str) -> Result<(), Error> {
    let pv_api = Api::<corev1::PersistentVolume>::all(client);
    let mut pv = pv_api
        .get_opt(pv_name)
        .await
        .map_err(Error::GetPersistentVolume)?
        .ok_or_else(|| Error::PersistentVolumeNotFound(pv_name.to_string()))?;

    let spec = pv.spec.get_or_insert_with(Default::default);
    if spec.persistent_volume_reclaim_policy.as_deref() == Some(RECLAIM_POLICY_RETAIN) {
        return Ok(());
    }
    spec.persistent_volume_reclaim_policy = Some(RECLAIM_POLICY_RETAIN.to_string());

    info!(pv = %pv_name, "Setting reclaim policy to Retain");
    pv_api
        .replace(pv_name, &PostParams::default(), &pv)
        .await
        .map_err(Error::UpdatePersistentVolume)?;
    Ok(())
}

/// Claim replacing the original: same name, pre-bound to the new PV, modes
/// and class from the transient claim, labels from the original claim.
pub fn build_replacement_pvc(
    namespace: &str,
    original_name: &str,
    new_pv_name: &str,
    temp_pvc: &corev1::PersistentVolumeClaim,
    original_labels: Option<BTreeMap<String, String>>,
    target: &ResizeTarget,
) -> corev1::PersistentVolumeClaim {
    let temp_spec = temp_pvc.spec.clone().unwrap_or_default();
    corev1::PersistentVolumeClaim {
        metadata: metav1::ObjectMeta {
            name: Some(original_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: original_labels,
            ..Default::default()
        },
        spec: Some(corev1::PersistentVolumeClaimSpec {
            access_modes: temp_spec.access_modes,
            storage_class_name: temp_spec.storage_class_name,
            volume_name: Some(new_pv_name.to_string()),
            resources: Some(corev1::ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    target.new_size.clone(),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn delete_pvc_and_wait(
    pvc_api: &Api<corev1::PersistentVolumeClaim>,
    name: &str,
) -> Result<(), Error> {
    if let Err(e) = pvc_api.delete(name, &DeleteParams::default()).await {
        if !is_not_found(&e) {
            return Err(Error::DeletePvc(e));
        }
    }

    let deadline = Instant::now() + PVC_DELETION_POLL;
    while Instant::now() < deadline {
        match pvc_api.get_opt(name).await.map_err(Error::GetPvc)? {
            None => return Ok(()),
            Some(_) => sleep(Duration::from_secs(1)).await,
        }
    }
    Ok(())
}

/// Swap the transient claim into the canonical name.
///
/// Step order is load-bearing: the new PV must be Retain before the transient
/// claim is deleted, and its claimRef must be cleared before the replacement
/// claim can bind. The old PV is left Released with Retain policy.
pub async fn replace_pvc(
    client: Client,
    mr: &MigrationRequest,
    target: &ResizeTarget,
    replica: i32,
) -> Result<(), Error> {
    let namespace = mr.metadata.namespace.as_deref().unwrap_or_default();
    let original_name = original_pvc_name(&target.name, &mr.spec.stateful_set_name, replica);
    let temp_name = temp_pvc_name(&target.name, &mr.spec.stateful_set_name, replica);

    let pvc_api = Api::<corev1::PersistentVolumeClaim>::namespaced(client.clone(), namespace);
    let pv_api = Api::<corev1::PersistentVolume>::all(client.clone());

    let temp_pvc = pvc_api
        .get_opt(&temp_name)
        .await
        .map_err(Error::GetPvc)?
        .ok_or_else(|| Error::PvcNotFound(temp_name.clone()))?;
    let new_pv_name = temp_pvc
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.clone())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::PvcNotBound(temp_name.clone()))?;

    let original_pvc = pvc_api
        .get_opt(&original_name)
        .await
        .map_err(Error::GetPvc)?
        .ok_or_else(|| Error::PvcNotFound(original_name.clone()))?;
    let original_labels = original_pvc.metadata.labels.clone();

    // Retain must be set before the transient claim goes away, otherwise the
    // platform garbage-collects the PV together with the claim.
    set_retain_on_pv(client, &new_pv_name).await?;

    info!(pvc = %temp_name, "Deleting transient PVC");
    delete_pvc_and_wait(&pvc_api, &temp_name).await?;

    // The PV still points at the deleted claim; clear the reference so the
    // pre-bind check on the replacement claim can match.
    let mut new_pv = pv_api
        .get_opt(&new_pv_name)
        .await
        .map_err(Error::GetPersistentVolume)?
        .ok_or_else(|| Error::PersistentVolumeNotFound(new_pv_name.clone()))?;
    if let Some(spec) = new_pv.spec.as_mut() {
        spec.claim_ref = None;
    }
    pv_api
        .replace(&new_pv_name, &PostParams::default(), &new_pv)
        .await
        .map_err(Error::UpdatePersistentVolume)?;

    info!(pvc = %original_name, "Deleting original PVC");
    delete_pvc_and_wait(&pvc_api, &original_name).await?;

    let replacement = build_replacement_pvc(
        namespace,
        &original_name,
        &new_pv_name,
        &temp_pvc,
        original_labels,
        target,
    );
    info!(pvc = %original_name, pv = %new_pv_name, "Creating replacement PVC");
    pvc_api
        .create(&PostParams::default(), &replacement)
        .await
        .map_err(Error::CreatePvc)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use crate::migrationrequest_types::MigrationRequestSpec;

    fn request(name: &str, sts: &str) -> MigrationRequest {
        let mut mr = MigrationRequest::new(
            name,
            MigrationRequestSpec {
                stateful_set_name: sts.to_string(),
                volumes: vec![],
            },
        );
        mr.metadata.namespace = Some("default".to_string());
        mr
    }

    fn target(name: &str, new_size: &str, storage_class: Option<&str>) -> ResizeTarget {
        ResizeTarget {
            name: name.to_string(),
            new_size: Quantity(new_size.to_string()),
            storage_class: storage_class.map(str::to_string),
        }
    }

    fn original(storage_class: Option<&str>) -> corev1::PersistentVolumeClaim {
        corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some("data-test-sts-0".to_string()),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "test".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: storage_class.map(str::to_string),
                volume_name: Some("pv-original".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn temp_pvc_copies_modes_and_requests_new_size() {
        let mr = request("resize-1", "test-sts");
        let pvc = build_temp_pvc(&mr, &target("data", "500Mi", None), &original(Some("fast")), 0);

        assert_eq!(pvc.metadata.name.as_deref(), Some("data-test-sts-0-new"));
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("500Mi".to_string())));
    }

    #[test]
    fn temp_pvc_storage_class_override_wins() {
        let mr = request("resize-1", "test-sts");
        let pvc = build_temp_pvc(
            &mr,
            &target("data", "500Mi", Some("slow")),
            &original(Some("fast")),
            1,
        );
        assert_eq!(
            pvc.spec.unwrap().storage_class_name.as_deref(),
            Some("slow")
        );
    }

    #[test]
    fn temp_pvc_carries_migration_labels() {
        let mr = request("resize-1", "test-sts");
        let pvc = build_temp_pvc(&mr, &target("data", "500Mi", None), &original(None), 2);
        let labels = pvc.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_MIGRATION_NAME).map(String::as_str), Some("resize-1"));
        assert_eq!(labels.get(LABEL_REPLICA).map(String::as_str), Some("2"));
        assert_eq!(labels.get(LABEL_VOLUME_NAME).map(String::as_str), Some("data"));
    }

    #[test]
    fn replacement_pvc_binds_new_pv_under_original_name() {
        let temp = corev1::PersistentVolumeClaim {
            spec: Some(corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: Some("standard".to_string()),
                volume_name: Some("pv-new".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let labels = Some(BTreeMap::from([("app".to_string(), "test".to_string())]));

        let pvc = build_replacement_pvc(
            "default",
            "data-test-sts-0",
            "pv-new",
            &temp,
            labels,
            &target("data", "500Mi", None),
        );

        assert_eq!(pvc.metadata.name.as_deref(), Some("data-test-sts-0"));
        assert_eq!(
            pvc.metadata.labels.unwrap().get("app").map(String::as_str),
            Some("test")
        );
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.volume_name.as_deref(), Some("pv-new"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("500Mi".to_string())));
    }
}
