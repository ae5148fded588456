use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::policy::v1 as policyv1;
use kube::{api::Api, Client};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::common::original_pvc_name;
use crate::migrationrequest_types::ResizeTarget;
use crate::quantity;

// Validation failures carry a human message and latch the migration Failed;
// transport errors during a check fold into the message rather than retrying.

/// The target StatefulSet must exist in the request's namespace.
pub async fn validate_stateful_set_exists(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<appsv1::StatefulSet, String> {
    let sts_api = Api::<appsv1::StatefulSet>::namespaced(client, namespace);
    match sts_api.get_opt(name).await {
        Ok(Some(sts)) => Ok(sts),
        Ok(None) => Err(format!("StatefulSet {} not found", name)),
        Err(e) => Err(format!("StatefulSet {} not found: {}", name, e)),
    }
}

/// Every target must name a volumeClaimTemplate on the StatefulSet.
pub fn validate_volume_targets(
    sts: &appsv1::StatefulSet,
    volumes: &[ResizeTarget],
) -> Result<(), String> {
    let template_names: Vec<&str> = sts
        .spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.as_ref())
        .map(|vcts| {
            vcts.iter()
                .filter_map(|vct| vct.metadata.name.as_deref())
                .collect()
        })
        .unwrap_or_default();

    for vol in volumes {
        if !template_names.contains(&vol.name.as_str()) {
            return Err(format!(
                "volume {:?} not found in StatefulSet volumeClaimTemplates",
                vol.name
            ));
        }
    }
    Ok(())
}

/// The new size must be strictly smaller than the current request of the
/// replica-0 claim for the same template.
pub fn check_size_reduction(
    pvc: &corev1::PersistentVolumeClaim,
    target: &ResizeTarget,
) -> Result<(), String> {
    let pvc_name = pvc.metadata.name.as_deref().unwrap_or_default();
    let current = match pvc
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|requests| requests.get("storage"))
    {
        Some(current) => current,
        None => return Err(format!("PVC {} has no storage request", pvc_name)),
    };

    match quantity::compare(&target.new_size, current) {
        Ok(Ordering::Less) => Ok(()),
        Ok(_) => Err(format!(
            "newSize ({}) must be smaller than current size ({}) for volume {}",
            target.new_size.0, current.0, target.name
        )),
        Err(e) => Err(format!(
            "cannot compare sizes for volume {}: {}",
            target.name, e
        )),
    }
}

pub async fn validate_size_reduction(
    client: Client,
    namespace: &str,
    sts_name: &str,
    target: &ResizeTarget,
) -> Result<(), String> {
    let pvc_name = original_pvc_name(&target.name, sts_name, 0);
    let pvc_api = Api::<corev1::PersistentVolumeClaim>::namespaced(client, namespace);
    match pvc_api.get_opt(&pvc_name).await {
        Ok(Some(pvc)) => check_size_reduction(&pvc, target),
        Ok(None) => Err(format!("failed to get PVC {}: not found", pvc_name)),
        Err(e) => Err(format!("failed to get PVC {}: {}", pvc_name, e)),
    }
}

/// A budget blocks the migration when its selector matches the StatefulSet's
/// pod template labels and it has no disruption headroom left.
pub fn pdb_blocks_disruption(
    pdb: &policyv1::PodDisruptionBudget,
    pod_labels: &BTreeMap<String, String>,
) -> Option<String> {
    let selector = pdb.spec.as_ref()?.selector.as_ref()?;
    // Set-based selector semantics over matchLabels only; an empty set
    // matches every pod.
    let matches = selector
        .match_labels
        .as_ref()
        .map(|required| {
            required
                .iter()
                .all(|(k, v)| pod_labels.get(k) == Some(v))
        })
        .unwrap_or(true);
    if !matches {
        return None;
    }

    let allowed = pdb.status.as_ref().map(|s| s.disruptions_allowed).unwrap_or(0);
    if allowed < 1 {
        Some(format!(
            "PodDisruptionBudget {} does not allow disruptions (disruptionsAllowed={})",
            pdb.metadata.name.as_deref().unwrap_or_default(),
            allowed
        ))
    } else {
        None
    }
}

pub async fn validate_pdb_allows_disruption(
    client: Client,
    sts: &appsv1::StatefulSet,
) -> Result<(), String> {
    let namespace = match sts.metadata.namespace.as_deref() {
        Some(ns) => ns,
        None => return Ok(()),
    };
    let pdb_api = Api::<policyv1::PodDisruptionBudget>::namespaced(client, namespace);
    let pdbs = pdb_api
        .list(&kube::api::ListParams::default())
        .await
        .map_err(|e| format!("failed to list PodDisruptionBudgets: {}", e))?;

    let pod_labels = sts
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();

    for pdb in pdbs.items {
        if let Some(message) = pdb_blocks_disruption(&pdb, &pod_labels) {
            return Err(message);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

    fn target(name: &str, new_size: &str) -> ResizeTarget {
        ResizeTarget {
            name: name.to_string(),
            new_size: Quantity(new_size.to_string()),
            storage_class: None,
        }
    }

    fn sts_with_templates(names: &[&str]) -> appsv1::StatefulSet {
        appsv1::StatefulSet {
            spec: Some(appsv1::StatefulSetSpec {
                volume_claim_templates: Some(
                    names
                        .iter()
                        .map(|n| corev1::PersistentVolumeClaim {
                            metadata: metav1::ObjectMeta {
                                name: Some(n.to_string()),
                                ..Default::default()
                            },
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pvc_with_request(name: &str, size: Option<&str>) -> corev1::PersistentVolumeClaim {
        corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeClaimSpec {
                resources: size.map(|s| corev1::ResourceRequirements {
                    requests: Some(
                        [("storage".to_string(), Quantity(s.to_string()))]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pdb(
        match_labels: Option<&[(&str, &str)]>,
        disruptions_allowed: i32,
    ) -> policyv1::PodDisruptionBudget {
        policyv1::PodDisruptionBudget {
            metadata: metav1::ObjectMeta {
                name: Some("test-pdb".to_string()),
                ..Default::default()
            },
            spec: Some(policyv1::PodDisruptionBudgetSpec {
                selector: Some(metav1::LabelSelector {
                    match_labels: match_labels.map(|pairs| {
                        pairs
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(policyv1::PodDisruptionBudgetStatus {
                disruptions_allowed,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn unknown_volume_target_is_rejected() {
        let sts = sts_with_templates(&["data"]);
        let err = validate_volume_targets(&sts, &[target("nonexistent", "500Mi")]).unwrap_err();
        assert!(err.contains("nonexistent"));
        assert!(err.contains("not found"));
    }

    #[test]
    fn known_volume_targets_pass() {
        let sts = sts_with_templates(&["data", "logs"]);
        assert!(validate_volume_targets(&sts, &[target("data", "500Mi")]).is_ok());
        assert!(validate_volume_targets(
            &sts,
            &[target("data", "500Mi"), target("logs", "250Mi")]
        )
        .is_ok());
    }

    #[test]
    fn growing_a_volume_is_rejected() {
        let pvc = pvc_with_request("data-test-sts-0", Some("500Mi"));
        let err = check_size_reduction(&pvc, &target("data", "1Gi")).unwrap_err();
        assert!(err.contains("must be smaller"));
    }

    #[test]
    fn equal_size_is_rejected() {
        let pvc = pvc_with_request("data-test-sts-0", Some("1Gi"));
        let err = check_size_reduction(&pvc, &target("data", "1Gi")).unwrap_err();
        assert!(err.contains("must be smaller"));
    }

    #[test]
    fn shrinking_a_volume_passes() {
        let pvc = pvc_with_request("data-test-sts-0", Some("1Gi"));
        assert!(check_size_reduction(&pvc, &target("data", "500Mi")).is_ok());
    }

    #[test]
    fn missing_storage_request_is_rejected() {
        let pvc = pvc_with_request("data-test-sts-0", None);
        let err = check_size_reduction(&pvc, &target("data", "500Mi")).unwrap_err();
        assert!(err.contains("no storage request"));
    }

    #[test]
    fn matching_pdb_without_headroom_blocks() {
        let labels: BTreeMap<String, String> =
            [("app".to_string(), "test".to_string())].into_iter().collect();
        let message = pdb_blocks_disruption(&pdb(Some(&[("app", "test")]), 0), &labels).unwrap();
        assert!(message.contains("PodDisruptionBudget"));
        assert!(message.contains("does not allow disruptions"));
    }

    #[test]
    fn matching_pdb_with_headroom_allows() {
        let labels: BTreeMap<String, String> =
            [("app".to_string(), "test".to_string())].into_iter().collect();
        assert!(pdb_blocks_disruption(&pdb(Some(&[("app", "test")]), 1), &labels).is_none());
    }

    #[test]
    fn non_matching_pdb_is_ignored() {
        let labels: BTreeMap<String, String> =
            [("app".to_string(), "test".to_string())].into_iter().collect();
        assert!(pdb_blocks_disruption(&pdb(Some(&[("app", "other")]), 0), &labels).is_none());
    }

    #[test]
    fn empty_selector_matches_everything() {
        let labels: BTreeMap<String, String> =
            [("app".to_string(), "test".to_string())].into_iter().collect();
        assert!(pdb_blocks_disruption(&pdb(None, 0), &labels).is_some());
    }
}
