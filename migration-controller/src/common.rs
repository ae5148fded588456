use kube::core::ErrorResponse;

// Annotation keys on the MigrationRequest and on owned objects.
pub const ANNOTATION_STS_DELETED: &str = "storage.migrations.dev/sts-deleted";
pub const ANNOTATION_STS_BACKUP: &str = "storage.migrations.dev/sts-backup-cm";
pub const ANNOTATION_MANAGED_BY: &str = "storage.migrations.dev/managed-by";
pub const MANAGED_BY_VALUE: &str = "volume-migration-operator";

// Labels stamped on transient claims, copy pods and the backup ConfigMap.
// The migration-name label is what the finalizer lists by.
pub const LABEL_MIGRATION_NAME: &str = "storage.migrations.dev/migration-name";
pub const LABEL_REPLICA: &str = "storage.migrations.dev/replica";
pub const LABEL_VOLUME_NAME: &str = "storage.migrations.dev/volume-name";

pub const FINALIZER_NAME: &str = "storage.migrations.dev/finalizer";

/// Key inside the backup ConfigMap holding the serialized StatefulSet.
pub const CONFIG_MAP_KEY_STS_SPEC: &str = "statefulset.json";

pub const DEFAULT_MIGRATOR_IMAGE: &str = "ghcr.io/storage-migrations/volume-copier:latest";

pub const MESSAGE_MIGRATION_COMPLETED: &str = "Migration completed successfully";

/// PVC name a StatefulSet derives from a volumeClaimTemplate for one replica.
pub fn original_pvc_name(volume_name: &str, sts_name: &str, replica: i32) -> String {
    format!("{}-{}-{}", volume_name, sts_name, replica)
}

/// Transient PVC that receives the copied data during migration.
pub fn temp_pvc_name(volume_name: &str, sts_name: &str, replica: i32) -> String {
    format!("{}-{}-{}-new", volume_name, sts_name, replica)
}

pub fn pod_name(sts_name: &str, replica: i32) -> String {
    format!("{}-{}", sts_name, replica)
}

pub fn migrator_pod_name(request_name: &str, volume_name: &str, replica: i32) -> String {
    format!("{}-migrator-{}-{}", request_name, replica, volume_name)
}

pub fn backup_config_map_name(request_name: &str) -> String {
    format!("{}-sts-backup", request_name)
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { reason, .. }) if reason == "NotFound")
}

pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { reason, .. }) if reason == "AlreadyExists")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pvc_names_follow_statefulset_convention() {
        assert_eq!(original_pvc_name("data", "test-sts-1", 0), "data-test-sts-1-0");
        assert_eq!(original_pvc_name("logs", "web", 12), "logs-web-12");
    }

    #[test]
    fn temp_pvc_name_appends_new_suffix() {
        assert_eq!(temp_pvc_name("data", "test-sts-1", 2), "data-test-sts-1-2-new");
    }

    #[test]
    fn replica_pod_name_is_ordinal() {
        assert_eq!(pod_name("test-sts-1", 0), "test-sts-1-0");
    }

    #[test]
    fn migrator_pod_name_embeds_replica_and_volume() {
        assert_eq!(
            migrator_pod_name("resize-1", "data", 1),
            "resize-1-migrator-1-data"
        );
    }

    #[test]
    fn backup_config_map_name_is_derived_from_request() {
        assert_eq!(backup_config_map_name("resize-1"), "resize-1-sts-backup");
    }

    #[test]
    fn default_migrator_image_has_a_tag() {
        assert!(DEFAULT_MIGRATOR_IMAGE.contains(':'));
    }
}
