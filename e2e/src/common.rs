use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{
    api::{Api, AttachParams, AttachedProcess, DynamicObject, Patch, PatchParams},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
    Client,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;

pub const MIGRATION_GROUP: &str = "storage.migrations.dev";
pub const MIGRATION_VERSION: &str = "v1alpha1";
pub const MIGRATION_KIND: &str = "MigrationRequest";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to get kube client: {0}")]
    ClientGetFailed(#[from] kube::Error),

    #[error("Failed to apply yaml file!")]
    ApplyFailed,

    #[error("Failed to parse the yaml file!")]
    ParseYamlFailed(#[from] serde_yaml::Error),

    #[error("Failed to parse the json format!")]
    ParseJsonFailed(#[from] serde_json::Error),

    #[error("Timeout, e2e test failed!")]
    Timeout,

    #[error("Migration reached phase {0} instead of {1}!")]
    UnexpectedPhase(String, String),

    #[error("Failure message {0:?} does not mention {1}!")]
    UnexpectedMessage(String, String),

    #[error("PVC {0} is not in the expected state!")]
    PvcMismatch(String),

    #[error("StatefulSet is not in the expected state!")]
    StatefulSetMismatch,

    #[error("Marker data was lost during the migration!")]
    MarkerLost,
}

pub async fn apply(yaml: String, client: Client, discovery: &Discovery) -> Result<String, Error> {
    let ssapply = PatchParams::apply("migration-e2e").force();
    let doc = serde_yaml::from_str(&yaml)?;

    let obj: DynamicObject = serde_yaml::from_value(doc)?;
    let namespace = obj.metadata.namespace.as_deref();
    let gvk = if let Some(tm) = &obj.types {
        GroupVersionKind::try_from(tm).unwrap()
    } else {
        println!("cannot apply object without valid TypeMeta {:?}", obj);
        return Err(Error::ApplyFailed);
    };
    let name = obj.metadata.name.clone().unwrap();
    if let Some((ar, caps)) = discovery.resolve_gvk(&gvk) {
        let api = dynamic_api(ar, caps, client.clone(), namespace);
        let data: serde_json::Value = serde_json::to_value(&obj)?;
        let _r = api.patch(&name, &ssapply, &Patch::Apply(data)).await?;
        println!("applied {} {}", gvk.kind, name);
    } else {
        println!("Cannot apply document for unknown {:?}", gvk);
        return Err(Error::ApplyFailed);
    }

    Ok(name)
}

fn dynamic_api(
    ar: ApiResource,
    caps: ApiCapabilities,
    client: Client,
    ns: Option<&str>,
) -> Api<DynamicObject> {
    if caps.scope == Scope::Cluster {
        Api::all_with(client, &ar)
    } else if let Some(namespace) = ns {
        Api::namespaced_with(client, namespace, &ar)
    } else {
        Api::default_namespaced_with(client, &ar)
    }
}

pub fn migration_api(client: Client) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk(MIGRATION_GROUP, MIGRATION_VERSION, MIGRATION_KIND);
    let ar = ApiResource::from_gvk(&gvk);
    Api::default_namespaced_with(client, &ar)
}

pub async fn migration_status_field(
    client: Client,
    name: &str,
    field: &str,
) -> Result<Option<String>, Error> {
    let api = migration_api(client);
    match api.get_opt(name).await? {
        Some(obj) => Ok(obj.data["status"][field].as_str().map(str::to_string)),
        None => Ok(None),
    }
}

/// Poll the migration until it reaches `expected`. Reaching Completed or
/// Failed when the other was expected ends the wait immediately.
pub async fn wait_for_migration_phase(
    client: Client,
    name: &str,
    expected: &str,
    timeout: Duration,
) -> Result<(), Error> {
    let start = Instant::now();
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }
        let phase = migration_status_field(client.clone(), name, "phase")
            .await?
            .unwrap_or_default();
        println!("migration {} phase: {}", name, phase);
        if phase == expected {
            return Ok(());
        }
        if phase == "Completed" || phase == "Failed" {
            return Err(Error::UnexpectedPhase(phase, expected.to_string()));
        }
    }
}

pub async fn wait_for_sts_ready(
    client: Client,
    name: &str,
    replicas: i32,
    timeout: Duration,
) -> Result<(), Error> {
    let sts_api: Api<StatefulSet> = Api::default_namespaced(client);
    let start = Instant::now();
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }
        match sts_api.get_opt(name).await? {
            None => println!("StatefulSet {} not created yet", name),
            Some(sts) => {
                let ready = sts
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0);
                println!("StatefulSet {}: {}/{} pods ready", name, ready, replicas);
                if ready == replicas {
                    return Ok(());
                }
            }
        }
    }
}

pub async fn get_output_and_err(mut attached: AttachedProcess) -> (String, String) {
    let stdout = tokio_util::io::ReaderStream::new(attached.stdout().unwrap());
    let out = stdout
        .filter_map(|r| async { r.ok().and_then(|v| String::from_utf8(v.to_vec()).ok()) })
        .collect::<Vec<_>>()
        .await
        .join("");
    let stderr = tokio_util::io::ReaderStream::new(attached.stderr().unwrap());
    let err = stderr
        .filter_map(|r| async { r.ok().and_then(|v| String::from_utf8(v.to_vec()).ok()) })
        .collect::<Vec<_>>()
        .await
        .join("");
    attached.join().await.unwrap();
    (out, err)
}

pub async fn exec_in_pod(
    client: Client,
    pod_name: &str,
    command: Vec<&str>,
) -> Result<(String, String), Error> {
    let pod_api: Api<k8s_openapi::api::core::v1::Pod> = Api::default_namespaced(client);
    let attached = pod_api
        .exec(pod_name, command, &AttachParams::default().stderr(true))
        .await?;
    Ok(get_output_and_err(attached).await)
}

/// Drop a marker file at the root of a mounted volume.
pub async fn write_marker(
    client: Client,
    pod_name: &str,
    volume: &str,
    marker: &str,
) -> Result<(), Error> {
    let path = format!("/mnt/{}/marker", volume);
    let cmd = format!("echo {} > {} && sync", marker, path);
    let (_, err) = exec_in_pod(client, pod_name, vec!["sh", "-c", &cmd]).await?;
    if !err.is_empty() {
        println!("writing marker failed: {}", err);
        return Err(Error::MarkerLost);
    }
    Ok(())
}

pub async fn verify_marker(
    client: Client,
    pod_name: &str,
    volume: &str,
    marker: &str,
) -> Result<(), Error> {
    let path = format!("/mnt/{}/marker", volume);
    let (out, err) = exec_in_pod(client, pod_name, vec!["cat", &path]).await?;
    if !err.is_empty() || !out.contains(marker) {
        println!("marker check failed: out={:?} err={:?}", out, err);
        return Err(Error::MarkerLost);
    }
    Ok(())
}

pub async fn pvc_storage_request(
    client: Client,
    pvc_name: &str,
) -> Result<Option<String>, Error> {
    let pvc_api: Api<PersistentVolumeClaim> = Api::default_namespaced(client);
    Ok(pvc_api.get_opt(pvc_name).await?.and_then(|pvc| {
        pvc.spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|requests| requests.get("storage"))
            .map(|q| q.0.clone())
    }))
}

pub fn test_statefulset(name: &str, replicas: i32, volumes: &[(&str, &str)]) -> String {
    let mounts: String = volumes
        .iter()
        .map(|(vol, _)| {
            format!(
                "\n        - name: {}\n          mountPath: /mnt/{}",
                vol, vol
            )
        })
        .collect();
    let templates: String = volumes
        .iter()
        .map(|(vol, size)| {
            format!(
                "
  - metadata:
      name: {}
    spec:
      accessModes: [\"ReadWriteOnce\"]
      resources:
        requests:
          storage: {}",
                vol, size
            )
        })
        .collect();

    format!(
        "
apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: {name}
  namespace: default
spec:
  replicas: {replicas}
  serviceName: {name}
  selector:
    matchLabels:
      app: {name}
  template:
    metadata:
      labels:
        app: {name}
    spec:
      terminationGracePeriodSeconds: 1
      containers:
      - name: app
        image: busybox:1.36
        command: [\"sh\", \"-c\", \"sleep 1000000\"]
        volumeMounts:{mounts}
  volumeClaimTemplates:{templates}
"
    )
}

pub fn migration_request(name: &str, sts_name: &str, targets: &[(&str, &str)]) -> String {
    let volumes: String = targets
        .iter()
        .map(|(vol, size)| format!("\n  - name: {}\n    newSize: {}", vol, size))
        .collect();
    format!(
        "
apiVersion: {MIGRATION_GROUP}/{MIGRATION_VERSION}
kind: {MIGRATION_KIND}
metadata:
  name: {name}
  namespace: default
spec:
  statefulSetName: {sts_name}
  volumes:{volumes}
"
    )
}

pub fn pod_disruption_budget(name: &str, app: &str, min_available: i32) -> String {
    format!(
        "
apiVersion: policy/v1
kind: PodDisruptionBudget
metadata:
  name: {name}
  namespace: default
spec:
  minAvailable: {min_available}
  selector:
    matchLabels:
      app: {app}
"
    )
}
