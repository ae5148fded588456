pub mod common;
pub mod migrationrequest_types;
pub mod migrator;
pub mod pvc;
pub mod quantity;
pub mod reconciler;
pub mod statefulset;
pub mod validation;

use anyhow::Result;
use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    runtime::controller::Controller,
    Client, CustomResourceExt,
};
use std::{env, sync::Arc};
use thiserror::Error;
use tracing::*;

use crate::migrationrequest_types::MigrationRequest;
use crate::reconciler::{error_policy, reconcile, Data};

#[derive(Debug, Error)]
pub enum Error {
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
    #[error("migration cursor is not set")]
    CursorMissing,
    #[error("Failed to get MigrationRequest: {0}")]
    GetMigrationRequest(#[source] kube::Error),
    #[error("Failed to update MigrationRequest: {0}")]
    UpdateMigrationRequest(#[source] kube::Error),
    #[error("Failed to update MigrationRequest status: {0}")]
    UpdateStatus(#[source] kube::Error),
    #[error("Failed to get StatefulSet: {0}")]
    GetStatefulSet(#[source] kube::Error),
    #[error("Failed to delete StatefulSet: {0}")]
    DeleteStatefulSet(#[source] kube::Error),
    #[error("Failed to create StatefulSet: {0}")]
    CreateStatefulSet(#[source] kube::Error),
    #[error("Failed to get PVC: {0}")]
    GetPvc(#[source] kube::Error),
    #[error("Failed to create PVC: {0}")]
    CreatePvc(#[source] kube::Error),
    #[error("Failed to delete PVC: {0}")]
    DeletePvc(#[source] kube::Error),
    #[error("PVC {0} not found")]
    PvcNotFound(String),
    #[error("PVC {0} is not bound to a PV")]
    PvcNotBound(String),
    #[error("Failed to get PV: {0}")]
    GetPersistentVolume(#[source] kube::Error),
    #[error("Failed to update PV: {0}")]
    UpdatePersistentVolume(#[source] kube::Error),
    #[error("PV {0} not found")]
    PersistentVolumeNotFound(String),
    #[error("Failed to get Pod: {0}")]
    GetPod(#[source] kube::Error),
    #[error("Failed to create Pod: {0}")]
    CreatePod(#[source] kube::Error),
    #[error("Failed to delete Pod: {0}")]
    DeletePod(#[source] kube::Error),
    #[error("Failed to get ConfigMap: {0}")]
    GetConfigMap(#[source] kube::Error),
    #[error("Failed to create ConfigMap: {0}")]
    CreateConfigMap(#[source] kube::Error),
    #[error("Backup ConfigMap {0} not found")]
    BackupNotFound(String),
    #[error("Backup ConfigMap {0} is missing the StatefulSet key")]
    BackupKeyMissing(String),
    #[error("Failed to serialize StatefulSet: {0}")]
    SerializeStatefulSet(#[source] serde_json::Error),
    #[error("Failed to deserialize StatefulSet: {0}")]
    DeserializeStatefulSet(#[source] serde_json::Error),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or_default();
    if cmd == "export" {
        info!("exporting custom resource definition");
        println!("{}", serde_yaml::to_string(&MigrationRequest::crd())?);
    } else if cmd == "run" {
        info!("running migration-controller");
        let client = Client::try_default().await?;
        let requests = Api::<MigrationRequest>::all(client.clone());

        Controller::new(requests, ListParams::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::new(Data { client }))
            .for_each(|res| async move {
                match res {
                    Ok(o) => info!("reconciled {:?}", o),
                    Err(e) => warn!("reconcile failed: {}", e),
                }
            })
            .await;
        info!("controller terminated");
    } else {
        warn!("wrong command; please use \"export\" or \"run\"");
    }
    Ok(())
}
