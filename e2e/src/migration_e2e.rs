use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{api::Api, discovery::Discovery, Client};
use std::time::Duration;

use crate::common::{
    apply, migration_request, migration_status_field, pod_disruption_budget, pvc_storage_request,
    test_statefulset, verify_marker, wait_for_migration_phase, wait_for_sts_ready, write_marker,
    Error,
};

const STS_READY_TIMEOUT: Duration = Duration::from_secs(180);
const MIGRATION_TIMEOUT: Duration = Duration::from_secs(900);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(120);

async fn expect_pvc_size(client: Client, pvc_name: &str, expected: &str) -> Result<(), Error> {
    match pvc_storage_request(client, pvc_name).await? {
        Some(size) if size == expected => Ok(()),
        other => {
            println!("PVC {} has size {:?}, expected {}", pvc_name, other, expected);
            Err(Error::PvcMismatch(pvc_name.to_string()))
        }
    }
}

async fn expect_failure_message(
    client: Client,
    migration: &str,
    fragments: &[&str],
) -> Result<(), Error> {
    let message = migration_status_field(client, migration, "message")
        .await?
        .unwrap_or_default();
    println!("migration {} failed with message: {}", migration, message);
    for fragment in fragments {
        if !message.contains(fragment) {
            return Err(Error::UnexpectedMessage(message, fragment.to_string()));
        }
    }
    Ok(())
}

pub async fn single_replica_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let discovery = Discovery::new(client.clone()).run().await?;

    apply(
        test_statefulset("test-sts-1", 1, &[("data", "1Gi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_sts_ready(client.clone(), "test-sts-1", 1, STS_READY_TIMEOUT).await?;

    // Data written before the migration must survive it.
    write_marker(client.clone(), "test-sts-1-0", "data", "marker-replica-0").await?;

    apply(
        migration_request("resize-1", "test-sts-1", &[("data", "500Mi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_migration_phase(client.clone(), "resize-1", "Completed", MIGRATION_TIMEOUT).await?;

    expect_pvc_size(client.clone(), "data-test-sts-1-0", "500Mi").await?;
    wait_for_sts_ready(client.clone(), "test-sts-1", 1, STS_READY_TIMEOUT).await?;
    verify_marker(client.clone(), "test-sts-1-0", "data", "marker-replica-0").await?;

    println!("Single replica e2e test passed.");
    Ok(())
}

pub async fn multi_replica_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let discovery = Discovery::new(client.clone()).run().await?;

    apply(
        test_statefulset("test-sts-3", 3, &[("data", "1Gi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_sts_ready(client.clone(), "test-sts-3", 3, STS_READY_TIMEOUT).await?;

    for replica in 0..3 {
        let pod = format!("test-sts-3-{}", replica);
        let marker = format!("marker-replica-{}", replica);
        write_marker(client.clone(), &pod, "data", &marker).await?;
    }

    apply(
        migration_request("resize-3", "test-sts-3", &[("data", "500Mi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_migration_phase(client.clone(), "resize-3", "Completed", MIGRATION_TIMEOUT).await?;

    wait_for_sts_ready(client.clone(), "test-sts-3", 3, STS_READY_TIMEOUT).await?;
    for replica in 0..3 {
        let pvc = format!("data-test-sts-3-{}", replica);
        expect_pvc_size(client.clone(), &pvc, "500Mi").await?;

        let pod = format!("test-sts-3-{}", replica);
        let marker = format!("marker-replica-{}", replica);
        verify_marker(client.clone(), &pod, "data", &marker).await?;
    }

    println!("Multi replica e2e test passed.");
    Ok(())
}

pub async fn multi_volume_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let discovery = Discovery::new(client.clone()).run().await?;

    apply(
        test_statefulset("test-sts-mv", 2, &[("data", "1Gi"), ("logs", "500Mi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_sts_ready(client.clone(), "test-sts-mv", 2, STS_READY_TIMEOUT).await?;

    for replica in 0..2 {
        let pod = format!("test-sts-mv-{}", replica);
        write_marker(client.clone(), &pod, "data", &format!("data-{}", replica)).await?;
        write_marker(client.clone(), &pod, "logs", &format!("logs-{}", replica)).await?;
    }

    apply(
        migration_request(
            "resize-mv",
            "test-sts-mv",
            &[("data", "500Mi"), ("logs", "250Mi")],
        ),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_migration_phase(client.clone(), "resize-mv", "Completed", MIGRATION_TIMEOUT).await?;

    wait_for_sts_ready(client.clone(), "test-sts-mv", 2, STS_READY_TIMEOUT).await?;
    for replica in 0..2 {
        expect_pvc_size(client.clone(), &format!("data-test-sts-mv-{}", replica), "500Mi").await?;
        expect_pvc_size(client.clone(), &format!("logs-test-sts-mv-{}", replica), "250Mi").await?;

        let pod = format!("test-sts-mv-{}", replica);
        verify_marker(client.clone(), &pod, "data", &format!("data-{}", replica)).await?;
        verify_marker(client.clone(), &pod, "logs", &format!("logs-{}", replica)).await?;
    }

    println!("Multi volume e2e test passed.");
    Ok(())
}

pub async fn size_not_smaller_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let discovery = Discovery::new(client.clone()).run().await?;

    apply(
        test_statefulset("test-sts-size", 1, &[("data", "500Mi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_sts_ready(client.clone(), "test-sts-size", 1, STS_READY_TIMEOUT).await?;

    apply(
        migration_request("resize-size", "test-sts-size", &[("data", "1Gi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_migration_phase(client.clone(), "resize-size", "Failed", VALIDATION_TIMEOUT).await?;
    expect_failure_message(client.clone(), "resize-size", &["smaller"]).await?;

    // Validation failures leave the cluster untouched: no transient claim,
    // StatefulSet still present.
    if pvc_storage_request(client.clone(), "data-test-sts-size-0-new")
        .await?
        .is_some()
    {
        return Err(Error::PvcMismatch("data-test-sts-size-0-new".to_string()));
    }
    let sts_api: Api<StatefulSet> = Api::default_namespaced(client.clone());
    if sts_api.get_opt("test-sts-size").await?.is_none() {
        return Err(Error::StatefulSetMismatch);
    }
    expect_pvc_size(client.clone(), "data-test-sts-size-0", "500Mi").await?;

    println!("Size validation e2e test passed.");
    Ok(())
}

pub async fn volume_mismatch_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let discovery = Discovery::new(client.clone()).run().await?;

    apply(
        test_statefulset("test-sts-vol", 1, &[("data", "1Gi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_sts_ready(client.clone(), "test-sts-vol", 1, STS_READY_TIMEOUT).await?;

    apply(
        migration_request("resize-vol", "test-sts-vol", &[("nonexistent", "500Mi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_migration_phase(client.clone(), "resize-vol", "Failed", VALIDATION_TIMEOUT).await?;
    expect_failure_message(client.clone(), "resize-vol", &["not found", "nonexistent"]).await?;

    println!("Volume name validation e2e test passed.");
    Ok(())
}

pub async fn pdb_blocked_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let discovery = Discovery::new(client.clone()).run().await?;

    apply(
        test_statefulset("test-sts-pdb", 2, &[("data", "1Gi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_sts_ready(client.clone(), "test-sts-pdb", 2, STS_READY_TIMEOUT).await?;

    // minAvailable equal to the replica count leaves no disruption headroom.
    apply(
        pod_disruption_budget("test-sts-pdb-pdb", "test-sts-pdb", 2),
        client.clone(),
        &discovery,
    )
    .await?;

    apply(
        migration_request("resize-pdb", "test-sts-pdb", &[("data", "500Mi")]),
        client.clone(),
        &discovery,
    )
    .await?;
    wait_for_migration_phase(client.clone(), "resize-pdb", "Failed", VALIDATION_TIMEOUT).await?;
    expect_failure_message(client.clone(), "resize-pdb", &["PodDisruptionBudget"]).await?;

    println!("Disruption budget e2e test passed.");
    Ok(())
}
