pub mod common;
pub mod migration_e2e;

use common::Error;
use migration_e2e::{
    multi_replica_e2e_test, multi_volume_e2e_test, pdb_blocked_e2e_test, single_replica_e2e_test,
    size_not_smaller_e2e_test, volume_mismatch_e2e_test,
};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).cloned().unwrap_or_default();
    match cmd.as_str() {
        "single-replica" => {
            println!("Running single replica, single volume end-to-end test");
            single_replica_e2e_test().await
        }
        "multi-replica" => {
            println!("Running three replica end-to-end test");
            multi_replica_e2e_test().await
        }
        "multi-volume" => {
            println!("Running multiple volume end-to-end test");
            multi_volume_e2e_test().await
        }
        "size-not-smaller" => {
            println!("Running size validation end-to-end test");
            size_not_smaller_e2e_test().await
        }
        "volume-mismatch" => {
            println!("Running volume name validation end-to-end test");
            volume_mismatch_e2e_test().await
        }
        "pdb-blocked" => {
            println!("Running disruption budget end-to-end test");
            pdb_blocked_e2e_test().await
        }
        _ => {
            println!("Please specify one scenario");
            Ok(())
        }
    }
}
