// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation adapter scenarios: summary documents over real deploys.

use crate::prelude::*;
use serde_json::json;
use serial_test::serial;
use std::collections::HashMap;
use std::sync::Arc;
use sv_adapters::{ComponentSpec, DeviceProvider, TargetProvider};
use sv_engine::DeploymentEngine;
use sv_storage::StateStore;
use tempfile::TempDir;

fn metadata() -> HashMap<String, String> {
    HashMap::from([("active-target".to_string(), "target-7".to_string())])
}

fn provider_in(root: &TempDir) -> DeviceProvider {
    let config = test_config(root.path());
    let engine = Arc::new(DeploymentEngine::new(config.clone()));
    DeviceProvider::new(config, engine)
}

fn stack_component(uri: &str, checksum: &str, version: &str, start_command: &str) -> ComponentSpec {
    ComponentSpec::new(
        "stack-a",
        json!({
            "name": "stack-a",
            "version": version,
            "artifact": {"uri": uri, "checksum": checksum},
            "runtime": {"start_command": start_command}
        }),
    )
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn apply_then_get_then_remove_round_trip() {
    let root = TempDir::new().unwrap();
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let provider = provider_in(&root);
    let component = stack_component(&uri, &checksum, "1.0.0", "sleep 60");

    let response = provider.apply(&metadata(), &[component.clone()]).await;
    let summary: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(summary["success_count"], 1);
    assert_eq!(summary["target_results"]["target-7"]["status"], "OK");
    assert_eq!(
        summary["target_results"]["target-7"]["component_results"]["stack-a"]["status"],
        "UPDATED"
    );

    let reported = provider.get(&metadata(), &[component.clone()]).await;
    let entries = reported.as_array().unwrap();
    assert_eq!(entries[0]["release"], "1.0.0");
    assert_eq!(entries[0]["status"]["deployment_state"], "running");

    let stack_paths = provider.engine().stack_paths("stack-a");
    let pid = StateStore::new(&stack_paths.state_file).load().process.pid.unwrap();

    let response = provider.remove(&metadata(), &[component]).await;
    let summary: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(summary["removed"], true);
    assert_eq!(
        summary["target_results"]["target-7"]["component_results"]["stack-a"]["status"],
        "DELETED"
    );
    wait_until_gone(pid).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn failed_component_marks_target_failed() {
    let root = TempDir::new().unwrap();
    let (uri, checksum) = make_archive(root.path(), "release.tar.gz");
    let provider = provider_in(&root);

    let good = stack_component(&uri, &checksum, "1.0.0", "sleep 60");
    let bad = ComponentSpec::new("stack-broken", json!({"version": "1.0.0"}));

    let response = provider.apply(&metadata(), &[good, bad]).await;
    let summary: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(summary["success_count"], 1);
    assert_eq!(summary["planned_deployment"], 2);
    assert_eq!(summary["summary_message"], "1 component(s) failed during apply");
    let target = &summary["target_results"]["target-7"];
    assert_eq!(target["status"], "FAILED");
    assert_eq!(target["component_results"]["stack-a"]["status"], "UPDATED");
    assert_eq!(target["component_results"]["stack-broken"]["status"], "UPDATE_FAILED");

    let stack_paths = provider.engine().stack_paths("stack-a");
    let pid = StateStore::new(&stack_paths.state_file).load().process.pid.unwrap();
    kill_and_reap(pid);
    wait_until_gone(pid).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn needs_update_and_needs_remove_compare_versions() {
    let root = TempDir::new().unwrap();
    let provider = provider_in(&root);

    let v1 = stack_component("file:///u", "c", "1.0.0", "s");
    let v2 = stack_component("file:///u", "c", "2.0.0", "s");

    let pack = sv_adapters::ComparisonPack {
        desired: vec![v2.clone()],
        current: vec![v1.clone()],
    };
    assert!(provider.needs_update(&pack));

    let pack = sv_adapters::ComparisonPack {
        desired: vec![v1.clone()],
        current: vec![v1.clone()],
    };
    assert!(!provider.needs_update(&pack));
    assert!(!provider.needs_remove(&pack));

    let pack = sv_adapters::ComparisonPack {
        desired: vec![],
        current: vec![v1],
    };
    assert!(provider.needs_remove(&pack));
}
