// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

fn full_payload() -> Value {
    json!({
        "name": "stack-a",
        "version": "1.0.0",
        "artifact": {"uri": "https://releases.example/a.tar.gz", "checksum": "sha256:abc"},
        "runtime": {
            "start_command": "bin/serve",
            "stop_command": "bin/serve --drain",
            "environment": {"PORT": "8080"},
            "working_directory": "app"
        }
    })
}

#[test]
fn parses_top_level_payload() {
    let release = parse_release_payload(&full_payload()).unwrap();
    assert_eq!(release.name, "stack-a");
    assert_eq!(release.version, "1.0.0");
    assert_eq!(release.artifact.uri, "https://releases.example/a.tar.gz");
    assert_eq!(release.artifact.checksum, "sha256:abc");
    assert_eq!(release.runtime.start_command, "bin/serve");
    assert_eq!(release.runtime.stop_command.as_deref(), Some("bin/serve --drain"));
    assert_eq!(release.runtime.environment["PORT"], "8080");
    assert_eq!(release.runtime.working_directory.as_deref(), Some("app"));
}

#[test]
fn parses_fields_nested_under_stack() {
    let payload = json!({
        "stack": {
            "name": "stack-b",
            "version": "2.1.0",
            "artifact": {"uri": "https://releases.example/b.zip", "checksum": "def"},
            "runtime": {"start_command": "./run.sh"}
        }
    });
    let release = parse_release_payload(&payload).unwrap();
    assert_eq!(release.name, "stack-b");
    assert_eq!(release.version, "2.1.0");
    assert_eq!(release.runtime.start_command, "./run.sh");
    assert!(release.runtime.stop_command.is_none());
}

#[test]
fn feature_properties_win_over_stack_section() {
    let payload = json!({
        "features": {"stack": {"properties": {
            "name": "from-features",
            "version": "3.0.0",
            "artifact": {"uri": "u", "checksum": "c"},
            "runtime": {"start_command": "s"}
        }}},
        "stack": {"name": "from-stack"}
    });
    let release = parse_release_payload(&payload).unwrap();
    assert_eq!(release.name, "from-features");
}

#[test]
fn name_falls_back_to_metadata_then_thing_id() {
    let payload = json!({
        "thingId": "device:stack-c",
        "version": "1.0.0",
        "artifact_uri": "u",
        "checksum": "c",
        "start_command": "s"
    });
    assert_eq!(parse_release_payload(&payload).unwrap().name, "device:stack-c");

    let payload = json!({
        "metadata": {"name": "meta-stack", "version": "1.0.0"},
        "artifact_uri": "u",
        "checksum": "c",
        "start_command": "s"
    });
    assert_eq!(parse_release_payload(&payload).unwrap().name, "meta-stack");
}

#[test]
fn version_falls_back_to_attributes() {
    let payload = json!({
        "name": "stack-a",
        "attributes": {"version": "9.9.9"},
        "artifact_uri": "u",
        "checksum": "c",
        "start_command": "s"
    });
    assert_eq!(parse_release_payload(&payload).unwrap().version, "9.9.9");
}

#[parameterized(
    name = { "name", ReleaseSpecError::MissingName },
    version = { "version", ReleaseSpecError::MissingVersion },
    uri = { "uri", ReleaseSpecError::MissingArtifactUri },
    checksum = { "checksum", ReleaseSpecError::MissingChecksum },
    start_command = { "start_command", ReleaseSpecError::MissingStartCommand },
)]
fn rejects_missing_required_field(field: &str, expected: ReleaseSpecError) {
    let mut payload = full_payload();
    match field {
        "name" | "version" => {
            payload.as_object_mut().unwrap().remove(field);
        }
        "uri" | "checksum" => {
            payload["artifact"].as_object_mut().unwrap().remove(field);
        }
        "start_command" => {
            payload["runtime"].as_object_mut().unwrap().remove(field);
        }
        _ => unreachable!(),
    }
    assert_eq!(parse_release_payload(&payload).unwrap_err(), expected);
}

#[test]
fn blank_strings_are_treated_as_absent() {
    let mut payload = full_payload();
    payload["runtime"]["stop_command"] = json!("   ");
    payload["runtime"]["working_directory"] = json!("");
    let release = parse_release_payload(&payload).unwrap();
    assert!(release.runtime.stop_command.is_none());
    assert!(release.runtime.working_directory.is_none());
}

#[test]
fn environment_values_are_coerced_to_strings() {
    let mut payload = full_payload();
    payload["runtime"]["environment"] = json!({
        "PORT": 8080,
        "DEBUG": true,
        "TRACE": false,
        "OPTIONAL": null,
        "NAME": "svc"
    });
    let release = parse_release_payload(&payload).unwrap();
    assert_eq!(release.runtime.environment["PORT"], "8080");
    assert_eq!(release.runtime.environment["DEBUG"], "True");
    assert_eq!(release.runtime.environment["TRACE"], "False");
    assert_eq!(release.runtime.environment["OPTIONAL"], "None");
    assert_eq!(release.runtime.environment["NAME"], "svc");
}

#[test]
fn top_level_fields_win_over_sections() {
    let mut payload = full_payload();
    payload["artifact_uri"] = json!("https://override.example/x.tar.gz");
    let release = parse_release_payload(&payload).unwrap();
    assert_eq!(release.artifact.uri, "https://override.example/x.tar.gz");
}

#[test]
fn release_round_trips_through_json() {
    let release = Release::builder()
        .stop_command("kill %1")
        .env("A", "1")
        .working_directory("srv")
        .build();
    let encoded = serde_json::to_string(&release).unwrap();
    let decoded: Release = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, release);
}
