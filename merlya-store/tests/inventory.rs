//! Inventory store acceptance tests: upsert semantics, version log,
//! tombstones, atomic bulk import, structural search, jump-chain
//! validation, and the audit table.

use merlya_store::{HostSearch, InventoryStore, StoreError};
use merlya_types::{
    AuditOutcome, AuditRecord, ElevationMethod, FieldUpdate, HealthStatus, HostName, HostPatch,
};
use std::collections::BTreeSet;

fn name(s: &str) -> HostName {
    HostName::parse(s).unwrap()
}

fn basic_patch(hostname: &str) -> HostPatch {
    HostPatch {
        hostname: Some(hostname.to_string()),
        ..HostPatch::default()
    }
}

fn store_with(hosts: &[(&str, &str)]) -> InventoryStore {
    let store = InventoryStore::open_in_memory().unwrap();
    for (host, addr) in hosts {
        store
            .add_host(&name(host), basic_patch(addr), "test", None)
            .unwrap();
    }
    store
}

#[test]
fn add_then_get_roundtrips() {
    let store = store_with(&[("web-01", "10.0.0.1")]);
    let host = store.get_host("web-01").unwrap().unwrap();
    assert_eq!(host.hostname, "10.0.0.1");
    assert_eq!(host.port, 22);
    assert_eq!(host.elevation_method, ElevationMethod::None);
    assert_eq!(host.health_status, HealthStatus::Unknown);
}

#[test]
fn get_is_case_insensitive_and_falls_back() {
    let store = store_with(&[("web-01", "App.Example.Com"), ("db-01", "192.168.7.10")]);
    // by name, any case
    assert!(store.get_host("WEB-01").unwrap().is_some());
    // by hostname
    assert_eq!(
        store.get_host("app.example.com").unwrap().unwrap().name,
        name("web-01")
    );
    // by IP literal
    assert_eq!(
        store.get_host("192.168.7.10").unwrap().unwrap().name,
        name("db-01")
    );
    assert!(store.get_host("absent").unwrap().is_none());
}

#[test]
fn upsert_preserves_null_fields_and_merges_metadata() {
    let store = InventoryStore::open_in_memory().unwrap();
    let mut first = basic_patch("10.0.0.1");
    first.username = FieldUpdate::Set("deploy".into());
    first.metadata.insert("environment".into(), "prod".into());
    store.add_host(&name("web-01"), first, "test", None).unwrap();

    // second upsert says nothing about username: it must survive
    let mut second = HostPatch::default();
    second.metadata.insert("rack".into(), "r12".into());
    store.add_host(&name("web-01"), second, "test", None).unwrap();

    let host = store.get_host("web-01").unwrap().unwrap();
    assert_eq!(host.username.as_deref(), Some("deploy"));
    assert_eq!(host.metadata.get("environment").map(String::as_str), Some("prod"));
    assert_eq!(host.metadata.get("rack").map(String::as_str), Some("r12"));

    // explicit clear is required to erase
    let clear = HostPatch {
        username: FieldUpdate::Clear,
        ..HostPatch::default()
    };
    store.add_host(&name("web-01"), clear, "test", None).unwrap();
    assert_eq!(store.get_host("web-01").unwrap().unwrap().username, None);
}

#[test]
fn identical_upsert_creates_no_version_record() {
    let store = InventoryStore::open_in_memory().unwrap();
    store
        .add_host(&name("web-01"), basic_patch("10.0.0.1"), "test", None)
        .unwrap();
    assert_eq!(store.versions(&name("web-01")).unwrap().len(), 1);

    store
        .add_host(&name("web-01"), basic_patch("10.0.0.1"), "test", None)
        .unwrap();
    assert_eq!(store.versions(&name("web-01")).unwrap().len(), 1);

    store
        .add_host(&name("web-01"), basic_patch("10.0.0.2"), "test", None)
        .unwrap();
    let versions = store.versions(&name("web-01")).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].1, vec!["hostname".to_string()]);
    assert_eq!(versions[1].2, "test");
}

#[test]
fn delete_tombstones_and_allows_recreation() {
    let store = store_with(&[("web-01", "10.0.0.1")]);
    store.delete_host(&name("web-01"), "decommissioned").unwrap();
    assert!(store.get_host("web-01").unwrap().is_none());

    let tombstones = store.deletions(10).unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].0.hostname, "10.0.0.1");
    assert_eq!(tombstones[0].1, "decommissioned");

    // recreation with the same name reads back the latest attributes
    store
        .add_host(&name("web-01"), basic_patch("10.9.9.9"), "test", None)
        .unwrap();
    assert_eq!(
        store.get_host("web-01").unwrap().unwrap().hostname,
        "10.9.9.9"
    );
    // and the tombstone still holds the prior snapshot
    assert_eq!(store.deletions(10).unwrap()[0].0.hostname, "10.0.0.1");
}

#[test]
fn deleting_absent_host_is_not_found() {
    let store = InventoryStore::open_in_memory().unwrap();
    let err = store.delete_host(&name("ghost"), "x").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn bulk_add_is_atomic() {
    let store = InventoryStore::open_in_memory().unwrap();
    store
        .register_source("fleet.yml", "manual", None, "cli")
        .unwrap();

    // second row references a jump host that does not exist: whole batch
    // must roll back
    let bad_batch = vec![
        (name("ok-1"), basic_patch("10.0.0.1")),
        (
            name("bad-1"),
            HostPatch {
                hostname: Some("10.0.0.2".into()),
                jump_host: FieldUpdate::Set(name("missing-bastion")),
                ..HostPatch::default()
            },
        ),
    ];
    assert!(store.bulk_add_hosts(bad_batch, "fleet.yml").is_err());
    assert!(store.get_host("ok-1").unwrap().is_none());

    let good_batch = vec![
        (name("ok-1"), basic_patch("10.0.0.1")),
        (name("ok-2"), basic_patch("10.0.0.2")),
    ];
    assert_eq!(store.bulk_add_hosts(good_batch, "fleet.yml").unwrap(), 2);
    assert!(store.get_host("ok-2").unwrap().is_some());
}

#[test]
fn source_deletion_cascades_with_tombstones() {
    let store = InventoryStore::open_in_memory().unwrap();
    store
        .register_source("legacy.cfg", "ssh_config", Some("/tmp/cfg"), "cli")
        .unwrap();
    store
        .bulk_add_hosts(
            vec![
                (name("old-1"), basic_patch("10.0.1.1")),
                (name("old-2"), basic_patch("10.0.1.2")),
            ],
            "legacy.cfg",
        )
        .unwrap();
    // a manually added host survives
    store
        .add_host(&name("manual-1"), basic_patch("10.0.2.1"), "test", None)
        .unwrap();

    assert_eq!(store.delete_source("legacy.cfg").unwrap(), 2);
    assert!(store.get_host("old-1").unwrap().is_none());
    assert!(store.get_host("manual-1").unwrap().is_some());

    let tombstones = store.deletions(10).unwrap();
    assert_eq!(tombstones.len(), 2);
    assert!(tombstones.iter().all(|(_, r)| r == "source-removed:legacy.cfg"));
    assert!(store.sources().unwrap().is_empty());
}

#[test]
fn search_uses_structural_tag_predicate() {
    let store = InventoryStore::open_in_memory().unwrap();
    let mut web = basic_patch("10.0.0.1");
    web.tags = Some(BTreeSet::from(["web".to_string()]));
    store.add_host(&name("web-01"), web, "test", None).unwrap();

    let mut cam = basic_patch("10.0.0.2");
    cam.tags = Some(BTreeSet::from(["webcam".to_string()]));
    store.add_host(&name("cam-01"), cam, "test", None).unwrap();

    let found = store
        .search_hosts(&HostSearch {
            tag: Some("web".into()),
            ..HostSearch::default()
        })
        .unwrap();
    // "web" must not match the host tagged "webcam"
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, name("web-01"));
}

#[test]
fn search_filters_and_paginates() {
    let store = InventoryStore::open_in_memory().unwrap();
    for i in 1..=5 {
        let mut patch = basic_patch(&format!("10.0.0.{i}"));
        patch
            .metadata
            .insert("environment".into(), if i <= 3 { "prod" } else { "dev" }.into());
        store
            .add_host(&name(&format!("app-{i:02}")), patch, "test", None)
            .unwrap();
    }

    let prod = store
        .search_hosts(&HostSearch {
            environment: Some("prod".into()),
            ..HostSearch::default()
        })
        .unwrap();
    assert_eq!(prod.len(), 3);

    let page = store
        .search_hosts(&HostSearch {
            pattern: Some("app".into()),
            limit: 2,
            offset: 2,
            ..HostSearch::default()
        })
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].name, name("app-03"));
}

#[test]
fn jump_chain_depth_four_accepted_five_rejected() {
    let store = InventoryStore::open_in_memory().unwrap();
    store.add_host(&name("j4"), basic_patch("10.0.0.4"), "t", None).unwrap();
    for (host, jump) in [("j3", "j4"), ("j2", "j3"), ("j1", "j2")] {
        store
            .add_host(
                &name(host),
                HostPatch {
                    hostname: Some("10.0.0.0".into()),
                    jump_host: FieldUpdate::Set(name(jump)),
                    ..HostPatch::default()
                },
                "t",
                None,
            )
            .unwrap();
    }
    // target -> j1 -> j2 -> j3 -> j4: depth 4, accepted
    store
        .add_host(
            &name("target"),
            HostPatch {
                hostname: Some("10.0.0.9".into()),
                jump_host: FieldUpdate::Set(name("j1")),
                ..HostPatch::default()
            },
            "t",
            None,
        )
        .unwrap();
    // deeper -> target -> j1 -> j2 -> j3 -> j4: depth 5, rejected
    let err = store
        .add_host(
            &name("deeper"),
            HostPatch {
                hostname: Some("10.0.0.10".into()),
                jump_host: FieldUpdate::Set(name("target")),
                ..HostPatch::default()
            },
            "t",
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn jump_cycles_are_rejected() {
    let store = store_with(&[("a1", "10.0.0.1"), ("b1", "10.0.0.2")]);
    store
        .add_host(
            &name("a1"),
            HostPatch {
                jump_host: FieldUpdate::Set(name("b1")),
                ..HostPatch::default()
            },
            "t",
            None,
        )
        .unwrap();
    let err = store
        .add_host(
            &name("b1"),
            HostPatch {
                jump_host: FieldUpdate::Set(name("a1")),
                ..HostPatch::default()
            },
            "t",
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    // self-reference is the smallest cycle
    let err = store
        .add_host(
            &name("a1"),
            HostPatch {
                jump_host: FieldUpdate::Set(name("a1")),
                ..HostPatch::default()
            },
            "t",
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn missing_jump_host_is_rejected() {
    let store = InventoryStore::open_in_memory().unwrap();
    let err = store
        .add_host(
            &name("web-01"),
            HostPatch {
                hostname: Some("10.0.0.1".into()),
                jump_host: FieldUpdate::Set(name("nonexistent")),
                ..HostPatch::default()
            },
            "t",
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn variables_roundtrip() {
    let store = InventoryStore::open_in_memory().unwrap();
    store.var_set("db-01", "db-01.internal").unwrap();
    assert_eq!(
        store.var_get("db-01").unwrap().as_deref(),
        Some("db-01.internal")
    );
    store.var_set("db-01", "db-02.internal").unwrap();
    assert_eq!(
        store.var_get("db-01").unwrap().as_deref(),
        Some("db-02.internal")
    );
    assert_eq!(store.var_names().unwrap(), vec!["db-01".to_string()]);
    store.var_delete("db-01").unwrap();
    assert_eq!(store.var_get("db-01").unwrap(), None);
    store.var_delete("db-01").unwrap();
}

#[test]
fn audit_appends_and_reads_back() {
    let store = InventoryStore::open_in_memory().unwrap();
    let mut record = AuditRecord::new("alice", "exec", "web-01", AuditOutcome::Ok);
    record.command_hash = Some("abc123".into());
    record.duration_ms = Some(42);
    record.metadata = serde_json::json!({"method": "sudo", "stdin_used": false});
    store.append_audit(&record).unwrap();

    let records = store.recent_audit(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, "exec");
    assert_eq!(records[0].outcome, AuditOutcome::Ok);
    assert_eq!(records[0].metadata["method"], "sudo");
}

#[test]
fn prune_versions_keeps_newest() {
    let store = InventoryStore::open_in_memory().unwrap();
    for i in 1..=6 {
        store
            .add_host(&name("web-01"), basic_patch(&format!("10.0.0.{i}")), "t", None)
            .unwrap();
    }
    assert_eq!(store.versions(&name("web-01")).unwrap().len(), 6);
    let pruned = store.prune_versions(&name("web-01"), 2).unwrap();
    assert_eq!(pruned, 4);
    let left = store.versions(&name("web-01")).unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].0, 5);
}

#[test]
fn health_and_os_info_enrichment() {
    let store = store_with(&[("web-01", "10.0.0.1")]);
    let seen = chrono::Utc::now();
    store
        .record_health(&name("web-01"), HealthStatus::Healthy, Some(seen))
        .unwrap();
    store
        .record_os_info(&name("web-01"), &serde_json::json!({"uname": "Linux web-01"}))
        .unwrap();

    let host = store.get_host("web-01").unwrap().unwrap();
    assert_eq!(host.health_status, HealthStatus::Healthy);
    assert!(host.last_seen.is_some());
    assert_eq!(host.os_info.unwrap()["uname"], "Linux web-01");

    // enrichment for an unknown host is a silent no-op
    store
        .record_health(&name("ghost"), HealthStatus::Healthy, None)
        .unwrap();
}

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.db");
    {
        let store = InventoryStore::open(&path).unwrap();
        store
            .add_host(&name("web-01"), basic_patch("10.0.0.1"), "t", None)
            .unwrap();
    }
    let store = InventoryStore::open(&path).unwrap();
    assert!(store.get_host("web-01").unwrap().is_some());
}
