//! Tests for the failure cleanup cascade and the orphan sweep.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{TimeDelta, Utc};
use common::{FlakyProbe, Harness, LockedProbe, write_file};
use testforge_rs::engine::CleanupOutcome;
use testforge_rs::error::Error;
use testforge_rs::model::{ProjectRecord, ProjectStatus};
use testforge_rs::store::ProjectStore;
use testforge_rs::template::ARTIFACTS;

fn cause() -> Error {
    Error::Other("scaffold exploded".to_string())
}

/// A workspace that looks like a generation got most of the way through.
async fn populated_workspace(harness: &Harness, name: &str) -> ProjectRecord {
    let project = harness.project(name);
    let dir = harness.workspaces.create_workspace(name).await.unwrap();
    for artifact in ARTIFACTS {
        write_file(&dir.join(artifact.path), "generated");
    }
    write_file(&dir.join("node_modules/@playwright/test/index.js"), "module");
    write_file(&dir.join("package-lock.json"), "{}");
    write_file(&dir.join("test-results/run.json"), "{}");
    write_file(&dir.join("playwright-report/index.html"), "<html/>");
    write_file(&dir.join(".cache/state"), "x");
    project
}

#[tokio::test]
async fn cascade_restores_minimal_config() {
    let harness = Harness::new();
    let project = populated_workspace(&harness, "orders").await;
    let dir = harness.root().join("orders");
    write_file(&dir.join("features/checkout.feature"), "Feature: checkout");

    let outcome = harness.cleanup.cleanup_failed_project(&project, &cause()).await;

    assert_eq!(outcome, CleanupOutcome::Restored);
    for gone in [
        "src/api/client.ts",
        "features/support/world.ts",
        ".env",
        "README.md",
        "node_modules",
        "package-lock.json",
        "test-results",
        "playwright-report",
        ".cache",
    ] {
        assert!(!dir.join(gone).exists(), "{gone} should be removed");
    }

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("package.json")).unwrap())
            .unwrap();
    assert_eq!(manifest["name"], "orders");
    let config = std::fs::read_to_string(dir.join("playwright.config.ts")).unwrap();
    assert!(config.contains("https://api.example.test"));

    // files the generator never wrote are left alone
    assert!(dir.join("features/checkout.feature").is_file());
}

#[tokio::test]
async fn missing_workspace_needs_no_cleanup() {
    let harness = Harness::new();
    let project = harness.project("never-created");

    let outcome = harness.cleanup.cleanup_failed_project(&project, &cause()).await;

    assert_eq!(outcome, CleanupOutcome::NothingToClean);
    assert!(!harness.root().join("never-created").exists());
}

#[tokio::test]
async fn cascade_tolerates_a_partial_workspace() {
    let harness = Harness::new();
    let project = harness.project("orders");
    let dir = harness.workspaces.create_workspace("orders").await.unwrap();

    let outcome = harness.cleanup.cleanup_failed_project(&project, &cause()).await;

    assert_eq!(outcome, CleanupOutcome::Restored);
    assert!(dir.join("package.json").is_file());
    assert!(dir.join("playwright.config.ts").is_file());
}

#[tokio::test]
async fn stubborn_artifact_triggers_emergency_wipe() {
    // blocked for every probe of the cascade's delete, free by the wipe
    let probe = Arc::new(FlakyProbe::new("src/api/client.ts", 3));
    let harness = Harness::with_probe(probe.clone());
    let project = populated_workspace(&harness, "orders").await;

    let outcome = harness.cleanup.cleanup_failed_project(&project, &cause()).await;

    assert_eq!(outcome, CleanupOutcome::EmergencyWiped);
    assert!(!harness.root().join("orders").exists());
    assert_eq!(probe.probes.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failed_emergency_wipe_is_only_logged() {
    let harness = Harness::with_probe(Arc::new(LockedProbe));
    let project = populated_workspace(&harness, "orders").await;

    let outcome = harness.cleanup.cleanup_failed_project(&project, &cause()).await;

    assert_eq!(outcome, CleanupOutcome::EmergencyFailed);
    assert!(harness.root().join("orders").exists());
}

#[tokio::test]
async fn sweep_fails_old_pending_projects_only() {
    let harness = Harness::new();

    let mut stale = common::project(harness.root(), "stale");
    stale.updated_at = Utc::now() - TimeDelta::minutes(31);
    harness.store.insert(stale.clone());
    harness.workspaces.create_workspace("stale").await.unwrap();

    let mut fresh = common::project(harness.root(), "fresh");
    fresh.updated_at = Utc::now() - TimeDelta::minutes(5);
    harness.store.insert(fresh.clone());

    let swept = harness.cleanup.sweep_orphans().await.unwrap();

    assert_eq!(swept, 1);
    assert_eq!(harness.store.status(stale.id), Some(ProjectStatus::Failed));
    assert_eq!(harness.store.status(fresh.id), Some(ProjectStatus::Pending));
    assert!(harness.root().join("stale/package.json").is_file());

    let pending = harness.store.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, fresh.id);
}

#[tokio::test]
async fn sweep_ignores_records_that_are_not_pending() {
    let harness = Harness::new();
    let mut ready = common::project(harness.root(), "done");
    ready.status = ProjectStatus::Ready;
    ready.updated_at = Utc::now() - TimeDelta::hours(3);
    harness.store.insert(ready.clone());

    let swept = harness.cleanup.cleanup_orphaned_projects(&[ready.clone()]).await;

    assert_eq!(swept, 0);
    assert_eq!(harness.store.status(ready.id), Some(ProjectStatus::Ready));
}

#[tokio::test]
async fn record_outside_the_root_is_never_touched() {
    let harness = Harness::new();
    let mut project = common::project(harness.root(), "orders");
    let foreign = harness.dir.path().join("elsewhere/orders");
    write_file(&foreign.join("README.md"), "not ours");
    project.workspace_path = foreign.clone();
    harness.workspaces.create_workspace("orders").await.unwrap();
    write_file(&harness.root().join("orders/.env"), "BASE_URL=x");

    let outcome = harness.cleanup.cleanup_failed_project(&project, &cause()).await;

    assert_eq!(outcome, CleanupOutcome::NothingToClean);
    assert!(foreign.join("README.md").is_file());
    assert!(harness.root().join("orders/.env").is_file());
}
