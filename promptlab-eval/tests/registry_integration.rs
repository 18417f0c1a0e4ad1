//! Integration tests for dataset registration and reload.

mod common;

use common::three_scenarios;
use promptlab_eval::{
    dated_dataset_name, BuiltinScenarios, DatasetRegistry, JsonDirRegistry, RegistryError,
    RegistryScenarios, ScenarioError, ScenarioSource,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_registry_idempotent_by_name() {
    let dir = TempDir::new().unwrap();
    let registry = JsonDirRegistry::new(dir.path().join("datasets"));
    let name = dated_dataset_name(chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

    let scenarios = BuiltinScenarios.load().await.unwrap();
    let handle = registry
        .get_or_create(&name, "Health coach optimization scenarios")
        .await
        .unwrap();
    assert_eq!(registry.insert(&handle, scenarios.items()).await.unwrap(), 8);

    // Second run on the same day
    let again = registry.get_or_create(&name, "different").await.unwrap();
    assert_eq!(again, handle);
    assert_eq!(registry.insert(&again, scenarios.items()).await.unwrap(), 0);

    let reloaded = RegistryScenarios::new(&registry, again).load().await.unwrap();
    assert_eq!(reloaded, scenarios);
}

#[tokio::test]
async fn test_registry_source_name() {
    let dir = TempDir::new().unwrap();
    let registry = JsonDirRegistry::new(dir.path());
    let handle = registry.get_or_create("coach-set", "").await.unwrap();
    registry
        .insert(&handle, three_scenarios().items())
        .await
        .unwrap();

    let source = RegistryScenarios::new(&registry, handle);
    assert_eq!(source.name(), "coach-set");
    assert_eq!(source.load().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_lookup_of_unknown_dataset_fails_without_creating() {
    let dir = TempDir::new().unwrap();
    let registry = JsonDirRegistry::new(dir.path());

    let result = RegistryScenarios::lookup(&registry, "healthic-optimization-2024013").await;
    assert!(matches!(
        result,
        Err(ScenarioError::Registry(RegistryError::UnknownDataset(name)))
            if name == "healthic-optimization-2024013"
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let handle = registry.get_or_create("coach-set", "").await.unwrap();
    registry
        .insert(&handle, three_scenarios().items())
        .await
        .unwrap();
    let source = RegistryScenarios::lookup(&registry, "coach-set").await.unwrap();
    assert_eq!(source.load().await.unwrap().len(), 3);
}
