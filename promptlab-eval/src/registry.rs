//! Dataset registry backends.
//!
//! A registry stores named scenario datasets so a run can be traced back to
//! the exact items it used. Both operations are idempotent: asking for an
//! existing name returns the existing handle, and inserting an item whose
//! content is already present is a no-op.

use crate::scenario::ScenarioItem;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Prefix of the default dataset name.
pub const DEFAULT_DATASET_PREFIX: &str = "healthic-optimization";

/// Description attached to datasets created by the binary.
pub const DEFAULT_DATASET_DESCRIPTION: &str = "Health coach optimization scenarios";

/// Errors from a dataset registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("Dataset I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dataset serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid dataset name '{0}'")]
    InvalidName(String),

    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),

    /// An inserted item reuses an existing id with different content
    #[error("Dataset '{dataset}' already has a different item with id '{id}'")]
    IdConflict { dataset: String, id: String },
}

/// Reference to a registered dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

/// Storage for named scenario datasets.
///
/// Handles are shared across the process; implementations must tolerate
/// concurrent callers.
#[async_trait]
pub trait DatasetRegistry: Send + Sync {
    /// Return the dataset with this name, creating it if needed.
    ///
    /// An existing dataset keeps its original description.
    async fn get_or_create(
        &self,
        name: &str,
        description: &str,
    ) -> Result<DatasetHandle, RegistryError>;

    /// Look up an existing dataset without creating it.
    async fn get(&self, name: &str) -> Result<Option<DatasetHandle>, RegistryError>;

    /// Add items, skipping any whose content is already stored.
    ///
    /// Returns the number of items actually added.
    async fn insert(
        &self,
        handle: &DatasetHandle,
        items: &[ScenarioItem],
    ) -> Result<usize, RegistryError>;

    /// All items of the dataset in insertion order.
    async fn items(&self, handle: &DatasetHandle) -> Result<Vec<ScenarioItem>, RegistryError>;
}

/// Default dataset name for a given day: `healthic-optimization-YYYYMMDD`.
pub fn dated_dataset_name(date: NaiveDate) -> String {
    format!("{}-{}", DEFAULT_DATASET_PREFIX, date.format("%Y%m%d"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDataset {
    handle: DatasetHandle,
    items: Vec<ScenarioItem>,
}

impl StoredDataset {
    fn new(name: &str, description: &str) -> Self {
        Self {
            handle: DatasetHandle {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: description.to_string(),
            },
            items: Vec::new(),
        }
    }

    fn check_handle(&self, handle: &DatasetHandle) -> Result<(), RegistryError> {
        if self.handle.id == handle.id {
            Ok(())
        } else {
            Err(RegistryError::UnknownDataset(handle.name.clone()))
        }
    }

    /// Merge items into the dataset, returning how many were new.
    ///
    /// The batch is checked as a whole: on an id conflict nothing is stored.
    fn merge(&mut self, items: &[ScenarioItem]) -> Result<usize, RegistryError> {
        let mut fresh: Vec<&ScenarioItem> = Vec::new();
        for item in items {
            let mut known = self.items.iter().chain(fresh.iter().copied());
            if known.clone().any(|existing| existing.same_content(item)) {
                continue;
            }
            if known.any(|existing| existing.id == item.id) {
                return Err(RegistryError::IdConflict {
                    dataset: self.handle.name.clone(),
                    id: item.id.clone(),
                });
            }
            fresh.push(item);
        }

        let added = fresh.len();
        self.items.extend(fresh.into_iter().cloned());
        Ok(added)
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.trim().is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

/// Process-local registry, used in tests and when no directory is configured.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    datasets: Mutex<HashMap<String, StoredDataset>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_datasets<T>(&self, f: impl FnOnce(&mut HashMap<String, StoredDataset>) -> T) -> T {
        // Recover from poisoning: the map is only ever mutated atomically
        let mut guard = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl DatasetRegistry for InMemoryRegistry {
    async fn get_or_create(
        &self,
        name: &str,
        description: &str,
    ) -> Result<DatasetHandle, RegistryError> {
        validate_name(name)?;
        Ok(self.with_datasets(|datasets| {
            datasets
                .entry(name.to_string())
                .or_insert_with(|| StoredDataset::new(name, description))
                .handle
                .clone()
        }))
    }

    async fn get(&self, name: &str) -> Result<Option<DatasetHandle>, RegistryError> {
        validate_name(name)?;
        Ok(self.with_datasets(|datasets| datasets.get(name).map(|d| d.handle.clone())))
    }

    async fn insert(
        &self,
        handle: &DatasetHandle,
        items: &[ScenarioItem],
    ) -> Result<usize, RegistryError> {
        self.with_datasets(|datasets| {
            let dataset = datasets
                .get_mut(&handle.name)
                .ok_or_else(|| RegistryError::UnknownDataset(handle.name.clone()))?;
            dataset.check_handle(handle)?;
            dataset.merge(items)
        })
    }

    async fn items(&self, handle: &DatasetHandle) -> Result<Vec<ScenarioItem>, RegistryError> {
        self.with_datasets(|datasets| {
            let dataset = datasets
                .get(&handle.name)
                .ok_or_else(|| RegistryError::UnknownDataset(handle.name.clone()))?;
            dataset.check_handle(handle)?;
            Ok(dataset.items.clone())
        })
    }
}

/// Registry persisted as one `<name>.json` file per dataset.
///
/// Read-modify-write cycles are serialized within the process.
#[derive(Debug)]
pub struct JsonDirRegistry {
    dir: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonDirRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, RegistryError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.json", name)))
    }

    async fn read(&self, path: &Path) -> Result<Option<StoredDataset>, RegistryError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &Path, dataset: &StoredDataset) -> Result<(), RegistryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(dataset)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn load_existing(&self, handle: &DatasetHandle) -> Result<StoredDataset, RegistryError> {
        let path = self.path_for(&handle.name)?;
        let dataset = self
            .read(&path)
            .await?
            .ok_or_else(|| RegistryError::UnknownDataset(handle.name.clone()))?;
        dataset.check_handle(handle)?;
        Ok(dataset)
    }
}

#[async_trait]
impl DatasetRegistry for JsonDirRegistry {
    async fn get_or_create(
        &self,
        name: &str,
        description: &str,
    ) -> Result<DatasetHandle, RegistryError> {
        let path = self.path_for(name)?;
        let _guard = self.lock.lock().await;

        if let Some(existing) = self.read(&path).await? {
            return Ok(existing.handle);
        }

        let dataset = StoredDataset::new(name, description);
        self.write(&path, &dataset).await?;
        log::debug!("Created dataset '{}' at {}", name, path.display());
        Ok(dataset.handle)
    }

    async fn get(&self, name: &str) -> Result<Option<DatasetHandle>, RegistryError> {
        let path = self.path_for(name)?;
        let _guard = self.lock.lock().await;
        Ok(self.read(&path).await?.map(|dataset| dataset.handle))
    }

    async fn insert(
        &self,
        handle: &DatasetHandle,
        items: &[ScenarioItem],
    ) -> Result<usize, RegistryError> {
        let _guard = self.lock.lock().await;
        let mut dataset = self.load_existing(handle).await?;
        let added = dataset.merge(items)?;
        if added > 0 {
            self.write(&self.path_for(&handle.name)?, &dataset).await?;
        }
        Ok(added)
    }

    async fn items(&self, handle: &DatasetHandle) -> Result<Vec<ScenarioItem>, RegistryError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_existing(handle).await?.items)
    }
}
