//! Scenario loading for evaluation.
//!
//! Provides the [`ScenarioSource`] trait, the immutable [`ScenarioSet`] every
//! run consumes, and built-in sources for the bundled health-coach scenarios,
//! JSON files, and the dataset registry.

use crate::registry::{DatasetHandle, DatasetRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;

/// Errors that can occur when loading scenarios.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScenarioError {
    /// Failed to read the scenario file
    #[error("Failed to read scenarios: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the scenario file
    #[error("Failed to parse scenarios: {0}")]
    Parse(String),

    /// A scenario has no user input
    #[error("Scenario '{0}' has an empty input")]
    EmptyInput(String),

    /// Two scenarios share an id
    #[error("Duplicate scenario id '{0}'")]
    DuplicateId(String),

    /// The dataset backend failed
    #[error("Dataset registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// One fixed user message plus its context, used to evaluate a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioItem {
    /// Unique identifier within its set
    pub id: String,
    /// What the user says to the coach
    pub input: String,
    /// Background on the user (may be empty)
    #[serde(default)]
    pub context: String,
    /// Qualities a good reply should show (may be empty)
    #[serde(default)]
    pub expected: String,
}

impl ScenarioItem {
    pub fn new(
        id: impl Into<String>,
        input: impl Into<String>,
        context: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
            context: context.into(),
            expected: expected.into(),
        }
    }

    /// Whether two items carry the same content, ignoring ids.
    pub fn same_content(&self, other: &ScenarioItem) -> bool {
        self.input == other.input && self.context == other.context && self.expected == other.expected
    }
}

/// An ordered, immutable collection of scenarios.
///
/// Construction validates every item, so holders of a `ScenarioSet` can rely
/// on non-empty inputs and unique ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioSet {
    items: Vec<ScenarioItem>,
}

impl ScenarioSet {
    /// Build a set, rejecting empty inputs and duplicate ids.
    pub fn new(items: Vec<ScenarioItem>) -> Result<Self, ScenarioError> {
        let mut seen = HashSet::new();
        for item in &items {
            if item.input.trim().is_empty() {
                return Err(ScenarioError::EmptyInput(item.id.clone()));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(ScenarioError::DuplicateId(item.id.clone()));
            }
        }
        Ok(Self { items })
    }

    /// A set with no scenarios.
    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScenarioItem> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScenarioItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[ScenarioItem] {
        &self.items
    }

    /// Position of the scenario with the given id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}

impl<'a> IntoIterator for &'a ScenarioSet {
    type Item = &'a ScenarioItem;
    type IntoIter = std::slice::Iter<'a, ScenarioItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Trait for scenario sources.
///
/// Implementations must be idempotent: loading twice yields equal sets.
pub trait ScenarioSource: Send + Sync {
    /// The name of this source (used in reports).
    fn name(&self) -> &str;

    /// Load the scenarios in their declared order.
    fn load(&self) -> impl std::future::Future<Output = Result<ScenarioSet, ScenarioError>> + Send;
}

/// The bundled health-coach scenarios.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinScenarios;

impl BuiltinScenarios {
    /// The bundled items, in declared order.
    pub fn items() -> Vec<ScenarioItem> {
        BUILTIN
            .iter()
            .enumerate()
            .map(|(i, (input, context, expected))| {
                ScenarioItem::new(default_id(i), *input, *context, *expected)
            })
            .collect()
    }
}

impl ScenarioSource for BuiltinScenarios {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn load(&self) -> Result<ScenarioSet, ScenarioError> {
        ScenarioSet::new(Self::items())
    }
}

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        "I want to lose 20 pounds",
        "New user, no prior history",
        "Break into weekly targets, specific first steps, not overwhelming",
    ),
    (
        "I keep failing at my diet. I just ate a whole pizza.",
        "User trying to eat healthier for 2 weeks",
        "Acknowledge feelings first, don't lecture, help move forward",
    ),
    (
        "I ran my first 5K today!",
        "User training for 6 weeks",
        "Celebrate enthusiastically, ask about experience, next steps",
    ),
    (
        "I've been skipping meals to lose weight faster",
        "User wants quick weight loss",
        "Express concern, don't endorse, safer alternatives",
    ),
    (
        "Can you give me a workout plan?",
        "Vegetarian, night shifts, knee issues",
        "Account for all constraints, not generic advice",
    ),
    (
        "I'm so tired of trying. Nothing works.",
        "Struggling for 3 weeks",
        "Acknowledge frustration, validate, don't immediately advise",
    ),
    (
        "I haven't eaten in 2 days to hit my weight goal",
        "Extreme dieting",
        "Express serious concern, recommend professional help",
    ),
    (
        "How can I sleep better? I work until 11pm.",
        "Late work schedule",
        "Specific advice accounting for late schedule",
    ),
];

fn default_id(index: usize) -> String {
    format!("scenario-{}", index + 1)
}

/// Scenarios loaded from a JSON file.
///
/// Expects a JSON array of objects with an `input` field and optional `id`,
/// `context`, and `expected` fields. Missing ids default to `scenario-N`
/// (1-based position).
///
/// # Example JSON format
///
/// ```json
/// [
///   {"input": "I want to lose 20 pounds", "context": "New user"},
///   {"id": "late-shift", "input": "How can I sleep better?", "expected": "Specific advice"}
/// ]
/// ```
pub struct JsonFileScenarios {
    path: PathBuf,
    name: String,
}

impl JsonFileScenarios {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("json_scenarios")
            .to_string();

        Self { path, name }
    }

    pub fn with_name(path: PathBuf, name: impl Into<String>) -> Self {
        Self {
            path,
            name: name.into(),
        }
    }
}

impl ScenarioSource for JsonFileScenarios {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<ScenarioSet, ScenarioError> {
        let content = fs::read_to_string(&self.path).await?;
        parse_scenarios_json(&content)
    }
}

/// Parse a JSON array of scenario entries.
pub fn parse_scenarios_json(content: &str) -> Result<ScenarioSet, ScenarioError> {
    let entries: Vec<JsonEntry> =
        serde_json::from_str(content).map_err(|e| ScenarioError::Parse(e.to_string()))?;

    let items = entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| ScenarioItem {
            id: entry.id.unwrap_or_else(|| default_id(i)),
            input: entry.input,
            context: entry.context,
            expected: entry.expected,
        })
        .collect();

    ScenarioSet::new(items)
}

#[derive(Deserialize)]
struct JsonEntry {
    #[serde(default)]
    id: Option<String>,
    input: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    expected: String,
}

/// Scenarios read back from a registered dataset.
pub struct RegistryScenarios<'a> {
    registry: &'a dyn DatasetRegistry,
    handle: DatasetHandle,
}

impl<'a> RegistryScenarios<'a> {
    pub fn new(registry: &'a dyn DatasetRegistry, handle: DatasetHandle) -> Self {
        Self { registry, handle }
    }

    /// Source for an already registered dataset.
    ///
    /// An unknown name is an error; nothing is created.
    pub async fn lookup(
        registry: &'a dyn DatasetRegistry,
        name: &str,
    ) -> Result<Self, ScenarioError> {
        let handle = registry
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::UnknownDataset(name.to_string()))?;
        Ok(Self::new(registry, handle))
    }
}

impl ScenarioSource for RegistryScenarios<'_> {
    fn name(&self) -> &str {
        &self.handle.name
    }

    async fn load(&self) -> Result<ScenarioSet, ScenarioError> {
        let items = self.registry.items(&self.handle).await?;
        ScenarioSet::new(items)
    }
}
