use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::seed::SeedSequence;

/// Reserved keyword under which a task's seed is passed to its function.
pub const SEED_KEY: &str = "seed";

/// Keyword arguments for one task call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kwargs(Map<String, Value>);

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Returns `None` for any other JSON value.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserialize a single argument.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, KwargError> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| KwargError::Missing(key.to_string()))?;
        T::deserialize(value).map_err(|e| KwargError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// The seed argument, if any. Accepts either a serialized
    /// [`SeedSequence`] or a plain non-negative integer; anything else is
    /// [`KwargError::Invalid`].
    pub fn seed(&self) -> Result<Option<SeedSequence>, KwargError> {
        let Some(value) = self.0.get(SEED_KEY) else {
            return Ok(None);
        };
        let invalid = |message: String| KwargError::Invalid {
            key: SEED_KEY.to_string(),
            message,
        };
        match value {
            Value::Number(n) => match n.as_u64() {
                Some(seed) => Ok(Some(SeedSequence::new(seed))),
                None => Err(invalid(format!(
                    "seed must be a non-negative integer below 2^64, got {}",
                    n
                ))),
            },
            other => SeedSequence::deserialize(other)
                .map(Some)
                .map_err(|e| invalid(e.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Kwargs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KwargError {
    #[error("missing argument `{0}`")]
    Missing(String),
    #[error("invalid argument `{key}`: {message}")]
    Invalid { key: String, message: String },
}

/// One unit of work: its position in the input list, its arguments and the
/// seed derived for that position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub index: usize,
    pub kwargs: Kwargs,
    pub seed: SeedSequence,
}

impl Task {
    pub fn new(index: usize, kwargs: Kwargs, seed: SeedSequence) -> Self {
        Self {
            index,
            kwargs,
            seed,
        }
    }

    /// Arguments as the function sees them: the derived seed is added under
    /// [`SEED_KEY`] unless the caller already supplied one.
    pub fn call_kwargs(&self) -> Result<Kwargs, serde_json::Error> {
        let mut kwargs = self.kwargs.clone();
        if !kwargs.contains_key(SEED_KEY) {
            kwargs.insert(SEED_KEY, serde_json::to_value(&self.seed)?);
        }
        Ok(kwargs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What happened to one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub index: usize,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Slot of the worker that ran the task.
    pub slot: Option<usize>,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn completed(index: usize, result: Value) -> Self {
        Self {
            index,
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            slot: None,
            elapsed_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            slot: None,
            elapsed_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn on_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Input-ordered results of a batch.
///
/// `results[i]` is only meaningful when `completed[i]` is true.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvalOutput {
    pub results: Vec<Option<Value>>,
    pub completed: Vec<bool>,
    pub errors: Vec<Option<String>>,
}

impl EvalOutput {
    /// Assemble from outcomes in any order. Fails if an index is missing or
    /// out of range.
    pub fn from_outcomes(
        len: usize,
        outcomes: impl IntoIterator<Item = TaskOutcome>,
    ) -> Result<Self, usize> {
        let mut slots: Vec<Option<TaskOutcome>> = vec![None; len];
        for outcome in outcomes {
            let index = outcome.index;
            match slots.get_mut(index) {
                Some(entry) => *entry = Some(outcome),
                None => return Err(index),
            }
        }

        let mut output = EvalOutput {
            results: Vec::with_capacity(len),
            completed: Vec::with_capacity(len),
            errors: Vec::with_capacity(len),
        };
        for (index, outcome) in slots.into_iter().enumerate() {
            let outcome = outcome.ok_or(index)?;
            output.completed.push(outcome.is_completed());
            output.results.push(outcome.result);
            output.errors.push(outcome.error);
        }
        Ok(output)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_completed(&self) -> bool {
        self.completed.iter().all(|&c| c)
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.completed
            .iter()
            .enumerate()
            .filter_map(|(i, &c)| (!c).then_some(i))
            .collect()
    }

    pub fn into_parts(self) -> (Vec<Option<Value>>, Vec<bool>) {
        (self.results, self.completed)
    }
}
