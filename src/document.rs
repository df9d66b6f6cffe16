use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use qrouter_core::error::{Result, RouterError};
use qrouter_core::{ParallelContext, TaskContext};

/// A persisted questionnaire, routed by a single-task or a parallel router
/// depending on `routes.type`.
#[derive(Debug)]
pub enum Document {
    Task(TaskContext),
    Parallel(ParallelContext),
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_value(serde_json::from_str(&raw)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value.pointer("/routes/type").and_then(Value::as_str) {
            None => Ok(Document::Task(serde_json::from_value(value)?)),
            Some("parallel") => Ok(Document::Parallel(serde_json::from_value(value)?)),
            Some(other) => Err(RouterError::InvalidGraph(format!(
                "unsupported graph type \"{other}\""
            ))),
        }
    }
}

/// Write a context back as pretty-printed JSON.
pub fn save<C: Serialize>(path: &Path, context: &C) -> Result<()> {
    let mut json = serde_json::to_string_pretty(context)?;
    json.push('\n');
    std::fs::write(path, json)?;
    Ok(())
}
