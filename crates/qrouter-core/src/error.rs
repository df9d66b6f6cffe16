use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    // Transition errors
    #[error("Event \"{event}\" not found on section \"{section}\"")]
    EventNotFound { event: String, section: String },

    #[error("No matching target for section \"{section}\"")]
    NoMatchingTarget { section: String },

    #[error("No next section after final section \"{section}\"")]
    NoNextSection { section: String },

    #[error("No previous section before \"{section}\"")]
    NoPreviousSection { section: String },

    #[error("Section \"{section}\" is not available")]
    SectionUnavailable { section: String },

    // Lookup errors
    #[error("Unknown section: {0}")]
    UnknownSection(String),

    #[error("Unknown machine: {0}")]
    UnknownMachine(String),

    // Definition errors
    #[error("Invalid route graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid router context: {0}")]
    InvalidContext(String),

    // Condition evaluator errors
    #[error("Condition evaluation failed: {0}")]
    Condition(String),

    // Parallel propagation
    #[error("Event propagation did not settle after {0} iterations")]
    PropagationLimit(usize),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RouterError {
    /// Errors a member machine raises when a broadcast event simply does not
    /// concern it. The parallel router discards these while broadcasting.
    pub fn is_ignorable_broadcast(&self) -> bool {
        matches!(
            self,
            RouterError::EventNotFound { .. } | RouterError::NoNextSection { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
