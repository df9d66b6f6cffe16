pub mod config;
pub mod equality;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{AppConfig, CascadeDetection, RouterOptions};
pub use error::{Result, RouterError};
pub use event::RouterEvent;
pub use traits::{ConditionEvaluator, ExtendedState};
pub use types::*;
