use std::fmt;
use std::str::FromStr;

use qrouter_core::error::RouterError;
use qrouter_core::MACHINE_REF_PREFIX;

/// A navigation target in a parallel graph: a whole member machine
/// (`#task-a`) or a plain section id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Machine(String),
    Section(String),
}

impl Address {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(MACHINE_REF_PREFIX) {
            Some(machine) => Address::Machine(machine.to_string()),
            None => Address::Section(raw.to_string()),
        }
    }

    /// The id without any prefix.
    pub fn id(&self) -> &str {
        match self {
            Address::Machine(id) | Address::Section(id) => id,
        }
    }
}

impl FromStr for Address {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Machine(id) => write!(f, "{MACHINE_REF_PREFIX}{id}"),
            Address::Section(id) => f.write_str(id),
        }
    }
}
