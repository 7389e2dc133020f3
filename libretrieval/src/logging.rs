use std::fmt::{Display, Formatter};

/// The log target a component writes under. Components receive one at construction instead of reaching for a
/// module-level logger, so that several clients or providers in one process can be told apart in the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget(String);

impl LogTarget {
    pub fn new(target: impl Into<String>) -> Self {
        LogTarget(target.into())
    }

    /// A child target, e.g. `retrieval::provider` -> `retrieval::provider::revalidator`.
    pub fn child(&self, name: &str) -> Self {
        LogTarget(format!("{}::{name}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LogTarget {
    fn default() -> Self {
        LogTarget::new("retrieval")
    }
}

impl Display for LogTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
