//! Consistency violations: the persisted counter disagrees with the
//! in-memory expected value.

use std::fmt;

use serde::Serialize;

/// Where in the cycle the check ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// Before writing: the previous cycle's value must still be there.
    BeforeWrite,
    /// After writing: this cycle's value must have landed.
    AfterWrite,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::BeforeWrite => write!(f, "before_write"),
            Checkpoint::AfterWrite => write!(f, "after_write"),
        }
    }
}

/// A detected mismatch. Reported, never corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyViolation {
    pub checkpoint: Checkpoint,
    pub expected: i64,
    /// `None` when the counter row itself was missing.
    pub observed: Option<i64>,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.observed {
            Some(observed) => write!(
                f,
                "{}: expected number to be {} but got {}",
                self.checkpoint, self.expected, observed
            ),
            None => write!(
                f,
                "{}: expected number to be {} but the counter row is missing",
                self.checkpoint, self.expected
            ),
        }
    }
}
