use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::DocfillError;

/// Point in time after which a scan or fill is abandoned.
///
/// Format libraries cannot be interrupted mid-call, so the deadline is checked
/// between traversal steps (sheet, paragraph, table, page) rather than
/// preemptively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Deadline { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Deadline { at: Some(instant) }
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline::at(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fail with `DeadlineExceeded` if the deadline has passed.
    pub fn check(&self, path: &Path, stage: &str) -> Result<(), DocfillError> {
        if self.is_expired() {
            return Err(DocfillError::DeadlineExceeded {
                path: path.to_path_buf(),
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}
