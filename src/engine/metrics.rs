//! Reply tracing.
//!
//! Every resolution step (the top-level turn, the BEGIN pass, each redirect)
//! appends one [`ReplyStep`]. The trace is always collected; it is a handful
//! of small strings per turn. `Interpreter::reply` drops it and
//! `Interpreter::reply_verbose` turns it into `ReplyDetails`.

use std::time::Duration;

// --- Trace -------------------------------------------------------------------

/// One pass through the dialogue engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyStep {
    /// Recursion depth, 0 for the turn itself.
    pub step: usize,
    /// Topic the step searched.
    pub topic: String,
    /// Normalized message the step matched against.
    pub message: String,
    /// Raw pattern of the matched trigger.
    pub matched: Option<String>,
    /// Topic that owns the matched trigger (differs from `topic` when inherited).
    pub owner: Option<String>,
    pub via_previous: bool,
    pub begin: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ReplyTrace {
    pub steps: Vec<ReplyStep>,
    pub redirects: usize,
    pub total: Duration,
}

impl ReplyTrace {
    pub fn record(&mut self, step: ReplyStep) {
        self.steps.push(step);
    }

    /// Deepest recursion step reached.
    pub fn deepest(&self) -> usize {
        self.steps.iter().map(|s| s.step).max().unwrap_or(0)
    }

    /// The step that answered the user's message (BEGIN passes excluded).
    pub fn main_match(&self) -> Option<&ReplyStep> {
        self.steps.iter().find(|s| !s.begin && s.step == 0)
    }
}
