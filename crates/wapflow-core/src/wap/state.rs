//! Run state machine.
//!
//! ```text
//! INIT -> STAGED -> AUDITED -> PUBLISHED
//!   |        |         \-----> REJECTED
//!   \--------+---------+-----> ABORTED
//! ```

use crate::model::TableName;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// State of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Staged,
    Audited,
    Published,
    Rejected,
    Aborted,
}

impl RunState {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Published | RunState::Rejected | RunState::Aborted
        )
    }

    /// Whether `self -> next` is an edge of the state graph.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, Staged)
                | (Staged, Audited)
                | (Audited, Published)
                | (Audited, Rejected)
                | (Init, Aborted)
                | (Staged, Aborted)
                | (Audited, Aborted)
        )
    }

    /// Upper-case label used in logs and the journal.
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::Staged => "STAGED",
            RunState::Audited => "AUDITED",
            RunState::Published => "PUBLISHED",
            RunState::Rejected => "REJECTED",
            RunState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// One WAP run: identity, current state and its transition history.
#[derive(Debug, Clone)]
pub struct Run {
    run_id: String,
    destination: TableName,
    state: RunState,
    transitions: Vec<Transition>,
    started_at: DateTime<Utc>,
}

impl Run {
    /// Create a run in `INIT`.
    pub fn new(run_id: impl Into<String>, destination: TableName) -> Self {
        Self {
            run_id: run_id.into(),
            destination,
            state: RunState::Init,
            transitions: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn destination(&self) -> &TableName {
        &self.destination
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Move to `to`, recording and logging the transition.
    ///
    /// Fails with [`Error::InvalidTransition`] for edges outside the graph,
    /// including any move out of a terminal state.
    pub fn transition(&mut self, to: RunState, detail: Option<String>) -> Result<&Transition> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let transition = Transition {
            from,
            to,
            at: Utc::now(),
            detail,
        };

        info!(
            run_id = %self.run_id,
            destination = %self.destination,
            from = %transition.from,
            to = %transition.to,
            at = %transition.at.to_rfc3339(),
            detail = transition.detail.as_deref().unwrap_or(""),
            "Run state transition"
        );

        self.state = to;
        self.transitions.push(transition);
        Ok(&self.transitions[self.transitions.len() - 1])
    }

    /// Consume the run, returning its history.
    pub fn into_transitions(self) -> Vec<Transition> {
        self.transitions
    }
}
