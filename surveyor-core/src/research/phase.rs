//! The research pipeline's phase state machine.

use crate::error::CoordinatorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current phase of a research run.
///
/// Phases run strictly in declaration order; each is reachable only from
/// its immediate predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResearchPhase {
    ProblemDefinition,
    Methodology,
    Sampling,
    Questionnaire,
    Collection,
    Analysis,
    Projections,
    Recommendations,
    Report,
    Done,
}

impl ResearchPhase {
    pub const ALL: [ResearchPhase; 10] = [
        Self::ProblemDefinition,
        Self::Methodology,
        Self::Sampling,
        Self::Questionnaire,
        Self::Collection,
        Self::Analysis,
        Self::Projections,
        Self::Recommendations,
        Self::Report,
        Self::Done,
    ];

    /// Number of working phases (everything before `Done`).
    pub const WORKING_PHASES: usize = 9;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProblemDefinition => "problem-definition",
            Self::Methodology => "methodology",
            Self::Sampling => "sampling",
            Self::Questionnaire => "questionnaire",
            Self::Collection => "collection",
            Self::Analysis => "analysis",
            Self::Projections => "projections",
            Self::Recommendations => "recommendations",
            Self::Report => "report",
            Self::Done => "done",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// The phase that follows this one; `None` once done.
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn is_done(self) -> bool {
        self == Self::Done
    }

    /// Percent of the pipeline completed on entry to this phase.
    pub fn progress_percent(self) -> f64 {
        self.index() as f64 / Self::WORKING_PHASES as f64 * 100.0
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        self.next() == Some(to)
    }
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchPhase {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| CoordinatorError::UnknownPhase {
                name: s.to_string(),
            })
    }
}
