//! Context budget manager.
//!
//! Accumulated research context is kept as prioritized, token-costed items.
//! Once the total passes the eviction threshold, the least important items
//! are dropped (priority 10 first, oldest first within a priority). Dropped
//! items below the summary bound leave a short per-kind summary behind.
//! Priority 1 items are never evicted.

use crate::config::ContextConfig;
use crate::model::{TokenCounter, estimate_tokens};
use crate::research::ResearchPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Priority that is never evicted.
pub const PINNED_PRIORITY: u8 = 1;
/// Least important priority, evicted first.
pub const LOWEST_PRIORITY: u8 = 10;

const SUMMARY_HEADING: &str = "[Summarized context]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextKind {
    ProblemDefinition,
    Methodology,
    Sampling,
    Questionnaire,
    Collection,
    Analysis,
    Projections,
    Recommendations,
    Report,
    Note,
}

impl ContextKind {
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
            Self::Note => "note",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context kinds fed to the scientist in `phase`; `None` means everything.
pub fn relevant_kinds(phase: ResearchPhase) -> Option<&'static [ContextKind]> {
    use ContextKind as K;
    let kinds: &'static [ContextKind] = match phase {
        ResearchPhase::ProblemDefinition | ResearchPhase::Methodology => {
            &[K::ProblemDefinition, K::Note]
        }
        ResearchPhase::Sampling => &[K::ProblemDefinition, K::Methodology],
        ResearchPhase::Questionnaire => &[K::ProblemDefinition, K::Methodology, K::Sampling],
        ResearchPhase::Collection => &[K::Questionnaire],
        ResearchPhase::Analysis => &[
            K::ProblemDefinition,
            K::Methodology,
            K::Sampling,
            K::Questionnaire,
            K::Collection,
        ],
        ResearchPhase::Projections => &[K::Analysis, K::Sampling],
        ResearchPhase::Recommendations => &[K::ProblemDefinition, K::Analysis, K::Projections],
        ResearchPhase::Report | ResearchPhase::Done => return None,
    };
    Some(kinds)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub content: String,
    pub kind: ContextKind,
    /// 1 = never evict, 10 = first to evict.
    pub priority: u8,
    pub tokens: usize,
    pub created_at: DateTime<Utc>,
    /// Insertion order, breaks timestamp ties.
    pub sequence: u64,
}

/// Bounded store of research context.
#[derive(Debug, Clone)]
pub struct ContextManager {
    items: Vec<ContextItem>,
    summaries: BTreeMap<ContextKind, String>,
    config: ContextConfig,
    counter: Option<Arc<TokenCounter>>,
    evicted: usize,
    next_sequence: u64,
}

impl ContextManager {
    /// Manager with default thresholds and the `len / 4` estimate.
    pub fn new(budget_tokens: usize) -> Self {
        Self::from_config(
            &ContextConfig {
                budget_tokens,
                ..ContextConfig::default()
            },
            None,
        )
    }

    pub fn from_config(config: &ContextConfig, counter: Option<Arc<TokenCounter>>) -> Self {
        Self {
            items: Vec::new(),
            summaries: BTreeMap::new(),
            config: config.clone(),
            counter,
            evicted: 0,
            next_sequence: 0,
        }
    }

    pub fn budget(&self) -> usize {
        self.config.budget_tokens
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub fn summaries(&self) -> &BTreeMap<ContextKind, String> {
        &self.summaries
    }

    pub fn total_tokens(&self) -> usize {
        self.items.iter().map(|i| i.tokens).sum()
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.config.budget_tokens == 0 {
            return 1.0;
        }
        self.total_tokens() as f64 / self.config.budget_tokens as f64
    }

    /// Items evicted over the manager's lifetime.
    pub fn evicted_count(&self) -> usize {
        self.evicted
    }

    fn limit(&self) -> f64 {
        self.config.budget_tokens as f64 * self.config.eviction_threshold
    }

    /// Add an item, then optimize. Priority is clamped to 1..=10.
    /// Returns the item's token estimate.
    pub fn add_item(&mut self, content: impl Into<String>, kind: ContextKind, priority: u8) -> usize {
        let content = content.into();
        let tokens = estimate_tokens(self.counter.as_deref(), &content);
        self.items.push(ContextItem {
            content,
            kind,
            priority: priority.clamp(PINNED_PRIORITY, LOWEST_PRIORITY),
            tokens,
            created_at: Utc::now(),
            sequence: self.next_sequence,
        });
        self.next_sequence += 1;
        self.optimize();
        tokens
    }

    /// Evict until the total is within the threshold or only pinned items
    /// remain. Returns the number of items evicted by this call.
    pub fn optimize(&mut self) -> usize {
        let mut removed = 0;
        while self.total_tokens() as f64 > self.limit() {
            let Some(victim) = self.next_victim() else {
                break;
            };
            let item = self.items.remove(victim);
            debug!(
                kind = %item.kind,
                priority = item.priority,
                tokens = item.tokens,
                "Evicting context item"
            );
            if item.priority < self.config.summary_priority_bound {
                self.summarize(&item);
            }
            removed += 1;
        }
        self.evicted += removed;
        removed
    }

    /// Highest priority number, then oldest.
    fn next_victim(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.priority > PINNED_PRIORITY)
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| b.sequence.cmp(&a.sequence))
            })
            .map(|(idx, _)| idx)
    }

    fn summarize(&mut self, item: &ContextItem) {
        let mut summary: String = item
            .content
            .chars()
            .take(self.config.summary_length)
            .collect();
        if item.content.chars().count() > self.config.summary_length {
            summary.push('…');
        }
        self.summaries
            .entry(item.kind)
            .and_modify(|existing| {
                existing.push_str(" | ");
                existing.push_str(&summary);
            })
            .or_insert(summary);
    }

    /// Concatenated live items relevant to `phase`, followed by summaries
    /// of evicted relevant items.
    pub fn get_context_for_phase(&self, phase: ResearchPhase) -> String {
        let relevant = relevant_kinds(phase);
        let is_relevant = |kind: &ContextKind| relevant.is_none_or(|kinds| kinds.contains(kind));

        let mut sections: Vec<String> = self
            .items
            .iter()
            .filter(|item| is_relevant(&item.kind))
            .map(|item| format!("[{}]\n{}", item.kind, item.content))
            .collect();

        let summaries: Vec<String> = self
            .summaries
            .iter()
            .filter(|(kind, _)| is_relevant(kind))
            .map(|(kind, summary)| format!("- {kind}: {summary}"))
            .collect();
        if !summaries.is_empty() {
            sections.push(format!("{SUMMARY_HEADING}\n{}", summaries.join("\n")));
        }
        sections.join("\n\n")
    }

    /// Drop all items and summaries.
    pub fn clear(&mut self) {
        self.items.clear();
        self.summaries.clear();
    }
}
