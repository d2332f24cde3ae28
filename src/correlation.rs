//! Correlation between scheduling points and their completions.
//!
//! Every durable operation an orchestration schedules gets a monotonically
//! increasing id from [`SequenceCounter`]. Completions arriving from the hub
//! reference that id (`task_scheduled_id` / `timer_id`), and the
//! [`CorrelationMap`] matches them back up in O(1). Because orchestration
//! logic re-executes deterministically, replay re-derives the exact same ids
//! without persisting the counter.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use crate::history::TaskFailureDetails;

/// First id handed out in each execution. Resets only on continue-as-new.
pub const INITIAL_SEQUENCE_ID: i32 = 1;

/// Monotonic id source for one execution. Ids are never reused.
#[derive(Debug)]
pub struct SequenceCounter {
    next: i32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            next: INITIAL_SEQUENCE_ID,
        }
    }

    pub fn next_id(&mut self) -> i32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of completion an outstanding id is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Task,
    Timer,
    SubOrchestration,
}

impl PendingKind {
    pub fn label(self) -> &'static str {
        match self {
            PendingKind::Task => "task",
            PendingKind::Timer => "timer",
            PendingKind::SubOrchestration => "sub-orchestration",
        }
    }
}

/// A resolved completion, keyed by the scheduling id it answers.
#[derive(Debug, Clone)]
pub enum CompletionValue {
    Task(Result<Option<String>, TaskFailureDetails>),
    TimerFired { fire_at_ms: u64 },
    SubOrchestration(Result<Option<String>, TaskFailureDetails>),
}

impl CompletionValue {
    fn kind(&self) -> PendingKind {
        match self {
            CompletionValue::Task(_) => PendingKind::Task,
            CompletionValue::TimerFired { .. } => PendingKind::Timer,
            CompletionValue::SubOrchestration(_) => PendingKind::SubOrchestration,
        }
    }
}

#[derive(Debug, Clone)]
struct RaisedEvent {
    name: String,
    input: Option<String>,
}

/// Per-pass bookkeeping for outstanding work, resolved completions, and
/// raised external events. Single-writer: one pass per instance at a time.
#[derive(Debug, Default)]
pub struct CorrelationMap {
    outstanding: HashMap<i32, PendingKind>,
    completions: HashMap<i32, CompletionValue>,
    in_history: HashSet<i32>,
    raised: VecDeque<RaisedEvent>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scheduling point. `from_history` marks ids rehydrated from
    /// past events, which must not re-emit actions when re-claimed.
    pub fn record_scheduled(&mut self, id: i32, kind: PendingKind, from_history: bool) {
        self.outstanding.insert(id, kind);
        if from_history {
            self.in_history.insert(id);
        }
    }

    pub fn is_in_history(&self, id: i32) -> bool {
        self.in_history.contains(&id)
    }

    /// Mark an id as already acted on in history without an outstanding
    /// completion (fire-and-forget sends).
    pub fn record_in_history(&mut self, id: i32) {
        self.in_history.insert(id);
    }

    /// Resolve an outstanding id. Returns `false` (after a `warn!`) for
    /// unknown ids, duplicates, and kind mismatches; redelivery from an
    /// at-least-once hub must never be fatal.
    pub fn resolve(&mut self, id: i32, value: CompletionValue) -> bool {
        match self.outstanding.get(&id) {
            None => {
                if self.completions.contains_key(&id) {
                    warn!(id, kind = value.kind().label(), "duplicate completion ignored");
                } else {
                    warn!(id, kind = value.kind().label(), "completion for unknown id ignored");
                }
                false
            }
            Some(kind) if *kind != value.kind() => {
                warn!(
                    id,
                    expected = kind.label(),
                    got = value.kind().label(),
                    "completion kind mismatch ignored"
                );
                false
            }
            Some(_) => {
                self.outstanding.remove(&id);
                self.completions.insert(id, value);
                true
            }
        }
    }

    /// Consume the completion for `id`, if resolved.
    pub fn take_completion(&mut self, id: i32) -> Option<CompletionValue> {
        self.completions.remove(&id)
    }

    /// Buffer a raised external event for later `wait_event` consumption.
    pub fn push_event(&mut self, name: impl Into<String>, input: Option<String>) {
        self.raised.push_back(RaisedEvent {
            name: name.into(),
            input,
        });
    }

    /// Pop the oldest buffered event with the given name, FIFO per name.
    pub fn pop_event(&mut self, name: &str) -> Option<Option<String>> {
        let pos = self.raised.iter().position(|e| e.name == name)?;
        self.raised.remove(pos).map(|e| e.input)
    }

    /// Buffered events nobody consumed this execution, in arrival order.
    /// Continue-as-new carries these into the next execution.
    pub fn unconsumed_events(&self) -> Vec<(String, Option<String>)> {
        self.raised
            .iter()
            .map(|e| (e.name.clone(), e.input.clone()))
            .collect()
    }

    pub fn has_outstanding(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }
}
