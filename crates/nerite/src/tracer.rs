//! Execution tracing hooks.
//!
//! The interpreter is generic over a [`VmTracer`]; the default
//! [`NoopTracer`] compiles every hook away. [`StderrTracer`] prints a line
//! per event for ad-hoc debugging, and [`RecordingTracer`] accumulates
//! events so tests can assert on execution behavior (loop iterations, cache
//! invalidations) without instrumenting the interpreter itself.

use crate::bytecode::Opcode;

/// One traced event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Entering an interpreter invocation (program, function, or eval).
    EnterFrame { depth: usize },
    /// Leaving an interpreter invocation.
    LeaveFrame { depth: usize },
    /// An opcode is about to execute.
    Op { opcode: Opcode, offset: usize },
    /// A loop header was reached.
    LoopIteration { offset: usize },
    /// The identifier-cache generation counter was bumped.
    CacheInvalidation { generation: u64 },
}

/// Hooks invoked by the interpreter. Implementations must be cheap; the
/// per-opcode hook sits on the dispatch path.
pub trait VmTracer {
    fn enabled(&self) -> bool {
        true
    }
    fn event(&mut self, event: TraceEvent);
}

/// Tracer that records nothing; `enabled()` lets the dispatch loop skip
/// event construction entirely.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {
    fn enabled(&self) -> bool {
        false
    }

    fn event(&mut self, _event: TraceEvent) {}
}

/// Tracer printing every event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn event(&mut self, event: TraceEvent) {
        eprintln!("[vm] {event:?}");
    }
}

/// Tracer collecting events in memory for assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Number of recorded events matching a predicate.
    pub fn count_matching(&self, predicate: impl Fn(&TraceEvent) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

impl VmTracer for RecordingTracer {
    fn event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}
