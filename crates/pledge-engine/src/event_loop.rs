//! Deterministic collaborator harness: virtual time, prioritized task
//! dispatch, and witness logging.
//!
//! Deferred values cooperate with external asynchronous sources that
//! eventually invoke a settler.  This module realizes those sources on one
//! logical thread with no real time:
//!
//! - **Virtual clock**: milliseconds advance only when the loop decides;
//!   never backward
//! - **Task queue**: tasks carry a source, a due time, and a registration
//!   seq; ready tasks dispatch by source priority, then due time, then seq
//! - **Turns**: one task per turn; the clock jumps to the next due time when
//!   nothing is ready
//! - **Witness log**: every schedule, clock advance, and execution is
//!   recorded as serializable events, so identical scenarios replay to
//!   identical logs
//!
//! Task callbacks settle deferred values; they cannot reschedule onto the
//! loop.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Upper bound on turns per [`EventLoop::run_until_idle`] call.
pub const DEFAULT_MAX_TURNS: u64 = 10_000;

/// Zero-argument callback: one unit of external work.
pub type TaskCallback = Box<dyn FnOnce()>;

// ---------------------------------------------------------------------------
// VirtualClock
// ---------------------------------------------------------------------------

/// Millisecond clock that only the loop moves, and only forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VirtualClock {
    now_ms: u64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { now_ms: 0 }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Advance to `target_ms`.  Earlier targets are clamped: the clock never
    /// moves backward.  Returns the resulting now.
    pub fn advance_to(&mut self, target_ms: u64) -> u64 {
        if target_ms > self.now_ms {
            self.now_ms = target_ms;
        }
        self.now_ms
    }
}

// ---------------------------------------------------------------------------
// TaskSource — dispatch priority
// ---------------------------------------------------------------------------

/// Where a task came from.  Declaration order is dispatch priority: ready
/// immediates run before ready timers, which run before ready I/O
/// completions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TaskSource {
    Immediate,
    Timer,
    IoCompletion,
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Timer => write!(f, "timer"),
            Self::IoCompletion => write!(f, "io_completion"),
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduledTask
// ---------------------------------------------------------------------------

/// One queued callback plus its dispatch metadata.  Ordering ignores the
/// callback: tasks compare by (source, due time, registration seq).
pub struct ScheduledTask {
    seq: u64,
    source: TaskSource,
    run_at_ms: u64,
    label: String,
    callback: TaskCallback,
}

impl ScheduledTask {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn source(&self) -> TaskSource {
        self.source
    }

    pub fn run_at_ms(&self) -> u64 {
        self.run_at_ms
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Consume the task and run its callback.
    pub fn run(self) {
        (self.callback)();
    }

    fn dispatch_key(&self) -> (TaskSource, u64, u64) {
        (self.source, self.run_at_ms, self.seq)
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("seq", &self.seq)
            .field("source", &self.source)
            .field("run_at_ms", &self.run_at_ms)
            .field("label", &self.label)
            .finish()
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.dispatch_key() == other.dispatch_key()
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dispatch_key().cmp(&other.dispatch_key())
    }
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// Pending external work, dispatched one task at a time.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<ScheduledTask>,
    next_seq: u64,
    total_scheduled: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_seq: 0,
            total_scheduled: 0,
        }
    }

    /// Register a task due at the absolute time `run_at_ms`.  Returns the
    /// registration seq (monotonic from 0).
    pub fn schedule(
        &mut self,
        source: TaskSource,
        run_at_ms: u64,
        label: &str,
        callback: TaskCallback,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_scheduled += 1;
        self.tasks.push(ScheduledTask {
            seq,
            source,
            run_at_ms,
            label: label.to_string(),
            callback,
        });
        seq
    }

    /// Remove and return the highest-priority task due at or before
    /// `now_ms`, if any.  Ties break by due time, then registration seq.
    pub fn dequeue_ready(&mut self, now_ms: u64) -> Option<ScheduledTask> {
        let position = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.run_at_ms <= now_ms)
            .min_by_key(|(_, task)| task.dispatch_key())
            .map(|(position, _)| position)?;
        Some(self.tasks.remove(position))
    }

    /// Earliest due time over all pending tasks.
    pub fn next_scheduled_time(&self) -> Option<u64> {
        self.tasks.iter().map(|task| task.run_at_ms).min()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn total_scheduled(&self) -> u64 {
        self.total_scheduled
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Witness events
// ---------------------------------------------------------------------------

/// Append-only record of what the loop did.  Two runs of the same scenario
/// must produce equal logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WitnessEvent {
    TaskScheduled {
        seq: u64,
        source: TaskSource,
        run_at_ms: u64,
        label: String,
    },
    ClockAdvanced {
        from_ms: u64,
        to_ms: u64,
    },
    TaskExecuted {
        seq: u64,
        source: TaskSource,
        label: String,
    },
}

// ---------------------------------------------------------------------------
// EventLoop
// ---------------------------------------------------------------------------

/// Metadata of the task a turn executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedTask {
    pub seq: u64,
    pub source: TaskSource,
    pub label: String,
}

/// What one [`EventLoop::turn`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub task: Option<ExecutedTask>,
    pub clock_advanced: bool,
}

/// Harness failure taxonomy.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LoopError {
    #[error("turn budget exhausted: {executed} turns without reaching idle (max {max_turns})")]
    TurnBudgetExhausted { executed: u64, max_turns: u64 },
}

/// Single-threaded virtual-time loop: one task per turn, clock jumps to the
/// next due time when nothing is ready.
#[derive(Debug)]
pub struct EventLoop {
    pub clock: VirtualClock,
    pub tasks: TaskQueue,
    pub witness: Vec<WitnessEvent>,
    pub max_turns: u64,
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            clock: VirtualClock::new(),
            tasks: TaskQueue::new(),
            witness: Vec::new(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Schedule a callback `delay_ms` after the current virtual time.
    /// Returns the registration seq.
    pub fn schedule(
        &mut self,
        source: TaskSource,
        delay_ms: u64,
        label: &str,
        callback: TaskCallback,
    ) -> u64 {
        let run_at_ms = self.clock.now_ms() + delay_ms;
        let seq = self.tasks.schedule(source, run_at_ms, label, callback);
        self.witness.push(WitnessEvent::TaskScheduled {
            seq,
            source,
            run_at_ms,
            label: label.to_string(),
        });
        seq
    }

    /// Timer sugar: schedule a [`TaskSource::Timer`] task after `delay_ms`.
    pub fn set_timeout(&mut self, delay_ms: u64, label: &str, callback: TaskCallback) -> u64 {
        self.schedule(TaskSource::Timer, delay_ms, label, callback)
    }

    /// Run one turn: execute the highest-priority ready task, first advancing
    /// the clock to the next due time if nothing is ready yet.  A turn with
    /// no pending work does nothing.
    pub fn turn(&mut self) -> TurnOutcome {
        let mut clock_advanced = false;
        let mut ready = self.tasks.dequeue_ready(self.clock.now_ms());
        if ready.is_none() {
            if let Some(next_time) = self.tasks.next_scheduled_time() {
                let from_ms = self.clock.now_ms();
                let to_ms = self.clock.advance_to(next_time);
                if to_ms != from_ms {
                    clock_advanced = true;
                    self.witness.push(WitnessEvent::ClockAdvanced { from_ms, to_ms });
                }
                ready = self.tasks.dequeue_ready(to_ms);
            }
        }

        let task = ready.map(|task| {
            let executed = ExecutedTask {
                seq: task.seq(),
                source: task.source(),
                label: task.label().to_string(),
            };
            self.witness.push(WitnessEvent::TaskExecuted {
                seq: executed.seq,
                source: executed.source,
                label: executed.label.clone(),
            });
            task.run();
            executed
        });

        TurnOutcome {
            task,
            clock_advanced,
        }
    }

    /// Turn until no work remains.  Returns the number of turns taken, or
    /// [`LoopError::TurnBudgetExhausted`] once `max_turns` turns pass without
    /// reaching idle.
    pub fn run_until_idle(&mut self) -> Result<u64, LoopError> {
        let mut turns = 0u64;
        while self.has_pending_work() {
            if turns == self.max_turns {
                return Err(LoopError::TurnBudgetExhausted {
                    executed: turns,
                    max_turns: self.max_turns,
                });
            }
            self.turn();
            turns += 1;
        }
        Ok(turns)
    }

    pub fn has_pending_work(&self) -> bool {
        !self.tasks.is_empty()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
