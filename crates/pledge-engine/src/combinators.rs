//! Combinators over ordered sets of deferred values.
//!
//! Each combinator subscribes to every input and settles one result deferred:
//!
//! - **`all`**: every input fulfills → `List` of values in input order; first
//!   rejection wins otherwise
//! - **`all_settled`**: always fulfills once every input settles, with
//!   `[status, payload]` pairs in input order
//! - **`race`**: adopts the first settlement, fulfillment or rejection
//! - **`any`**: first fulfillment wins; rejects with an aggregate reason only
//!   once every input has rejected
//!
//! The bookkeeping lives in standalone tracker types with `BTreeMap`-indexed
//! storage for deterministic iteration.  Trackers are public and testable on
//! their own; the combinator functions wire them to live deferred values.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::deferred::{Deferred, Reaction};
use crate::value::Value;

/// Head element of the aggregate rejection `any` produces when every input
/// rejected.
pub const AGGREGATE_REJECTION: &str = "all deferred values were rejected";

// ---------------------------------------------------------------------------
// AllTracker
// ---------------------------------------------------------------------------

/// Bookkeeping for [`all`]: values by input index, completion count, and the
/// short-circuit latch a first rejection flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllTracker {
    pub values: BTreeMap<u32, Value>,
    pub total: u32,
    pub resolved_count: u32,
    pub settled: bool,
}

impl AllTracker {
    pub fn new(total: u32) -> Self {
        Self {
            values: BTreeMap::new(),
            total,
            resolved_count: 0,
            settled: false,
        }
    }

    /// Record one input's fulfillment.  Returns true when every input has
    /// now fulfilled.  No-op after the tracker settled.
    pub fn record_fulfillment(&mut self, index: u32, value: Value) -> bool {
        if self.settled {
            return false;
        }
        if self.values.insert(index, value).is_none() {
            self.resolved_count += 1;
        }
        self.resolved_count == self.total
    }

    /// Values in input order; slots that never fulfilled are `Undefined`.
    pub fn collect_values(&self) -> Vec<Value> {
        (0..self.total)
            .map(|index| self.values.get(&index).cloned().unwrap_or(Value::Undefined))
            .collect()
    }

    /// Flip the settled latch.  True only for the first call.
    pub fn mark_settled(&mut self) -> bool {
        if self.settled {
            false
        } else {
            self.settled = true;
            true
        }
    }
}

// ---------------------------------------------------------------------------
// AllSettledTracker
// ---------------------------------------------------------------------------

/// One input's final disposition for [`all_settled`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledOutcome {
    /// `"fulfilled"` or `"rejected"`.
    pub status: String,
    pub value: Value,
}

impl SettledOutcome {
    pub fn fulfilled(value: Value) -> Self {
        Self {
            status: "fulfilled".to_string(),
            value,
        }
    }

    pub fn rejected(reason: Value) -> Self {
        Self {
            status: "rejected".to_string(),
            value: reason,
        }
    }

    /// Encode as a `[status, payload]` pair.
    pub fn as_value(&self) -> Value {
        Value::List(vec![Value::Str(self.status.clone()), self.value.clone()])
    }
}

/// Bookkeeping for [`all_settled`]: outcomes by input index.  Never
/// short-circuits; every input is awaited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllSettledTracker {
    pub outcomes: BTreeMap<u32, SettledOutcome>,
    pub total: u32,
    pub settled_count: u32,
}

impl AllSettledTracker {
    pub fn new(total: u32) -> Self {
        Self {
            outcomes: BTreeMap::new(),
            total,
            settled_count: 0,
        }
    }

    /// Record one input's fulfillment.  Returns true when every input has
    /// now settled.
    pub fn record_fulfillment(&mut self, index: u32, value: Value) -> bool {
        self.record(index, SettledOutcome::fulfilled(value))
    }

    /// Record one input's rejection.  Returns true when every input has now
    /// settled.
    pub fn record_rejection(&mut self, index: u32, reason: Value) -> bool {
        self.record(index, SettledOutcome::rejected(reason))
    }

    fn record(&mut self, index: u32, outcome: SettledOutcome) -> bool {
        if self.outcomes.insert(index, outcome).is_none() {
            self.settled_count += 1;
        }
        self.settled_count == self.total
    }

    /// Outcome pairs in input order; slots that never settled are
    /// `Undefined`.
    pub fn collect_outcomes(&self) -> Vec<Value> {
        (0..self.total)
            .map(|index| {
                self.outcomes
                    .get(&index)
                    .map(SettledOutcome::as_value)
                    .unwrap_or(Value::Undefined)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RaceTracker
// ---------------------------------------------------------------------------

/// First-settlement latch for [`race`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RaceTracker {
    pub settled: bool,
}

impl RaceTracker {
    pub fn new() -> Self {
        Self { settled: false }
    }

    /// True only for the first settlement attempt.
    pub fn try_settle(&mut self) -> bool {
        if self.settled {
            false
        } else {
            self.settled = true;
            true
        }
    }
}

// ---------------------------------------------------------------------------
// AnyTracker
// ---------------------------------------------------------------------------

/// Bookkeeping for [`any`]: rejection reasons by input index, plus the latch
/// the first fulfillment flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyTracker {
    pub errors: BTreeMap<u32, Value>,
    pub total: u32,
    pub rejected_count: u32,
    pub settled: bool,
}

impl AnyTracker {
    pub fn new(total: u32) -> Self {
        Self {
            errors: BTreeMap::new(),
            total,
            rejected_count: 0,
            settled: false,
        }
    }

    /// Record one input's rejection.  Returns true when every input has now
    /// rejected.  No-op after the tracker settled.
    pub fn record_rejection(&mut self, index: u32, reason: Value) -> bool {
        if self.settled {
            return false;
        }
        if self.errors.insert(index, reason).is_none() {
            self.rejected_count += 1;
        }
        self.rejected_count == self.total
    }

    /// Reasons in input order; slots that never rejected are `Undefined`.
    pub fn collect_errors(&self) -> Vec<Value> {
        (0..self.total)
            .map(|index| self.errors.get(&index).cloned().unwrap_or(Value::Undefined))
            .collect()
    }

    /// Flip the settled latch.  True only for the first call.
    pub fn mark_settled(&mut self) -> bool {
        if self.settled {
            false
        } else {
            self.settled = true;
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Combinator operations
// ---------------------------------------------------------------------------

/// Fulfills with every input's value, in input order, once all fulfill;
/// rejects with the first rejection reason.  Empty input fulfills immediately
/// with an empty list.
pub fn all(inputs: &[Deferred]) -> Deferred {
    let (result, settler) = Deferred::pending();
    let total = inputs.len() as u32;
    if total == 0 {
        settler.fulfill(Value::List(Vec::new()));
        return result;
    }

    let tracker = Rc::new(RefCell::new(AllTracker::new(total)));
    for (index, input) in inputs.iter().enumerate() {
        let index = index as u32;
        input.mark_rejection_handled();
        let on_fulfilled: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |value| {
                let complete = tracker.borrow_mut().record_fulfillment(index, value);
                if complete && tracker.borrow_mut().mark_settled() {
                    let values = tracker.borrow().collect_values();
                    settler.fulfill(Value::List(values));
                }
            })
        };
        let on_rejected: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |reason| {
                if tracker.borrow_mut().mark_settled() {
                    settler.reject(reason);
                }
            })
        };
        input.subscribe(on_fulfilled, on_rejected);
    }
    result
}

/// Fulfills once every input has settled, with `[status, payload]` pairs in
/// input order.  Never rejects.  Empty input fulfills immediately with an
/// empty list.
pub fn all_settled(inputs: &[Deferred]) -> Deferred {
    let (result, settler) = Deferred::pending();
    let total = inputs.len() as u32;
    if total == 0 {
        settler.fulfill(Value::List(Vec::new()));
        return result;
    }

    let tracker = Rc::new(RefCell::new(AllSettledTracker::new(total)));
    for (index, input) in inputs.iter().enumerate() {
        let index = index as u32;
        input.mark_rejection_handled();
        let on_fulfilled: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |value| {
                let complete = tracker.borrow_mut().record_fulfillment(index, value);
                if complete {
                    settler.fulfill(Value::List(tracker.borrow().collect_outcomes()));
                }
            })
        };
        let on_rejected: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |reason| {
                let complete = tracker.borrow_mut().record_rejection(index, reason);
                if complete {
                    settler.fulfill(Value::List(tracker.borrow().collect_outcomes()));
                }
            })
        };
        input.subscribe(on_fulfilled, on_rejected);
    }
    result
}

/// Adopts the first settlement among the inputs, fulfillment or rejection.
/// Empty input stays pending forever.
pub fn race(inputs: &[Deferred]) -> Deferred {
    let (result, settler) = Deferred::pending();
    let tracker = Rc::new(RefCell::new(RaceTracker::new()));
    for input in inputs {
        input.mark_rejection_handled();
        let on_fulfilled: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |value| {
                if tracker.borrow_mut().try_settle() {
                    settler.fulfill(value);
                }
            })
        };
        let on_rejected: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |reason| {
                if tracker.borrow_mut().try_settle() {
                    settler.reject(reason);
                }
            })
        };
        input.subscribe(on_fulfilled, on_rejected);
    }
    result
}

/// Fulfills with the first fulfillment among the inputs; rejects only once
/// every input has rejected, with the aggregate reason (the
/// [`AGGREGATE_REJECTION`] message followed by the reasons in input order).
/// Empty input rejects immediately.
pub fn any(inputs: &[Deferred]) -> Deferred {
    let (result, settler) = Deferred::pending();
    let total = inputs.len() as u32;
    if total == 0 {
        settler.reject(aggregate_rejection(&[]));
        return result;
    }

    let tracker = Rc::new(RefCell::new(AnyTracker::new(total)));
    for (index, input) in inputs.iter().enumerate() {
        let index = index as u32;
        input.mark_rejection_handled();
        let on_fulfilled: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |value| {
                if tracker.borrow_mut().mark_settled() {
                    settler.fulfill(value);
                }
            })
        };
        let on_rejected: Reaction = {
            let tracker = Rc::clone(&tracker);
            let settler = settler.clone();
            Box::new(move |reason| {
                let all_rejected = tracker.borrow_mut().record_rejection(index, reason);
                if all_rejected && tracker.borrow_mut().mark_settled() {
                    let errors = tracker.borrow().collect_errors();
                    settler.reject(aggregate_rejection(&errors));
                }
            })
        };
        input.subscribe(on_fulfilled, on_rejected);
    }
    result
}

fn aggregate_rejection(errors: &[Value]) -> Value {
    let mut items = Vec::with_capacity(errors.len() + 1);
    items.push(Value::Str(AGGREGATE_REJECTION.to_string()));
    items.extend_from_slice(errors);
    Value::List(items)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    fn s(text: &str) -> Value {
        Value::Str(text.to_string())
    }

    // -- AllTracker --

    #[test]
    fn all_tracker_collects_in_order() {
        let mut tracker = AllTracker::new(3);
        assert!(!tracker.record_fulfillment(2, int(30)));
        assert!(!tracker.record_fulfillment(0, int(10)));
        assert!(tracker.record_fulfillment(1, int(20)));
        assert_eq!(tracker.collect_values(), vec![int(10), int(20), int(30)]);
    }

    #[test]
    fn all_tracker_short_circuits_when_settled() {
        let mut tracker = AllTracker::new(3);
        tracker.mark_settled();
        assert!(!tracker.record_fulfillment(0, int(1)));
        assert_eq!(tracker.resolved_count, 0);
    }

    #[test]
    fn all_tracker_collect_values_with_gaps() {
        let mut tracker = AllTracker::new(3);
        tracker.record_fulfillment(1, int(20));
        assert_eq!(
            tracker.collect_values(),
            vec![Value::Undefined, int(20), Value::Undefined]
        );
    }

    #[test]
    fn all_tracker_mark_settled_is_first_call_only() {
        let mut tracker = AllTracker::new(1);
        assert!(tracker.mark_settled());
        assert!(!tracker.mark_settled());
    }

    // -- AllSettledTracker --

    #[test]
    fn all_settled_tracker_records_both_outcomes() {
        let mut tracker = AllSettledTracker::new(3);
        assert!(!tracker.record_fulfillment(0, int(1)));
        assert!(!tracker.record_rejection(1, s("err")));
        assert!(tracker.record_fulfillment(2, int(3)));
        assert_eq!(tracker.outcomes.get(&0).unwrap().status, "fulfilled");
        assert_eq!(tracker.outcomes.get(&1).unwrap().status, "rejected");
        assert_eq!(tracker.outcomes.get(&2).unwrap().status, "fulfilled");
    }

    #[test]
    fn settled_outcome_encodes_as_pair() {
        assert_eq!(
            SettledOutcome::rejected(s("e")).as_value(),
            Value::List(vec![s("rejected"), s("e")])
        );
    }

    // -- RaceTracker --

    #[test]
    fn race_tracker_first_settlement_wins() {
        let mut tracker = RaceTracker::new();
        assert!(tracker.try_settle());
        assert!(!tracker.try_settle());
        assert!(!tracker.try_settle());
    }

    // -- AnyTracker --

    #[test]
    fn any_tracker_all_rejected_triggers_aggregate() {
        let mut tracker = AnyTracker::new(3);
        assert!(!tracker.record_rejection(0, s("e1")));
        assert!(!tracker.record_rejection(1, s("e2")));
        assert!(tracker.record_rejection(2, s("e3")));
        assert_eq!(tracker.collect_errors(), vec![s("e1"), s("e2"), s("e3")]);
    }

    #[test]
    fn any_tracker_short_circuits_on_settled() {
        let mut tracker = AnyTracker::new(3);
        tracker.mark_settled();
        assert!(!tracker.record_rejection(0, s("e1")));
        assert_eq!(tracker.rejected_count, 0);
    }

    #[test]
    fn any_tracker_collect_errors_with_gaps() {
        let mut tracker = AnyTracker::new(3);
        tracker.record_rejection(1, s("only_1"));
        assert_eq!(
            tracker.collect_errors(),
            vec![Value::Undefined, s("only_1"), Value::Undefined]
        );
    }

    // -- all --

    #[test]
    fn all_waits_for_every_input() {
        let (a, settle_a) = Deferred::pending();
        let (b, settle_b) = Deferred::pending();
        let result = all(&[a, b]);
        settle_b.fulfill(int(2));
        assert!(result.is_pending());
        settle_a.fulfill(int(1));
        assert_eq!(result.value(), Some(Value::List(vec![int(1), int(2)])));
    }

    #[test]
    fn all_rejects_with_the_first_rejection() {
        let (a, settle_a) = Deferred::pending();
        let (b, settle_b) = Deferred::pending();
        let result = all(&[a, b]);
        settle_b.reject(s("broke"));
        assert_eq!(result.reason(), Some(s("broke")));
        // A straggler fulfillment after the short-circuit changes nothing.
        settle_a.fulfill(int(1));
        assert_eq!(result.reason(), Some(s("broke")));
    }

    #[test]
    fn all_of_nothing_fulfills_with_an_empty_list() {
        let result = all(&[]);
        assert_eq!(result.value(), Some(Value::List(Vec::new())));
    }

    #[test]
    fn all_handles_pre_settled_inputs() {
        let result = all(&[Deferred::fulfilled(int(1)), Deferred::fulfilled(int(2))]);
        assert_eq!(result.value(), Some(Value::List(vec![int(1), int(2)])));
    }

    // -- all_settled --

    #[test]
    fn all_settled_reports_mixed_outcomes_in_order() {
        let (a, settle_a) = Deferred::pending();
        let (b, settle_b) = Deferred::pending();
        let result = all_settled(&[a, b]);
        settle_b.reject(s("e"));
        settle_a.fulfill(int(1));
        assert_eq!(
            result.value(),
            Some(Value::List(vec![
                Value::List(vec![s("fulfilled"), int(1)]),
                Value::List(vec![s("rejected"), s("e")]),
            ]))
        );
    }

    #[test]
    fn all_settled_of_nothing_fulfills_immediately() {
        assert_eq!(all_settled(&[]).value(), Some(Value::List(Vec::new())));
    }

    // -- race --

    #[test]
    fn race_adopts_the_first_settlement() {
        let (a, settle_a) = Deferred::pending();
        let (b, settle_b) = Deferred::pending();
        let result = race(&[a, b]);
        settle_b.reject(s("lost"));
        settle_a.fulfill(int(1));
        assert_eq!(result.reason(), Some(s("lost")));
    }

    #[test]
    fn race_of_nothing_stays_pending() {
        assert!(race(&[]).is_pending());
    }

    // -- any --

    #[test]
    fn any_fulfills_with_the_first_fulfillment() {
        let (a, settle_a) = Deferred::pending();
        let (b, settle_b) = Deferred::pending();
        let result = any(&[a, b]);
        settle_a.reject(s("e1"));
        assert!(result.is_pending());
        settle_b.fulfill(int(7));
        assert_eq!(result.value(), Some(int(7)));
    }

    #[test]
    fn any_rejects_only_after_every_input_rejected() {
        let (a, settle_a) = Deferred::pending();
        let (b, settle_b) = Deferred::pending();
        let result = any(&[a, b]);
        settle_a.reject(s("e1"));
        settle_b.reject(s("e2"));
        assert_eq!(
            result.reason(),
            Some(Value::List(vec![
                s(AGGREGATE_REJECTION),
                s("e1"),
                s("e2"),
            ]))
        );
    }

    #[test]
    fn any_of_nothing_rejects_immediately() {
        let result = any(&[]);
        assert_eq!(
            result.reason(),
            Some(Value::List(vec![s(AGGREGATE_REJECTION)]))
        );
    }

    // -- handled marking --

    #[test]
    fn combinators_mark_input_rejections_handled() {
        let rejected = Deferred::rejected(s("e"));
        let result = all(&[rejected.clone()]);
        assert!(rejected.rejection_handled());
        assert!(!result.rejection_handled());
    }
}
