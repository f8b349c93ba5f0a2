#![no_main]

use libfuzzer_sys::fuzz_target;
use pledge_engine::combinators::{all, all_settled, any, race};
use pledge_engine::deferred::{Completion, Continuation, Deferred, DeferredState, Settler};
use pledge_engine::event_loop::EventLoop;
use pledge_engine::value::Value;

const MAX_STEPS: usize = 64;
const MAX_CELLS: usize = 16;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    run_settle_program(data);
});

struct TrackedCell {
    deferred: Deferred,
    settler: Option<Settler>,
    first_settled: Option<DeferredState>,
}

impl TrackedCell {
    fn pending() -> Self {
        let (deferred, settler) = Deferred::pending();
        Self {
            deferred,
            settler: Some(settler),
            first_settled: None,
        }
    }

    fn derived(deferred: Deferred) -> Self {
        Self {
            deferred,
            settler: None,
            first_settled: None,
        }
    }
}

fn run_settle_program(data: &[u8]) {
    let mut el = EventLoop::new();
    let mut pool = vec![TrackedCell::pending()];

    let mut cursor = 0usize;
    for _ in 0..MAX_STEPS {
        let opcode = byte(data, cursor);
        cursor = cursor.saturating_add(1);

        match opcode % 9 {
            0 => {
                if pool.len() < MAX_CELLS {
                    pool.push(TrackedCell::pending());
                }
            }
            1 => {
                let index = pick(data, cursor, pool.len());
                let payload = small_value(data, cursor.saturating_add(1));
                cursor = cursor.saturating_add(3);
                if let Some(settler) = &pool[index].settler {
                    settler.fulfill(payload);
                }
            }
            2 => {
                let index = pick(data, cursor, pool.len());
                let payload = small_value(data, cursor.saturating_add(1));
                cursor = cursor.saturating_add(3);
                if let Some(settler) = &pool[index].settler {
                    settler.reject(payload);
                }
            }
            3 => {
                let index = pick(data, cursor, pool.len());
                let mode = byte(data, cursor.saturating_add(1));
                let payload = small_value(data, cursor.saturating_add(2));
                cursor = cursor.saturating_add(4);
                let continuation: Continuation = match mode % 3 {
                    0 => Box::new(Completion::Value),
                    1 => Box::new(move |_| Completion::Value(payload)),
                    _ => Box::new(move |_| Completion::Thrown(payload)),
                };
                let derived = pool[index].deferred.then(Some(continuation), None);
                if pool.len() < MAX_CELLS {
                    pool.push(TrackedCell::derived(derived));
                }
            }
            4 => {
                let index = pick(data, cursor, pool.len());
                cursor = cursor.saturating_add(1);
                let derived = pool[index].deferred.catch(Box::new(Completion::Value));
                if pool.len() < MAX_CELLS {
                    pool.push(TrackedCell::derived(derived));
                }
            }
            5 => {
                // Chain one pool member's outcome onto a derived deferred.
                let from = pick(data, cursor, pool.len());
                let to = pick(data, cursor.saturating_add(1), pool.len());
                cursor = cursor.saturating_add(2);
                let inner = pool[to].deferred.clone();
                let derived = pool[from]
                    .deferred
                    .then(Some(Box::new(move |_| Completion::Chain(inner))), None);
                if pool.len() < MAX_CELLS {
                    pool.push(TrackedCell::derived(derived));
                }
            }
            6 => {
                let index = pick(data, cursor, pool.len());
                let delay = u64::from(byte(data, cursor.saturating_add(1)));
                let payload = small_value(data, cursor.saturating_add(2));
                cursor = cursor.saturating_add(4);
                if let Some(settler) = &pool[index].settler {
                    let settler = settler.clone();
                    el.set_timeout(
                        delay,
                        "fuzz-settle",
                        Box::new(move || settler.fulfill(payload)),
                    );
                }
            }
            7 => {
                let selector = byte(data, cursor);
                cursor = cursor.saturating_add(1);
                let width = 1 + usize::from(selector >> 4) % 4;
                let inputs = pool
                    .iter()
                    .take(width)
                    .map(|cell| cell.deferred.clone())
                    .collect::<Vec<_>>();
                let combined = match selector % 4 {
                    0 => all(&inputs),
                    1 => all_settled(&inputs),
                    2 => race(&inputs),
                    _ => any(&inputs),
                };
                if pool.len() < MAX_CELLS {
                    pool.push(TrackedCell::derived(combined));
                }
            }
            _ => {
                let _ = el.run_until_idle();
                let index = pick(data, cursor, pool.len());
                cursor = cursor.saturating_add(1);
                let _ = pool[index].deferred.state();
                let _ = pool[index].deferred.queued_reactions();
            }
        }

        audit(&mut pool);
    }

    let _ = el.run_until_idle();
    audit(&mut pool);
}

/// Settle-once and accessor invariants over every cell the program touched.
fn audit(pool: &mut [TrackedCell]) {
    for cell in pool.iter_mut() {
        let state = cell.deferred.state();
        if let Some(first) = &cell.first_settled {
            assert_eq!(&state, first);
        } else if state.is_settled() {
            assert_eq!(cell.deferred.queued_reactions(), 0);
            cell.first_settled = Some(state);
        }
        assert_eq!(cell.deferred.value().is_some(), cell.deferred.is_fulfilled());
        assert_eq!(cell.deferred.reason().is_some(), cell.deferred.is_rejected());
    }
}

fn pick(data: &[u8], index: usize, len: usize) -> usize {
    usize::from(byte(data, index)) % len.max(1)
}

fn small_value(data: &[u8], offset: usize) -> Value {
    let selector = byte(data, offset);
    let payload = byte(data, offset.saturating_add(1));
    match selector % 5 {
        0 => Value::Undefined,
        1 => Value::Null,
        2 => Value::Bool(payload & 1 == 0),
        3 => Value::Int(i64::from(payload)),
        _ => Value::Str(format!("payload-{payload}")),
    }
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
