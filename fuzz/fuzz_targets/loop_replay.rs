#![no_main]

use libfuzzer_sys::fuzz_target;
use pledge_engine::event_loop::{EventLoop, TaskSource, WitnessEvent};

const MAX_TASKS: usize = 48;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let witness = run_schedule(data);
    check_witness(&witness);

    if let Ok(json) = serde_json::to_string(&witness)
        && let Ok(decoded) = serde_json::from_str::<Vec<WitnessEvent>>(&json)
    {
        assert_eq!(decoded, witness);
    }
});

fn run_schedule(data: &[u8]) -> Vec<WitnessEvent> {
    let mut el = EventLoop::new();
    let task_count = 1 + usize::from(byte(data, 0)) % MAX_TASKS;

    let mut cursor = 1usize;
    for _ in 0..task_count {
        let source = match byte(data, cursor) % 3 {
            0 => TaskSource::Immediate,
            1 => TaskSource::Timer,
            _ => TaskSource::IoCompletion,
        };
        let delay = u64::from(byte(data, cursor.saturating_add(1)));
        cursor = cursor.saturating_add(2);
        el.schedule(source, delay, "fuzz-task", Box::new(|| {}));
    }

    // A few manual turns, then drain to idle.
    for _ in 0..usize::from(byte(data, cursor)) % 8 {
        let _ = el.turn();
    }
    let _ = el.run_until_idle();
    assert!(!el.has_pending_work());
    el.witness
}

fn check_witness(witness: &[WitnessEvent]) {
    let mut now = 0u64;
    let mut scheduled = 0usize;
    let mut executed = 0usize;
    for event in witness {
        match event {
            WitnessEvent::TaskScheduled { run_at_ms, .. } => {
                scheduled += 1;
                assert!(*run_at_ms >= now);
            }
            WitnessEvent::ClockAdvanced { from_ms, to_ms } => {
                assert_eq!(*from_ms, now);
                assert!(to_ms > from_ms);
                now = *to_ms;
            }
            WitnessEvent::TaskExecuted { .. } => {
                executed += 1;
            }
        }
    }
    assert_eq!(executed, scheduled);
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
