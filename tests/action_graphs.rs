//! Action graphs executed against the mock board.

mod common;

use common::{MockGpio, MockTicks, PinOp};
use debug_tool::actions::{parse, ActionError, ActionStatus, ExecError, Executor, Level, ParseError, Progress};

const START_TO_1: [u8; 4] = [1, 0, 1, 1];

fn pin_write(id: u8, port: u8, pin: u8, levels: [u8; 3], ms: u32, targets: &[u8]) -> Vec<u8> {
    let mut record = vec![4, id, port, pin, levels[0], levels[1], levels[2]];
    record.extend_from_slice(&ms.to_be_bytes());
    record.extend_from_slice(&[0, 0, targets.len() as u8]);
    record.extend_from_slice(targets);
    record
}

fn pin_read(id: u8, port: u8, pin: u8, initial: u8, target: u8, ms: u32) -> Vec<u8> {
    let mut record = vec![3, id, port, pin, initial, target, 0xFF];
    record.extend_from_slice(&ms.to_be_bytes());
    record.extend_from_slice(&[0, 0, 0]);
    record
}

fn delay(id: u8, ms: u32, targets: &[u8]) -> Vec<u8> {
    let mut record = vec![2, id];
    record.extend_from_slice(&ms.to_be_bytes());
    record.extend_from_slice(&[0, 0, targets.len() as u8]);
    record.extend_from_slice(targets);
    record
}

fn graph(records: &[&[u8]]) -> Vec<u8> {
    records.concat()
}

#[test]
fn pulse_drives_initial_target_then_final() {
    let set = parse(&graph(&[&START_TO_1, &pin_write(1, 2, 7, [0, 1, 0], 1, &[])])).unwrap();
    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::default();

    Executor::new(set, &mut gpio, &mut ticks).run().unwrap();

    assert_eq!(
        gpio.ops,
        vec![
            PinOp::Write(2, 7, Level::Low),
            PinOp::Output(2, 7),
            PinOp::Write(2, 7, Level::High),
            PinOp::Write(2, 7, Level::Low),
        ]
    );
    assert_eq!((ticks.starts, ticks.stops, ticks.running), (1, 1, false));
}

#[test]
fn dependent_starts_after_first_parent() {
    // 0 -> {1, 2}, 1 -> 3, 2 -> 3; the short delay releases action 3 long before the long one ends
    let payload = graph(&[
        &[1, 0, 2, 1, 2],
        &delay(1, 1, &[3]),
        &delay(2, 50, &[3]),
        &pin_write(3, 0, 1, [0, 1, 0xFF], 0, &[]),
    ]);
    let set = parse(&payload).unwrap();
    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::default();

    let mut executor = Executor::new(set, &mut gpio, &mut ticks);
    while executor.actions().get(3).unwrap().status != ActionStatus::Done {
        assert_eq!(executor.step(), Ok(Progress::Running));
    }
    assert_eq!(executor.actions().get(2).unwrap().status, ActionStatus::Running);

    executor.run().unwrap();
    let actions = executor.into_actions();
    assert!(actions.all_done());
    assert_eq!(gpio.writes().last(), Some(&(0, 1, Level::High)));
}

#[test]
fn delay_survives_tick_wraparound() {
    let set = parse(&graph(&[&START_TO_1, &delay(1, 2, &[])])).unwrap();
    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::starting_at(u32::MAX - 20);

    let mut executor = Executor::new(set, &mut gpio, &mut ticks);
    executor.run().unwrap();
    let delay = executor.actions().get(1).unwrap().clone();
    drop(executor);

    assert!(delay.deadline_tick < 1000);
    assert!(ticks.now.get() >= delay.deadline_tick);
    assert!(ticks.now.get() < u32::MAX - 20);
}

#[test]
fn read_checks_initial_level_at_start() {
    let set = parse(&graph(&[&START_TO_1, &pin_read(1, 1, 4, 1, 1, 1)])).unwrap();
    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::default();

    let mut executor = Executor::new(set, &mut gpio, &mut ticks);
    let err = executor.run().unwrap_err();
    assert_eq!(
        err,
        ExecError {
            action: 1,
            error: ActionError::InitialLevel
        }
    );
    assert_eq!(err.code(), -55);
    assert_eq!(executor.actions().get(1).unwrap().status, ActionStatus::Error);
    drop(executor);
    assert!(!ticks.running);
}

#[test]
fn read_compares_target_at_deadline() {
    let payload = graph(&[&START_TO_1, &pin_read(1, 1, 4, 0xFF, 1, 1)]);

    let mut gpio = MockGpio::default();
    gpio.levels[1][4] = true;
    let mut ticks = MockTicks::default();
    assert!(Executor::new(parse(&payload).unwrap(), &mut gpio, &mut ticks).run().is_ok());

    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::default();
    let err = Executor::new(parse(&payload).unwrap(), &mut gpio, &mut ticks).run().unwrap_err();
    assert_eq!(err.error, ActionError::Unspecified);
    assert_eq!(ticks.stops, 1);
}

#[test]
fn trigger_fires_on_target_level() {
    // PIN_TRIGGER 1 on C3 waiting for high, 5 ms timeout
    let trigger = [5, 1, 2, 3, 0, 1, 0, 0, 0, 5, 0, 0, 0];
    let payload = graph(&[&START_TO_1, &trigger]);

    let mut gpio = MockGpio::default();
    gpio.levels[2][3] = true;
    let mut ticks = MockTicks::default();
    Executor::new(parse(&payload).unwrap(), &mut gpio, &mut ticks).run().unwrap();
    assert!(ticks.now.get() < 100);
    assert!(gpio.ops.contains(&PinOp::Input(2, 3)));
}

#[test]
fn unsupported_pins_are_skipped() {
    let set = parse(&graph(&[&START_TO_1, &pin_write(1, 9, 40, [1, 1, 1], 0, &[])])).unwrap();
    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::default();

    let mut executor = Executor::new(set, &mut gpio, &mut ticks);
    executor.run().unwrap();
    drop(executor);
    assert!(gpio.ops.iter().all(|op| !matches!(op, PinOp::Output(..) | PinOp::Input(..))));
}

#[test]
fn graph_shape_errors() {
    // id 1 never defined
    let sparse = graph(&[&[1, 0, 1, 2], &delay(2, 1, &[])]);
    assert_eq!(parse(&sparse), Err(ParseError::MissingId(1)));
    assert_eq!(ParseError::MissingId(1).code(), -25);

    let dangling = graph(&[&[1, 0, 1, 5]]);
    assert_eq!(parse(&dangling), Err(ParseError::TargetOutOfRange { id: 0, target: 5 }));

    // 171 actions cannot fit one payload
    let too_many = graph(&[&[1, 170, 0]]);
    assert_eq!(parse(&too_many).unwrap_err().code(), -30);

    let mut oversized = Vec::new();
    for _ in 0..3 {
        oversized.extend_from_slice(&[1, 0, 200]);
        oversized.extend(std::iter::repeat(0).take(200));
    }
    assert_eq!(parse(&oversized).unwrap_err().code(), -31);
}

#[test]
fn start_fans_out_to_twenty_pins() {
    let dependents: Vec<u8> = (1..=20).collect();
    let mut start = vec![1, 0, dependents.len() as u8];
    start.extend_from_slice(&dependents);
    let writes: Vec<Vec<u8>> = dependents
        .iter()
        .map(|&id| pin_write(id, (id - 1) / 16, (id - 1) % 16, [0xFF, 1, 0xFF], 1, &[]))
        .collect();
    let mut records: Vec<&[u8]> = vec![&start];
    records.extend(writes.iter().map(Vec::as_slice));
    let payload = graph(&records);
    assert!(payload.len() <= 512);

    let set = parse(&payload).unwrap();
    assert_eq!(set.len(), 21);
    assert_eq!(set.targets(set.get(0).unwrap()), &dependents[..]);

    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::default();
    let mut executor = Executor::new(set, &mut gpio, &mut ticks);
    executor.run().unwrap();
    assert!(executor.actions().all_done());
    drop(executor);

    // Each pin is parked low while preparing, then raised once its action starts
    let driven: Vec<_> = gpio.writes().into_iter().filter(|w| w.2 == Level::High).collect();
    assert_eq!(driven.len(), 20);
    for id in 1..=20u8 {
        assert!(driven.contains(&((id - 1) / 16, (id - 1) % 16, Level::High)));
    }
}

#[test]
fn hundred_starts_parse() {
    let payload: Vec<u8> = (0..100u8).flat_map(|id| [1, id, 0]).collect();
    let set = parse(&payload).unwrap();
    assert_eq!(set.len(), 100);

    let mut gpio = MockGpio::default();
    let mut ticks = MockTicks::default();
    let mut executor = Executor::new(set, &mut gpio, &mut ticks);
    executor.run().unwrap();
    assert!(executor.actions().all_done());
}
