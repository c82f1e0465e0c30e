//! Tick-driven executor for action graphs.
//!
//! Every pass walks the records in ascending id order. A pending record is started, a running
//! record is advanced, and a record that completes makes each of its idle targets pending, so a
//! target runs as soon as any one of its parents finishes. The first failing record aborts the
//! whole graph.

use super::{ActionError, ActionKind, ActionRecord, ActionSet, ActionStatus, Level};
use crate::platform::{GpioBank, TickSource};

/// Outcome of one executor pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// Some records have not completed yet
    Running,
    /// Every record is done
    Complete,
}

/// An action failed and the graph was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExecError {
    /// Id of the failing action
    pub action: u8,
    pub error: ActionError,
}

impl ExecError {
    /// Code reported to the host for any execution failure.
    pub const CODE: i32 = -55;

    pub const fn code(&self) -> i32 {
        Self::CODE
    }
}

/// Configure every pin referenced by `set`.
///
/// Read and trigger pins become inputs. Write pins are driven to their initial level (low unless
/// the initial level is high) before being switched to outputs. Pins the board does not have
/// are skipped.
pub fn prepare_pins<G: GpioBank>(set: &ActionSet, gpio: &mut G) {
    for record in set.records() {
        let Some(pin) = record.kind.pin() else {
            continue;
        };
        if !gpio.supports(pin.port, pin.pin) {
            warn!("Action {}: port {} pin {} not available", record.id, pin.port, pin.pin);
            continue;
        }

        gpio.enable_clock(pin.port);
        gpio.set_mux(pin.port, pin.pin);
        match &record.kind {
            ActionKind::PinWrite(step) => {
                let initial = step.initial.unwrap_or(Level::Low);
                gpio.write(pin.port, pin.pin, initial);
                gpio.set_output(pin.port, pin.pin);
            }
            _ => gpio.set_input(pin.port, pin.pin),
        }
    }
}

/// Whether `now` is at or past `deadline`, tolerant of the tick counter wrapping.
fn reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) as i32 >= 0
}

/// Move a pending record to running.
///
/// # Returns
///
/// `Ok(true)` if the record already completed.
fn start_action<G: GpioBank>(record: &mut ActionRecord, gpio: &mut G, now: u32) -> Result<bool, ActionError> {
    record.status = ActionStatus::Running;
    record.start_tick = now;

    match &record.kind {
        ActionKind::Start => return Ok(true),
        ActionKind::Delay(duration) => {
            record.deadline_tick = now.wrapping_add(duration.ticks);
        }
        ActionKind::PinWrite(step) => {
            if let Some(level) = step.target {
                gpio.write(step.pin.port, step.pin.pin, level);
            }
            record.deadline_tick = now.wrapping_add(step.duration.ticks);
        }
        ActionKind::PinRead(step) => {
            if let Some(initial) = step.initial {
                if gpio.read(step.pin.port, step.pin.pin) != initial {
                    return Err(ActionError::InitialLevel);
                }
            }
            record.deadline_tick = now.wrapping_add(step.duration.ticks);
        }
        ActionKind::PinTrigger(trigger) => {
            record.deadline_tick = now.wrapping_add(trigger.timeout.ticks);
        }
    }
    Ok(false)
}

/// Advance a running record.
///
/// # Returns
///
/// `Ok(true)` once the record completed.
fn run_action<G: GpioBank>(record: &mut ActionRecord, gpio: &mut G, now: u32) -> Result<bool, ActionError> {
    let due = reached(now, record.deadline_tick);
    match &record.kind {
        ActionKind::Start => Ok(true),
        ActionKind::Delay(_) => Ok(due),
        ActionKind::PinWrite(step) => {
            if due {
                if let Some(level) = step.final_level {
                    gpio.write(step.pin.port, step.pin.pin, level);
                }
            }
            Ok(due)
        }
        ActionKind::PinRead(step) => {
            if !due {
                return Ok(false);
            }
            match step.target {
                Some(target) if gpio.read(step.pin.port, step.pin.pin) != target => Err(ActionError::Unspecified),
                _ => Ok(true),
            }
        }
        ActionKind::PinTrigger(trigger) => match trigger.target {
            Some(target) if gpio.read(trigger.pin.port, trigger.pin.pin) == target => Ok(true),
            _ if due => Err(ActionError::Unspecified),
            _ => Ok(false),
        },
    }
}

/// Runs one [`ActionSet`] against the board's GPIO and tick source.
///
/// Creating the executor prepares the pins, resets every record, makes every start record
/// pending and starts the tick source.
pub struct Executor<'a, G, K> {
    set: ActionSet,
    gpio: &'a mut G,
    ticks: &'a mut K,
    done: usize,
    finished: bool,
}

impl<'a, G: GpioBank, K: TickSource> Executor<'a, G, K> {
    pub fn new(mut set: ActionSet, gpio: &'a mut G, ticks: &'a mut K) -> Self {
        prepare_pins(&set, gpio);

        for record in set.records_mut() {
            record.status = match record.kind {
                ActionKind::Start => ActionStatus::Pending,
                _ => ActionStatus::Idle,
            };
            record.error = None;
            record.start_tick = 0;
            record.deadline_tick = 0;
        }

        ticks.start();
        Self {
            set,
            gpio,
            ticks,
            done: 0,
            finished: false,
        }
    }

    /// Run one pass over every record.
    ///
    /// A record made pending earlier in the pass is started in the same pass.
    ///
    /// # Returns
    ///
    /// * `Ok(Progress::Complete)` - Every record is done, the tick source is stopped
    /// * `Ok(Progress::Running)` - Call again
    /// * `Err(ExecError)` - A record failed, the tick source is stopped
    pub fn step(&mut self) -> Result<Progress, ExecError> {
        if self.finished || self.done == self.set.len() {
            self.finish();
            return Ok(Progress::Complete);
        }

        for index in 0..self.set.len() {
            let now = self.ticks.now();
            let record = &mut self.set.records_mut()[index];

            let mut outcome = Ok(false);
            if record.status == ActionStatus::Pending {
                outcome = start_action(record, self.gpio, now);
            }
            if outcome == Ok(false) && record.status == ActionStatus::Running {
                outcome = run_action(record, self.gpio, self.ticks.now());
            }

            match outcome {
                Ok(true) => self.complete(index),
                Ok(false) => {}
                Err(error) => {
                    record.status = ActionStatus::Error;
                    record.error = Some(error);
                    let id = record.id;
                    self.finish();
                    warn!("Action {} failed: {}", id, error);
                    return Err(ExecError { action: id, error });
                }
            }
        }

        if self.done == self.set.len() {
            self.finish();
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Running)
        }
    }

    /// Run passes until the graph completes or fails.
    ///
    /// Never returns while a dependency cycle or an unmet trigger without timeout keeps records
    /// waiting.
    pub fn run(&mut self) -> Result<(), ExecError> {
        while self.step()? == Progress::Running {}
        Ok(())
    }

    pub fn actions(&self) -> &ActionSet {
        &self.set
    }

    pub fn into_actions(self) -> ActionSet {
        self.set
    }

    fn complete(&mut self, index: usize) {
        let (records, pool) = self.set.split_mut();
        records[index].status = ActionStatus::Done;
        self.done += 1;

        for &target in super::target_slice(pool, &records[index]) {
            if let Some(child) = records.get_mut(usize::from(target)) {
                if child.status == ActionStatus::Idle {
                    child.status = ActionStatus::Pending;
                }
            }
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.ticks.stop();
        }
    }
}
