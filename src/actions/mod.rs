//! Timed GPIO action graphs.
//!
//! A host payload describes a small dependency graph of actions (start points, delays, pin
//! writes, pin reads and pin triggers). [`parse`] turns it into an [`ActionSet`] indexed by action
//! id and an [`Executor`] walks that set tick by tick.

use core::fmt;
use core::ops::Range;

use embedded_hal::digital::PinState;
use heapless::Vec;

use crate::protocol::MAX_PAYLOAD;

pub mod executor;
pub mod parser;

pub use executor::{prepare_pins, ExecError, Executor, Progress};
pub use parser::{parse, parse_with, ParseError};

/// Most actions one graph may hold, one three-byte START record each in a full payload.
pub const MAX_ACTIONS: usize = MAX_PAYLOAD / 3;
/// Size of the target pool shared by every action of a set.
pub const MAX_TARGETS: usize = MAX_PAYLOAD;

/// Logic level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Decode a wire level: `0x00` low, `0x01` high, anything else undefined.
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Low),
            0x01 => Some(Self::High),
            _ => None,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl From<Level> for PinState {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => PinState::Low,
            Level::High => PinState::High,
        }
    }
}

/// A duration as sent by the host, together with its tick equivalent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickDuration {
    pub ms: u32,
    pub us: u16,
    pub ticks: u32,
}

/// A GPIO pin, port A being port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinRef {
    pub port: u8,
    pub pin: u8,
}

/// Fields shared by pin reads and pin writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinStep {
    pub pin: PinRef,
    pub initial: Option<Level>,
    pub target: Option<Level>,
    pub final_level: Option<Level>,
    pub duration: TickDuration,
}

/// Wait for a pin to reach a level before a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Trigger {
    pub pin: PinRef,
    pub initial: Option<Level>,
    pub target: Option<Level>,
    pub timeout: TickDuration,
}

/// What an action does once it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActionKind {
    /// Entry point, completes immediately
    Start,
    /// Completes once its duration elapsed
    Delay(TickDuration),
    /// Checks the pin at start and after its duration
    PinRead(PinStep),
    /// Drives `target` at start and `final_level` after its duration
    PinWrite(PinStep),
    /// Completes when the pin reads `target`, fails at the timeout
    PinTrigger(Trigger),
}

impl ActionKind {
    /// Pin touched by this action, if any.
    pub const fn pin(&self) -> Option<PinRef> {
        match self {
            Self::Start | Self::Delay(_) => None,
            Self::PinRead(step) | Self::PinWrite(step) => Some(step.pin),
            Self::PinTrigger(trigger) => Some(trigger.pin),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActionStatus {
    #[default]
    Idle,
    Pending,
    Running,
    Done,
    Error,
}

/// Why an action ended in [`ActionStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActionError {
    /// The pin did not read the expected initial level
    InitialLevel,
    /// Any other failure, such as a trigger timing out
    Unspecified,
}

/// One node of an action graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub id: u8,
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub error: Option<ActionError>,
    pub start_tick: u32,
    pub deadline_tick: u32,
    /// Slice of the set's target pool holding the ids made pending when this action completes
    pub(crate) targets: Range<u16>,
}

impl ActionRecord {
    pub fn new(id: u8, kind: ActionKind) -> Self {
        Self {
            id,
            kind,
            status: ActionStatus::Idle,
            error: None,
            start_tick: 0,
            deadline_tick: 0,
            targets: 0..0,
        }
    }
}

/// Action records stored densely, so that `records()[id].id == id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    records: Vec<ActionRecord, MAX_ACTIONS>,
    pool: Vec<u8, MAX_TARGETS>,
}

impl ActionSet {
    pub(crate) fn from_parts(
        records: Vec<ActionRecord, MAX_ACTIONS>,
        pool: Vec<u8, MAX_TARGETS>,
    ) -> Self {
        Self { records, pool }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u8) -> Option<&ActionRecord> {
        self.records.get(usize::from(id))
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [ActionRecord] {
        &mut self.records
    }

    /// Dependents of `record`.
    pub fn targets(&self, record: &ActionRecord) -> &[u8] {
        target_slice(&self.pool, record)
    }

    pub(crate) fn split_mut(&mut self) -> (&mut [ActionRecord], &[u8]) {
        (&mut self.records, &self.pool)
    }

    /// Whether every action completed.
    pub fn all_done(&self) -> bool {
        self.records.iter().all(|r| r.status == ActionStatus::Done)
    }
}

pub(crate) fn target_slice<'a>(pool: &'a [u8], record: &ActionRecord) -> &'a [u8] {
    pool.get(usize::from(record.targets.start)..usize::from(record.targets.end))
        .unwrap_or(&[])
}

fn level_char(level: Option<Level>) -> char {
    match level {
        Some(Level::Low) => 'L',
        Some(Level::High) => 'H',
        None => '?',
    }
}

struct Millis(TickDuration);

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}ms", self.0.ms, self.0.us)?;
        if self.0.ticks != 0 {
            write!(f, "  ticks={}", self.0.ticks)?;
        }
        Ok(())
    }
}

/// Human-readable dump of the set, one line per action.
impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "----- ACTION SET -----\r\ncount={}\r\n", self.len())?;
        for record in &self.records {
            write!(f, "ID={}  ", record.id)?;
            match &record.kind {
                ActionKind::Start => write!(f, "START")?,
                ActionKind::Delay(duration) => write!(f, "DELAY  duration={}", Millis(*duration))?,
                ActionKind::PinRead(step) | ActionKind::PinWrite(step) => {
                    let name = match record.kind {
                        ActionKind::PinRead(_) => "PIN_READ ",
                        _ => "PIN_WRITE",
                    };
                    write!(
                        f,
                        "{} P={}  pin={}  init={}  target={}  final={}  duration={}",
                        name,
                        step.pin.port,
                        step.pin.pin,
                        level_char(step.initial),
                        level_char(step.target),
                        level_char(step.final_level),
                        Millis(step.duration)
                    )?
                }
                ActionKind::PinTrigger(trigger) => write!(
                    f,
                    "PIN_TRIGGER P={}  pin={}  init={}  target={}  timeout={}",
                    trigger.pin.port,
                    trigger.pin.pin,
                    level_char(trigger.initial),
                    level_char(trigger.target),
                    Millis(trigger.timeout)
                )?,
            }
            write!(f, "  targets={:?}\r\n", self.targets(record))?;
        }
        write!(f, "----------------------\r\n")
    }
}
