//! Two-pass decoder for action graph payloads.
//!
//! Wire records, multi-byte fields big-endian:
//!
//! ```text
//! START        [1][id][count][targets..]
//! DELAY        [2][id][ms:4][us:2][count][targets..]
//! PIN_READ     [3][id][port][pin][initial][target][final][ms:4][us:2][count][targets..]
//! PIN_WRITE    [4][id][port][pin][initial][target][final][ms:4][us:2][count][targets..]
//! PIN_TRIGGER  [5][id][port][pin][initial][target][timeout_ms:4][timeout_us:2][count][targets..]
//! ```
//!
//! The first pass only checks structure and finds the highest id. The second pass builds each
//! record at index `id`; a later record with the same id replaces the earlier one.

use heapless::Vec;

use super::{
    ActionKind, ActionRecord, ActionSet, Level, PinRef, PinStep, TickDuration, Trigger, MAX_ACTIONS,
    MAX_TARGETS,
};
use crate::config::TimingConfig;

const TYPE_START: u8 = 1;
const TYPE_DELAY: u8 = 2;
const TYPE_PIN_READ: u8 = 3;
const TYPE_PIN_WRITE: u8 = 4;
const TYPE_PIN_TRIGGER: u8 = 5;

/// Reasons an action payload is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// Record type and id truncated
    Header,
    StartCount,
    StartTargets,
    DelayFields,
    DelayTargets,
    PinFields,
    PinTargets,
    UnknownType(u8),
    TriggerFields,
    TriggerTargets,
    /// A target id is not below the number of actions
    TargetOutOfRange { id: u8, target: u8 },
    /// An id below the highest id was never defined
    MissingId(u8),
    /// The graph needs more than [`MAX_ACTIONS`] records
    TooManyActions,
    /// The targets of all records together overflow the [`MAX_TARGETS`] pool; carries the id
    /// of the record that did not fit
    TooManyTargets(u8),
}

impl ParseError {
    /// Stable code reported to the host.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Header => -10,
            Self::StartCount => -12,
            Self::StartTargets => -14,
            Self::DelayFields => -15,
            Self::DelayTargets => -17,
            Self::PinFields => -18,
            Self::PinTargets => -20,
            Self::UnknownType(_) => -21,
            Self::TriggerFields => -22,
            Self::TriggerTargets => -23,
            Self::TargetOutOfRange { .. } => -24,
            Self::MissingId(_) => -25,
            Self::TooManyActions => -30,
            Self::TooManyTargets(_) => -31,
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize, err: ParseError) -> Result<&'a [u8], ParseError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len()).ok_or(err)?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn targets(&mut self, err: ParseError) -> Result<&'a [u8], ParseError> {
        let count = self.take(1, err)?[0];
        self.take(usize::from(count), err)
    }
}

/// A record as it sits on the wire, targets still borrowed from the payload.
struct RawRecord<'a> {
    id: u8,
    kind: ActionKind,
    targets: &'a [u8],
}

fn duration(fields: &[u8], timing: &TimingConfig) -> TickDuration {
    let ms = u32::from_be_bytes([fields[0], fields[1], fields[2], fields[3]]);
    let us = u16::from_be_bytes([fields[4], fields[5]]);
    TickDuration {
        ms,
        us,
        ticks: timing.to_ticks(ms, us),
    }
}

fn read_record<'a>(reader: &mut Reader<'a>, timing: &TimingConfig) -> Result<RawRecord<'a>, ParseError> {
    let header = reader.take(2, ParseError::Header)?;
    let (kind_tag, id) = (header[0], header[1]);

    let (kind, targets) = match kind_tag {
        TYPE_START => {
            let count = reader.take(1, ParseError::StartCount)?[0];
            let targets = reader.take(usize::from(count), ParseError::StartTargets)?;
            (ActionKind::Start, targets)
        }
        TYPE_DELAY => {
            // ms, us and the target count must all be present
            let fields = reader.take(6, ParseError::DelayFields)?;
            if reader.at_end() {
                return Err(ParseError::DelayFields);
            }
            let targets = reader.targets(ParseError::DelayTargets)?;
            (ActionKind::Delay(duration(fields, timing)), targets)
        }
        TYPE_PIN_READ | TYPE_PIN_WRITE => {
            let fields = reader.take(11, ParseError::PinFields)?;
            if reader.at_end() {
                return Err(ParseError::PinFields);
            }
            let targets = reader.targets(ParseError::PinTargets)?;
            let step = PinStep {
                pin: PinRef {
                    port: fields[0],
                    pin: fields[1],
                },
                initial: Level::from_wire(fields[2]),
                target: Level::from_wire(fields[3]),
                final_level: Level::from_wire(fields[4]),
                duration: duration(&fields[5..], timing),
            };
            let kind = if kind_tag == TYPE_PIN_READ {
                ActionKind::PinRead(step)
            } else {
                ActionKind::PinWrite(step)
            };
            (kind, targets)
        }
        TYPE_PIN_TRIGGER => {
            let fields = reader.take(10, ParseError::TriggerFields)?;
            if reader.at_end() {
                return Err(ParseError::TriggerFields);
            }
            let targets = reader.targets(ParseError::TriggerTargets)?;
            let trigger = Trigger {
                pin: PinRef {
                    port: fields[0],
                    pin: fields[1],
                },
                initial: Level::from_wire(fields[2]),
                target: Level::from_wire(fields[3]),
                timeout: duration(&fields[4..], timing),
            };
            (ActionKind::PinTrigger(trigger), targets)
        }
        other => return Err(ParseError::UnknownType(other)),
    };

    Ok(RawRecord { id, kind, targets })
}

/// Parse an action payload with the default 10 µs tick.
pub fn parse(payload: &[u8]) -> Result<ActionSet, ParseError> {
    parse_with(payload, &TimingConfig::default())
}

/// Parse an action payload.
///
/// # Arguments
///
/// * `payload` - Concatenated wire records
/// * `timing` - Tick length used to convert durations
///
/// # Returns
///
/// A dense [`ActionSet`] whose length is the highest id plus one, or the first problem found.
/// An empty payload yields an empty set.
pub fn parse_with(payload: &[u8], timing: &TimingConfig) -> Result<ActionSet, ParseError> {
    // Pass 1: structure and highest id
    let mut reader = Reader::new(payload);
    let mut max_id: Option<u8> = None;
    while !reader.at_end() {
        let record = read_record(&mut reader, timing)?;
        max_id = max_id.max(Some(record.id));
    }

    let Some(max_id) = max_id else {
        return Ok(ActionSet::default());
    };
    let count = usize::from(max_id) + 1;
    if count > MAX_ACTIONS {
        return Err(ParseError::TooManyActions);
    }

    // Pass 2: place records by id, targets appended to the shared pool
    let mut records: Vec<ActionRecord, MAX_ACTIONS> = Vec::new();
    for id in 0..count {
        // Cannot fail, count was checked against the capacity
        let _ = records.push(ActionRecord::new(id as u8, ActionKind::Start));
    }
    let mut pool: Vec<u8, MAX_TARGETS> = Vec::new();
    let mut defined = [false; MAX_ACTIONS];

    let mut reader = Reader::new(payload);
    while !reader.at_end() {
        let raw = read_record(&mut reader, timing)?;
        let start = pool.len();
        pool.extend_from_slice(raw.targets)
            .map_err(|_| ParseError::TooManyTargets(raw.id))?;
        let record = &mut records[usize::from(raw.id)];
        record.kind = raw.kind;
        // The pool never exceeds MAX_PAYLOAD entries, so both ends fit a u16
        record.targets = start as u16..pool.len() as u16;
        defined[usize::from(raw.id)] = true;
    }

    if let Some(missing) = (0..count).find(|&id| !defined[id]) {
        return Err(ParseError::MissingId(missing as u8));
    }
    for record in &records {
        let targets = super::target_slice(&pool, record);
        if let Some(&target) = targets.iter().find(|&&t| usize::from(t) >= count) {
            return Err(ParseError::TargetOutOfRange { id: record.id, target });
        }
    }

    Ok(ActionSet::from_parts(records, pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionStatus;

    const START_0_TO_1: [u8; 4] = [TYPE_START, 0, 1, 1];

    #[test]
    fn empty_payload_is_empty_set() {
        let set = parse(&[]).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn count_is_max_id_plus_one() {
        let mut payload = std::vec::Vec::new();
        payload.extend_from_slice(&START_0_TO_1);
        payload.extend_from_slice(&[TYPE_DELAY, 2, 0, 0, 0, 1, 0, 0, 0]);
        payload.extend_from_slice(&[TYPE_DELAY, 1, 0, 0, 0, 0, 0, 25, 1, 2]);

        let set = parse(&payload).unwrap();
        assert_eq!(set.len(), 3);
        for (index, record) in set.records().iter().enumerate() {
            assert_eq!(usize::from(record.id), index);
            assert_eq!(record.status, ActionStatus::Idle);
        }
        match set.get(1).unwrap().kind {
            ActionKind::Delay(d) => {
                assert_eq!((d.ms, d.us, d.ticks), (0, 25, 3));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(set.targets(set.get(1).unwrap()), &[2]);
        assert_eq!(set.targets(set.get(0).unwrap()), &[1]);
        assert!(set.targets(set.get(2).unwrap()).is_empty());
    }

    #[test]
    fn pin_records_decode_levels() {
        let payload = [
            TYPE_PIN_WRITE, 0, 0, 3, 0, 1, 0, 0, 0, 0, 10, 0, 0, 0, //
            TYPE_PIN_TRIGGER, 1, 2, 7, 0xFF, 1, 0, 0, 0, 5, 0, 0, 0,
        ];
        let set = parse(&payload).unwrap();
        assert_eq!(
            set.get(0).unwrap().kind,
            ActionKind::PinWrite(PinStep {
                pin: PinRef { port: 0, pin: 3 },
                initial: Some(Level::Low),
                target: Some(Level::High),
                final_level: Some(Level::Low),
                duration: TickDuration { ms: 10, us: 0, ticks: 1000 },
            })
        );
        assert_eq!(
            set.get(1).unwrap().kind,
            ActionKind::PinTrigger(Trigger {
                pin: PinRef { port: 2, pin: 7 },
                initial: None,
                target: Some(Level::High),
                timeout: TickDuration { ms: 5, us: 0, ticks: 500 },
            })
        );
    }

    #[test]
    fn duplicate_id_keeps_last_record() {
        let payload = [
            TYPE_START, 0, 0, //
            TYPE_DELAY, 0, 0, 0, 0, 7, 0, 0, 0,
        ];
        let set = parse(&payload).unwrap();
        assert_eq!(set.len(), 1);
        assert!(matches!(set.get(0).unwrap().kind, ActionKind::Delay(d) if d.ms == 7));
    }

    #[test]
    fn structural_error_codes() {
        let cases: &[(&[u8], i32)] = &[
            (&[TYPE_START], -10),
            (&[TYPE_START, 0], -12),
            (&[TYPE_START, 0, 2, 1], -14),
            (&[TYPE_DELAY, 0, 0, 0, 0], -15),
            (&[TYPE_DELAY, 0, 0, 0, 0, 0, 0, 0], -15),
            (&[TYPE_DELAY, 0, 0, 0, 0, 0, 0, 0, 1], -17),
            (&[TYPE_PIN_READ, 0, 0, 0, 0, 0, 0], -18),
            (&[TYPE_PIN_WRITE, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 1], -20),
            (&[9, 0], -21),
            (&[TYPE_PIN_TRIGGER, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], -22),
            (&[TYPE_PIN_TRIGGER, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 1], -23),
        ];
        for (payload, code) in cases {
            let err = parse(payload).unwrap_err();
            assert_eq!(err.code(), *code, "payload {:?} gave {:?}", payload, err);
        }
    }

    #[test]
    fn target_out_of_range() {
        let err = parse(&[TYPE_START, 0, 1, 1]).unwrap_err();
        assert_eq!(err, ParseError::TargetOutOfRange { id: 0, target: 1 });
        assert_eq!(err.code(), -24);
    }

    #[test]
    fn holes_in_id_range_are_rejected() {
        let err = parse(&[TYPE_START, 0, 0, TYPE_START, 2, 0]).unwrap_err();
        assert_eq!(err, ParseError::MissingId(1));
        assert_eq!(err.code(), -25);
    }

    #[test]
    fn capacity_limits() {
        let err = parse(&[TYPE_START, MAX_ACTIONS as u8, 0]).unwrap_err();
        assert_eq!(err.code(), -30);

        // Only reachable with more than a frame's worth of target bytes
        let mut payload = std::vec![TYPE_START, 0, 255];
        payload.extend(core::iter::repeat(0).take(255));
        payload.extend_from_slice(&[TYPE_START, 0, 255]);
        payload.extend(core::iter::repeat(0).take(255));
        payload.extend_from_slice(&[TYPE_START, 0, 3, 0, 0, 0]);
        let err = parse(&payload).unwrap_err();
        assert_eq!(err, ParseError::TooManyTargets(0));
        assert_eq!(err.code(), -31);
    }

    #[test]
    fn full_payload_of_starts_fits() {
        let mut payload = std::vec::Vec::new();
        for id in 0..MAX_ACTIONS as u8 {
            payload.extend_from_slice(&[TYPE_START, id, 0]);
        }
        assert!(payload.len() <= crate::protocol::MAX_PAYLOAD);
        let set = parse(&payload).unwrap();
        assert_eq!(set.len(), MAX_ACTIONS);
    }

    #[test]
    fn targets_share_one_pool() {
        let mut payload = std::vec![TYPE_START, 0, 20];
        payload.extend(1..=20u8);
        for id in 1..=20u8 {
            payload.extend_from_slice(&[TYPE_START, id, 1, 21]);
        }
        payload.extend_from_slice(&[TYPE_START, 21, 0]);

        let set = parse(&payload).unwrap();
        assert_eq!(set.len(), 22);
        assert_eq!(set.targets(set.get(0).unwrap()), &(1..=20u8).collect::<std::vec::Vec<_>>()[..]);
        for id in 1..=20u8 {
            assert_eq!(set.targets(set.get(id).unwrap()), &[21]);
        }
    }

    #[test]
    fn replaced_record_drops_earlier_targets() {
        let payload = [
            TYPE_START, 0, 1, 1, //
            TYPE_START, 1, 0, //
            TYPE_START, 0, 0,
        ];
        let set = parse(&payload).unwrap();
        assert!(set.targets(set.get(0).unwrap()).is_empty());
    }
}
