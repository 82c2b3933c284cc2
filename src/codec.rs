//! Packed, variable-width record layout and the per-kind size table.
//!
//! Every record begins with a one-byte header packing `type` (3 bits),
//! `cpu_id` (1 bit) and `task_id` (4 bits, 0 reserved for "interrupt / no
//! task"). There is no framing marker between records: a reader recovers the
//! next record's offset purely from the current header's `type` and the
//! [`KIND_SIZES`] table, per the codec's parseability contract.
//!
//! Unlike the C original (which casts a pointer onto the ring and lets the
//! platform's struct layout rules do the packing), records here are encoded
//! and decoded through explicit little-endian byte writes so that the layout
//! is identical regardless of host alignment or endianness.

use std::slice;
use std::str;

/// Discriminant stored in the low 3 bits of every record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Tail-pad sentinel; also the value of freshly-zeroed buffer bytes.
    None = 0,
    Duration = 1,
    DurationColored = 2,
    InstantColored = 3,
    Counter = 4,
    Link = 5,
    TaskSwitchIn = 6,
    TaskSwitchOut = 7,
}

impl RecordKind {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::None,
            1 => Self::Duration,
            2 => Self::DurationColored,
            3 => Self::InstantColored,
            4 => Self::Counter,
            5 => Self::Link,
            6 => Self::TaskSwitchIn,
            7 => Self::TaskSwitchOut,
            _ => return None,
        })
    }
}

/// Byte size of each record kind, indexed by the kind's numeric tag.
/// `KIND_SIZES[RecordKind::None as usize]` is 0: NONE never occupies a real
/// slot, it only marks "no record here".
pub const KIND_SIZES: [usize; 8] = [
    0,  // None
    HEADER_LEN + 4 + 8 + NAME_PTR_LEN, // Duration
    HEADER_LEN + 1 + 4 + 8 + NAME_PTR_LEN, // DurationColored
    HEADER_LEN + 1 + 8 + NAME_PTR_LEN, // InstantColored
    HEADER_LEN + 4 + 8 + NAME_PTR_LEN, // Counter
    HEADER_LEN + 1 + 2 + 8, // Link
    HEADER_LEN + 8, // TaskSwitchIn
    HEADER_LEN + 8, // TaskSwitchOut
];

/// Smallest non-`None` record size; bounds the number of records the ring
/// can ever hold (`buffer_size / MIN_KIND_SIZE`).
pub fn min_kind_size() -> usize {
    KIND_SIZES[1..].iter().copied().min().unwrap()
}

/// Largest record size; the configured buffer must exceed this.
pub fn max_kind_size() -> usize {
    KIND_SIZES.iter().copied().max().unwrap()
}

const HEADER_LEN: usize = 1;
const NAME_PTR_LEN: usize = 8 + 4; // address (u64) + length (u32)

/// Predefined colors; `Undefined` lets the visualizer choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Color {
    #[default]
    Undefined,
    Green,
    LightGreen,
    DarkOrange,
    DarkRed,
    Yellow,
    Olive,
    Black,
    White,
    Gray,
    LightGray,
}

impl Color {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Green,
            2 => Self::LightGreen,
            3 => Self::DarkOrange,
            4 => Self::DarkRed,
            5 => Self::Yellow,
            6 => Self::Olive,
            7 => Self::Black,
            8 => Self::White,
            9 => Self::Gray,
            10 => Self::LightGray,
            _ => Self::Undefined,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Green => 1,
            Self::LightGreen => 2,
            Self::DarkOrange => 3,
            Self::DarkRed => 4,
            Self::Yellow => 5,
            Self::Olive => 6,
            Self::Black => 7,
            Self::White => 8,
            Self::Gray => 9,
            Self::LightGray => 10,
        }
    }

    /// Chrome Trace Event "cname" hint, or `None` for the undefined color.
    pub fn cname(self) -> Option<&'static str> {
        Some(match self {
            Self::Undefined => return None,
            Self::Green => "good",
            Self::LightGreen => "vsync_highlight_color",
            Self::DarkOrange => "bad",
            Self::DarkRed => "terrible",
            Self::Yellow => "yellow",
            Self::Olive => "olive",
            Self::Black => "black",
            Self::White => "white",
            Self::Gray => "generic_work",
            Self::LightGray => "grey",
        })
    }
}

/// Direction of a flow-link record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    In = 0,
    Out = 1,
}

/// Decoded record header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub kind: RecordKind,
    pub cpu_id: u8,
    pub task_id: u8,
}

impl Header {
    pub(crate) fn encode(kind: RecordKind, cpu_id: u8, task_id: u8) -> u8 {
        debug_assert!(cpu_id <= 1, "header packs cpu_id into a single bit");
        debug_assert!(task_id <= 0xF, "header packs task_id into 4 bits");
        (kind as u8 & 0x07) | ((cpu_id & 0x01) << 3) | ((task_id & 0x0F) << 4)
    }

    pub(crate) fn decode(byte: u8) -> Option<Self> {
        let kind = RecordKind::from_tag(byte & 0x07)?;
        let cpu_id = (byte >> 3) & 0x01;
        let task_id = (byte >> 4) & 0x0F;
        Some(Self {
            kind,
            cpu_id,
            task_id,
        })
    }
}

/// Raw (address, length) of a caller-owned, never-copied string. Callers
/// must guarantee the string outlives any snapshot that reads it; in
/// practice this means passing string literals.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NamePtr {
    addr: u64,
    len: u32,
}

impl NamePtr {
    pub(crate) fn from_str(s: &'static str) -> Self {
        Self {
            addr: s.as_ptr() as u64,
            len: s.len() as u32,
        }
    }

    /// Reconstructs the string slice. Safe only if the pointer still refers
    /// to a live allocation of at least `len` valid UTF-8 bytes; this is the
    /// "name pointer without ownership" contract documented on the crate.
    pub(crate) unsafe fn as_str(&self) -> &'static str {
        let ptr = self.addr as *const u8;
        let bytes = slice::from_raw_parts(ptr, self.len as usize);
        str::from_utf8_unchecked(bytes)
    }

    fn write(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.addr.to_le_bytes());
        buf[8..12].copy_from_slice(&self.len.to_le_bytes());
    }

    fn read(buf: &[u8]) -> Self {
        let addr = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let len = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        Self { addr, len }
    }
}

/// A decoded record, as produced by the snapshot walk.
#[derive(Debug, Clone)]
pub enum Record {
    Duration(DurationRecord),
    DurationColored(DurationRecord),
    InstantColored(InstantRecord),
    Counter(CounterRecord),
    Link(LinkRecord),
    TaskSwitch { into: bool, timestamp: u64 },
}

#[derive(Debug, Clone)]
pub struct DurationRecord {
    pub color: Color,
    pub duration_micros: u32,
    pub begin_timestamp: u64,
    pub name: &'static str,
}

#[derive(Debug, Clone)]
pub struct InstantRecord {
    pub color: Color,
    pub timestamp: u64,
    pub name: &'static str,
}

#[derive(Debug, Clone)]
pub struct CounterRecord {
    pub value: i32,
    pub timestamp: u64,
    pub name: &'static str,
}

#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub direction: LinkDirection,
    pub link_id: u16,
    pub timestamp: u64,
}

/// Writes a DURATION or DURATION_COLORED record into `slot`, which must be
/// exactly `KIND_SIZES[kind as usize]` bytes.
pub(crate) fn write_duration(
    slot: &mut [u8],
    colored: bool,
    cpu_id: u8,
    task_id: u8,
    color: Color,
    duration_micros: u32,
    begin_timestamp: u64,
    name: &'static str,
) {
    let kind = if colored {
        RecordKind::DurationColored
    } else {
        RecordKind::Duration
    };
    slot[0] = Header::encode(kind, cpu_id, task_id);
    let mut off = HEADER_LEN;
    if colored {
        slot[off] = color.as_u8();
        off += 1;
    }
    slot[off..off + 4].copy_from_slice(&duration_micros.to_le_bytes());
    off += 4;
    slot[off..off + 8].copy_from_slice(&begin_timestamp.to_le_bytes());
    off += 8;
    NamePtr::from_str(name).write(&mut slot[off..off + NAME_PTR_LEN]);
}

pub(crate) unsafe fn read_duration(buf: &[u8], colored: bool) -> DurationRecord {
    let mut off = HEADER_LEN;
    let color = if colored {
        let c = Color::from_u8(buf[off]);
        off += 1;
        c
    } else {
        Color::Undefined
    };
    let duration_micros = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    off += 4;
    let begin_timestamp = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
    off += 8;
    let name = NamePtr::read(&buf[off..off + NAME_PTR_LEN]).as_str();
    DurationRecord {
        color,
        duration_micros,
        begin_timestamp,
        name,
    }
}

pub(crate) fn write_instant_colored(
    slot: &mut [u8],
    cpu_id: u8,
    task_id: u8,
    color: Color,
    timestamp: u64,
    name: &'static str,
) {
    slot[0] = Header::encode(RecordKind::InstantColored, cpu_id, task_id);
    let mut off = HEADER_LEN;
    slot[off] = color.as_u8();
    off += 1;
    slot[off..off + 8].copy_from_slice(&timestamp.to_le_bytes());
    off += 8;
    NamePtr::from_str(name).write(&mut slot[off..off + NAME_PTR_LEN]);
}

pub(crate) unsafe fn read_instant_colored(buf: &[u8]) -> InstantRecord {
    let mut off = HEADER_LEN;
    let color = Color::from_u8(buf[off]);
    off += 1;
    let timestamp = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
    off += 8;
    let name = NamePtr::read(&buf[off..off + NAME_PTR_LEN]).as_str();
    InstantRecord {
        color,
        timestamp,
        name,
    }
}

pub(crate) fn write_counter(
    slot: &mut [u8],
    cpu_id: u8,
    task_id: u8,
    value: i32,
    timestamp: u64,
    name: &'static str,
) {
    slot[0] = Header::encode(RecordKind::Counter, cpu_id, task_id);
    let mut off = HEADER_LEN;
    slot[off..off + 4].copy_from_slice(&value.to_le_bytes());
    off += 4;
    slot[off..off + 8].copy_from_slice(&timestamp.to_le_bytes());
    off += 8;
    NamePtr::from_str(name).write(&mut slot[off..off + NAME_PTR_LEN]);
}

pub(crate) unsafe fn read_counter(buf: &[u8]) -> CounterRecord {
    let mut off = HEADER_LEN;
    let value = i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    off += 4;
    let timestamp = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
    off += 8;
    let name = NamePtr::read(&buf[off..off + NAME_PTR_LEN]).as_str();
    CounterRecord {
        value,
        timestamp,
        name,
    }
}

pub(crate) fn write_link(
    slot: &mut [u8],
    cpu_id: u8,
    task_id: u8,
    direction: LinkDirection,
    link_id: u16,
    timestamp: u64,
) {
    slot[0] = Header::encode(RecordKind::Link, cpu_id, task_id);
    let mut off = HEADER_LEN;
    slot[off] = direction as u8;
    off += 1;
    slot[off..off + 2].copy_from_slice(&link_id.to_le_bytes());
    off += 2;
    slot[off..off + 8].copy_from_slice(&timestamp.to_le_bytes());
}

pub(crate) fn read_link(buf: &[u8]) -> LinkRecord {
    let mut off = HEADER_LEN;
    let direction = if buf[off] == 0 {
        LinkDirection::In
    } else {
        LinkDirection::Out
    };
    off += 1;
    let link_id = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
    off += 2;
    let timestamp = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
    LinkRecord {
        direction,
        link_id,
        timestamp,
    }
}

pub(crate) fn write_task_switch(slot: &mut [u8], into: bool, cpu_id: u8, task_id: u8, timestamp: u64) {
    let kind = if into {
        RecordKind::TaskSwitchIn
    } else {
        RecordKind::TaskSwitchOut
    };
    slot[0] = Header::encode(kind, cpu_id, task_id);
    slot[HEADER_LEN..HEADER_LEN + 8].copy_from_slice(&timestamp.to_le_bytes());
}

pub(crate) fn read_task_switch(buf: &[u8]) -> u64 {
    u64::from_le_bytes(buf[HEADER_LEN..HEADER_LEN + 8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let byte = Header::encode(RecordKind::Counter, 1, 9);
        let h = Header::decode(byte).unwrap();
        assert_eq!(h.kind, RecordKind::Counter);
        assert_eq!(h.cpu_id, 1);
        assert_eq!(h.task_id, 9);
    }

    #[test]
    fn none_header_decodes_from_zero_byte() {
        let h = Header::decode(0).unwrap();
        assert_eq!(h.kind, RecordKind::None);
    }

    #[test]
    fn duration_round_trips() {
        let mut slot = vec![0u8; KIND_SIZES[RecordKind::DurationColored as usize]];
        write_duration(&mut slot, true, 1, 3, Color::Green, 1234, 9999, "scope-name");
        let header = Header::decode(slot[0]).unwrap();
        assert_eq!(header.kind, RecordKind::DurationColored);
        assert_eq!(header.cpu_id, 1);
        assert_eq!(header.task_id, 3);
        let rec = unsafe { read_duration(&slot, true) };
        assert_eq!(rec.color, Color::Green);
        assert_eq!(rec.duration_micros, 1234);
        assert_eq!(rec.begin_timestamp, 9999);
        assert_eq!(rec.name, "scope-name");
    }

    #[test]
    fn link_round_trips() {
        let mut slot = vec![0u8; KIND_SIZES[RecordKind::Link as usize]];
        write_link(&mut slot, 0, 2, LinkDirection::Out, 42, 777);
        let rec = read_link(&slot);
        assert_eq!(rec.direction, LinkDirection::Out);
        assert_eq!(rec.link_id, 42);
        assert_eq!(rec.timestamp, 777);
    }

    #[test]
    fn min_kind_size_is_task_switch() {
        assert_eq!(min_kind_size(), KIND_SIZES[RecordKind::TaskSwitchIn as usize]);
    }
}
