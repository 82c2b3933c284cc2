//! Snapshot/export: quiesce writers, walk the ring in physical order, stream
//! a Chrome Trace Event Format document to a caller-provided sink.
//!
//! JSON shape is grounded field-for-field on
//! `examples/original_source/src/mabutrace_export.c`'s
//! `get_json_trace_chunked`; the lending-walk shape (advance an index,
//! yield a borrowed view, repeat) is grounded on the teacher's
//! `src/sample/iter/mod.rs`.

use std::fmt::Write as _;

use crate::codec::{self, Color, LinkDirection, RecordKind};
use crate::error::{Result, TraceError};
use crate::platform::Platform;
use crate::writer::Core;

/// Upper bound on the JSON text a single record can expand to. Mirrors the
/// original's `MAX_CHARS_PER_ENTRY` conservative estimate.
const MAX_CHARS_PER_ENTRY: usize = 256;
/// Rounded-up allowance for the document prologue/epilogue.
const HEADER_AND_FOOTER_BYTES: usize = 128;

const JSON_HEADER: &str = "{\n  \"traceEvents\": [\n";
/// `timestampFrequencyHz` tells a viewer how to convert the integer
/// timestamps in this document into wall-clock microseconds:
/// `Platform::now_micros()` already counts in microseconds, i.e. ticks at
/// 1,000,000 Hz.
const JSON_FOOTER: &str = "    {}\n  ],\n  \"displayTimeUnit\": \"ms\",\n  \"otherData\": {\n    \"version\": \"tracecore v1\",\n    \"timestampFrequencyHz\": 1000000\n  }\n}";

/// Number of records serialized between cooperative yields, so a large
/// snapshot does not starve other work on the host.
const YIELD_EVERY: usize = 256;

/// Conservative upper bound on the byte size of a full snapshot document,
/// suitable for sizing a single contiguous buffer up front.
pub fn snapshot_size_upper_bound(buffer_size: usize) -> usize {
    let max_records = buffer_size / codec::min_kind_size();
    HEADER_AND_FOOTER_BYTES + max_records * MAX_CHARS_PER_ENTRY
}

/// Streams the current snapshot as Chrome Trace Event Format JSON, calling
/// `sink` once per chunk (never a whole-document allocation).
///
/// Quiesces writers for the duration of the walk: closes the admission gate,
/// waits for in-flight writers to drain, reads a consistent `(head, tail,
/// buffer)` view, then always reopens the gate before returning — including
/// when a corrupt record aborts the walk early, per the crate's resume
/// contract (resuming is idempotent, so this is safe even if the tracer was
/// already disabled by the caller before the snapshot began).
pub fn snapshot_chunked<P: Platform>(core: &Core<P>, mut sink: impl FnMut(&str)) -> Result<()> {
    let was_enabled = core.gate().is_enabled();
    core.gate().close();
    while core.gate().in_flight() > 0 {
        std::thread::yield_now();
    }
    let _resume = ResumeGuard {
        core,
        reopen: was_enabled,
    };

    let (head, tail, data) = core.ring().quiesced_view();
    let capacity = data.len();

    sink(JSON_HEADER);

    let mut buf = String::with_capacity(MAX_CHARS_PER_ENTRY);
    let mut idx = head;
    let mut records_emitted = 0usize;
    // Safety valve: a well-formed ring can never require more steps than
    // capacity / smallest-record-size to reach `tail`; anything beyond that
    // means a header was corrupted and the walk would otherwise spin.
    let max_steps = capacity / codec::min_kind_size() + 1;
    let mut steps = 0usize;
    // A TASK_SWITCH_IN record on a cpu waits here for its matching
    // TASK_SWITCH_OUT, so the pair can be serialized as one duration on a
    // synthetic per-cpu scheduler lane instead of two disconnected instants.
    let mut pending_switch: [Option<(u64, String)>; 2] = [None, None];

    while idx != tail {
        if steps > max_steps {
            return Err(TraceError::CorruptRecord {
                offset: idx,
                type_tag: data[idx] & 0x07,
            });
        }
        steps += 1;

        let header = codec::Header::decode(data[idx]).ok_or(TraceError::CorruptRecord {
            offset: idx,
            type_tag: data[idx] & 0x07,
        })?;

        if header.kind == RecordKind::None {
            idx = 0;
            continue;
        }

        let size = codec::KIND_SIZES[header.kind as usize];
        let record = &data[idx..idx + size];

        match header.kind {
            RecordKind::TaskSwitchIn => {
                let timestamp = codec::read_task_switch(record);
                let task_name = task_label(core, header.task_id);
                pending_switch[(header.cpu_id & 0x01) as usize] = Some((timestamp, task_name));
            }
            RecordKind::TaskSwitchOut => {
                let timestamp = codec::read_task_switch(record);
                if let Some((begin, task_name)) =
                    pending_switch[(header.cpu_id & 0x01) as usize].take()
                {
                    buf.clear();
                    write_task_switch_duration(&mut buf, header.cpu_id, begin, timestamp, &task_name);
                    sink(&buf);
                }
            }
            _ => {
                let task_name = task_label(core, header.task_id);
                buf.clear();
                write_event(&mut buf, &header, record, &task_name);
                sink(&buf);
            }
        }

        records_emitted += 1;
        if records_emitted % YIELD_EVERY == 0 {
            std::thread::yield_now();
        }

        idx += size;
        if idx >= capacity {
            idx = 0;
        }
    }

    sink(JSON_FOOTER);
    Ok(())
}

/// Serializes a paired TASK_SWITCH_IN/OUT as one `ph:"X"` duration on a
/// synthetic `"cpu N scheduler"` thread lane, running from `begin` to `end`.
/// A TASK_SWITCH_IN left unmatched at the end of the buffer (the scheduler
/// switched in and the snapshot was taken before the matching OUT) is simply
/// dropped, mirroring how an unmatched `trace_begin` is never evicted into a
/// spurious duration elsewhere in this walk.
fn write_task_switch_duration(buf: &mut String, cpu_id: u8, begin: u64, end: u64, task_name: &str) {
    let _ = write!(
        buf,
        "    {{\"name\":\"{}\",\"ph\":\"X\",\"pid\":0,\"tid\":\"cpu {} scheduler\",\"ts\":{},\"dur\":{}}},\n",
        Escaped(task_name),
        cpu_id,
        begin,
        end.saturating_sub(begin),
    );
}

/// Buffered convenience wrapper around [`snapshot_chunked`] for callers that
/// want one contiguous `String`.
pub fn snapshot_to_string<P: Platform>(core: &Core<P>) -> Result<String> {
    let mut out = String::with_capacity(snapshot_size_upper_bound(core.ring().capacity()));
    snapshot_chunked(core, |chunk| out.push_str(chunk))?;
    Ok(out)
}

struct ResumeGuard<'a, P: Platform> {
    core: &'a Core<P>,
    reopen: bool,
}

impl<P: Platform> Drop for ResumeGuard<'_, P> {
    fn drop(&mut self) {
        if self.reopen {
            self.core.gate().open();
        }
    }
}

fn task_label<P: Platform>(core: &Core<P>, task_id: u8) -> String {
    if task_id == crate::registry::RESERVED_ID {
        return "INTERRUPT".to_string();
    }
    match core.registry().handle_for_id(task_id) {
        Some(handle) => core.platform().task_name(&handle),
        None => format!("unknown-task-{task_id}"),
    }
}

fn write_event(buf: &mut String, header: &codec::Header, record: &[u8], task_name: &str) {
    match header.kind {
        RecordKind::None => unreachable!("NONE records are skipped before reaching here"),
        RecordKind::Duration | RecordKind::DurationColored => {
            let colored = header.kind == RecordKind::DurationColored;
            let rec = unsafe { codec::read_duration(record, colored) };
            let _ = write!(
                buf,
                "    {{\"name\":\"{}\",\"ph\":\"X\",\"pid\":0,\"tid\":\"{}\",\"ts\":{},\"dur\":{},\"args\":{{\"cpu\":{}}}{}}},\n",
                Escaped(rec.name),
                Escaped(task_name),
                rec.begin_timestamp,
                rec.duration_micros,
                header.cpu_id,
                CnameSuffix(rec.color),
            );
        }
        RecordKind::InstantColored => {
            let rec = unsafe { codec::read_instant_colored(record) };
            let _ = write!(
                buf,
                "    {{\"name\":\"{}\",\"ph\":\"i\",\"pid\":0,\"tid\":\"{}\",\"ts\":{},\"s\":\"p\",\"args\":{{\"cpu\":{}}}{}}},\n",
                Escaped(rec.name),
                Escaped(task_name),
                rec.timestamp,
                header.cpu_id,
                CnameSuffix(rec.color),
            );
        }
        RecordKind::Counter => {
            let rec = unsafe { codec::read_counter(record) };
            let _ = write!(
                buf,
                "    {{\"name\":\"{}\",\"ph\":\"C\",\"pid\":0,\"tid\":\"{}\",\"ts\":{},\"args\":{{\"value\":{}}}}},\n",
                Escaped(rec.name),
                Escaped(task_name),
                rec.timestamp,
                rec.value,
            );
        }
        RecordKind::Link => {
            let rec = codec::read_link(record);
            let phase = match rec.direction {
                LinkDirection::In => 'f',
                LinkDirection::Out => 's',
            };
            let _ = write!(
                buf,
                "    {{\"name\":\"flow\",\"cat\":\"flow\",\"id\":{},\"ph\":\"{}\",\"pid\":0,\"tid\":\"{}\",\"ts\":{}}},\n",
                rec.link_id,
                phase,
                Escaped(task_name),
                rec.timestamp,
            );
        }
        RecordKind::TaskSwitchIn | RecordKind::TaskSwitchOut => {
            unreachable!("task-switch records are paired in snapshot_chunked before reaching write_event")
        }
    }
}

/// Displays a color's Chrome Trace Event `cname` hint as a ready-to-splice
/// `,"cname":"..."` suffix, or nothing for [`Color::Undefined`]. Mirrors the
/// original's `colorNameLookup` table.
struct CnameSuffix(Color);

impl std::fmt::Display for CnameSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.cname() {
            Some(name) => write!(f, ",\"cname\":\"{name}\""),
            None => Ok(()),
        }
    }
}

/// Escapes a string for embedding in a JSON string literal.
struct Escaped<'a>(&'a str);

impl std::fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\t' => f.write_str("\\t")?,
                c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_support::TestPlatform;
    use crate::config::TracerConfig;

    fn new_core(buffer_size: usize) -> Core<TestPlatform> {
        let config = TracerConfig::default().with_buffer_size(buffer_size);
        let core = Core::new(TestPlatform::new(), &config).unwrap();
        core.gate().open();
        core
    }

    #[test]
    fn empty_buffer_snapshots_to_well_formed_document() {
        let core = new_core(4096);
        let doc = snapshot_to_string(&core).unwrap();
        assert!(doc.starts_with(JSON_HEADER));
        assert!(doc.trim_end().ends_with('}'));
        assert!(!doc.contains("\"ph\""), "no records were ever written");
    }

    #[test]
    fn duration_and_instant_round_trip_into_json() {
        let core = new_core(4096);
        {
            let _g = core.trace_begin_colored("work", Color::Green);
        }
        core.trace_instant_colored("tick", Color::Yellow);
        let doc = snapshot_to_string(&core).unwrap();
        assert!(doc.contains("\"name\":\"work\""));
        assert!(doc.contains("\"ph\":\"X\""));
        assert!(doc.contains("\"cname\":\"good\""));
        assert!(doc.contains("\"name\":\"tick\""));
        assert!(doc.contains("\"ph\":\"i\""));
    }

    #[test]
    fn snapshot_resumes_tracing_when_previously_enabled() {
        let core = new_core(4096);
        snapshot_chunked(&core, |_| {}).unwrap();
        assert!(core.gate().is_enabled(), "gate must be reopened after a successful snapshot");
    }

    #[test]
    fn snapshot_of_disabled_tracer_leaves_it_disabled() {
        let core = new_core(4096);
        core.gate().close();
        snapshot_chunked(&core, |_| {}).unwrap();
        assert!(!core.gate().is_enabled(), "resume must be idempotent, not force-enable");
    }

    #[test]
    fn names_containing_quotes_are_escaped() {
        let core = new_core(4096);
        core.trace_instant("has \"quotes\"");
        let doc = snapshot_to_string(&core).unwrap();
        assert!(doc.contains("has \\\"quotes\\\""));
    }

    #[test]
    fn paired_task_switch_becomes_one_scheduler_duration() {
        let core = new_core(4096);
        core.trace_task_switch(true);
        core.trace_task_switch(false);
        let doc = snapshot_to_string(&core).unwrap();
        assert!(doc.contains("\"tid\":\"cpu "));
        assert!(doc.contains("scheduler\""));
        assert!(doc.contains("\"ph\":\"X\""));
        assert!(!doc.contains("\"name\":\"task_switch\""));
    }

    #[test]
    fn unmatched_task_switch_in_is_dropped() {
        let core = new_core(4096);
        core.trace_task_switch(true);
        let doc = snapshot_to_string(&core).unwrap();
        assert!(!doc.contains("scheduler\""));
    }

    #[test]
    fn isr_writer_is_labeled_interrupt() {
        let core = new_core(4096);
        core.platform().set_isr(true);
        core.trace_instant("from-isr");
        let doc = snapshot_to_string(&core).unwrap();
        assert!(doc.contains("\"tid\":\"INTERRUPT\""));
    }
}
