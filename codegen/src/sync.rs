//! Cross-pipeline synchronization.
//!
//! Instructions issued to different hardware units run concurrently, so a consumer on one unit
//! must wait for its producer on another. A fence between a producer unit and a reader unit
//! covers every instruction that producer unit issued before it, so [`SyncState`] tracks a
//! per-unit issue sequence and, per (producer unit, reader unit) pair, the latest sequence a
//! fence already covers. A dependency is only fenced when its producer is newer than that.

use std::collections::HashMap;

use vecc_ir::ComputeUnit;

use crate::api_call::CallId;

/// Ordering barrier within one unit. Only the vector unit needs one; the data movement and
/// scalar units execute in order.
pub fn pipe_barrier(unit: ComputeUnit) -> Option<String> {
    match unit {
        ComputeUnit::Vector => unit.pipe_name().map(|pipe| format!("PipeBarrier<{pipe}>();\n")),
        _ => None,
    }
}

/// Allocate, set, wait and release one hardware event from `src` to `dst`.
pub fn event_sequence(pipe: &str, src: ComputeUnit, dst: ComputeUnit) -> Option<String> {
    let event = format!("HardEvent::{}_{}", src.event_name()?, dst.event_name()?);
    Some(format!(
        "{{\n  \
           event_t ev = static_cast<event_t>({pipe}.AllocEventID<{event}>());\n  \
           SetFlag<{event}>(ev);\n  \
           WaitFlag<{event}>(ev);\n  \
           {pipe}.ReleaseEventID<{event}>(ev);\n\
         }}\n"
    ))
}

#[derive(Debug, Clone)]
pub struct SyncState {
    pipe: String,
    seq: u64,
    last_issue: HashMap<ComputeUnit, u64>,
    issued: HashMap<CallId, u64>,
    fenced: HashMap<(ComputeUnit, ComputeUnit), u64>,
    pub barriers: usize,
    pub events: usize,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new("tpipe")
    }
}

impl SyncState {
    pub fn new(pipe: impl Into<String>) -> Self {
        Self {
            pipe: pipe.into(),
            seq: 0,
            last_issue: HashMap::new(),
            issued: HashMap::new(),
            fenced: HashMap::new(),
            barriers: 0,
            events: 0,
        }
    }

    /// Record that `call` was issued to `unit`.
    pub fn issue(&mut self, call: CallId, unit: ComputeUnit) {
        if !unit.is_hardware() {
            return;
        }
        self.seq += 1;
        self.issued.insert(call, self.seq);
        self.last_issue.insert(unit, self.seq);
    }

    pub fn is_issued(&self, call: CallId) -> bool {
        self.issued.contains_key(&call)
    }

    /// Text ordering `producer` (issued on `src`) before the next instruction on `dst`, or
    /// `None` when an earlier fence already covers it.
    pub fn fence(&mut self, producer: CallId, src: ComputeUnit, dst: ComputeUnit) -> Option<String> {
        if !src.is_hardware() || !dst.is_hardware() {
            return None;
        }
        let seq = *self.issued.get(&producer)?;
        if self.fenced.get(&(src, dst)).is_some_and(|&covered| covered >= seq) {
            return None;
        }
        let covered = self.last_issue.get(&src).copied().unwrap_or(seq);
        self.fenced.insert((src, dst), covered);

        if src == dst {
            let text = pipe_barrier(src)?;
            self.barriers += 1;
            tracing::trace!(producer = %producer, unit = ?src, "ordering barrier");
            Some(text)
        } else {
            let text = event_sequence(&self.pipe, src, dst)?;
            self.events += 1;
            tracing::trace!(producer = %producer, src = ?src, dst = ?dst, "event fence");
            Some(text)
        }
    }
}
