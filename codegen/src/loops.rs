//! Loop tree and the per-call generation pass.
//!
//! Calls are placed into a tree of loops following their scheduled axes. Generation walks the
//! tree once in node order; around each call it allocates outputs, synchronizes and dequeues
//! inputs, emits the instruction, then enqueues finished outputs and frees allocations whose
//! last reader has run.
//!
//! Queue lifecycle statements stay at the loop depth of the allocation they act on. Before a
//! nested loop is entered, queue outputs read outside of it are allocated and queue inputs
//! it reads are dequeued in the enclosing scope. `EnQue` and `FreeTensor` that become due
//! inside a deeper loop are deferred to the point where the owning scope resumes. Before a
//! loop closes, buffers written in it are fenced against their readers on other units, so the
//! next iteration does not overwrite data still being read.

use std::collections::HashMap;

use vecc_ir::{AllocKind, AxisId, ComputeUnit, Position, TensorId};

use crate::api_call::{ApiCall, ApiKind, CallContext, CallId};
use crate::config::KernelConfig;
use crate::error::*;
use crate::sync::SyncState;
use crate::tensor::{Tensor, TensorState};
use crate::tpipe::TPipe;
use crate::writer::CodeWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopBody {
    Call(CallId),
    Child(Loop),
}

/// A loop over one axis, or the kernel scope when `axis` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loop {
    pub axis: Option<AxisId>,
    pub body: Vec<LoopBody>,
}

/// Queue step postponed until generation is back at the allocation's depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Enque(TensorId),
    Free(TensorId),
}

/// Mutable state of one generation pass.
pub struct LoopContext<'a> {
    pub tpipe: &'a mut TPipe,
    pub calls: &'a [ApiCall],
    pub config: &'a KernelConfig,
    pub sync: SyncState,
    pub writer: CodeWriter,
    /// Number of loops enclosing the statement being generated.
    depth: usize,
    /// Depth of the `AllocTensor` of each live allocation root.
    alloc_depth: HashMap<TensorId, usize>,
    deferred: Vec<(usize, Deferred)>,
}

impl<'a> LoopContext<'a> {
    pub fn new(tpipe: &'a mut TPipe, calls: &'a [ApiCall], config: &'a KernelConfig, depth: usize) -> Self {
        let sync = SyncState::new(tpipe.name.clone());
        Self {
            tpipe,
            calls,
            config,
            sync,
            writer: CodeWriter::new(depth),
            depth: 0,
            alloc_depth: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    fn call(&self, id: CallId) -> Result<&'a ApiCall> {
        self.calls.get(id.0).ok_or_else(|| Error::lookup("call", id))
    }

    /// Postpone `step` when the allocation holding `id` was made in an enclosing loop.
    fn defer(&mut self, id: TensorId, step: Deferred) -> Result<bool> {
        let root = self.tpipe.alloc_root(id)?;
        match self.alloc_depth.get(&root) {
            Some(&depth) if depth < self.depth => {
                if !self.deferred.contains(&(depth, step)) {
                    tracing::trace!(?step, depth, "queue step deferred");
                    self.deferred.push((depth, step));
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Loop {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(axis: AxisId) -> Self {
        Self { axis: Some(axis), body: Vec::new() }
    }

    /// Place `call` under the loops `path`. Consecutive calls on the same axis share a loop.
    pub fn place(&mut self, path: &[AxisId], call: CallId) {
        let Some((&first, rest)) = path.split_first() else {
            self.body.push(LoopBody::Call(call));
            return;
        };
        if let Some(LoopBody::Child(child)) = self.body.last_mut()
            && child.axis == Some(first)
        {
            child.place(rest, call);
            return;
        }
        let mut child = Loop::new(first);
        child.place(rest, call);
        self.body.push(LoopBody::Child(child));
    }

    /// Every call in the tree, in generation order.
    pub fn calls(&self) -> Vec<CallId> {
        let mut out = Vec::new();
        for item in &self.body {
            match item {
                LoopBody::Call(id) => out.push(*id),
                LoopBody::Child(child) => out.extend(child.calls()),
            }
        }
        out
    }

    pub fn generate(&self, ctx: &mut LoopContext<'_>) -> Result<()> {
        if let Some(axis) = self.axis {
            let axis = ctx.tpipe.tiler.axis(axis)?;
            let (name, size) = (axis.name.clone(), ctx.tpipe.tiler.size(&axis.size));
            ctx.writer.line(format!("for (int64_t {name} = 0; {name} < {size}; {name}++) {{"));
            ctx.writer.push_indent();
            ctx.depth += 1;
        }
        for item in &self.body {
            match item {
                LoopBody::Call(id) => generate_call(ctx, *id)?,
                LoopBody::Child(child) => {
                    enter_child(ctx, child)?;
                    child.generate(ctx)?;
                    flush_deferred(ctx)?;
                }
            }
        }
        if self.axis.is_some() {
            fence_back_edges(ctx, self)?;
            ctx.depth -= 1;
            ctx.writer.pop_indent();
            ctx.writer.line("}");
        }
        Ok(())
    }
}

fn dedup(ids: &[TensorId]) -> Vec<TensorId> {
    let mut out = Vec::with_capacity(ids.len());
    for &id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Queue hand-offs already order these units through the queue itself.
fn queue_implies_sync(tensor: &Tensor, src: ComputeUnit, dst: ComputeUnit) -> bool {
    tensor.alloc == AllocKind::Queue
        && matches!(
            (tensor.position, src, dst),
            (Position::VecIn, ComputeUnit::Mte2, ComputeUnit::Vector)
                | (Position::VecOut, ComputeUnit::Vector, ComputeUnit::Mte3)
        )
}

/// Allocate output `out` of `call`, fencing earlier users of the same storage first.
fn allocate(ctx: &mut LoopContext<'_>, call: &ApiCall, out: TensorId) -> Result<()> {
    for pred in ctx.tpipe.storage_predecessors(out)? {
        let links = ctx.tpipe.links(pred)?.clone();
        for producer in links.reads.iter().chain(links.write.iter()) {
            if *producer == call.id || !ctx.sync.is_issued(*producer) {
                continue;
            }
            let unit = ctx.call(*producer)?.unit;
            if let Some(text) = ctx.sync.fence(*producer, unit, call.unit) {
                ctx.writer.lines(text);
            }
        }
    }
    let root = ctx.tpipe.alloc_root(out)?;
    let text = ctx.tpipe.tensor_alloc(out)?;
    ctx.writer.lines(text);
    ctx.alloc_depth.entry(root).or_insert(ctx.depth);
    Ok(())
}

/// Make `input` readable by `call`: wait for its writer and dequeue it if still enqueued.
fn acquire(ctx: &mut LoopContext<'_>, call: &ApiCall, input: TensorId) -> Result<()> {
    let tensor = ctx.tpipe.tensor(input)?;
    if tensor.is_const() {
        return Ok(());
    }
    if let Some(writer) = ctx.tpipe.links(input)?.write {
        let src = ctx.call(writer)?.unit;
        if !queue_implies_sync(tensor, src, call.unit)
            && let Some(text) = ctx.sync.fence(writer, src, call.unit)
        {
            ctx.writer.lines(text);
        }
    }
    let tensor = ctx.tpipe.tensor(input)?;
    if tensor.alloc == AllocKind::Queue && tensor.state == TensorState::Enqueued {
        let text = ctx.tpipe.deque(input)?;
        ctx.writer.lines(text);
    }
    Ok(())
}

/// Whether any member of the allocation holding `id` is produced or read outside `inner`.
fn escapes(tpipe: &TPipe, id: TensorId, inner: &[CallId]) -> Result<bool> {
    let root = tpipe.alloc_root(id)?;
    for member in tpipe.alloc_group(root)? {
        let links = tpipe.links(member)?;
        if links.reads.iter().chain(links.write.iter()).any(|c| !inner.contains(c)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Hoist the queue statements `child` needs once per enclosing iteration.
fn enter_child(ctx: &mut LoopContext<'_>, child: &Loop) -> Result<()> {
    let inner = child.calls();
    for &id in &inner {
        let call = ctx.call(id)?;
        for &out in &call.outputs {
            let tensor = ctx.tpipe.tensor(out)?;
            if tensor.alloc == AllocKind::Queue && tensor.state == TensorState::Unallocated && escapes(ctx.tpipe, out, &inner)? {
                allocate(ctx, call, out)?;
            }
        }
    }
    for &id in &inner {
        let call = ctx.call(id)?;
        for input in dedup(&call.inputs) {
            let tensor = ctx.tpipe.tensor(input)?;
            if tensor.alloc == AllocKind::Queue && tensor.state == TensorState::Enqueued {
                acquire(ctx, call, input)?;
            }
        }
    }
    Ok(())
}

/// Order the next iteration's buffer writes after this iteration's reads on other units.
fn fence_back_edges(ctx: &mut LoopContext<'_>, body: &Loop) -> Result<()> {
    let inner = body.calls();
    for &id in &inner {
        let call = ctx.call(id)?;
        for &out in &call.outputs {
            if ctx.tpipe.tensor(out)?.alloc != AllocKind::Buffer {
                continue;
            }
            let mut storage = ctx.tpipe.storage_predecessors(out)?;
            storage.push(out);
            for tensor in storage {
                let reads = ctx.tpipe.links(tensor)?.reads.clone();
                for reader in reads {
                    if !inner.contains(&reader) || !ctx.sync.is_issued(reader) {
                        continue;
                    }
                    let unit = ctx.call(reader)?.unit;
                    if unit != call.unit
                        && let Some(text) = ctx.sync.fence(reader, unit, call.unit)
                    {
                        ctx.writer.lines(text);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Emit the deferred steps owned by the current depth or deeper.
fn flush_deferred(ctx: &mut LoopContext<'_>) -> Result<()> {
    let depth = ctx.depth;
    let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut ctx.deferred).into_iter().partition(|(d, _)| *d >= depth);
    ctx.deferred = pending;
    for (_, step) in ready {
        match step {
            Deferred::Enque(id) => enqueue_if_complete(ctx, id)?,
            Deferred::Free(root) => free_if_done(ctx, root)?,
        }
    }
    Ok(())
}

fn generate_call(ctx: &mut LoopContext<'_>, id: CallId) -> Result<()> {
    let call = ctx.call(id)?;
    let inputs = dedup(&call.inputs);

    for &out in &call.outputs {
        let tensor = ctx.tpipe.tensor(out)?;
        if tensor.is_local() && tensor.state == TensorState::Unallocated {
            allocate(ctx, call, out)?;
        }
    }
    for &input in &inputs {
        acquire(ctx, call, input)?;
    }

    let guard = call.pre_process(ctx.tpipe, &mut ctx.writer)?;
    let text = {
        let tpipe: &TPipe = ctx.tpipe;
        let ins = call.inputs.iter().map(|&t| tpipe.tensor(t)).collect::<Result<Vec<_>>>()?;
        let outs = call.outputs.iter().map(|&t| tpipe.tensor(t)).collect::<Result<Vec<_>>>()?;
        let call_ctx = CallContext::new(tpipe, &call.axis, ctx.config);
        call.generate(&call_ctx, &ins, &outs)?
    };
    ctx.writer.lines(text);
    if call.kind != ApiKind::Nop {
        ctx.sync.issue(call.id, call.unit);
    }
    call.post_process(ctx.tpipe, &mut ctx.sync, &mut ctx.writer, guard)?;

    for &out in &call.outputs {
        ctx.tpipe.tensor_mut(out)?.written = true;
    }
    for &out in &call.outputs {
        enqueue_if_complete(ctx, out)?;
    }

    for &input in &inputs {
        ctx.tpipe.tensor_mut(input)?.reads_done += 1;
    }
    for &tensor in inputs.iter().chain(&call.outputs) {
        free_if_done(ctx, tensor)?;
    }
    Ok(())
}

/// Enqueue the share group of `out` once all of it is written, if anyone reads it.
fn enqueue_if_complete(ctx: &mut LoopContext<'_>, out: TensorId) -> Result<()> {
    let tensor = ctx.tpipe.tensor(out)?;
    if tensor.alloc != AllocKind::Queue || tensor.state != TensorState::Allocated {
        return Ok(());
    }
    let share = ctx.tpipe.share_set(out)?;
    let mut has_readers = false;
    for &member in &share {
        if !ctx.tpipe.tensor(member)?.written {
            return Ok(());
        }
        has_readers |= !ctx.tpipe.links(member)?.reads.is_empty();
    }
    if has_readers && !ctx.defer(out, Deferred::Enque(out))? {
        let text = ctx.tpipe.enque(out)?;
        ctx.writer.lines(text);
    }
    Ok(())
}

/// Free the queue allocation holding `id` after the last read of its last member.
fn free_if_done(ctx: &mut LoopContext<'_>, id: TensorId) -> Result<()> {
    let tensor = ctx.tpipe.tensor(id)?;
    if tensor.alloc != AllocKind::Queue || tensor.state == TensorState::Freed {
        return Ok(());
    }
    let root = ctx.tpipe.alloc_root(id)?;
    for member in ctx.tpipe.alloc_group(root)? {
        let tensor = ctx.tpipe.tensor(member)?;
        if !tensor.written || tensor.reads_done < ctx.tpipe.links(member)?.reads.len() {
            return Ok(());
        }
    }
    if ctx.defer(root, Deferred::Free(root))? {
        return Ok(());
    }
    let text = ctx.tpipe.free(root)?;
    ctx.writer.lines(text);
    ctx.alloc_depth.remove(&root);
    Ok(())
}
