//! Queue, buffer and merge-scope allocator.
//!
//! The TPipe owns every tensor of a kernel in an arena keyed by [`TensorId`], together with
//! the [`ApiTensor`] links, and renders the storage declarations and the per-use allocation
//! statements.
//!
//! Storage is organised in *allocation groups*. Tensors with the same queue or buffer and the
//! same merge scope form a share chain packed back to back into one allocation, and a tensor
//! with a `ref_tensor` takes over the slot of the tensor it reuses. The group is identified by
//! its root: the head of the share chain the reuse chain starts in. Queue groups are allocated
//! with one `AllocTensor` and released with one `FreeTensor`.

use std::collections::BTreeMap;

use snafu::ensure;
use vecc_dtype::DType;
use vecc_ir::{AllocKind, BufId, Expr, MergeScopeId, Position, QueId, ScheduledGraph, TensorId};

use crate::api_tensor::ApiTensor;
use crate::config::TmpBufDesc;
use crate::error::*;
use crate::tensor::{Tensor, TensorState};
use crate::tiler::Tiler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Que {
    pub id: QueId,
    pub position: Position,
    pub depth: u32,
    pub buf_num: u32,
    /// Member tensors in registration order.
    pub tensors: Vec<TensorId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buf {
    pub id: BufId,
    pub position: Position,
    pub tensors: Vec<TensorId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeScope {
    pub id: MergeScopeId,
    pub tensors: Vec<TensorId>,
}

#[derive(Debug, Clone)]
struct TmpBuf {
    tag: i64,
    size: Expr,
    name: String,
}

#[derive(Debug, Clone)]
struct BlkTensor {
    value: String,
    dtype: DType,
    name: String,
}

#[derive(Debug, Clone)]
pub struct TPipe {
    pub name: String,
    pub tiler: Tiler,
    tensors: BTreeMap<TensorId, Tensor>,
    links: BTreeMap<TensorId, ApiTensor>,
    ques: BTreeMap<QueId, Que>,
    bufs: BTreeMap<BufId, Buf>,
    merge_scopes: BTreeMap<MergeScopeId, MergeScope>,
    /// Next binding offset of each live queue allocation, keyed by group root.
    rotation: BTreeMap<TensorId, Expr>,
    tmp_bufs: Vec<TmpBuf>,
    blk_tensors: Vec<BlkTensor>,
}

impl TPipe {
    pub fn new(tiler: Tiler) -> Self {
        Self {
            name: "tpipe".to_string(),
            tiler,
            tensors: BTreeMap::new(),
            links: BTreeMap::new(),
            ques: BTreeMap::new(),
            bufs: BTreeMap::new(),
            merge_scopes: BTreeMap::new(),
            rotation: BTreeMap::new(),
            tmp_bufs: Vec::new(),
            blk_tensors: Vec::new(),
        }
    }

    /// Record one queue or buffer per distinct id found among the node outputs.
    pub fn collect_ques(&mut self, graph: &ScheduledGraph) {
        for desc in graph.nodes.iter().flat_map(|n| n.outputs.iter()) {
            match (desc.mem.alloc, desc.que.id, desc.buf.id) {
                (AllocKind::Queue, Some(id), _) => {
                    self.ques.entry(id).or_insert_with(|| Que {
                        id,
                        position: desc.mem.position,
                        depth: desc.que.depth.max(1),
                        buf_num: desc.que.buf_num.max(1),
                        tensors: Vec::new(),
                    });
                }
                (AllocKind::Buffer, _, Some(id)) => {
                    self.bufs.entry(id).or_insert_with(|| Buf { id, position: desc.mem.position, tensors: Vec::new() });
                }
                _ => {}
            }
        }
        tracing::debug!(ques = self.ques.len(), bufs = self.bufs.len(), "storage collected");
    }

    /// Register a tensor. Re-adding an id is a no-op.
    pub fn add_tensor(&mut self, tensor: Tensor) -> Result<TensorId> {
        let id = tensor.id;
        if self.tensors.contains_key(&id) {
            return Ok(id);
        }
        if let Some(q) = tensor.que {
            let que = self.ques.get_mut(&q).ok_or_else(|| Error::lookup("queue", q))?;
            que.tensors.push(id);
            que.depth = que.depth.max(tensor.depth);
            que.buf_num = que.buf_num.max(tensor.buf_num);
        }
        if let Some(b) = tensor.buf {
            self.bufs.get_mut(&b).ok_or_else(|| Error::lookup("buffer", b))?.tensors.push(id);
        }
        if let (Some(m), true) = (tensor.merge_scope, tensor.is_local()) {
            self.merge_scopes.entry(m).or_insert_with(|| MergeScope { id: m, tensors: Vec::new() }).tensors.push(id);
        }
        tracing::trace!(tensor = %tensor.name, id = %id, alloc = ?tensor.alloc, "tensor registered");
        self.links.insert(id, ApiTensor::new(id));
        self.tensors.insert(id, tensor);
        Ok(id)
    }

    pub fn tensor(&self, id: TensorId) -> Result<&Tensor> {
        self.tensors.get(&id).ok_or_else(|| Error::lookup("tensor", id))
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Result<&mut Tensor> {
        self.tensors.get_mut(&id).ok_or_else(|| Error::lookup("tensor", id))
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.values()
    }

    pub fn links(&self, id: TensorId) -> Result<&ApiTensor> {
        self.links.get(&id).ok_or_else(|| Error::lookup("tensor", id))
    }

    pub fn links_mut(&mut self, id: TensorId) -> Result<&mut ApiTensor> {
        self.links.get_mut(&id).ok_or_else(|| Error::lookup("tensor", id))
    }

    pub fn que(&self, id: QueId) -> Result<&Que> {
        self.ques.get(&id).ok_or_else(|| Error::lookup("queue", id))
    }

    pub fn ques(&self) -> impl Iterator<Item = &Que> {
        self.ques.values()
    }

    pub fn buf(&self, id: BufId) -> Result<&Buf> {
        self.bufs.get(&id).ok_or_else(|| Error::lookup("buffer", id))
    }

    pub fn bufs(&self) -> impl Iterator<Item = &Buf> {
        self.bufs.values()
    }

    pub fn merge_scope(&self, id: MergeScopeId) -> Result<&MergeScope> {
        self.merge_scopes.get(&id).ok_or_else(|| Error::lookup("merge scope", id))
    }

    /// Let `to` take over the slot of `from`.
    pub fn link_reuse(&mut self, from: TensorId, to: TensorId) -> Result<()> {
        let (source, target) = (self.tensor(from)?, self.tensor(to)?);
        if (source.que, source.buf) != (target.que, target.buf) {
            return Err(Error::init(format!("reuse source {} in the same storage", source.name), target.name.clone()));
        }
        ensure!(
            from != to && self.links(from)?.reuse_next.is_none() && self.links(to)?.reuse_from.is_none(),
            ChainCycleSnafu { kind: "reuse", from, to }
        );
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            ensure!(id != to, ChainCycleSnafu { kind: "reuse", from, to });
            cursor = self.links(id)?.reuse_from;
        }

        self.links_mut(from)?.reuse_next = Some(to);
        self.links_mut(to)?.reuse_from = Some(from);
        let root = self.tensor(from)?.reuse_id;
        let mut cursor = Some(to);
        while let Some(id) = cursor {
            self.tensor_mut(id)?.reuse_id = root;
            cursor = self.links(id)?.reuse_next;
        }
        tracing::trace!(from = %from, to = %to, root = %root, "reuse linked");
        Ok(())
    }

    /// Pack `next` into the allocation right after `prev`.
    pub fn link_share(&mut self, prev: TensorId, next: TensorId) -> Result<()> {
        self.tensor(prev)?;
        self.tensor(next)?;
        ensure!(
            prev != next && self.links(prev)?.share_next.is_none() && self.links(next)?.share_prev.is_none(),
            ChainCycleSnafu { kind: "share", from: prev, to: next }
        );
        let mut cursor = Some(prev);
        while let Some(id) = cursor {
            ensure!(id != next, ChainCycleSnafu { kind: "share", from: prev, to: next });
            cursor = self.links(id)?.share_prev;
        }
        self.links_mut(prev)?.share_next = Some(next);
        self.links_mut(next)?.share_prev = Some(prev);
        Ok(())
    }

    /// Link the members of every (storage, merge scope) pair into share chains, in
    /// registration order. Reuse followers live in their source's slot and are skipped.
    pub fn build_share_chains(&mut self) -> Result<()> {
        let storages: Vec<Vec<TensorId>> =
            self.ques.values().map(|q| q.tensors.clone()).chain(self.bufs.values().map(|b| b.tensors.clone())).collect();
        for members in storages {
            let mut last_in_scope: BTreeMap<MergeScopeId, TensorId> = BTreeMap::new();
            for id in members {
                let Some(scope) = self.tensor(id)?.merge_scope else { continue };
                if self.links(id)?.reuse_from.is_some() {
                    continue;
                }
                if let Some(prev) = last_in_scope.insert(scope, id)
                    && self.links(prev)?.share_next != Some(id)
                {
                    self.link_share(prev, id)?;
                }
            }
        }
        Ok(())
    }

    /// Root of the allocation group holding `id`.
    pub fn alloc_root(&self, id: TensorId) -> Result<TensorId> {
        let mut root = id;
        while let Some(from) = self.links(root)?.reuse_from {
            root = from;
        }
        while let Some(prev) = self.links(root)?.share_prev {
            root = prev;
        }
        Ok(root)
    }

    /// Every tensor allocated together with `root`: its share members and their reuse followers.
    pub fn alloc_group(&self, root: TensorId) -> Result<Vec<TensorId>> {
        let members = self.storage_members(root)?;
        let mut group = Vec::new();
        for &id in members {
            if self.alloc_root(id)? == root {
                group.push(id);
            }
        }
        Ok(group)
    }

    /// The share chain through `id`: the tensors written into one allocation before hand-off.
    pub fn share_set(&self, id: TensorId) -> Result<Vec<TensorId>> {
        let mut head = id;
        while let Some(prev) = self.links(head)?.share_prev {
            head = prev;
        }
        let mut set = vec![head];
        while let Some(next) = self.links(*set.last().unwrap_or(&head))?.share_next {
            set.push(next);
        }
        Ok(set)
    }

    fn storage_members(&self, id: TensorId) -> Result<&[TensorId]> {
        let tensor = self.tensor(id)?;
        match (tensor.que, tensor.buf) {
            (Some(q), _) => Ok(&self.que(q)?.tensors),
            (_, Some(b)) => Ok(&self.buf(b)?.tensors),
            _ => Ok(&[]),
        }
    }

    /// Earlier tensors of the same storage whose slot `id` may overwrite.
    pub fn storage_predecessors(&self, id: TensorId) -> Result<Vec<TensorId>> {
        let share = self.share_set(id)?;
        let mut out = Vec::new();
        if let Some(from) = self.links(id)?.reuse_from {
            out.push(from);
        }
        if self.tensor(id)?.alloc == AllocKind::Buffer {
            for &other in self.storage_members(id)? {
                if other == id {
                    break;
                }
                if !share.contains(&other) && !out.contains(&other) {
                    out.push(other);
                }
            }
        }
        Ok(out)
    }

    /// Byte offset of `id` inside its allocation.
    pub fn share_offset(&self, id: TensorId) -> Result<Expr> {
        if let Some(from) = self.links(id)?.reuse_from {
            return self.share_offset(from);
        }
        let mut terms = Vec::new();
        let mut cursor = self.links(id)?.share_prev;
        while let Some(prev) = cursor {
            terms.push(self.tensor(prev)?.byte_size());
            cursor = self.links(prev)?.share_prev;
        }
        terms.reverse();
        Ok(Expr::sum(terms))
    }

    fn owns_size_decl(&self, tensor: &Tensor) -> Result<bool> {
        Ok(tensor.is_local() && tensor.merge_scope.is_none() && self.links(tensor.id)?.reuse_from.is_none())
    }

    /// Element-count constants of the tensors that size their storage directly.
    pub fn tensor_size_calc(&self) -> Result<String> {
        let mut out = String::new();
        for tensor in self.tensors.values() {
            if !self.owns_size_decl(tensor)? {
                continue;
            }
            out.push_str(&format!("const uint32_t {}_size = {};\n", tensor.name, self.tiler.size(&tensor.size)));
            if tensor.alloc == AllocKind::Queue {
                out.push_str(&format!("const uint32_t {}_que_buf_num = {};\n", tensor.name, tensor.buf_num));
            }
        }
        Ok(out)
    }

    /// Bytes of a merge scope: its members packed back to back.
    pub fn merge_scope_size(&self, id: MergeScopeId) -> Result<Expr> {
        let mut terms = Vec::new();
        for &member in &self.merge_scope(id)?.tensors {
            if self.links(member)?.reuse_from.is_none() {
                terms.push(self.tensor(member)?.byte_size());
            }
        }
        Ok(Expr::sum(terms))
    }

    /// Slot count of a merge scope, the largest of its queue members.
    pub fn merge_scope_buf_num(&self, id: MergeScopeId) -> Result<Option<u32>> {
        let mut buf_num = None;
        for &member in &self.merge_scope(id)?.tensors {
            let tensor = self.tensor(member)?;
            if tensor.alloc == AllocKind::Queue {
                buf_num = Some(buf_num.unwrap_or(0).max(tensor.buf_num));
            }
        }
        Ok(buf_num)
    }

    pub fn merge_scope_size_calc(&self) -> Result<String> {
        let mut out = String::new();
        for &id in self.merge_scopes.keys() {
            out.push_str(&format!("const uint32_t m{id}_size = {};\n", self.tiler.size(&self.merge_scope_size(id)?)));
            if let Some(buf_num) = self.merge_scope_buf_num(id)? {
                out.push_str(&format!("const uint32_t m{id}_que_buf_num = {buf_num};\n"));
            }
        }
        Ok(out)
    }

    /// Effective byte size of a storage holding `members`, as (named, expanded) expressions:
    /// the first refers to the size constants, the second is the full expression.
    fn storage_size(&self, members: &[TensorId]) -> Result<(Expr, Expr)> {
        let mut named = Vec::new();
        let mut full = Vec::new();
        let mut scopes = Vec::new();
        for &id in members {
            let tensor = self.tensor(id)?;
            match tensor.merge_scope {
                Some(scope) => {
                    if !scopes.contains(&scope) {
                        scopes.push(scope);
                        named.push(Expr::sym(format!("m{scope}_size")));
                        full.push(self.merge_scope_size(scope)?);
                    }
                }
                None if self.links(id)?.reuse_from.is_none() => {
                    named.push(Expr::sym(format!("{}_size", tensor.name)) * tensor.dtype.bytes() as i64);
                    full.push(tensor.byte_size());
                }
                None => {}
            }
        }
        Ok((Expr::max_of(named), Expr::max_of(full)))
    }

    pub fn que_size(&self, id: QueId) -> Result<Expr> {
        Ok(self.storage_size(&self.que(id)?.tensors)?.1)
    }

    pub fn buf_size(&self, id: BufId) -> Result<Expr> {
        Ok(self.storage_size(&self.buf(id)?.tensors)?.1)
    }

    pub fn local_tbuf_alloc(&self) -> Result<String> {
        let mut out = String::new();
        for buf in self.bufs.values() {
            let (named, full) = self.storage_size(&buf.tensors)?;
            let id = buf.id;
            out.push_str(&format!("TBuf<{}> b{id};\n", buf.position.target_name()));
            out.push_str(&format!(
                "{}.InitBuffer(b{id}, {}); // {}\n",
                self.name,
                self.tiler.size(&named),
                self.tiler.raw_size(&full)
            ));
            out.push_str(&format!("LocalTensor<uint8_t> b{id}_buf = b{id}.Get<uint8_t>();\n"));
            for &member in &buf.tensors {
                let tensor = self.tensor(member)?;
                out.push_str(&format!("LocalTensor<{}> {};\n", tensor.type_name(), tensor.name));
            }
        }
        Ok(out)
    }

    pub fn local_tque_alloc(&self) -> Result<String> {
        let mut out = String::new();
        for que in self.ques.values() {
            let (named, full) = self.storage_size(&que.tensors)?;
            let id = que.id;
            out.push_str(&format!("TQue<{}, {}> q{id};\n", que.position.target_name(), que.depth));
            out.push_str(&format!(
                "{}.InitBuffer(q{id}, {}, {}); // {}\n",
                self.name,
                que.buf_num,
                self.tiler.size(&named),
                self.tiler.raw_size(&full)
            ));
            for &member in &que.tensors {
                if self.alloc_root(member)? == member {
                    out.push_str(&format!("LocalTensor<uint8_t> {}_buf;\n", self.tensor(member)?.name));
                }
            }
            for &member in &que.tensors {
                let tensor = self.tensor(member)?;
                out.push_str(&format!("LocalTensor<{}> {};\n", tensor.type_name(), tensor.name));
            }
        }
        Ok(out)
    }

    fn bind(&self, tensor: &Tensor, storage: &str, offset: &Expr) -> String {
        let ty = tensor.type_name();
        if offset.is_zero() {
            format!("{} = {storage}.template ReinterpretCast<{ty}>();\n", tensor.name)
        } else {
            format!("{} = {storage}[{}].template ReinterpretCast<{ty}>();\n", tensor.name, self.tiler.size(offset))
        }
    }

    /// Statements giving `id` its storage on first use.
    pub fn tensor_alloc(&mut self, id: TensorId) -> Result<String> {
        let tensor = self.tensor(id)?;
        let text = match (tensor.alloc, self.links(id)?.reuse_from) {
            (AllocKind::Queue | AllocKind::Buffer, Some(from)) => {
                let source = self.tensor(from)?;
                format!("{} = {}.template ReinterpretCast<{}>();\n", tensor.name, source.name, tensor.type_name())
            }
            (AllocKind::Buffer, None) => {
                let buf = tensor.buf.ok_or_else(|| Error::init("buffer id", tensor.name.clone()))?;
                self.bind(tensor, &format!("b{buf}_buf"), &self.share_offset(id)?)
            }
            (AllocKind::Queue, None) => {
                let que = tensor.que.ok_or_else(|| Error::init("queue id", tensor.name.clone()))?;
                let root = self.alloc_root(id)?;
                let root_name = self.tensor(root)?.name.clone();
                let mut text = String::new();
                let offset = match self.rotation.get(&root) {
                    Some(offset) => offset.clone(),
                    None => {
                        text.push_str(&format!("{root_name}_buf = q{que}.AllocTensor<uint8_t>();\n"));
                        Expr::ZERO
                    }
                };
                text.push_str(&self.bind(tensor, &format!("{root_name}_buf"), &offset));
                let next = offset + tensor.byte_size();
                self.rotation.insert(root, next);
                text
            }
            (AllocKind::Global | AllocKind::Invalid, _) => String::new(),
        };
        let tensor = self.tensor_mut(id)?;
        if tensor.is_local() {
            tensor.state = TensorState::Allocated;
            tracing::trace!(tensor = %tensor.name, "tensor allocated");
        }
        Ok(text)
    }

    fn queue_of_root(&self, id: TensorId) -> Result<(TensorId, QueId, String)> {
        let root = self.alloc_root(id)?;
        let tensor = self.tensor(root)?;
        let que = tensor.que.ok_or_else(|| Error::init("queue id", tensor.name.clone()))?;
        Ok((root, que, tensor.name.clone()))
    }

    /// Hand the allocation holding `id` to its consumers.
    pub fn enque(&mut self, id: TensorId) -> Result<String> {
        let (_, que, root_name) = self.queue_of_root(id)?;
        for member in self.share_set(id)? {
            self.tensor_mut(member)?.state = TensorState::Enqueued;
        }
        tracing::trace!(root = %root_name, "enqueue");
        Ok(format!("q{que}.EnQue({root_name}_buf);\n"))
    }

    pub fn deque(&mut self, id: TensorId) -> Result<String> {
        let (_, que, root_name) = self.queue_of_root(id)?;
        for member in self.share_set(id)? {
            self.tensor_mut(member)?.state = TensorState::Dequeued;
        }
        tracing::trace!(root = %root_name, "dequeue");
        Ok(format!("{root_name}_buf = q{que}.DeQue<uint8_t>();\n"))
    }

    /// Release the allocation of group `root` and reset its rotation offset.
    pub fn free(&mut self, root: TensorId) -> Result<String> {
        let (root, que, root_name) = self.queue_of_root(root)?;
        for member in self.alloc_group(root)? {
            self.tensor_mut(member)?.state = TensorState::Freed;
        }
        self.rotation.remove(&root);
        tracing::trace!(root = %root_name, "free");
        Ok(format!("q{que}.FreeTensor({root_name}_buf);\n"))
    }

    /// Materialise a block filled with `value` and bind it as `tensor`. Each `(value, dtype)`
    /// pair gets one block; later requests only bind.
    pub fn blk_tensor_alloc_and_init(&mut self, value: &str, dtype: DType, tensor: &str) -> String {
        let ty = dtype.type_name();
        if let Some(blk) = self.blk_tensors.iter().find(|b| b.value == value && b.dtype == dtype) {
            return format!("LocalTensor<{ty}> {tensor} = {}_tensor;\n", blk.name);
        }
        let name = format!("blk_{}", self.blk_tensors.len());
        let block = self.tiler.block_size();
        let elems = dtype.block_elems(block);
        let text = format!(
            "TBuf<TPosition::VECCALC> {name};\n\
             {pipe}.InitBuffer({name}, {block});\n\
             LocalTensor<{ty}> {name}_tensor = {name}.Get<{ty}>();\n\
             Duplicate({name}_tensor, ({ty}){value}, {elems});\n\
             PipeBarrier<PIPE_ALL>();\n\
             LocalTensor<{ty}> {tensor} = {name}_tensor;\n",
            pipe = self.name
        );
        self.blk_tensors.push(BlkTensor { value: value.to_string(), dtype, name });
        text
    }

    /// Broadcast blocks for the constants used as block-broadcast operands.
    pub fn gen_duplicate_buf_alloc(&mut self, requests: &[TensorId]) -> Result<String> {
        let mut out = String::new();
        let mut seen = Vec::new();
        for &id in requests {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            let tensor = self.tensor(id)?;
            let value = tensor.const_value.clone().ok_or_else(|| Error::init("constant value", tensor.name.clone()))?;
            let (dtype, binding) = (tensor.dtype, blk_name(tensor));
            out.push_str(&self.blk_tensor_alloc_and_init(&value, dtype, &binding));
        }
        Ok(out)
    }

    /// One scratch buffer per distinct reuse tag, sized for its largest request.
    pub fn tmp_buf_alloc(&mut self, descs: &[TmpBufDesc]) -> String {
        for desc in descs {
            match self.tmp_bufs.iter_mut().find(|b| b.tag == desc.reuse_tag) {
                Some(buf) => buf.size = buf.size.clone().max(desc.size.clone()),
                None => {
                    let name = match self.tmp_bufs.len() {
                        0 => "tmp_buf".to_string(),
                        n => format!("tmp_buf_{n}"),
                    };
                    self.tmp_bufs.push(TmpBuf { tag: desc.reuse_tag, size: desc.size.clone(), name });
                }
            }
        }
        let mut out = String::new();
        for buf in &self.tmp_bufs {
            let tbuf = buf.name.replacen("tmp_buf", "tmp_tbuf", 1);
            out.push_str(&format!("TBuf<TPosition::VECCALC> {tbuf};\n"));
            out.push_str(&format!("{}.InitBuffer({tbuf}, {});\n", self.name, self.tiler.size(&buf.size)));
            out.push_str(&format!("LocalTensor<uint8_t> {} = {tbuf}.Get<uint8_t>();\n", buf.name));
        }
        out
    }

    pub fn tmp_buf_name(&self, tag: i64) -> Option<&str> {
        self.tmp_bufs.iter().find(|b| b.tag == tag).map(|b| b.name.as_str())
    }
}

/// Name of the broadcast block bound for a constant.
pub fn blk_name(tensor: &Tensor) -> String {
    format!("{}_blk", tensor.name)
}
