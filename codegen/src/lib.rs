//! Vector-core kernel source generation for vecc.
//!
//! This crate turns scheduled graphs into kernel source text for a vector accelerator core.
//! It decides where every tensor lives in local memory, when its storage is allocated,
//! handed over and released, and which synchronization the concurrent hardware units need
//! between producer and consumer instructions.
//!
//! # Architecture
//!
//! - **Tiler**: axis and size-variable registry, renders symbolic sizes and offsets
//! - **TPipe**: queue/buffer allocator, reuse and share chains, lifecycle statements
//! - **ApiCall**: one emitter per instruction family, operand classification
//! - **Loops**: loop tree and the per-call generation pass with synchronization
//! - **Kernel**: graph parsing, kernel body assembly, tiling-key dispatch, workspace layout
//!
//! # Usage
//!
//! ```ignore
//! use vecc_codegen::{KernelConfig, generate_fused_kernel};
//!
//! let config = KernelConfig::builder().tiling_key_pack_threshold(32).build();
//! let output = generate_fused_kernel(&fused_graph, &config)?;
//! println!("{}", output.code);
//! ```

pub mod api_call;
pub mod api_tensor;
pub mod config;
pub mod error;
pub mod kernel;
pub mod loops;
pub mod sync;
pub mod tensor;
pub mod tiler;
pub mod tpipe;
pub mod writer;


pub use api_call::{ApiCall, ApiKind, CallId, CmpMode, OperandRole, ReducePattern};
pub use api_tensor::ApiTensor;
pub use config::{ApiRegistry, ApiSpec, KernelConfig, TmpBufDesc, TmpBufRegistry};
pub use error::*;
pub use kernel::{Kernel, KernelIo, KernelOutput, WorkspaceLayout, calculate_workspace_size, generate_fused_kernel};
pub use loops::{Loop, LoopBody};
pub use sync::SyncState;
pub use tensor::{Tensor, TensorState};
pub use tiler::Tiler;
pub use tpipe::TPipe;
