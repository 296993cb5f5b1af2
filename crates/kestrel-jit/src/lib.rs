//! The user-facing JIT: one `Jit` per guest ISA, owning the executor
//! state, the compiled-block cache and the run loop.

pub mod a32;
pub mod chip8;

pub use kestrel_cpu_core::config::{PageTable, UserConfig};
pub use kestrel_jit_x64::CodeBlockError;
pub use kestrel_types::Exception;
