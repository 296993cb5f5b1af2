//! The x86-64 backend: executable code region, register allocator, opcode
//! and terminal emitters, block linking/patching and the compiled-block
//! cache.

pub mod asm;
pub mod code_block;
pub mod emit;
pub mod emit_a32;
pub mod emit_chip8;
pub mod emit_data;
pub mod emit_memory;
pub mod emit_saturation;
pub mod perf_map;
pub mod reg_alloc;
pub mod stubs;

pub use code_block::CodeBlockError;
pub use emit::{BlockDescriptor, HostCallbacks};
pub use emit_a32::A32EmitX64;
pub use emit_chip8::Chip8EmitX64;
pub use stubs::AccessorWidths;
