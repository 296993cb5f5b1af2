//! The microinstruction IR: single-static-assignment values grouped into
//! basic blocks, plus the opcode registry the backends dispatch on.
//!
//! Blocks own their instructions in an arena and hand out [`InstIndex`]
//! handles; values reference producing instructions by handle, so the
//! usual JIT pointer graphs (pseudo-op back-links, identity aliases) stay
//! plain data.

mod block;
mod emitter;
mod inst;
mod location;
mod opcode;
mod terminal;
mod types;
mod value;

pub use block::Block;
pub use emitter::{IREmitter, ResultAndCarry, ResultAndCarryAndOverflow, ResultAndOverflow};
pub use inst::{Inst, InstIndex, PseudoKind};
pub use location::LocationDescriptor;
pub use opcode::Opcode;
pub use terminal::Terminal;
pub use types::Type;
pub use value::Value;
