use kestrel_types::{a32, chip8, Cond};

use crate::inst::InstIndex;

/// A value in the IR: either an immediate or a reference to the
/// microinstruction that produces it (the opaque case).
///
/// Type and immediacy queries live on [`crate::Block`], which owns the
/// instruction arena needed to resolve opaque values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Void,
    Inst(InstIndex),
    U1(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Chip8Reg(chip8::Reg),
    A32Reg(a32::Reg),
    Cond(Cond),
}

impl Value {
    pub fn is_empty(self) -> bool {
        self == Value::Void
    }

    pub fn inst(self) -> Option<InstIndex> {
        match self {
            Value::Inst(index) => Some(index),
            _ => None,
        }
    }
}

// The IR allocates one of these per instruction argument; keep it register
// sized.
const _: () = assert!(std::mem::size_of::<Value>() <= 16);
