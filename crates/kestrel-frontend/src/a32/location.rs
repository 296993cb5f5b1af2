use kestrel_ir as ir;

/// An A32 block is keyed by its program counter and execution state: the
/// same address translates differently in Thumb and ARM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationDescriptor {
    pc: u32,
    thumb: bool,
}

impl LocationDescriptor {
    pub fn new(pc: u32, thumb: bool) -> LocationDescriptor {
        LocationDescriptor { pc, thumb }
    }

    pub fn pc(self) -> u32 {
        self.pc
    }

    pub fn thumb(self) -> bool {
        self.thumb
    }

    pub fn set_pc(self, pc: u32) -> LocationDescriptor {
        LocationDescriptor { pc, ..self }
    }

    pub fn set_thumb(self, thumb: bool) -> LocationDescriptor {
        LocationDescriptor { thumb, ..self }
    }

    pub fn advance_pc(self, amount: i32) -> LocationDescriptor {
        LocationDescriptor {
            pc: self.pc.wrapping_add_signed(amount),
            ..self
        }
    }

    /// Must stay in sync with the hash computation the backend emits for
    /// the return-stack-buffer hint.
    pub fn unique_hash(self) -> u64 {
        u64::from(self.pc) << 32 | u64::from(self.thumb)
    }
}

impl From<LocationDescriptor> for ir::LocationDescriptor {
    fn from(location: LocationDescriptor) -> ir::LocationDescriptor {
        ir::LocationDescriptor::new(location.unique_hash())
    }
}

impl From<ir::LocationDescriptor> for LocationDescriptor {
    fn from(location: ir::LocationDescriptor) -> LocationDescriptor {
        LocationDescriptor {
            pc: (location.value() >> 32) as u32,
            thumb: location.value() & 1 != 0,
        }
    }
}
