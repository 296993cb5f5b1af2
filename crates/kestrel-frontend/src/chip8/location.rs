use kestrel_ir as ir;

/// A CHIP-8 block is keyed by its program counter alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationDescriptor {
    pc: u32,
}

impl LocationDescriptor {
    pub fn new(pc: u32) -> LocationDescriptor {
        LocationDescriptor { pc }
    }

    pub fn pc(self) -> u32 {
        self.pc
    }

    pub fn set_pc(self, pc: u32) -> LocationDescriptor {
        LocationDescriptor { pc }
    }

    pub fn advance_pc(self, amount: i32) -> LocationDescriptor {
        LocationDescriptor {
            pc: self.pc.wrapping_add_signed(amount),
        }
    }

    /// Must stay in sync with the hash computation the backend emits for
    /// the return-stack-buffer hint.
    pub fn unique_hash(self) -> u64 {
        u64::from(self.pc) << 32
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
        }
    }
}
