use kestrel_ir::{Block, Opcode, Value};
use kestrel_types::chip8::Reg;

use super::location::LocationDescriptor;

/// Convenience surface for lifting CHIP-8 instructions into a block. The
/// translator updates `current_location` as it advances.
pub struct IREmitter<'a> {
    pub block: &'a mut Block,
    pub current_location: LocationDescriptor,
}

impl kestrel_ir::IREmitter for IREmitter<'_> {
    fn block_mut(&mut self) -> &mut Block {
        self.block
    }
}

impl<'a> IREmitter<'a> {
    pub fn new(block: &'a mut Block, location: LocationDescriptor) -> IREmitter<'a> {
        IREmitter {
            block,
            current_location: location,
        }
    }

    pub fn pc(&self) -> u32 {
        self.current_location.pc()
    }

    /// Reads a guest register as its zero-extended 32-bit storage cell.
    pub fn get_register(&mut self, reg: Reg) -> Value {
        self.block.append(Opcode::Chip8GetRegister, &[Value::Chip8Reg(reg)])
    }

    pub fn set_register(&mut self, reg: Reg, value: Value) {
        assert!(reg != Reg::PC, "the program counter is set through WritePC");
        self.block
            .append(Opcode::Chip8SetRegister, &[Value::Chip8Reg(reg), value]);
    }

    pub fn write_pc(&mut self, value: Value) {
        self.block.append(Opcode::Chip8WritePC, &[value]);
    }

    pub fn call_supervisor(&mut self, value: Value) {
        self.block.append(Opcode::Chip8CallSupervisor, &[value]);
    }

    pub fn read_memory_8(&mut self, vaddr: Value) -> Value {
        self.block.append(Opcode::Chip8ReadMemory8, &[vaddr])
    }

    pub fn read_memory_16(&mut self, vaddr: Value) -> Value {
        self.block.append(Opcode::Chip8ReadMemory16, &[vaddr])
    }

    pub fn write_memory_8(&mut self, vaddr: Value, value: Value) {
        self.block.append(Opcode::Chip8WriteMemory8, &[vaddr, value]);
    }

    pub fn write_memory_16(&mut self, vaddr: Value, value: Value) {
        self.block.append(Opcode::Chip8WriteMemory16, &[vaddr, value]);
    }
}
