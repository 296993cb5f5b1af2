use kestrel_ir::{Block, Opcode, Value};
use kestrel_types::a32::Reg;

use super::location::LocationDescriptor;

/// Convenience surface for lifting A32 instructions into a block.
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

    pub fn get_register(&mut self, reg: Reg) -> Value {
        assert!(reg != Reg::PC, "PC reads are resolved by the lifter");
        self.block.append(Opcode::A32GetRegister, &[Value::A32Reg(reg)])
    }

    pub fn set_register(&mut self, reg: Reg, value: Value) {
        assert!(reg != Reg::PC, "the program counter is set through WritePC");
        self.block
            .append(Opcode::A32SetRegister, &[Value::A32Reg(reg), value]);
    }

    /// Simple branch: bit 0 is ignored, execution state is unchanged.
    pub fn branch_write_pc(&mut self, value: Value) {
        self.block.append(Opcode::A32BranchWritePC, &[value]);
    }

    /// Interworking branch: bit 0 of the target selects the execution
    /// state and the address is aligned accordingly.
    pub fn bx_write_pc(&mut self, value: Value) {
        self.block.append(Opcode::A32BXWritePC, &[value]);
    }

    pub fn get_c_flag(&mut self) -> Value {
        self.block.append(Opcode::A32GetCFlag, &[])
    }

    pub fn set_n_flag(&mut self, value: Value) {
        self.block.append(Opcode::A32SetNFlag, &[value]);
    }

    pub fn set_z_flag(&mut self, value: Value) {
        self.block.append(Opcode::A32SetZFlag, &[value]);
    }

    pub fn set_c_flag(&mut self, value: Value) {
        self.block.append(Opcode::A32SetCFlag, &[value]);
    }

    pub fn set_v_flag(&mut self, value: Value) {
        self.block.append(Opcode::A32SetVFlag, &[value]);
    }

    pub fn set_cpsr_nzcv(&mut self, value: Value) {
        self.block.append(Opcode::A32SetCpsrNZCV, &[value]);
    }

    pub fn call_supervisor(&mut self, value: Value) {
        self.block.append(Opcode::A32CallSupervisor, &[value]);
    }

    pub fn read_memory_8(&mut self, vaddr: Value) -> Value {
        self.block.append(Opcode::A32ReadMemory8, &[vaddr])
    }

    pub fn read_memory_16(&mut self, vaddr: Value) -> Value {
        self.block.append(Opcode::A32ReadMemory16, &[vaddr])
    }

    pub fn read_memory_32(&mut self, vaddr: Value) -> Value {
        self.block.append(Opcode::A32ReadMemory32, &[vaddr])
    }

    pub fn read_memory_64(&mut self, vaddr: Value) -> Value {
        self.block.append(Opcode::A32ReadMemory64, &[vaddr])
    }

    pub fn write_memory_8(&mut self, vaddr: Value, value: Value) {
        self.block.append(Opcode::A32WriteMemory8, &[vaddr, value]);
    }

    pub fn write_memory_16(&mut self, vaddr: Value, value: Value) {
        self.block.append(Opcode::A32WriteMemory16, &[vaddr, value]);
    }

    pub fn write_memory_32(&mut self, vaddr: Value, value: Value) {
        self.block.append(Opcode::A32WriteMemory32, &[vaddr, value]);
    }

    pub fn write_memory_64(&mut self, vaddr: Value, value: Value) {
        self.block.append(Opcode::A32WriteMemory64, &[vaddr, value]);
    }

    pub fn set_exclusive(&mut self, vaddr: Value) {
        self.block.append(Opcode::A32SetExclusive, &[vaddr]);
    }

    pub fn clear_exclusive(&mut self) {
        self.block.append(Opcode::A32ClearExclusive, &[]);
    }

    /// Returns 0 on success, 1 if the monitor did not hold a matching
    /// reservation.
    pub fn exclusive_write_memory_32(&mut self, vaddr: Value, value: Value) -> Value {
        self.block
            .append(Opcode::A32ExclusiveWriteMemory32, &[vaddr, value])
    }
}
