use kestrel_ir::{Block, IREmitter as _, Terminal, Value};
use kestrel_types::a32::Reg;
use kestrel_types::bits::sign_extend;
use kestrel_types::{Cond, Exception};

use super::decoder::decode_thumb16;
use super::ir_emitter::IREmitter;
use super::location::LocationDescriptor;

/// Defensive cap on straight-line translation.
pub const MAX_BLOCK_INSTRUCTIONS: usize = 256;

const INSTRUCTION_SIZE: i32 = 2;

/// Where translation stands with respect to the block's entry condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalState {
    /// No conditional instruction met yet.
    None,
    /// The current instruction ends this basic block.
    Break,
    /// The block is made up solely of conditional instructions.
    Translating,
    /// Conditional instructions followed by unconditional ones.
    Trailing,
}

/// Translates a Thumb-state basic block starting at `descriptor`.
pub fn translate_thumb(
    descriptor: LocationDescriptor,
    read_code: &mut dyn FnMut(u32) -> u32,
) -> Block {
    assert!(descriptor.thumb(), "the processor must be in Thumb state");

    let mut block = Block::new(descriptor.into());
    let end_location;
    {
        let mut visitor = TranslatorVisitor {
            ir: IREmitter::new(&mut block, descriptor),
            cond_state: ConditionalState::None,
        };

        let mut should_continue = true;
        let mut count = 0usize;
        while should_continue && visitor.cond_can_continue() {
            let pc = visitor.ir.pc();
            let word = read_code(pc) & 0xFFFF;

            should_continue = match decode_thumb16(word) {
                Some(matcher) => (matcher.handler())(&mut visitor, word),
                None => visitor.undefined_instruction(),
            };

            if visitor.cond_state == ConditionalState::Break {
                break;
            }

            visitor.ir.current_location = visitor.ir.current_location.advance_pc(INSTRUCTION_SIZE);
            visitor.ir.block.add_cycle();

            count += 1;
            if should_continue && count >= MAX_BLOCK_INSTRUCTIONS {
                break;
            }
        }

        if !visitor.ir.block.has_terminal() {
            let current = visitor.ir.current_location;
            visitor
                .ir
                .block
                .set_terminal(Terminal::LinkBlockFast { next: current.into() });
        }

        end_location = visitor.ir.current_location;
    }

    assert!(block.has_terminal(), "terminal has not been set");
    block.set_end_location(end_location.into());
    block
}

pub struct TranslatorVisitor<'a> {
    pub ir: IREmitter<'a>,
    pub cond_state: ConditionalState,
}

impl TranslatorVisitor<'_> {
    /// Whether translation may continue appending to a block whose entry
    /// condition has been fixed. Conservative: any CPSR write ends it.
    pub fn cond_can_continue(&self) -> bool {
        assert!(self.cond_state != ConditionalState::Break);
        if self.cond_state == ConditionalState::None {
            return true;
        }
        self.ir
            .block
            .indices()
            .all(|i| !self.ir.block.inst(i).opcode().writes_to_cpsr())
    }

    /// Folds the instruction's condition into the block's entry condition,
    /// deciding whether the instruction may be lifted into this block.
    pub fn condition_passed(&mut self, cond: Cond) -> bool {
        assert!(
            self.cond_state != ConditionalState::Break,
            "a requested break was not honored"
        );
        assert!(cond != Cond::Nv, "NV condition is obsolete");

        if self.cond_state == ConditionalState::Translating {
            let current: kestrel_ir::LocationDescriptor = self.ir.current_location.into();
            if self.ir.block.cond_failed_location() != Some(current) || cond == Cond::Al {
                self.cond_state = ConditionalState::Trailing;
            } else if cond == self.ir.block.cond() {
                let fail = self.ir.current_location.advance_pc(INSTRUCTION_SIZE);
                self.ir.block.set_cond_failed_location(fail.into());
                let cycles = self.ir.block.cond_failed_cycle_count();
                self.ir.block.set_cond_failed_cycle_count(cycles + 1);
                return true;
            } else {
                // The condition changed; make a new block from here.
                self.cond_state = ConditionalState::Break;
                let current = self.ir.current_location;
                self.ir
                    .block
                    .set_terminal(Terminal::LinkBlockFast { next: current.into() });
                return false;
            }
        }

        if cond == Cond::Al {
            return true;
        }

        if !self.ir.block.is_empty() {
            // Instructions were already lifted; restart at this one so the
            // next block can take the condition as its entry condition.
            self.cond_state = ConditionalState::Break;
            let current = self.ir.current_location;
            self.ir
                .block
                .set_terminal(Terminal::LinkBlockFast { next: current.into() });
            return false;
        }

        self.cond_state = ConditionalState::Translating;
        self.ir.block.set_cond(cond);
        let fail = self.ir.current_location.advance_pc(INSTRUCTION_SIZE);
        self.ir.block.set_cond_failed_location(fail.into());
        self.ir.block.set_cond_failed_cycle_count(1);
        true
    }

    pub fn undefined_instruction(&mut self) -> bool {
        let pc = self.ir.pc();
        self.ir.exception_raised(pc, Exception::UndefinedInstruction);
        self.ir
            .block
            .set_terminal(Terminal::check_halt(Terminal::ReturnToDispatch));
        false
    }

    pub fn unpredictable_instruction(&mut self) -> bool {
        let pc = self.ir.pc();
        self.ir.exception_raised(pc, Exception::UnpredictableInstruction);
        self.ir
            .block
            .set_terminal(Terminal::check_halt(Terminal::ReturnToDispatch));
        false
    }

    fn set_nz(&mut self, result: Value) {
        let n = self.ir.most_significant_bit(result);
        self.ir.set_n_flag(n);
        let z = self.ir.is_zero32(result);
        self.ir.set_z_flag(z);
    }

    // Shift instructions

    pub fn thumb16_lsl_imm(&mut self, imm5: u8, m: Reg, d: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // LSLS <Rd>, <Rm>, #<imm5>
        let carry_in = self.ir.get_c_flag();
        let rm = self.ir.get_register(m);
        let rc = self.ir.logical_shift_left32(rm, Value::U8(imm5), carry_in);
        self.ir.set_register(d, rc.result);
        self.set_nz(rc.result);
        self.ir.set_c_flag(rc.carry);
        true
    }

    pub fn thumb16_lsr_imm(&mut self, imm5: u8, m: Reg, d: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // LSRS <Rd>, <Rm>, #<imm5>; #0 encodes a full shift out.
        let shift = if imm5 == 0 { 32 } else { imm5 };
        let carry_in = self.ir.get_c_flag();
        let rm = self.ir.get_register(m);
        let rc = self.ir.logical_shift_right32(rm, Value::U8(shift), carry_in);
        self.ir.set_register(d, rc.result);
        self.set_nz(rc.result);
        self.ir.set_c_flag(rc.carry);
        true
    }

    pub fn thumb16_asr_imm(&mut self, imm5: u8, m: Reg, d: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // ASRS <Rd>, <Rm>, #<imm5>; #0 encodes a full shift out.
        let shift = if imm5 == 0 { 32 } else { imm5 };
        let carry_in = self.ir.get_c_flag();
        let rm = self.ir.get_register(m);
        let rc = self
            .ir
            .arithmetic_shift_right32(rm, Value::U8(shift), carry_in);
        self.ir.set_register(d, rc.result);
        self.set_nz(rc.result);
        self.ir.set_c_flag(rc.carry);
        true
    }

    pub fn thumb16_lsl_reg(&mut self, m: Reg, d_n: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // LSLS <Rdn>, <Rm>
        let rm = self.ir.get_register(m);
        let shift = self.ir.least_significant_byte(rm);
        let carry_in = self.ir.get_c_flag();
        let rn = self.ir.get_register(d_n);
        let rc = self.ir.logical_shift_left32(rn, shift, carry_in);
        self.ir.set_register(d_n, rc.result);
        self.set_nz(rc.result);
        self.ir.set_c_flag(rc.carry);
        true
    }

    pub fn thumb16_lsr_reg(&mut self, m: Reg, d_n: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // LSRS <Rdn>, <Rm>
        let rm = self.ir.get_register(m);
        let shift = self.ir.least_significant_byte(rm);
        let carry_in = self.ir.get_c_flag();
        let rn = self.ir.get_register(d_n);
        let rc = self.ir.logical_shift_right32(rn, shift, carry_in);
        self.ir.set_register(d_n, rc.result);
        self.set_nz(rc.result);
        self.ir.set_c_flag(rc.carry);
        true
    }

    pub fn thumb16_asr_reg(&mut self, m: Reg, d_n: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // ASRS <Rdn>, <Rm>
        let rm = self.ir.get_register(m);
        let shift = self.ir.least_significant_byte(rm);
        let carry_in = self.ir.get_c_flag();
        let rn = self.ir.get_register(d_n);
        let rc = self.ir.arithmetic_shift_right32(rn, shift, carry_in);
        self.ir.set_register(d_n, rc.result);
        self.set_nz(rc.result);
        self.ir.set_c_flag(rc.carry);
        true
    }

    // Arithmetic

    pub fn thumb16_add_reg_t1(&mut self, m: Reg, n: Reg, d: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // ADDS <Rd>, <Rn>, <Rm>; Rd == R15 is not encodable.
        let rn = self.ir.get_register(n);
        let rm = self.ir.get_register(m);
        let result = self.ir.add_with_carry32(rn, rm, Value::U1(false));
        self.ir.set_register(d, result.result);
        self.set_nz(result.result);
        self.ir.set_c_flag(result.carry);
        self.ir.set_v_flag(result.overflow);
        true
    }

    pub fn thumb16_add_reg_t2(&mut self, dn_hi: bool, m: Reg, dn_lo: u32) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        let d_n = Reg::from_bits(dn_lo + if dn_hi { 8 } else { 0 });
        if d_n == Reg::PC && m == Reg::PC {
            return self.unpredictable_instruction();
        }
        // ADD <Rdn>, <Rm>; no flags.
        let reading_pc = Value::U32(self.ir.pc().wrapping_add(4));
        let value_n = if d_n == Reg::PC {
            reading_pc
        } else {
            self.ir.get_register(d_n)
        };
        let value_m = if m == Reg::PC {
            reading_pc
        } else {
            self.ir.get_register(m)
        };
        let result = self.ir.add32(value_n, value_m, Value::U1(false));
        if d_n == Reg::PC {
            // The destination is the program counter; stop compilation.
            let masked = self.ir.and32(result, Value::U32(!1));
            self.ir.branch_write_pc(masked);
            self.ir.block.set_terminal(Terminal::ReturnToDispatch);
            false
        } else {
            self.ir.set_register(d_n, result);
            true
        }
    }

    pub fn thumb16_revsh(&mut self, m: Reg, d: Reg) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // REVSH <Rd>, <Rm>
        let rm = self.ir.get_register(m);
        let half = self.ir.least_significant_half(rm);
        let swapped = self.ir.byte_reverse_half(half);
        let result = self.ir.sign_extend_half_to_word(swapped);
        self.ir.set_register(d, result);
        true
    }

    // Branch instructions

    pub fn thumb16_b(&mut self, imm11: u32) -> bool {
        // B <label>
        let offset = sign_extend(imm11 << 1, 12) as i32;
        let target = self
            .ir
            .current_location
            .advance_pc(4)
            .advance_pc(offset);
        self.ir
            .block
            .set_terminal(Terminal::LinkBlock { next: target.into() });
        false
    }

    pub fn thumb16_b_cond(&mut self, cond: Cond, imm8: u32) -> bool {
        if cond == Cond::Al {
            // The "always" encoding of B<c> is permanently UNDEFINED.
            return self.undefined_instruction();
        }
        // B<c> <label>
        let offset = sign_extend(imm8 << 1, 9) as i32;
        let taken = self.ir.current_location.advance_pc(4).advance_pc(offset);
        let not_taken = self.ir.current_location.advance_pc(INSTRUCTION_SIZE);
        self.ir.block.set_terminal(Terminal::if_(
            cond,
            Terminal::LinkBlock { next: taken.into() },
            Terminal::LinkBlock {
                next: not_taken.into(),
            },
        ));
        false
    }

    pub fn thumb16_svc(&mut self, imm8: u32) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // SVC #<imm8>
        self.ir.call_supervisor(Value::U32(imm8));
        let next = self.ir.current_location.advance_pc(INSTRUCTION_SIZE);
        self.ir.block.set_terminal(Terminal::check_halt(
            Terminal::LinkBlock { next: next.into() },
        ));
        false
    }

    pub fn thumb16_bl_prefix(&mut self, imm11: u32) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // First half of BL/BLX: LR := PC + 4 + signed high offset.
        let high = sign_extend(imm11 << 12, 23);
        let lr = self.ir.pc().wrapping_add(4).wrapping_add(high);
        self.ir.set_register(Reg::LR, Value::U32(lr));
        true
    }

    pub fn thumb16_bl_suffix(&mut self, imm11: u32) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // Second half of BL: branch to LR + low offset, stay in Thumb.
        let lr = self.ir.get_register(Reg::LR);
        let target = self.ir.add32(lr, Value::U32(imm11 << 1), Value::U1(false));
        let masked = self.ir.and32(target, Value::U32(!1));
        self.ir.branch_write_pc(masked);
        let return_addr = (self.ir.pc().wrapping_add(2)) | 1;
        self.ir.set_register(Reg::LR, Value::U32(return_addr));
        self.ir.block.set_terminal(Terminal::ReturnToDispatch);
        false
    }

    pub fn thumb16_blx_suffix(&mut self, imm11: u32) -> bool {
        if !self.condition_passed(Cond::Al) {
            return false;
        }
        // Second half of BLX (interworking to ARM state): bit 0 of the
        // target is clear, so the write switches the execution state.
        let lr = self.ir.get_register(Reg::LR);
        let target = self.ir.add32(lr, Value::U32(imm11 << 1), Value::U1(false));
        self.ir.bx_write_pc(target);
        let return_addr = (self.ir.pc().wrapping_add(2)) | 1;
        self.ir.set_register(Reg::LR, Value::U32(return_addr));
        self.ir.block.set_terminal(Terminal::ReturnToDispatch);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ir::Opcode;

    fn translate_words(start_pc: u32, words: &[u16]) -> Block {
        let words = words.to_vec();
        let mut read = move |vaddr: u32| {
            let index = (vaddr.wrapping_sub(start_pc) / 2) as usize;
            u32::from(words.get(index).copied().unwrap_or(0))
        };
        translate_thumb(LocationDescriptor::new(start_pc, true), &mut read)
    }

    fn opcodes(block: &Block) -> Vec<Opcode> {
        block.indices().map(|i| block.inst(i).opcode()).collect()
    }

    #[test]
    fn lsls_sets_nzc_and_links_to_the_loop() {
        // lsls r0, r1, #2; b +#0
        let block = translate_words(0, &[0x0088, 0xE7FE]);
        assert_eq!(block.cycle_count(), 2);
        let ops = opcodes(&block);
        assert!(ops.contains(&Opcode::LogicalShiftLeft32));
        assert!(ops.contains(&Opcode::A32SetNFlag));
        assert!(ops.contains(&Opcode::A32SetZFlag));
        assert!(ops.contains(&Opcode::A32SetCFlag));
        match block.terminal() {
            Terminal::LinkBlock { next } => {
                let next = LocationDescriptor::from(*next);
                assert_eq!(next.pc(), 2);
                assert!(next.thumb());
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[test]
    fn bl_pair_writes_lr_twice_and_returns_to_dispatch() {
        // bl +#234584
        let block = translate_words(0, &[0xF039, 0xFA2A, 0xE7FE]);
        assert_eq!(block.cycle_count(), 2);
        let lr_writes = block
            .indices()
            .filter(|&i| block.inst(i).opcode() == Opcode::A32SetRegister)
            .filter(|&i| block.imm_a32_reg(block.inst(i).arg(0)) == Reg::LR)
            .count();
        assert_eq!(lr_writes, 2);
        assert!(opcodes(&block).contains(&Opcode::A32BranchWritePC));
        assert_eq!(*block.terminal(), Terminal::ReturnToDispatch);
    }

    #[test]
    fn blx_pair_uses_an_interworking_branch() {
        // blx +#67712
        let block = translate_words(0, &[0xF010, 0xEC3E, 0xE7FE]);
        assert!(opcodes(&block).contains(&Opcode::A32BXWritePC));
        assert_eq!(*block.terminal(), Terminal::ReturnToDispatch);
    }

    #[test]
    fn conditional_branch_lowers_to_an_if_terminal() {
        // beq +#-4 (to pc+4-4 = 0); next at 2
        let block = translate_words(0, &[0xD0FE]);
        match block.terminal() {
            Terminal::If { cond, then_, else_ } => {
                assert_eq!(*cond, Cond::Eq);
                match (&**then_, &**else_) {
                    (Terminal::LinkBlock { next: taken }, Terminal::LinkBlock { next: fall }) => {
                        assert_eq!(LocationDescriptor::from(*taken).pc(), 0);
                        assert_eq!(LocationDescriptor::from(*fall).pc(), 2);
                    }
                    other => panic!("unexpected terminals {other:?}"),
                }
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[test]
    fn svc_bridges_to_the_supervisor_and_checks_for_halt() {
        let block = translate_words(0, &[0xDF2A]);
        assert!(opcodes(&block).contains(&Opcode::A32CallSupervisor));
        assert!(matches!(block.terminal(), Terminal::CheckHalt(_)));
    }

    #[test]
    fn undefined_b_cond_encoding_raises() {
        // cond = 0b1110 within B<c> is UNDEFINED.
        let block = translate_words(0, &[0xDE00]);
        assert!(opcodes(&block).contains(&Opcode::ExceptionRaised));
    }

    #[test]
    fn condition_state_machine_transitions() {
        let mut block = Block::new(LocationDescriptor::new(0, true).into());
        let mut visitor = TranslatorVisitor {
            ir: IREmitter::new(&mut block, LocationDescriptor::new(0, true)),
            cond_state: ConditionalState::None,
        };

        // First conditional instruction in an empty block fixes the entry
        // condition.
        assert!(visitor.condition_passed(Cond::Eq));
        assert_eq!(visitor.cond_state, ConditionalState::Translating);
        assert_eq!(visitor.ir.block.cond(), Cond::Eq);
        assert_eq!(visitor.ir.block.cond_failed_cycle_count(), 1);

        // Same condition at the fail location extends the conditional run.
        visitor.ir.current_location = visitor.ir.current_location.advance_pc(2);
        assert!(visitor.condition_passed(Cond::Eq));
        assert_eq!(visitor.cond_state, ConditionalState::Translating);
        assert_eq!(visitor.ir.block.cond_failed_cycle_count(), 2);

        // A different condition breaks the block.
        visitor.ir.current_location = visitor.ir.current_location.advance_pc(2);
        assert!(!visitor.condition_passed(Cond::Ne));
        assert_eq!(visitor.cond_state, ConditionalState::Break);
        assert!(matches!(
            visitor.ir.block.terminal(),
            Terminal::LinkBlockFast { .. }
        ));
    }

    #[test]
    fn unconditional_after_conditional_trails() {
        let mut block = Block::new(LocationDescriptor::new(0, true).into());
        let mut visitor = TranslatorVisitor {
            ir: IREmitter::new(&mut block, LocationDescriptor::new(0, true)),
            cond_state: ConditionalState::None,
        };
        assert!(visitor.condition_passed(Cond::Cs));
        visitor.ir.current_location = visitor.ir.current_location.advance_pc(2);
        assert!(visitor.condition_passed(Cond::Al));
        assert_eq!(visitor.cond_state, ConditionalState::Trailing);
    }

    #[test]
    fn conditional_in_a_dirty_block_breaks() {
        let mut block = Block::new(LocationDescriptor::new(0, true).into());
        let mut visitor = TranslatorVisitor {
            ir: IREmitter::new(&mut block, LocationDescriptor::new(0, true)),
            cond_state: ConditionalState::None,
        };
        // Lift one unconditional instruction first.
        assert!(visitor.thumb16_revsh(Reg::R3, Reg::R4));
        visitor.ir.current_location = visitor.ir.current_location.advance_pc(2);
        assert!(!visitor.condition_passed(Cond::Eq));
        assert_eq!(visitor.cond_state, ConditionalState::Break);
    }
}
