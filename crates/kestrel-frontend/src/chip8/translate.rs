use kestrel_ir::{Block, IREmitter as _, Terminal, Value};
use kestrel_types::chip8::{Reg, STACK_BASE};
use kestrel_types::{Cond, Exception};

use super::decoder::decode;
use super::ir_emitter::IREmitter;
use super::location::LocationDescriptor;

/// Defensive cap on straight-line translation; long runs end with a fast
/// link so the next block picks up where this one stopped.
pub const MAX_BLOCK_INSTRUCTIONS: usize = 256;

const INSTRUCTION_SIZE: i32 = 2;

/// Translates a basic block starting at `descriptor`, fetching instruction
/// words through `read_code`.
pub fn translate(
    descriptor: LocationDescriptor,
    read_code: &mut dyn FnMut(u32) -> u32,
) -> Block {
    let mut block = Block::new(descriptor.into());
    let end_location;
    {
        let mut visitor = TranslatorVisitor {
            ir: IREmitter::new(&mut block, descriptor),
        };

        let mut should_continue = true;
        let mut count = 0usize;
        while should_continue {
            let pc = visitor.ir.pc();
            let word = read_code(pc) & 0xFFFF;

            should_continue = match decode(word) {
                Some(matcher) => (matcher.handler())(&mut visitor, word),
                None => visitor.undefined_instruction(),
            };

            visitor.ir.current_location = visitor.ir.current_location.advance_pc(INSTRUCTION_SIZE);
            visitor.ir.block.add_cycle();

            count += 1;
            if should_continue && count >= MAX_BLOCK_INSTRUCTIONS {
                let current = visitor.ir.current_location;
                visitor
                    .ir
                    .block
                    .set_terminal(Terminal::LinkBlockFast { next: current.into() });
                break;
            }
        }

        end_location = visitor.ir.current_location;
    }

    assert!(block.has_terminal(), "terminal has not been set");
    block.set_end_location(end_location.into());
    block
}

pub struct TranslatorVisitor<'a> {
    pub ir: IREmitter<'a>,
}

impl TranslatorVisitor<'_> {
    fn link(&self, next: LocationDescriptor) -> Terminal {
        Terminal::LinkBlock { next: next.into() }
    }

    fn next_location(&self) -> LocationDescriptor {
        self.ir.current_location.advance_pc(INSTRUCTION_SIZE)
    }

    /// Lets the embedder's interpreter execute this one instruction.
    fn interpret_this_instruction(&mut self) -> bool {
        let next = self.ir.current_location;
        self.ir.block.set_terminal(Terminal::Interpret {
            next: next.into(),
            num_instructions: 1,
        });
        false
    }

    /// Routes the raw instruction word through the supervisor-call bridge
    /// and ends the block.
    fn supervisor_bridge(&mut self, word: u32) -> bool {
        self.ir.call_supervisor(Value::U32(word));
        let next = self.next_location();
        let terminal = Terminal::check_halt(self.link(next));
        self.ir.block.set_terminal(terminal);
        false
    }

    pub fn undefined_instruction(&mut self) -> bool {
        let pc = self.ir.pc();
        self.ir.exception_raised(pc, Exception::UndefinedInstruction);
        self.ir
            .block
            .set_terminal(Terminal::check_halt(Terminal::ReturnToDispatch));
        false
    }

    /// `Vx` as an 8-bit value.
    fn get_register8(&mut self, reg: Reg) -> Value {
        let wide = self.ir.get_register(reg);
        self.ir.least_significant_byte(wide)
    }

    fn set_register8(&mut self, reg: Reg, value: Value) {
        let wide = self.ir.zero_extend_byte_to_word(value);
        self.ir.set_register(reg, wide);
    }

    /// Address of the guest stack slot `SP` currently names.
    fn stack_slot_address(&mut self, sp: Value) -> Value {
        let offset = self.ir.lsl32(sp, Value::U8(1));
        self.ir.add32(Value::U32(STACK_BASE), offset, Value::U1(false))
    }

    // Branch instructions

    pub fn sys(&mut self) -> bool {
        // Machine-code routines are unallocated on this implementation.
        self.undefined_instruction()
    }

    pub fn ret(&mut self) -> bool {
        let sp = self.ir.get_register(Reg::SP);
        let new_sp = self.ir.sub32(sp, Value::U32(1), Value::U1(true));
        self.ir.set_register(Reg::SP, new_sp);
        let slot = self.stack_slot_address(new_sp);
        let return_pc = self.ir.read_memory_16(slot);
        let return_pc = self.ir.zero_extend_half_to_word(return_pc);
        self.ir.write_pc(return_pc);
        self.ir.block.set_terminal(Terminal::PopRSBHint);
        false
    }

    pub fn jp_nnn(&mut self, addr: u16) -> bool {
        let target = self.ir.current_location.set_pc(u32::from(addr));
        let terminal = self.link(target);
        self.ir.block.set_terminal(terminal);
        false
    }

    pub fn call_nnn(&mut self, addr: u16) -> bool {
        let return_location = self.next_location();
        let sp = self.ir.get_register(Reg::SP);
        let slot = self.stack_slot_address(sp);
        self.ir
            .write_memory_16(slot, Value::U16(return_location.pc() as u16));
        let new_sp = self.ir.add32(sp, Value::U32(1), Value::U1(false));
        self.ir.set_register(Reg::SP, new_sp);
        self.ir.push_rsb(return_location.unique_hash());
        let target = self.ir.current_location.set_pc(u32::from(addr));
        let terminal = self.link(target);
        self.ir.block.set_terminal(terminal);
        false
    }

    pub fn jp_v0_nnn(&mut self, addr: u16) -> bool {
        let v0 = self.ir.get_register(Reg::V0);
        let target = self.ir.add32(Value::U32(u32::from(addr)), v0, Value::U1(false));
        self.ir.write_pc(target);
        self.ir
            .block
            .set_terminal(Terminal::check_halt(Terminal::ReturnToDispatch));
        false
    }

    fn skip_if(&mut self, cond: Cond) -> bool {
        let taken = self.ir.current_location.advance_pc(2 * INSTRUCTION_SIZE);
        let not_taken = self.next_location();
        let terminal = Terminal::if_(cond, self.link(taken), self.link(not_taken));
        self.ir.block.set_terminal(terminal);
        false
    }

    pub fn se_xb(&mut self, x: Reg, byte: u8) -> bool {
        let lhs = self.get_register8(x);
        self.ir.compare8(lhs, Value::U8(byte));
        self.skip_if(Cond::Eq)
    }

    pub fn sne_xb(&mut self, x: Reg, byte: u8) -> bool {
        let lhs = self.get_register8(x);
        self.ir.compare8(lhs, Value::U8(byte));
        self.skip_if(Cond::Ne)
    }

    pub fn se_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(x);
        let rhs = self.get_register8(y);
        self.ir.compare8(lhs, rhs);
        self.skip_if(Cond::Eq)
    }

    pub fn sne_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(x);
        let rhs = self.get_register8(y);
        self.ir.compare8(lhs, rhs);
        self.skip_if(Cond::Ne)
    }

    pub fn skp_x(&mut self) -> bool {
        // Keypad state lives with the embedder.
        self.interpret_this_instruction()
    }

    pub fn sknp_x(&mut self) -> bool {
        self.interpret_this_instruction()
    }

    // Data processing instructions

    pub fn add_xb(&mut self, x: Reg, byte: u8) -> bool {
        let lhs = self.get_register8(x);
        let result = self.ir.add8(lhs, Value::U8(byte));
        self.set_register8(x, result);
        true
    }

    pub fn or_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(x);
        let rhs = self.get_register8(y);
        let result = self.ir.or8(lhs, rhs);
        self.set_register8(x, result);
        true
    }

    pub fn and_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(x);
        let rhs = self.get_register8(y);
        let result = self.ir.and8(lhs, rhs);
        self.set_register8(x, result);
        true
    }

    pub fn xor_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(x);
        let rhs = self.get_register8(y);
        let result = self.ir.eor8(lhs, rhs);
        self.set_register8(x, result);
        true
    }

    fn set_vf(&mut self, flag: Value) {
        let wide = self.ir.zero_extend_bit_to_word(flag);
        self.ir.set_register(Reg::VF, wide);
    }

    pub fn add_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(x);
        let rhs = self.get_register8(y);
        let rc = self.ir.add_with_carry8(lhs, rhs);
        // VF is written after Vx so a carry into VF itself wins.
        self.set_register8(x, rc.result);
        self.set_vf(rc.carry);
        true
    }

    pub fn sub_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(x);
        let rhs = self.get_register8(y);
        let rc = self.ir.sub_with_carry8(lhs, rhs);
        self.set_register8(x, rc.result);
        self.set_vf(rc.carry);
        true
    }

    pub fn subn_xy(&mut self, x: Reg, y: Reg) -> bool {
        let lhs = self.get_register8(y);
        let rhs = self.get_register8(x);
        let rc = self.ir.sub_with_carry8(lhs, rhs);
        self.set_register8(x, rc.result);
        self.set_vf(rc.carry);
        true
    }

    pub fn shr_x(&mut self, x: Reg) -> bool {
        let value = self.get_register8(x);
        let rc = self.ir.logical_shift_right8(value, Value::U8(1));
        self.set_register8(x, rc.result);
        self.set_vf(rc.carry);
        true
    }

    pub fn shl_x(&mut self, x: Reg) -> bool {
        let value = self.get_register8(x);
        let rc = self.ir.logical_shift_left8(value, Value::U8(1));
        self.set_register8(x, rc.result);
        self.set_vf(rc.carry);
        true
    }

    pub fn add_ix(&mut self, x: Reg) -> bool {
        let index = self.ir.get_register(Reg::I);
        let addend8 = self.get_register8(x);
        let addend = self.ir.zero_extend_byte_to_word(addend8);
        let sum = self.ir.add32(index, addend, Value::U1(false));
        self.ir.set_register(Reg::I, sum);
        true
    }

    // Load/store instructions

    pub fn ld_xb(&mut self, x: Reg, byte: u8) -> bool {
        self.ir.set_register(x, Value::U32(u32::from(byte)));
        true
    }

    pub fn ld_xy(&mut self, x: Reg, y: Reg) -> bool {
        let value = self.ir.get_register(y);
        self.ir.set_register(x, value);
        true
    }

    pub fn ld_innn(&mut self, addr: u16) -> bool {
        self.ir.set_register(Reg::I, Value::U32(u32::from(addr)));
        true
    }

    pub fn ld_xdt(&mut self, x: Reg) -> bool {
        let value = self.ir.get_register(Reg::DT);
        self.ir.set_register(x, value);
        true
    }

    pub fn ld_xk(&mut self) -> bool {
        // Blocks on a key press; only the embedder can do that.
        self.interpret_this_instruction()
    }

    pub fn ld_dtx(&mut self, x: Reg) -> bool {
        let value = self.ir.get_register(x);
        self.ir.set_register(Reg::DT, value);
        true
    }

    pub fn ld_stx(&mut self, x: Reg) -> bool {
        let value = self.ir.get_register(x);
        self.ir.set_register(Reg::ST, value);
        true
    }

    pub fn ld_fx(&mut self, x: Reg) -> bool {
        // Each built-in glyph is five bytes: I := Vx * 5.
        let digit8 = self.get_register8(x);
        let digit = self.ir.zero_extend_byte_to_word(digit8);
        let by_four = self.ir.lsl32(digit, Value::U8(2));
        let sum = self.ir.add32(by_four, digit, Value::U1(false));
        self.ir.set_register(Reg::I, sum);
        true
    }

    // Load/store multiple instructions

    pub fn ld_bx(&mut self) -> bool {
        self.interpret_this_instruction()
    }

    pub fn ld_ix(&mut self, x: Reg) -> bool {
        let index = self.ir.get_register(Reg::I);
        for i in 0..=(x as u32) {
            let addr = self.ir.add32(index, Value::U32(i), Value::U1(false));
            let value = self.get_register8(Reg::from_nibble(i));
            self.ir.write_memory_8(addr, value);
        }
        true
    }

    pub fn ld_xi(&mut self, x: Reg) -> bool {
        let index = self.ir.get_register(Reg::I);
        for i in 0..=(x as u32) {
            let addr = self.ir.add32(index, Value::U32(i), Value::U1(false));
            let value = self.ir.read_memory_8(addr);
            let wide = self.ir.zero_extend_byte_to_word(value);
            self.ir.set_register(Reg::from_nibble(i), wide);
        }
        true
    }

    // Miscellaneous instructions

    pub fn cls(&mut self, word: u32) -> bool {
        self.supervisor_bridge(word)
    }

    pub fn rnd_xb(&mut self) -> bool {
        self.interpret_this_instruction()
    }

    pub fn drw_xyn(&mut self, word: u32) -> bool {
        self.supervisor_bridge(word)
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
        translate(LocationDescriptor::new(start_pc), &mut read)
    }

    fn opcodes(block: &Block) -> Vec<Opcode> {
        block.indices().map(|i| block.inst(i).opcode()).collect()
    }

    #[test]
    fn call_pushes_the_stack_and_links() {
        let block = translate_words(0x200, &[0x2206]);
        assert_eq!(block.cycle_count(), 1);
        let ops = opcodes(&block);
        assert!(ops.contains(&Opcode::Chip8WriteMemory16));
        assert!(ops.contains(&Opcode::PushRSB));
        match block.terminal() {
            Terminal::LinkBlock { next } => {
                assert_eq!(LocationDescriptor::from(*next).pc(), 0x206);
            }
            other => panic!("unexpected terminal {other:?}"),
        }
        assert_eq!(LocationDescriptor::from(block.end_location()).pc(), 0x202);
    }

    #[test]
    fn ret_pops_the_stack_into_pc() {
        let block = translate_words(0x206, &[0x00EE]);
        let ops = opcodes(&block);
        assert!(ops.contains(&Opcode::Chip8ReadMemory16));
        assert!(ops.contains(&Opcode::Chip8WritePC));
        assert_eq!(*block.terminal(), Terminal::PopRSBHint);
    }

    #[test]
    fn skips_lower_to_conditional_links() {
        let block = translate_words(0x200, &[0x3A55]);
        match block.terminal() {
            Terminal::If { cond, then_, else_ } => {
                assert_eq!(*cond, Cond::Eq);
                match (&**then_, &**else_) {
                    (Terminal::LinkBlock { next: taken }, Terminal::LinkBlock { next: fall }) => {
                        assert_eq!(LocationDescriptor::from(*taken).pc(), 0x204);
                        assert_eq!(LocationDescriptor::from(*fall).pc(), 0x202);
                    }
                    other => panic!("unexpected terminals {other:?}"),
                }
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[test]
    fn straight_line_code_accumulates_cycles() {
        // LD V0, 1; LD V1, 2; ADD V0, V1; JP 0x200
        let block = translate_words(0x200, &[0x6001, 0x6102, 0x8014, 0x1200]);
        assert_eq!(block.cycle_count(), 4);
        assert!(matches!(block.terminal(), Terminal::LinkBlock { .. }));
        assert_eq!(LocationDescriptor::from(block.end_location()).pc(), 0x208);
    }

    #[test]
    fn add_xy_writes_vf_after_vx() {
        let block = translate_words(0x200, &[0x8014, 0x1200]);
        let ops = opcodes(&block);
        let set_positions: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| **op == Opcode::Chip8SetRegister)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(set_positions.len(), 2);
        let vf_write = block
            .indices()
            .filter(|&i| block.inst(i).opcode() == Opcode::Chip8SetRegister)
            .nth(1)
            .unwrap();
        assert_eq!(
            block.imm_chip8_reg(block.inst(vf_write).arg(0)),
            Reg::VF
        );
    }

    #[test]
    fn fallback_instructions_interpret_one_instruction() {
        let block = translate_words(0x200, &[0xC0FF]);
        match block.terminal() {
            Terminal::Interpret {
                next,
                num_instructions,
            } => {
                assert_eq!(LocationDescriptor::from(*next).pc(), 0x200);
                assert_eq!(*num_instructions, 1);
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[test]
    fn unknown_words_raise_undefined_instruction() {
        let block = translate_words(0x200, &[0xF1FF]);
        let ops = opcodes(&block);
        assert!(ops.contains(&Opcode::ExceptionRaised));
        assert_eq!(
            *block.terminal(),
            Terminal::check_halt(Terminal::ReturnToDispatch)
        );
    }

    #[test]
    fn runaway_blocks_are_capped() {
        // An endless ramp of LD V0, 1.
        let mut read = |_vaddr: u32| 0x6001u32;
        let block = translate(LocationDescriptor::new(0x200), &mut read);
        assert_eq!(block.cycle_count(), MAX_BLOCK_INSTRUCTIONS);
        match block.terminal() {
            Terminal::LinkBlockFast { next } => {
                assert_eq!(
                    LocationDescriptor::from(*next).pc(),
                    0x200 + 2 * MAX_BLOCK_INSTRUCTIONS as u32
                );
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }
}
