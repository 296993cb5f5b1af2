//! End-to-end CHIP-8 execution through the JIT.

#![cfg(target_arch = "x86_64")]

use kestrel_cpu_core::callbacks::chip8::UserCallbacks;
use kestrel_cpu_core::config::PAGE_SIZE;
use kestrel_cpu_core::jit_state::Chip8RegisterFile;
use kestrel_jit::chip8::Jit;
use kestrel_jit::{Exception, PageTable, UserConfig};
use kestrel_types::chip8::Reg;

const MEM_SIZE: usize = PAGE_SIZE;

struct TestEnv {
    mem: Vec<u8>,
    ticks_left: u64,
    svc_calls: Vec<u32>,
    exceptions: Vec<(u32, Exception)>,
    fallbacks: Vec<(u32, usize)>,
    writes: Vec<(u32, u8)>,
}

impl TestEnv {
    fn new() -> TestEnv {
        TestEnv {
            mem: vec![0; MEM_SIZE],
            ticks_left: 0,
            svc_calls: Vec::new(),
            exceptions: Vec::new(),
            fallbacks: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Loads big-endian instruction words at `addr`.
    fn load_words(&mut self, addr: u32, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            let at = addr as usize + i * 2;
            self.mem[at] = (word >> 8) as u8;
            self.mem[at + 1] = *word as u8;
        }
    }
}

impl UserCallbacks for TestEnv {
    fn memory_read_code(&mut self, vaddr: u32) -> u32 {
        // Instruction words are stored big-endian.
        let at = vaddr as usize;
        u32::from(self.mem[at]) << 8 | u32::from(self.mem[at + 1])
    }

    fn memory_read_8(&mut self, vaddr: u32) -> u8 {
        self.mem[vaddr as usize]
    }

    fn memory_read_16(&mut self, vaddr: u32) -> u16 {
        let at = vaddr as usize;
        u16::from_le_bytes([self.mem[at], self.mem[at + 1]])
    }

    fn memory_write_8(&mut self, vaddr: u32, value: u8) {
        self.writes.push((vaddr, value));
        self.mem[vaddr as usize] = value;
    }

    fn memory_write_16(&mut self, vaddr: u32, value: u16) {
        let at = vaddr as usize;
        self.mem[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn interpreter_fallback(&mut self, pc: u32, count: usize, regs: &mut Chip8RegisterFile) {
        self.fallbacks.push((pc, count));
        assert_eq!(count, 1);
        let word = self.memory_read_code(pc);
        if word & 0xF000 == 0xC000 {
            // RND Vx, byte: a very fair dice roll.
            let x = Reg::from_nibble((word >> 8) & 0xF);
            regs[x] = 0x42 & (word & 0xFF);
        }
        regs.set_pc(pc + 2);
    }

    fn call_svc(&mut self, swi: u32, regs: &mut Chip8RegisterFile) {
        self.svc_calls.push(swi);
        if swi & 0xF000 == 0xD000 {
            // Pretend every sprite draw collides.
            regs[Reg::VF] = 1;
        }
    }

    fn exception_raised(&mut self, pc: u32, exception: Exception) {
        self.exceptions.push((pc, exception));
    }

    fn add_ticks(&mut self, ticks: u64) {
        self.ticks_left = self.ticks_left.saturating_sub(ticks);
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        self.ticks_left
    }
}

fn new_jit() -> Jit {
    let _ = env_logger::builder().is_test(true).try_init();
    Jit::new(UserConfig::default()).expect("jit construction")
}

#[test]
fn call_then_ret_restores_pc_and_sp() {
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x2206]); // call 0x206
    env.load_words(0x206, &[0x00EE]); // ret

    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 2;
    jit.run(&mut env);

    assert_eq!(jit.regs().pc(), 0x202);
    assert_eq!(jit.regs()[Reg::SP], 0);
    // The return address went through the guest stack.
    assert_eq!(env.memory_read_16(0x0EA0), 0x202);
}

#[test]
fn skip_equal_takes_both_arms() {
    // se V0, 0x55; (not taken) ld V1, 1; jp 0x204 / (taken) jp 0x204
    let code = [0x3055u16, 0x6101, 0x1204];

    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &code);
    jit.regs_mut()[Reg::V0] = 0x55;
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V1], 0, "skip taken");
    assert_eq!(jit.regs().pc(), 0x204);

    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &code);
    jit.regs_mut()[Reg::V0] = 0x54;
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V1], 1, "skip not taken");
    assert_eq!(jit.regs().pc(), 0x204);
}

#[test]
fn skip_not_equal_on_registers() {
    // sne V0, V1; (not taken) ld V2, 1; jp 0x204
    let code = [0x9010u16, 0x6201, 0x1204];

    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &code);
    jit.regs_mut()[Reg::V0] = 7;
    jit.regs_mut()[Reg::V1] = 7;
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V2], 1);

    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &code);
    jit.regs_mut()[Reg::V0] = 7;
    jit.regs_mut()[Reg::V1] = 8;
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V2], 0);
}

#[test]
fn alu_carry_flags() {
    // ld V0, 0xFF; ld V1, 0x02; add V0, V1; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x60FF, 0x6102, 0x8014, 0x1206]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 4;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 0x01);
    assert_eq!(jit.regs()[Reg::VF], 1);

    // ld V0, 0x0A; ld V1, 0x03; sub V0, V1 (no borrow: VF = 1)
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x600A, 0x6103, 0x8015, 0x1206]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 4;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 0x07);
    assert_eq!(jit.regs()[Reg::VF], 1);

    // ld V0, 0x03; ld V1, 0x0A; sub V0, V1 (borrow: VF = 0)
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x6003, 0x610A, 0x8015, 0x1206]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 4;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 0xF9);
    assert_eq!(jit.regs()[Reg::VF], 0);
}

#[test]
fn shifts_capture_the_moved_out_bit() {
    // ld V0, 0x05; shr V0; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x6005, 0x8006, 0x1204]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 0x02);
    assert_eq!(jit.regs()[Reg::VF], 1);

    // ld V0, 0x81; shl V0; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x6081, 0x800E, 0x1204]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 0x02);
    assert_eq!(jit.regs()[Reg::VF], 1);
}

#[test]
fn logical_and_register_moves() {
    // ld V0, 0xF0; ld V1, 0x3C; or V0, V1; ld V2, V0; xor V2, V1; and V2, V0; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(
        0x200,
        &[0x60F0, 0x613C, 0x8011, 0x8200, 0x8213, 0x8202, 0x120C],
    );
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 7;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 0xFC);
    assert_eq!(jit.regs()[Reg::V2], 0xC0);
}

#[test]
fn index_register_arithmetic() {
    // ld I, 0x123; ld V0, 0x05; add I, V0; ld V1, 0x07; ld F, V1; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0xA123, 0x6005, 0xF01E, 0x6107, 0xF129, 0x120A]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 6;
    jit.run(&mut env);
    // F129 repoints I at the glyph, so the ADD result is only visible in
    // the interim; the final I is 7 * 5.
    assert_eq!(jit.regs()[Reg::I], 35);
    assert_eq!(jit.regs()[Reg::V1], 0x07);
}

#[test]
fn timer_register_moves() {
    // ld V0, 0x30; ld DT, V0; ld V1, DT; ld ST, V1; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x6030, 0xF015, 0xF107, 0xF118, 0x1208]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 5;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::DT], 0x30);
    assert_eq!(jit.regs()[Reg::ST], 0x30);
    assert_eq!(jit.regs()[Reg::V1], 0x30);
}

#[test]
fn jump_with_offset_goes_through_dispatch() {
    // ld V0, 0x04; jp V0, 0x200 (to 0x204); jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x6004, 0xB200, 0x1204]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);
    assert_eq!(jit.regs().pc(), 0x204);
}

fn store_load_program(env: &mut TestEnv) {
    // ld I, 0x300; ld V0, 0x11; ld V1, 0x22; ld [I], V1;
    // ld V0, 0; ld V1, 0; ld V1, [I]; jp self
    env.load_words(
        0x200,
        &[
            0xA300, 0x6011, 0x6122, 0xF155, 0x6000, 0x6100, 0xF165, 0x120E,
        ],
    );
}

#[test]
fn store_and_reload_through_callbacks() {
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    store_load_program(&mut env);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 8;
    jit.run(&mut env);

    assert_eq!(jit.regs()[Reg::V0], 0x11);
    assert_eq!(jit.regs()[Reg::V1], 0x22);
    assert_eq!(env.mem[0x300], 0x11);
    assert_eq!(env.mem[0x301], 0x22);
    // Without a page table every access is a callback.
    assert_eq!(env.writes, vec![(0x300, 0x11), (0x301, 0x22)]);
}

#[test]
fn store_and_reload_through_the_page_table() {
    let mut env = TestEnv::new();
    store_load_program(&mut env);

    let mut table = PageTable::new();
    unsafe { table.map_region(0, env.mem.as_mut_ptr(), MEM_SIZE) };
    let mut jit = Jit::new(UserConfig {
        page_table: Some(table),
    })
    .expect("jit construction");

    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 8;
    jit.run(&mut env);

    assert_eq!(jit.regs()[Reg::V0], 0x11);
    assert_eq!(jit.regs()[Reg::V1], 0x22);
    assert_eq!(env.mem[0x300], 0x11);
    assert_eq!(env.mem[0x301], 0x22);
    // The inline fast path bypassed the write callback entirely.
    assert!(env.writes.is_empty());
}

#[test]
fn rnd_takes_the_interpreter_fallback() {
    // rnd V0, 0xFF; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0xC0FF, 0x1202]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);

    assert_eq!(env.fallbacks, vec![(0x200, 1)]);
    assert_eq!(jit.regs()[Reg::V0], 0x42);
    assert_eq!(jit.regs().pc(), 0x202);
}

#[test]
fn draw_bridges_to_the_supervisor() {
    // cls; drw V1, V2, 5; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x00E0, 0xD125, 0x1204]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 3;
    jit.run(&mut env);

    assert_eq!(env.svc_calls, vec![0x00E0, 0xD125]);
    // The embedder reported a collision through the register file.
    assert_eq!(jit.regs()[Reg::VF], 1);
    assert_eq!(jit.regs().pc(), 0x204);
}

#[test]
fn unallocated_encodings_raise_undefined_instruction() {
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0xF1FF]);
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = 1;
    jit.run(&mut env);

    assert_eq!(env.exceptions, vec![(0x200, Exception::UndefinedInstruction)]);
    assert_eq!(jit.regs().pc(), 0x200);
}

#[test]
fn halt_request_stops_before_entering_guest_code() {
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x6001, 0x1202]);
    jit.regs_mut().set_pc(0x200);
    jit.halt_execution();
    env.ticks_left = 5;
    jit.run(&mut env);

    assert_eq!(jit.regs()[Reg::V0], 0);
    assert_eq!(jit.regs().pc(), 0x200);
    // No cycles were consumed, and the halt was acknowledged.
    assert_eq!(env.ticks_left, 5);

    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 1);
}

#[test]
fn repeated_runs_reuse_compiled_blocks() {
    // add V0, 1; jp self
    let mut env = TestEnv::new();
    let mut jit = new_jit();
    env.load_words(0x200, &[0x7001, 0x1200]);
    jit.regs_mut().set_pc(0x200);

    env.ticks_left = 10;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 5);

    env.ticks_left = 10;
    jit.run(&mut env);
    assert_eq!(jit.regs()[Reg::V0], 10);
}
