//! Cache invalidation over guest address ranges, and its interaction with
//! block linking and the return-stack buffer.

#![cfg(target_arch = "x86_64")]

use kestrel_cpu_core::callbacks::chip8::UserCallbacks;
use kestrel_cpu_core::jit_state::Chip8RegisterFile;
use kestrel_jit::chip8::Jit;
use kestrel_jit::{Exception, UserConfig};
use kestrel_types::chip8::Reg;

struct TestEnv {
    mem: Vec<u8>,
    ticks_left: u64,
}

impl TestEnv {
    fn new() -> TestEnv {
        TestEnv {
            mem: vec![0; 0x1000],
            ticks_left: 0,
        }
    }

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
        self.mem[vaddr as usize] = value;
    }

    fn memory_write_16(&mut self, vaddr: u32, value: u16) {
        let at = vaddr as usize;
        self.mem[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn interpreter_fallback(&mut self, pc: u32, _count: usize, _regs: &mut Chip8RegisterFile) {
        panic!("unexpected interpreter fallback at {pc:#x}");
    }

    fn call_svc(&mut self, _swi: u32, _regs: &mut Chip8RegisterFile) {}

    fn exception_raised(&mut self, _pc: u32, _exception: Exception) {}

    fn add_ticks(&mut self, ticks: u64) {
        self.ticks_left = self.ticks_left.saturating_sub(ticks);
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        self.ticks_left
    }
}

fn run_once(jit: &mut Jit, env: &mut TestEnv, ticks: u64) {
    jit.regs_mut().set_pc(0x200);
    env.ticks_left = ticks;
    jit.run(env);
}

#[test]
fn guest_code_writes_require_invalidation() {
    let mut env = TestEnv::new();
    let mut jit = Jit::new(UserConfig::default()).unwrap();
    env.load_words(0x200, &[0x6001, 0x1202]); // ld V0, 1; jp self

    run_once(&mut jit, &mut env, 2);
    assert_eq!(jit.regs()[Reg::V0], 1);

    // Rewriting guest code does not take effect while the stale block is
    // still cached...
    env.load_words(0x200, &[0x6002, 0x1202]);
    jit.regs_mut()[Reg::V0] = 0;
    run_once(&mut jit, &mut env, 2);
    assert_eq!(jit.regs()[Reg::V0], 1);

    // ...nor after invalidating an unrelated range...
    jit.invalidate_cache_ranges(&[(0x400, 0x4FF)]);
    jit.regs_mut()[Reg::V0] = 0;
    run_once(&mut jit, &mut env, 2);
    assert_eq!(jit.regs()[Reg::V0], 1);

    // ...but a write inside the block's range forces retranslation.
    jit.invalidate_cache_ranges(&[(0x200, 0x201)]);
    jit.regs_mut()[Reg::V0] = 0;
    run_once(&mut jit, &mut env, 2);
    assert_eq!(jit.regs()[Reg::V0], 2);
}

#[test]
fn invalidation_unlinks_incoming_jumps() {
    // Block A links to block B; evicting B must force A's link back
    // through the dispatcher so B is retranslated.
    let mut env = TestEnv::new();
    let mut jit = Jit::new(UserConfig::default()).unwrap();
    env.load_words(0x200, &[0x1204]); // jp 0x204
    env.load_words(0x204, &[0x6005, 0x1204]); // ld V0, 5; jp self

    run_once(&mut jit, &mut env, 3);
    assert_eq!(jit.regs()[Reg::V0], 5);

    env.load_words(0x204, &[0x6007, 0x1204]);
    jit.invalidate_cache_ranges(&[(0x204, 0x205)]);
    jit.regs_mut()[Reg::V0] = 0;
    run_once(&mut jit, &mut env, 3);
    assert_eq!(jit.regs()[Reg::V0], 7);
}

#[test]
fn invalidating_a_return_target_falls_back_to_dispatch() {
    // call 0x206 / ret, with the continuation at 0x202 also compiled so
    // the return-stack buffer can hint straight into it.
    let mut env = TestEnv::new();
    let mut jit = Jit::new(UserConfig::default()).unwrap();
    env.load_words(0x200, &[0x2206]); // call 0x206
    env.load_words(0x202, &[0x6001, 0x1202]); // ld V0, 1; jp self
    env.load_words(0x206, &[0x00EE]); // ret

    run_once(&mut jit, &mut env, 5);
    assert_eq!(jit.regs()[Reg::V0], 1);
    assert_eq!(jit.regs().pc(), 0x202);

    // Evict the continuation and change its semantics; the stale return
    // prediction must not resurrect the old block.
    env.load_words(0x202, &[0x6009, 0x1202]);
    jit.invalidate_cache_ranges(&[(0x202, 0x203)]);
    jit.regs_mut()[Reg::V0] = 0;
    run_once(&mut jit, &mut env, 5);
    assert_eq!(jit.regs()[Reg::V0], 9);
}

#[test]
fn clear_cache_retranslates_everything() {
    let mut env = TestEnv::new();
    let mut jit = Jit::new(UserConfig::default()).unwrap();
    env.load_words(0x200, &[0x7001, 0x1200]); // add V0, 1; jp 0x200

    run_once(&mut jit, &mut env, 4);
    assert_eq!(jit.regs()[Reg::V0], 2);

    jit.clear_cache();
    env.load_words(0x200, &[0x7002, 0x1200]);
    jit.regs_mut()[Reg::V0] = 0;
    run_once(&mut jit, &mut env, 4);
    assert_eq!(jit.regs()[Reg::V0], 4);
}
