//! Differential testing: random straight-line CHIP-8 ALU programs run
//! through the JIT must match a direct interpretation of the same
//! semantics.

#![cfg(target_arch = "x86_64")]

use kestrel_cpu_core::callbacks::chip8::UserCallbacks;
use kestrel_cpu_core::jit_state::Chip8RegisterFile;
use kestrel_jit::chip8::Jit;
use kestrel_jit::{Exception, UserConfig};
use kestrel_types::chip8::Reg;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const PROGRAM_LEN: usize = 24;
const ITERS: usize = 64;
const SEED: u64 = 0x1bad_b002_cafe_f00d;

struct TestEnv {
    mem: Vec<u8>,
    ticks_left: u64,
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

    fn exception_raised(&mut self, pc: u32, exception: Exception) {
        panic!("unexpected {exception:?} at {pc:#x}");
    }

    fn add_ticks(&mut self, ticks: u64) {
        self.ticks_left = self.ticks_left.saturating_sub(ticks);
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        self.ticks_left
    }
}

/// Straight-line ALU word with random registers and immediates.
fn random_instruction(rng: &mut ChaCha8Rng) -> u16 {
    let x = rng.gen_range(0..16u16);
    let y = rng.gen_range(0..16u16);
    let kk = rng.gen_range(0..=0xFFu16);
    match rng.gen_range(0..11u32) {
        0 => 0x6000 | x << 8 | kk,       // ld Vx, kk
        1 => 0x7000 | x << 8 | kk,       // add Vx, kk
        2 => 0x8000 | x << 8 | y << 4,   // ld Vx, Vy
        3 => 0x8001 | x << 8 | y << 4,   // or
        4 => 0x8002 | x << 8 | y << 4,   // and
        5 => 0x8003 | x << 8 | y << 4,   // xor
        6 => 0x8004 | x << 8 | y << 4,   // add with carry into VF
        7 => 0x8005 | x << 8 | y << 4,   // sub
        8 => 0x8007 | x << 8 | y << 4,   // subn
        9 => 0x8006 | x << 8 | y << 4,   // shr
        _ => 0x800E | x << 8 | y << 4,   // shl
    }
}

/// The architectural effect of the subset above, byte for byte.
fn interpret(regs: &mut [u8; 16], word: u16) {
    let x = ((word >> 8) & 0xF) as usize;
    let y = ((word >> 4) & 0xF) as usize;
    let kk = (word & 0xFF) as u8;
    match (word & 0xF000, word & 0xF) {
        (0x6000, _) => regs[x] = kk,
        (0x7000, _) => regs[x] = regs[x].wrapping_add(kk),
        (0x8000, 0x0) => regs[x] = regs[y],
        (0x8000, 0x1) => regs[x] |= regs[y],
        (0x8000, 0x2) => regs[x] &= regs[y],
        (0x8000, 0x3) => regs[x] ^= regs[y],
        (0x8000, 0x4) => {
            let (sum, carry) = regs[x].overflowing_add(regs[y]);
            regs[x] = sum;
            regs[0xF] = carry as u8;
        }
        (0x8000, 0x5) => {
            let (diff, borrow) = regs[x].overflowing_sub(regs[y]);
            regs[x] = diff;
            regs[0xF] = (!borrow) as u8;
        }
        (0x8000, 0x7) => {
            let (diff, borrow) = regs[y].overflowing_sub(regs[x]);
            regs[x] = diff;
            regs[0xF] = (!borrow) as u8;
        }
        (0x8000, 0x6) => {
            let bit = regs[x] & 1;
            regs[x] >>= 1;
            regs[0xF] = bit;
        }
        (0x8000, 0xE) => {
            let bit = regs[x] >> 7;
            regs[x] <<= 1;
            regs[0xF] = bit;
        }
        _ => unreachable!(),
    }
}

#[test]
fn random_alu_blocks_match_the_reference() {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);

    for iter in 0..ITERS {
        let program: Vec<u16> = (0..PROGRAM_LEN)
            .map(|_| random_instruction(&mut rng))
            .collect();
        let initial: [u8; 16] = std::array::from_fn(|_| rng.gen());

        let mut expected = initial;
        for &word in &program {
            interpret(&mut expected, word);
        }

        let mut env = TestEnv {
            mem: vec![0; 0x1000],
            ticks_left: (PROGRAM_LEN + 1) as u64,
        };
        for (i, word) in program.iter().enumerate() {
            let at = 0x200 + i * 2;
            env.mem[at] = (word >> 8) as u8;
            env.mem[at + 1] = *word as u8;
        }
        // Park the program in a self loop.
        let end = 0x200 + PROGRAM_LEN * 2;
        env.mem[end] = 0x10 | (end >> 8) as u8;
        env.mem[end + 1] = end as u8;

        let mut jit = Jit::new(UserConfig::default()).expect("jit construction");
        for (i, value) in initial.iter().enumerate() {
            jit.regs_mut()[Reg::from_nibble(i as u32)] = u32::from(*value);
        }
        jit.regs_mut().set_pc(0x200);
        jit.run(&mut env);

        for i in 0..16 {
            assert_eq!(
                jit.regs()[Reg::from_nibble(i as u32)],
                u32::from(expected[i]),
                "V{i:X} mismatch on iteration {iter}\nprogram: {program:04X?}\ninitial: {initial:02X?}"
            );
        }
        assert_eq!(jit.regs().pc(), end as u32);
    }
}
