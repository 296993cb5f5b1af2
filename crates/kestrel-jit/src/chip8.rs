//! The CHIP-8 executor.

use log::debug;

use kestrel_cpu_core::callbacks::chip8::UserCallbacks;
use kestrel_cpu_core::config::UserConfig;
use kestrel_cpu_core::jit_state::{Chip8JitState, Chip8RegisterFile};
use kestrel_frontend::chip8::{translate, LocationDescriptor};
use kestrel_jit_x64::emit::IsaEmit;
use kestrel_jit_x64::emit_chip8::{Chip8Isa, Chip8EmitX64};
use kestrel_jit_x64::stubs::{self, AccessorWidths};
use kestrel_jit_x64::{CodeBlockError, HostCallbacks};
use kestrel_types::Exception;

/// Generous default: orphaned code accumulates until `clear_cache`.
const CODE_CAPACITY: usize = 8 * 1024 * 1024;

/// The context block thunks recover the embedder and guest state from;
/// its address is baked into compiled code.
struct Env {
    callbacks: Option<*mut (dyn UserCallbacks + 'static)>,
    state: *mut Chip8JitState,
}

unsafe fn env_callbacks<'a>(env: *mut Env) -> &'a mut dyn UserCallbacks {
    &mut *(*env).callbacks.expect("callbacks are only live during run")
}

extern "sysv64" fn read8_thunk(env: *mut Env, vaddr: u64) -> u64 {
    unsafe { u64::from(env_callbacks(env).memory_read_8(vaddr as u32)) }
}

extern "sysv64" fn read16_thunk(env: *mut Env, vaddr: u64) -> u64 {
    unsafe { u64::from(env_callbacks(env).memory_read_16(vaddr as u32)) }
}

extern "sysv64" fn write8_thunk(env: *mut Env, vaddr: u64, value: u64) {
    unsafe { env_callbacks(env).memory_write_8(vaddr as u32, value as u8) }
}

extern "sysv64" fn write16_thunk(env: *mut Env, vaddr: u64, value: u64) {
    unsafe { env_callbacks(env).memory_write_16(vaddr as u32, value as u16) }
}

extern "sysv64" fn call_svc_thunk(env: *mut Env, swi: u64) {
    unsafe {
        let regs = &mut (*(*env).state).regs;
        env_callbacks(env).call_svc(swi as u32, regs);
    }
}

extern "sysv64" fn interpreter_fallback_thunk(env: *mut Env, pc: u64, count: u64) {
    unsafe {
        let regs = &mut (*(*env).state).regs;
        env_callbacks(env).interpreter_fallback(pc as u32, count as usize, regs);
    }
}

extern "sysv64" fn exception_raised_thunk(env: *mut Env, pc: u64, kind: u64) {
    let exception = Exception::from_u64(kind).expect("invalid exception kind");
    unsafe { env_callbacks(env).exception_raised(pc as u32, exception) }
}

/// The register file handed to fallback and supervisor-call callbacks.
pub type RegisterFile = Chip8RegisterFile;

pub struct Jit {
    state: Box<Chip8JitState>,
    env: Box<Env>,
    emitter: Chip8EmitX64,
    config: UserConfig,
}

impl Jit {
    pub fn new(config: UserConfig) -> Result<Jit, CodeBlockError> {
        let mut state = Box::new(Chip8JitState::default());
        let mut env = Box::new(Env {
            callbacks: None,
            state: &mut *state,
        });

        let hostcb = HostCallbacks {
            ctx: &mut *env as *mut Env as u64,
            read_memory_8: read8_thunk as extern "sysv64" fn(*mut Env, u64) -> u64 as u64,
            read_memory_16: read16_thunk as extern "sysv64" fn(*mut Env, u64) -> u64 as u64,
            read_memory_32: 0,
            read_memory_64: 0,
            write_memory_8: write8_thunk as extern "sysv64" fn(*mut Env, u64, u64) as u64,
            write_memory_16: write16_thunk as extern "sysv64" fn(*mut Env, u64, u64) as u64,
            write_memory_32: 0,
            write_memory_64: 0,
            call_svc: call_svc_thunk as extern "sysv64" fn(*mut Env, u64) as u64,
            interpreter_fallback: interpreter_fallback_thunk
                as extern "sysv64" fn(*mut Env, u64, u64) as u64,
            exception_raised: exception_raised_thunk as extern "sysv64" fn(*mut Env, u64, u64)
                as u64,
        };

        let page_table = config
            .page_table
            .as_ref()
            .map(|table| table.entries_ptr() as u64);
        let widths = AccessorWidths {
            w8: true,
            w16: true,
            w32: false,
            w64: false,
        };
        let emitter = Chip8EmitX64::new(CODE_CAPACITY, hostcb, page_table, |code, cb| {
            stubs::generate(code, Chip8Isa::offsets(), cb, widths)
        })?;

        Ok(Jit {
            state,
            env,
            emitter,
            config,
        })
    }

    pub fn regs(&self) -> &Chip8RegisterFile {
        &self.state.regs
    }

    pub fn regs_mut(&mut self) -> &mut Chip8RegisterFile {
        &mut self.state.regs
    }

    /// Requests a cooperative exit at the next halt check.
    pub fn halt_execution(&self) {
        self.state.common.set_halt_requested(true);
    }

    pub fn page_table_mut(&mut self) -> Option<&mut kestrel_cpu_core::config::PageTable> {
        self.config.page_table.as_mut()
    }

    /// Runs guest code until the tick budget reported by the embedder is
    /// consumed or a halt is requested, then reports the consumed ticks.
    pub fn run(&mut self, callbacks: &mut dyn UserCallbacks) {
        self.env.callbacks = Some(unsafe {
            std::mem::transmute::<*mut (dyn UserCallbacks + '_), *mut (dyn UserCallbacks + 'static)>(
                callbacks as *mut dyn UserCallbacks,
            )
        });

        let ticks = callbacks.get_ticks_remaining();
        self.state.common.cycles_to_run = ticks as i64;
        self.state.common.cycles_remaining = ticks as i64;

        while !self.state.common.halt_requested() && self.state.common.cycles_remaining > 0 {
            let location = LocationDescriptor::new(self.state.regs.pc());
            let descriptor = match self.emitter.descriptor(location.into()) {
                Some(descriptor) => descriptor,
                None => {
                    let mut block =
                        translate(location, &mut |vaddr| callbacks.memory_read_code(vaddr));
                    match self.emitter.emit(&mut block) {
                        Ok(descriptor) => descriptor,
                        Err(err) => {
                            // The buffer only grows; evict everything and
                            // translate this block again.
                            debug!("{err}; clearing the cache");
                            self.emitter.clear_cache();
                            self.state.common.reset_rsb();
                            let mut block = translate(location, &mut |vaddr| {
                                callbacks.memory_read_code(vaddr)
                            });
                            self.emitter.emit(&mut block).expect("fresh code buffer")
                        }
                    }
                }
            };

            let entry = self.emitter.entrypoint_address(descriptor);
            self.emitter.seal();
            unsafe {
                let run_code: extern "sysv64" fn(u64, *mut Chip8JitState) =
                    std::mem::transmute(self.emitter.run_code_address());
                run_code(entry, &mut *self.state);
            }
        }

        let consumed = self.state.common.cycles_to_run - self.state.common.cycles_remaining;
        callbacks.add_ticks(consumed.max(0) as u64);
        self.state.common.set_halt_requested(false);
        self.env.callbacks = None;
    }

    /// Evicts every compiled block overlapping the given closed guest
    /// address ranges. Call after writing to guest memory that may hold
    /// translated code; never while guest code is running.
    pub fn invalidate_cache_ranges(&mut self, ranges: &[(u32, u32)]) {
        if self.emitter.invalidate_cache_ranges(ranges) {
            // Stale return predictions would land in orphaned code.
            self.state.common.reset_rsb();
        }
    }

    pub fn clear_cache(&mut self) {
        self.emitter.clear_cache();
        self.state.common.reset_rsb();
    }
}
