//! The A32 executor. The frontend translates Thumb state; entering ARM
//! state is representable (interworking branches commit it) but ARM-state
//! translation is out of scope for this core.

use log::debug;

use kestrel_cpu_core::callbacks::a32::UserCallbacks;
use kestrel_cpu_core::config::UserConfig;
use kestrel_cpu_core::jit_state::{A32JitState, A32RegisterFile};
use kestrel_frontend::a32::{translate_thumb, LocationDescriptor};
use kestrel_jit_x64::emit::IsaEmit;
use kestrel_jit_x64::emit_a32::{A32EmitX64, A32Isa};
use kestrel_jit_x64::stubs::{self, AccessorWidths};
use kestrel_jit_x64::{CodeBlockError, HostCallbacks};
use kestrel_types::Exception;

const CODE_CAPACITY: usize = 8 * 1024 * 1024;

struct Env {
    callbacks: Option<*mut (dyn UserCallbacks + 'static)>,
    state: *mut A32JitState,
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

extern "sysv64" fn read32_thunk(env: *mut Env, vaddr: u64) -> u64 {
    unsafe { u64::from(env_callbacks(env).memory_read_32(vaddr as u32)) }
}

extern "sysv64" fn read64_thunk(env: *mut Env, vaddr: u64) -> u64 {
    unsafe { env_callbacks(env).memory_read_64(vaddr as u32) }
}

extern "sysv64" fn write8_thunk(env: *mut Env, vaddr: u64, value: u64) {
    unsafe { env_callbacks(env).memory_write_8(vaddr as u32, value as u8) }
}

extern "sysv64" fn write16_thunk(env: *mut Env, vaddr: u64, value: u64) {
    unsafe { env_callbacks(env).memory_write_16(vaddr as u32, value as u16) }
}

extern "sysv64" fn write32_thunk(env: *mut Env, vaddr: u64, value: u64) {
    unsafe { env_callbacks(env).memory_write_32(vaddr as u32, value as u32) }
}

extern "sysv64" fn write64_thunk(env: *mut Env, vaddr: u64, value: u64) {
    unsafe { env_callbacks(env).memory_write_64(vaddr as u32, value) }
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

pub struct Jit {
    state: Box<A32JitState>,
    env: Box<Env>,
    emitter: A32EmitX64,
    config: UserConfig,
}

impl Jit {
    pub fn new(config: UserConfig) -> Result<Jit, CodeBlockError> {
        let mut state = Box::new(A32JitState::default());
        let mut env = Box::new(Env {
            callbacks: None,
            state: &mut *state,
        });

        let hostcb = HostCallbacks {
            ctx: &mut *env as *mut Env as u64,
            read_memory_8: read8_thunk as extern "sysv64" fn(*mut Env, u64) -> u64 as u64,
            read_memory_16: read16_thunk as extern "sysv64" fn(*mut Env, u64) -> u64 as u64,
            read_memory_32: read32_thunk as extern "sysv64" fn(*mut Env, u64) -> u64 as u64,
            read_memory_64: read64_thunk as extern "sysv64" fn(*mut Env, u64) -> u64 as u64,
            write_memory_8: write8_thunk as extern "sysv64" fn(*mut Env, u64, u64) as u64,
            write_memory_16: write16_thunk as extern "sysv64" fn(*mut Env, u64, u64) as u64,
            write_memory_32: write32_thunk as extern "sysv64" fn(*mut Env, u64, u64) as u64,
            write_memory_64: write64_thunk as extern "sysv64" fn(*mut Env, u64, u64) as u64,
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
            w32: true,
            w64: true,
        };
        let emitter = A32EmitX64::new(CODE_CAPACITY, hostcb, page_table, |code, cb| {
            stubs::generate(code, A32Isa::offsets(), cb, widths)
        })?;

        Ok(Jit {
            state,
            env,
            emitter,
            config,
        })
    }

    pub fn regs(&self) -> &[u32; 16] {
        &self.state.regs.r
    }

    pub fn regs_mut(&mut self) -> &mut [u32; 16] {
        &mut self.state.regs.r
    }

    pub fn cpsr(&self) -> u32 {
        self.state.regs.cpsr
    }

    pub fn set_cpsr(&mut self, cpsr: u32) {
        self.state.regs.cpsr = cpsr;
    }

    pub fn halt_execution(&self) {
        self.state.common.set_halt_requested(true);
    }

    pub fn page_table_mut(&mut self) -> Option<&mut kestrel_cpu_core::config::PageTable> {
        self.config.page_table.as_mut()
    }

    fn current_location(&self) -> LocationDescriptor {
        LocationDescriptor::new(self.state.regs.pc(), self.state.regs.thumb())
    }

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
            let location = self.current_location();
            let descriptor = match self.emitter.descriptor(location.into()) {
                Some(descriptor) => descriptor,
                None => {
                    let mut block = translate_thumb(location, &mut |vaddr| {
                        callbacks.memory_read_code(vaddr)
                    });
                    match self.emitter.emit(&mut block) {
                        Ok(descriptor) => descriptor,
                        Err(err) => {
                            debug!("{err}; clearing the cache");
                            self.emitter.clear_cache();
                            self.state.common.reset_rsb();
                            let mut block = translate_thumb(location, &mut |vaddr| {
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
                let run_code: extern "sysv64" fn(u64, *mut A32JitState) =
                    std::mem::transmute(self.emitter.run_code_address());
                run_code(entry, &mut *self.state);
            }
        }

        let consumed = self.state.common.cycles_to_run - self.state.common.cycles_remaining;
        callbacks.add_ticks(consumed.max(0) as u64);
        self.state.common.set_halt_requested(false);
        self.env.callbacks = None;
    }

    pub fn invalidate_cache_ranges(&mut self, ranges: &[(u32, u32)]) {
        if self.emitter.invalidate_cache_ranges(ranges) {
            self.state.common.reset_rsb();
        }
    }

    pub fn clear_cache(&mut self) {
        self.emitter.clear_cache();
        self.state.common.reset_rsb();
    }
}

/// The register file handed to fallback and supervisor-call callbacks.
pub type RegisterFile = A32RegisterFile;
