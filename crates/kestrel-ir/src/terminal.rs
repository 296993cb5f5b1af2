use kestrel_types::Cond;

use crate::location::LocationDescriptor;

/// A block's exit action. Set exactly once per block before emission.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// No terminal set yet. Reaching the backend with this is a bug.
    Invalid,
    /// Hand the next `num_instructions` guest instructions to the embedder's
    /// interpreter. This core only ever requests a single instruction.
    Interpret {
        next: LocationDescriptor,
        num_instructions: usize,
    },
    /// Exit compiled code; the run loop decides the next block.
    ReturnToDispatch,
    /// Chain to the next block behind a cycle check (patched once the
    /// target's entrypoint is known).
    LinkBlock { next: LocationDescriptor },
    /// Chain unconditionally, without a cycle check.
    LinkBlockFast { next: LocationDescriptor },
    /// Attempt a return through the return-stack buffer, falling back to
    /// dispatch on a miss.
    PopRSBHint,
    /// Branch on a guest condition evaluated in host flags.
    If {
        cond: Cond,
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },
    /// Reserved. No frontend in this core emits it; lowering it is fatal.
    CheckBit {
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },
    /// Bail out to the run loop immediately if a halt was requested, then
    /// continue with the wrapped terminal.
    CheckHalt(Box<Terminal>),
}

impl Terminal {
    pub fn if_(cond: Cond, then_: Terminal, else_: Terminal) -> Terminal {
        Terminal::If {
            cond,
            then_: Box::new(then_),
            else_: Box::new(else_),
        }
    }

    pub fn check_halt(inner: Terminal) -> Terminal {
        Terminal::CheckHalt(Box::new(inner))
    }
}
