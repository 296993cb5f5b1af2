//! The executable code region. Compilation and patching happen with the
//! map writable; before guest code runs the map is sealed executable. The
//! base address never changes, so absolute addresses baked into emitted
//! code stay valid across protection flips.

use memmap2::{Mmap, MmapMut, MmapOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodeBlockError {
    #[error("failed to map the code region: {0}")]
    Map(#[from] std::io::Error),
    #[error("code buffer exhausted ({used} of {capacity} bytes in use)")]
    Exhausted { used: usize, capacity: usize },
}

enum Mapping {
    Writable(MmapMut),
    Executable(Mmap),
    // Transient state while flipping protections.
    Empty,
}

pub struct CodeBlock {
    map: Mapping,
    capacity: usize,
    cursor: usize,
    prelude_end: Option<usize>,
}

impl CodeBlock {
    pub fn new(capacity: usize) -> Result<CodeBlock, CodeBlockError> {
        let map = MmapOptions::new().len(capacity).map_anon()?;
        Ok(CodeBlock {
            map: Mapping::Writable(map),
            capacity,
            cursor: 0,
            prelude_end: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        assert!(cursor <= self.capacity);
        self.cursor = cursor;
    }

    pub fn base_ptr(&self) -> *const u8 {
        match &self.map {
            Mapping::Writable(map) => map.as_ptr(),
            Mapping::Executable(map) => map.as_ptr(),
            Mapping::Empty => unreachable!(),
        }
    }

    /// Absolute address of a buffer offset.
    pub fn address_of(&self, offset: usize) -> u64 {
        debug_assert!(offset < self.capacity);
        self.base_ptr() as u64 + offset as u64
    }

    /// Marks the end of the pre-generated stub area. `reset` rewinds the
    /// cursor here rather than to zero.
    pub fn prelude_complete(&mut self) {
        assert!(self.prelude_end.is_none());
        self.prelude_end = Some(self.cursor);
    }

    /// Drops all code emitted after the prelude.
    pub fn reset_to_prelude(&mut self) {
        self.cursor = self.prelude_end.expect("prelude not sealed");
    }

    /// Fails compilation early when less than `needed` bytes remain.
    pub fn check_capacity(&self, needed: usize) -> Result<(), CodeBlockError> {
        if self.cursor + needed > self.capacity {
            Err(CodeBlockError::Exhausted {
                used: self.cursor,
                capacity: self.capacity,
            })
        } else {
            Ok(())
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.map, Mapping::Writable(_))
    }

    pub fn make_writable(&mut self) {
        self.map = match std::mem::replace(&mut self.map, Mapping::Empty) {
            Mapping::Executable(map) => {
                Mapping::Writable(map.make_mut().expect("mprotect to read/write failed"))
            }
            other => other,
        };
    }

    pub fn make_executable(&mut self) {
        self.map = match std::mem::replace(&mut self.map, Mapping::Empty) {
            Mapping::Writable(map) => {
                Mapping::Executable(map.make_exec().expect("mprotect to read/exec failed"))
            }
            other => other,
        };
    }

    /// The whole region for an emission or patching session.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        match &mut self.map {
            Mapping::Writable(map) => &mut map[..],
            _ => panic!("code region is sealed executable"),
        }
    }
}
