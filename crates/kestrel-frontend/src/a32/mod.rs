//! A32 frontend. Translation covers the Thumb-16 execution state; ARM-state
//! locations are rejected at the translation boundary.

mod decoder;
mod ir_emitter;
mod location;
mod translate_thumb;

pub use decoder::{decode_thumb16, thumb16_decode_table};
pub use ir_emitter::IREmitter;
pub use location::LocationDescriptor;
pub use translate_thumb::{
    translate_thumb, ConditionalState, TranslatorVisitor, MAX_BLOCK_INSTRUCTIONS,
};
