//! CHIP-8 frontend: location packing, IR emitter surface, decode table and
//! the translator itself.

mod decoder;
mod ir_emitter;
mod location;
mod translate;

pub use decoder::{decode, decode_table};
pub use ir_emitter::IREmitter;
pub use location::LocationDescriptor;
pub use translate::{translate, TranslatorVisitor, MAX_BLOCK_INSTRUCTIONS};
