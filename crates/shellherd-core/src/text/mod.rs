//! Text handling: decoding, line assembly and terminal sanitizing.

mod decoder;
mod lines;
mod terminal;

pub use decoder::Utf8Decoder;
pub use lines::{AssembledLine, LineAssembler};
pub use terminal::sanitize_line;
