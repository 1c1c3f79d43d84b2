mod batcher;
mod clean;
mod labels;
mod loader;
mod record;
mod split;
mod tokenizer;

pub use batcher::*;
pub use clean::*;
pub use labels::*;
pub use loader::*;
pub use record::*;
pub use split::*;
pub use tokenizer::*;
