mod classifier;
mod config;
mod embedding;
mod loader;
mod loss;

pub use classifier::*;
pub use config::*;
pub use embedding::*;
pub use loader::*;
pub use loss::*;
