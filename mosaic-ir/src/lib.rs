#![forbid(unsafe_code)]

pub mod aval;
pub mod dtype;
pub mod effect;
pub mod indexer;
pub mod program;
pub mod tree;

mod pretty;

pub use aval::*;
pub use dtype::*;
pub use effect::*;
pub use indexer::*;
pub use program::*;
pub use tree::*;
