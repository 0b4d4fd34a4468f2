pub mod catalog;
pub mod console;

pub use catalog::*;
pub use console::*;
