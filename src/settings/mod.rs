pub mod locks;
pub mod store;

pub use locks::*;
pub use store::*;
