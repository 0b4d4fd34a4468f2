pub mod setting;
pub mod trade;

pub use setting::*;
pub use trade::*;
