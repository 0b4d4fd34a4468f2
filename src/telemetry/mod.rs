pub mod inspector;
pub mod poller;

pub use inspector::*;
pub use poller::*;
