pub mod booking;
pub mod guest;
pub mod intake;
pub mod policy;
pub mod scheduler;
pub mod treatment;

pub use booking::*;
pub use guest::*;
pub use scheduler::*;
pub use treatment::*;
