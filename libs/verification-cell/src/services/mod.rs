pub mod password;
pub mod token_store;
pub mod verification;

pub use password::*;
pub use token_store::*;
pub use verification::*;
