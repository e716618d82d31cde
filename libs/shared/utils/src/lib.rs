pub mod clock;
pub mod extractor;
pub mod jwt;
pub mod test_utils;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
