pub mod notifier;
pub mod recording;
pub mod templates;

pub use notifier::*;
pub use recording::*;
pub use templates::*;
