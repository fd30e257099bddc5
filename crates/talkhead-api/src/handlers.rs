//! Request handlers.

pub mod avatars;
pub mod health;
pub mod inference;

pub use avatars::*;
pub use health::*;
pub use inference::*;
