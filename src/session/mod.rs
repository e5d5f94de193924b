//! Transfer sessions.

mod core;

pub use self::core::Session;
