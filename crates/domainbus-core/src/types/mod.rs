//! Type system utilities and aliases.
//!
//! ## Modules
//!
//! - [`aliases`]: Type aliases for `Arc<Mutex<T>>`, shared callbacks, cleanups.

pub mod aliases;

pub use aliases::*;
