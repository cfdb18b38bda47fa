//! Conversion plans built once per callable signature
//!
//! Architecture:
//! - `arg.rs` - `ArgCache`, one per native argument slot
//! - `callable.rs` - `CallableCache`, the ordered slot arena of one callable
//! - `registry.rs` - `CacheRegistry`, memoised plans (including failures)
//!
//! Child relations (array → length, callback → user data / destroy notify)
//! are indices into `CallableCache::args`, never references, so a plan can be
//! cloned or moved freely.

mod arg;
mod callable;
mod registry;

pub use arg::{ArgCache, ArgMeta, ChildLink, LinkRole};
pub use callable::CallableCache;
pub use registry::CacheRegistry;

#[cfg(test)]
mod tests;
