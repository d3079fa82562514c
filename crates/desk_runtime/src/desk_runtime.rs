//! Desk Runtime - Concurrency engine for motorized standing desks
//!
//! This crate contains the per-desk actor and the registry that hands out
//! one actor per device address. Transports plug in through the
//! [`DeskLink`] and [`LinkConnector`] traits.

mod desk;
mod error;
mod link;
mod options;
mod registry;

#[cfg(test)]
mod testing;

pub use desk::*;
pub use error::*;
pub use link::*;
pub use options::*;
pub use registry::*;
