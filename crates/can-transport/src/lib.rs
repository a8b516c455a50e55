//! can-transport: CAN bus abstractions
//!
//! This crate provides the frame types and the blocking [`CanBus`] trait that
//! device drivers are written against. The default build enables a `mock`
//! backend whose handles can be scripted, so drivers can be exercised on any
//! host without native interfaces.

mod types;
pub use types::{BusInfo, CanFilter, CanFrame, CanId, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::CanBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, Responder};
