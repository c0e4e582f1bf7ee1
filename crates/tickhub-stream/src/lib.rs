//! # tickhub-stream
//!
//! Live price fan-out over a single streaming connection.
//!
//! ## Architecture
//!
//! Consumers register a [`SubscriberId`] with a symbol set and a callback on
//! the [`PriceHub`]. The hub keeps the upstream subscription set minimal,
//! replays it whenever the transport reconnects, caches the latest price per
//! symbol, and delivers each inbound update only to the consumers that asked
//! for that symbol.
//!
//! ## Modules
//!
//! - [`registry`] — symbol → subscriber mapping and directive computation
//! - [`cache`] — latest `PricePoint` per symbol
//! - [`dispatcher`] — inbound frame handling and fan-out
//! - [`wire`] — inbound message parser
//! - [`json_util`] — JSON parsing helpers
//! - [`hub`] — the composed `PriceHub`
//! - [`valuation`] — portfolio valuation against cached prices

pub mod cache;
pub mod dispatcher;
pub mod hub;
pub mod json_util;
pub mod registry;
pub mod valuation;
pub mod wire;

pub use hub::PriceHub;
pub use registry::{PriceCallback, SubscriberId};
pub use valuation::{PortfolioValuation, PositionValue};
