//! Portfolio holdings valued against live prices.

use serde::Deserialize;

use super::symbol::Symbol;

/// A position held in the virtual portfolio.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Holding {
    pub symbol: Symbol,
    pub quantity: f64,
    pub average_buy_price: f64,
}
