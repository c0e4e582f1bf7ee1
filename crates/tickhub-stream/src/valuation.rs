//! Portfolio valuation against live prices.
//!
//! For each holding: `invested = quantity * average_buy_price`,
//! `current_value = quantity * price`, `profit_loss = current_value - invested`.
//! A holding without a cached price is valued at zero and listed in
//! [`PortfolioValuation::missing`]. Non-finite inputs count as zero.

use serde::Serialize;
use tickhub_core::{Holding, PricePoint, Symbol};

/// Valuation of a single holding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionValue {
    pub symbol: Symbol,
    pub quantity: f64,
    pub average_buy_price: f64,
    pub current_price: Option<f64>,
    pub invested: f64,
    pub current_value: f64,
    pub profit_loss: f64,
}

impl PositionValue {
    /// Break-even counts as profit.
    pub fn is_profit(&self) -> bool {
        self.current_value >= self.invested
    }
}

/// Totals over all holdings.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct PortfolioValuation {
    pub positions: Vec<PositionValue>,
    pub invested: f64,
    pub current_value: f64,
    pub profit_loss: f64,
    /// Holdings with no cached price yet.
    pub missing: Vec<Symbol>,
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Value `holdings` with prices looked up through `price_of`.
pub fn value_portfolio<F>(holdings: &[Holding], price_of: F) -> PortfolioValuation
where
    F: Fn(&Symbol) -> Option<PricePoint>,
{
    let mut out = PortfolioValuation::default();
    for h in holdings {
        let quantity = finite_or_zero(h.quantity);
        let average_buy_price = finite_or_zero(h.average_buy_price);
        let current_price = price_of(&h.symbol).map(|p| p.price);
        if current_price.is_none() {
            out.missing.push(h.symbol.clone());
        }

        let invested = quantity * average_buy_price;
        let current_value = quantity * current_price.unwrap_or(0.0);
        let position = PositionValue {
            symbol: h.symbol.clone(),
            quantity,
            average_buy_price,
            current_price,
            invested,
            current_value,
            profit_loss: current_value - invested,
        };

        out.invested += position.invested;
        out.current_value += position.current_value;
        out.profit_loss += position.profit_loss;
        out.positions.push(position);
    }
    out
}
