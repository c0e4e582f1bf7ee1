//! Price data flowing through the hub and the directives it sends upstream.
//!
//! # Timestamp convention
//!
//! `updated_at_ms` is **milliseconds since Unix epoch**, stamped locally when
//! the update is applied to the cache (the upstream feed carries no time).

use serde::Serialize;

use super::enums::MissingChangePolicy;
use super::symbol::Symbol;

// ---------------------------------------------------------------------------
// PricePoint
// ---------------------------------------------------------------------------

/// Latest known price and 24h percent change for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    pub price: f64,
    pub percent_change_24h: f64,
    pub updated_at_ms: u64,
}

// ---------------------------------------------------------------------------
// PriceQuote
// ---------------------------------------------------------------------------

/// One per-symbol entry of an inbound price batch, before it is merged into
/// the cache. `change` is `None` when the upstream message omitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub symbol: Symbol,
    pub price: f64,
    pub change: Option<f64>,
}

impl PriceQuote {
    /// Merge this quote over `previous` according to `policy`.
    pub fn merge(&self, previous: Option<&PricePoint>, policy: MissingChangePolicy, now_ms: u64) -> PricePoint {
        let percent_change_24h = match (self.change, policy) {
            (Some(change), _) => change,
            (None, MissingChangePolicy::Preserve) => previous.map(|p| p.percent_change_24h).unwrap_or(0.0),
            (None, MissingChangePolicy::Zero) => 0.0,
        };
        PricePoint { price: self.price, percent_change_24h, updated_at_ms: now_ms }
    }
}

// ---------------------------------------------------------------------------
// Directive
// ---------------------------------------------------------------------------

/// An outbound subscription instruction for the streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Subscribe(Vec<Symbol>),
    Unsubscribe(Vec<Symbol>),
}

impl Directive {
    /// Wire event name.
    pub fn event(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }

    pub fn symbols(&self) -> &[Symbol] {
        match self {
            Self::Subscribe(s) | Self::Unsubscribe(s) => s,
        }
    }

    /// Serialize as `{"event":"subscribe","data":["BTC","ETH"]}`.
    pub fn to_wire(&self) -> String {
        serde_json::json!({
            "event": self.event(),
            "data": self.symbols(),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn directive_wire_format() {
        let d = Directive::Subscribe(vec![sym("btc"), sym("eth")]);
        assert_eq!(d.to_wire(), r#"{"event":"subscribe","data":["BTC","ETH"]}"#);
        let u = Directive::Unsubscribe(vec![sym("sol")]);
        assert_eq!(u.to_wire(), r#"{"event":"unsubscribe","data":["SOL"]}"#);
    }

    #[test]
    fn merge_full_quote_overwrites() {
        let prev = PricePoint { price: 1.0, percent_change_24h: 5.0, updated_at_ms: 1 };
        let q = PriceQuote { symbol: sym("BTC"), price: 2.0, change: Some(-1.5) };
        let p = q.merge(Some(&prev), MissingChangePolicy::Preserve, 10);
        assert_eq!(p, PricePoint { price: 2.0, percent_change_24h: -1.5, updated_at_ms: 10 });
    }

    #[test]
    fn merge_partial_quote_by_policy() {
        let prev = PricePoint { price: 1.0, percent_change_24h: 5.0, updated_at_ms: 1 };
        let q = PriceQuote { symbol: sym("BTC"), price: 2.0, change: None };
        assert_eq!(q.merge(Some(&prev), MissingChangePolicy::Preserve, 2).percent_change_24h, 5.0);
        assert_eq!(q.merge(Some(&prev), MissingChangePolicy::Zero, 2).percent_change_24h, 0.0);
        assert_eq!(q.merge(None, MissingChangePolicy::Preserve, 2).percent_change_24h, 0.0);
    }
}
