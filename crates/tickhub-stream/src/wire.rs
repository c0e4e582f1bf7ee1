//! Inbound price message parser.
//!
//! Accepted shapes, all carrying a map of symbol to `{ usd, change? }`:
//!
//! ```text
//! {"event":"priceUpdate","data":{"prices":{"btc":{"usd":65000,"change":2.1}}}}
//! {"prices":{"btc":{"usd":65000}}}
//! {"btc":{"usd":65000,"change":2.1},"eth":{"usd":"3100.5"}}
//! ```
//!
//! Entries keep their message order. A bad entry is reported on its own and
//! never takes its valid siblings down with it.

use serde_json::{Map, Value};
use tickhub_core::{PriceQuote, Symbol};

use crate::json_util::parse_f64_field;

/// Event name carrying price batches.
pub const PRICE_EVENT: &str = "priceUpdate";

/// Categories of malformed input, used for once-per-category logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MalformedKind {
    /// Not valid JSON at all.
    InvalidJson,
    /// Valid JSON, but not a price map (or an entry is not an object).
    UnexpectedShape,
    /// An entry key that normalizes to an empty symbol.
    InvalidSymbol,
    /// An entry without a usable `usd` price.
    MissingPrice,
}

impl std::fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson => write!(f, "invalid_json"),
            Self::UnexpectedShape => write!(f, "unexpected_shape"),
            Self::InvalidSymbol => write!(f, "invalid_symbol"),
            Self::MissingPrice => write!(f, "missing_price"),
        }
    }
}

/// One entry of a price batch.
pub type QuoteEntry = Result<PriceQuote, MalformedKind>;

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Per-symbol updates in message order.
    Prices(Vec<QuoteEntry>),
    /// A well-formed frame for some other event (acks, wallet updates, ...).
    Ignored,
}

/// Parse an inbound text frame.
///
/// Returns `Err` only when the whole frame is unusable.
pub fn parse_message(text: &str) -> Result<InboundMessage, MalformedKind> {
    let v: Value = serde_json::from_str(text).map_err(|_| MalformedKind::InvalidJson)?;
    let obj = v.as_object().ok_or(MalformedKind::UnexpectedShape)?;

    if let Some(event) = obj.get("event") {
        if event.as_str() != Some(PRICE_EVENT) {
            return Ok(InboundMessage::Ignored);
        }
        let data = obj.get("data").ok_or(MalformedKind::UnexpectedShape)?;
        let prices = data.get("prices").unwrap_or(data);
        return parse_price_map(prices).map(InboundMessage::Prices);
    }

    if let Some(prices) = obj.get("prices") {
        return parse_price_map(prices).map(InboundMessage::Prices);
    }

    parse_entries(obj).map(InboundMessage::Prices)
}

fn parse_price_map(v: &Value) -> Result<Vec<QuoteEntry>, MalformedKind> {
    let map = v.as_object().ok_or(MalformedKind::UnexpectedShape)?;
    parse_entries(map)
}

fn parse_entries(map: &Map<String, Value>) -> Result<Vec<QuoteEntry>, MalformedKind> {
    if map.is_empty() {
        return Ok(Vec::new());
    }
    // A bare map must look like prices; anything else is a foreign frame.
    if !map.values().any(Value::is_object) {
        return Err(MalformedKind::UnexpectedShape);
    }
    Ok(map.iter().map(|(key, entry)| parse_entry(key, entry)).collect())
}

fn parse_entry(key: &str, entry: &Value) -> QuoteEntry {
    let symbol = Symbol::parse(key).ok_or(MalformedKind::InvalidSymbol)?;
    if !entry.is_object() {
        return Err(MalformedKind::UnexpectedShape);
    }
    let price = parse_f64_field(entry, "usd").ok_or(MalformedKind::MissingPrice)?;
    let change = parse_f64_field(entry, "change");
    Ok(PriceQuote { symbol, price, change })
}
