//! Latest price per symbol.

use ahash::AHashMap;
use tickhub_core::{MissingChangePolicy, PricePoint, PriceQuote, Symbol};

/// Holds the most recent [`PricePoint`] for each symbol.
///
/// Entries for symbols nobody subscribes to any more are evicted by the hub,
/// but a stale entry is harmless: delivery is driven by the registry.
#[derive(Debug, Default)]
pub struct PriceCache {
    prices: AHashMap<Symbol, PricePoint>,
    policy: MissingChangePolicy,
}

impl PriceCache {
    pub fn new(policy: MissingChangePolicy) -> Self {
        Self { prices: AHashMap::new(), policy }
    }

    /// Merge `quote` into the cache and return the stored point.
    pub fn apply(&mut self, quote: &PriceQuote, now_ms: u64) -> PricePoint {
        let point = quote.merge(self.prices.get(&quote.symbol), self.policy, now_ms);
        self.prices.insert(quote.symbol.clone(), point);
        point
    }

    pub fn get(&self, symbol: &Symbol) -> Option<PricePoint> {
        self.prices.get(symbol).copied()
    }

    pub fn evict(&mut self, symbols: &[Symbol]) {
        for s in symbols {
            self.prices.remove(s);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn clear(&mut self) {
        self.prices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(sym: &str, price: f64, change: Option<f64>) -> PriceQuote {
        PriceQuote { symbol: Symbol::parse(sym).unwrap(), price, change }
    }

    #[test]
    fn preserve_policy_keeps_previous_change() {
        let mut cache = PriceCache::new(MissingChangePolicy::Preserve);
        cache.apply(&quote("btc", 100.0, Some(3.0)), 1);
        let p = cache.apply(&quote("btc", 101.0, None), 2);
        assert_eq!(p.price, 101.0);
        assert_eq!(p.percent_change_24h, 3.0);
        assert_eq!(p.updated_at_ms, 2);
    }

    #[test]
    fn zero_policy_resets_change() {
        let mut cache = PriceCache::new(MissingChangePolicy::Zero);
        cache.apply(&quote("btc", 100.0, Some(3.0)), 1);
        assert_eq!(cache.apply(&quote("btc", 101.0, None), 2).percent_change_24h, 0.0);
    }

    #[test]
    fn evict_removes_entries() {
        let mut cache = PriceCache::default();
        cache.apply(&quote("btc", 1.0, None), 1);
        cache.apply(&quote("eth", 2.0, None), 1);
        cache.evict(&[Symbol::parse("btc").unwrap()]);
        assert!(cache.get(&Symbol::parse("eth").unwrap()).is_some());
        assert!(cache.get(&Symbol::parse("btc").unwrap()).is_none());
    }
}
