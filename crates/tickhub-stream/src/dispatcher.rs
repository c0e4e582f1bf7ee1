//! Inbound price dispatch: parse, merge into the cache, pick recipients.
//!
//! [`Dispatcher::ingest`] runs under the hub lock and only *collects*
//! [`Delivery`] values. The hub invokes them after releasing the lock, so a
//! subscriber callback may call back into the hub. Each delivery is checked
//! against the registry again right before it runs, since an earlier callback
//! or another thread may have removed the subscriber in between.

use ahash::AHashMap;
use tickhub_core::{MissingChangePolicy, PricePoint, Symbol};
use tracing::{debug, warn};

use crate::cache::PriceCache;
use crate::registry::{PriceCallback, SubscriberId, SubscriptionRegistry};
use crate::wire::{self, InboundMessage, MalformedKind};

/// One pending callback invocation.
pub struct Delivery {
    pub subscriber: SubscriberId,
    pub callback: PriceCallback,
    pub symbol: Symbol,
    pub point: PricePoint,
}

impl Delivery {
    /// True while the subscriber still holds the symbol with this callback.
    pub fn is_current(&self, registry: &SubscriptionRegistry) -> bool {
        registry.still_wants(self.subscriber, &self.symbol, &self.callback)
    }

    pub fn deliver(self) {
        (self.callback)(&self.symbol, &self.point);
    }
}

/// Counts malformed input and logs the first occurrence of each category.
#[derive(Debug, Default)]
pub struct MalformedLog {
    counts: AHashMap<MalformedKind, u64>,
}

impl MalformedLog {
    pub fn record(&mut self, kind: MalformedKind, sample: &str) {
        let count = self.counts.entry(kind).or_default();
        *count += 1;
        if *count == 1 {
            warn!("[dispatch] dropping malformed price data ({kind}), further occurrences counted silently: {}", truncate(sample));
        } else {
            debug!("[dispatch] malformed price data ({kind}) #{count}");
        }
    }

    pub fn count(&self, kind: MalformedKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(120) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Price cache plus the fan-out logic.
#[derive(Debug, Default)]
pub struct Dispatcher {
    cache: PriceCache,
    malformed: MalformedLog,
}

impl Dispatcher {
    pub fn new(policy: MissingChangePolicy) -> Self {
        Self { cache: PriceCache::new(policy), malformed: MalformedLog::default() }
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PriceCache {
        &mut self.cache
    }

    pub fn malformed(&self) -> &MalformedLog {
        &self.malformed
    }

    /// Apply one inbound frame and return the callbacks to run, in the order
    /// the symbols appeared in the frame.
    ///
    /// Updates for symbols with no current subscriber are dropped: they may
    /// be late data for something unsubscribed a moment ago.
    pub fn ingest(&mut self, text: &str, registry: &SubscriptionRegistry, now_ms: u64) -> Vec<Delivery> {
        let entries = match wire::parse_message(text) {
            Ok(InboundMessage::Prices(entries)) => entries,
            Ok(InboundMessage::Ignored) => return Vec::new(),
            Err(kind) => {
                self.malformed.record(kind, text);
                return Vec::new();
            }
        };

        let mut deliveries = Vec::new();
        for entry in entries {
            let quote = match entry {
                Ok(q) => q,
                Err(kind) => {
                    self.malformed.record(kind, text);
                    continue;
                }
            };

            let recipients = registry.subscribers_for(&quote.symbol);
            if recipients.is_empty() {
                debug!("[dispatch] no subscribers for {}, update dropped", quote.symbol);
                continue;
            }

            let point = self.cache.apply(&quote, now_ms);
            deliveries.extend(recipients.into_iter().map(|(subscriber, callback)| Delivery {
                subscriber,
                callback,
                symbol: quote.symbol.clone(),
                point,
            }));
        }
        deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(&'static str, String, PricePoint)>>>;

    fn recorder(name: &'static str, log: &Log) -> PriceCallback {
        let log = log.clone();
        Arc::new(move |sym: &Symbol, point: &PricePoint| log.lock().unwrap().push((name, sym.to_string(), *point)))
    }

    fn run(d: &mut Dispatcher, r: &SubscriptionRegistry, text: &str) {
        for delivery in d.ingest(text, r, 42) {
            delivery.deliver();
        }
    }

    #[test]
    fn fans_out_only_to_interested_subscribers() {
        let log: Log = Arc::default();
        let mut r = SubscriptionRegistry::new();
        r.subscribe(SubscriberId(1), ["btc", "eth"], recorder("a", &log));
        r.subscribe(SubscriberId(2), ["eth"], recorder("b", &log));
        let mut d = Dispatcher::default();

        run(&mut d, &r, r#"{"prices":{"eth":{"usd":3000,"change":1.0}}}"#);
        {
            let got = log.lock().unwrap();
            assert_eq!(got.len(), 2);
            assert_eq!(got[0].0, "a");
            assert_eq!(got[1].0, "b");
            assert_eq!(got[0].2, got[1].2);
        }

        log.lock().unwrap().clear();
        run(&mut d, &r, r#"{"prices":{"btc":{"usd":65000}}}"#);
        let got = log.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "a");
        assert_eq!(got[0].1, "BTC");
    }

    #[test]
    fn stale_symbols_are_dropped() {
        let log: Log = Arc::default();
        let mut r = SubscriptionRegistry::new();
        r.subscribe(SubscriberId(1), ["btc"], recorder("a", &log));
        let mut d = Dispatcher::default();

        run(&mut d, &r, r#"{"prices":{"doge":{"usd":0.1}}}"#);
        assert!(log.lock().unwrap().is_empty());
        assert!(d.cache().is_empty());
    }

    #[test]
    fn batch_order_and_last_write_wins() {
        let log: Log = Arc::default();
        let mut r = SubscriptionRegistry::new();
        r.subscribe(SubscriberId(1), ["btc", "eth"], recorder("a", &log));
        let mut d = Dispatcher::default();

        run(&mut d, &r, r#"{"prices":{"eth":{"usd":1},"btc":{"usd":2},"ETH":{"usd":3}}}"#);
        let got = log.lock().unwrap();
        let seen: Vec<(&str, f64)> = got.iter().map(|(_, s, p)| (s.as_str(), p.price)).collect();
        assert_eq!(seen, vec![("ETH", 1.0), ("BTC", 2.0), ("ETH", 3.0)]);
        assert_eq!(d.cache().get(&Symbol::parse("eth").unwrap()).unwrap().price, 3.0);
    }

    #[test]
    fn malformed_input_never_stops_dispatch() {
        let log: Log = Arc::default();
        let mut r = SubscriptionRegistry::new();
        r.subscribe(SubscriberId(1), ["btc"], recorder("a", &log));
        let mut d = Dispatcher::default();

        run(&mut d, &r, "{{{");
        run(&mut d, &r, "{{{");
        run(&mut d, &r, r#"{"prices":{"eth":{"change":1},"btc":{"usd":"65000.5"}}}"#);
        assert_eq!(d.malformed().count(MalformedKind::InvalidJson), 2);
        assert_eq!(d.malformed().count(MalformedKind::MissingPrice), 1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn partial_updates_follow_policy() {
        let log: Log = Arc::default();
        let mut r = SubscriptionRegistry::new();
        r.subscribe(SubscriberId(1), ["btc"], recorder("a", &log));

        let mut preserve = Dispatcher::new(MissingChangePolicy::Preserve);
        run(&mut preserve, &r, r#"{"prices":{"btc":{"usd":1,"change":4.5}}}"#);
        run(&mut preserve, &r, r#"{"prices":{"btc":{"usd":2}}}"#);
        assert_eq!(log.lock().unwrap().last().unwrap().2.percent_change_24h, 4.5);

        let mut zero = Dispatcher::new(MissingChangePolicy::Zero);
        run(&mut zero, &r, r#"{"prices":{"btc":{"usd":1,"change":4.5}}}"#);
        run(&mut zero, &r, r#"{"prices":{"btc":{"usd":2}}}"#);
        assert_eq!(log.lock().unwrap().last().unwrap().2.percent_change_24h, 0.0);
    }
}
