//! Subscription registry: which subscribers want which symbols.
//!
//! The registry is a synchronous state machine. Every mutating call returns
//! the directives the transport must send to keep the upstream subscription
//! set equal to the set of symbols with at least one subscriber:
//!
//! - a `Subscribe` for each symbol whose subscriber count went 0 → 1
//! - an `Unsubscribe` for each symbol whose count went 1 → 0
//!
//! Directives with an empty symbol list are never produced.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use tickhub_core::{Directive, PricePoint, Symbol, normalize_symbols};
use tracing::debug;

/// Delivery callback for one subscriber.
pub type PriceCallback = Arc<dyn Fn(&Symbol, &PricePoint) + Send + Sync>;

/// Caller-chosen identity of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct SubscriberEntry {
    /// Symbols in the order they were first requested.
    symbols: Vec<Symbol>,
    callback: PriceCallback,
}

/// Symbol → subscribers mapping, plus each subscriber's own symbol set.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_symbol: AHashMap<Symbol, BTreeSet<SubscriberId>>,
    subscribers: AHashMap<SubscriberId, SubscriberEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest of `id` in `symbols` and store `callback` as its
    /// delivery target (replacing an earlier one).
    ///
    /// Re-subscribing to a symbol the subscriber already holds is a no-op.
    pub fn subscribe<I, S>(&mut self, id: SubscriberId, symbols: I, callback: PriceCallback) -> Vec<Directive>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested = normalize_symbols(symbols);
        let entry = self
            .subscribers
            .entry(id)
            .and_modify(|e| e.callback = callback.clone())
            .or_insert_with(|| SubscriberEntry { symbols: Vec::new(), callback });

        let mut added = Vec::new();
        for sym in requested {
            if entry.symbols.contains(&sym) {
                continue;
            }
            entry.symbols.push(sym.clone());
            let holders = self.by_symbol.entry(sym.clone()).or_default();
            holders.insert(id);
            if holders.len() == 1 {
                added.push(sym);
            }
        }

        debug!("[registry] {id} subscribe, new upstream symbols: {added:?}");
        directive(Directive::Subscribe, added)
    }

    /// Drop interest of `id` in `symbols`. Unknown subscribers or symbols the
    /// subscriber never held are ignored.
    pub fn unsubscribe<I, S>(&mut self, id: SubscriberId, symbols: I) -> Vec<Directive>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested = normalize_symbols(symbols);
        let Some(entry) = self.subscribers.get_mut(&id) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for sym in requested {
            let Some(pos) = entry.symbols.iter().position(|s| *s == sym) else {
                continue;
            };
            entry.symbols.remove(pos);
            if release(&mut self.by_symbol, &sym, id) {
                removed.push(sym);
            }
        }

        debug!("[registry] {id} unsubscribe, dropped upstream symbols: {removed:?}");
        directive(Directive::Unsubscribe, removed)
    }

    /// Swap the subscriber's whole symbol set for `new_symbols`.
    ///
    /// Only the symmetric difference produces directives: unsubscribes for
    /// symbols that left, then subscribes for symbols that joined. Symbols in
    /// both sets are untouched. Unknown subscribers are ignored since there is
    /// no callback to deliver to.
    pub fn replace_symbols<I, S>(&mut self, id: SubscriberId, new_symbols: I) -> Vec<Directive>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted = normalize_symbols(new_symbols);
        let Some(entry) = self.subscribers.get_mut(&id) else {
            debug!("[registry] replace_symbols for unknown {id} ignored");
            return Vec::new();
        };

        let leaving: Vec<Symbol> = entry.symbols.iter().filter(|s| !wanted.contains(s)).cloned().collect();
        let joining: Vec<Symbol> = wanted.iter().filter(|s| !entry.symbols.contains(s)).cloned().collect();
        entry.symbols.retain(|s| wanted.contains(s));
        entry.symbols.extend(joining.iter().cloned());

        let mut removed = Vec::new();
        for sym in leaving {
            if release(&mut self.by_symbol, &sym, id) {
                removed.push(sym);
            }
        }

        let mut added = Vec::new();
        for sym in joining {
            let holders = self.by_symbol.entry(sym.clone()).or_default();
            holders.insert(id);
            if holders.len() == 1 {
                added.push(sym);
            }
        }

        debug!("[registry] {id} replace, upstream -{removed:?} +{added:?}");
        let mut out = directive(Directive::Unsubscribe, removed);
        out.extend(directive(Directive::Subscribe, added));
        out
    }

    /// Remove the subscriber entirely. Idempotent.
    pub fn deregister(&mut self, id: SubscriberId) -> Vec<Directive> {
        let Some(entry) = self.subscribers.remove(&id) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for sym in entry.symbols {
            if release(&mut self.by_symbol, &sym, id) {
                removed.push(sym);
            }
        }

        debug!("[registry] {id} deregistered, dropped upstream symbols: {removed:?}");
        directive(Directive::Unsubscribe, removed)
    }

    /// Every subscriber currently interested in `symbol` with its callback,
    /// in subscriber-id order.
    pub fn subscribers_for(&self, symbol: &Symbol) -> Vec<(SubscriberId, PriceCallback)> {
        self.by_symbol
            .get(symbol)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.subscribers.get(id).map(|e| (*id, e.callback.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `id` still holds `symbol` with `callback` as its delivery
    /// target. False once the subscriber dropped the symbol, deregistered, or
    /// re-registered with another callback.
    pub fn still_wants(&self, id: SubscriberId, symbol: &Symbol, callback: &PriceCallback) -> bool {
        self.subscribers
            .get(&id)
            .is_some_and(|e| Arc::ptr_eq(&e.callback, callback) && e.symbols.contains(symbol))
    }

    pub fn is_live(&self, symbol: &Symbol) -> bool {
        self.by_symbol.contains_key(symbol)
    }

    /// All symbols with at least one subscriber, sorted.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self.by_symbol.keys().cloned().collect();
        out.sort();
        out
    }

    /// The symbols `id` currently holds, or `None` if it is not registered.
    pub fn symbols_of(&self, id: SubscriberId) -> Option<&[Symbol]> {
        self.subscribers.get(&id).map(|e| e.symbols.as_slice())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// One `Subscribe` covering the whole live set, for a fresh connection.
    pub fn replay_directive(&self) -> Option<Directive> {
        let symbols = self.active_symbols();
        (!symbols.is_empty()).then_some(Directive::Subscribe(symbols))
    }
}

/// Remove `id` from the holders of `sym`; returns `true` if that emptied the
/// entry (which is then deleted).
fn release(by_symbol: &mut AHashMap<Symbol, BTreeSet<SubscriberId>>, sym: &Symbol, id: SubscriberId) -> bool {
    let Some(holders) = by_symbol.get_mut(sym) else {
        return false;
    };
    holders.remove(&id);
    if holders.is_empty() {
        by_symbol.remove(sym);
        true
    } else {
        false
    }
}

fn directive(make: fn(Vec<Symbol>) -> Directive, symbols: Vec<Symbol>) -> Vec<Directive> {
    if symbols.is_empty() { Vec::new() } else { vec![make(symbols)] }
}
