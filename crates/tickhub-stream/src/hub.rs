//! The price hub: one shared connection, many consumers.
//!
//! # Architecture
//!
//! ```text
//! consumer ──subscribe/unsubscribe/replace/deregister──► SubscriptionRegistry
//!                                                        │ directives (call order)
//!                                                        ▼
//!                                                   DirectiveSink (WsTransport)
//! WsTransport ──text frame──► Dispatcher ──► PriceCache
//!                                 └─► callbacks of current subscribers
//! ```
//!
//! Registry and dispatcher share one mutex, so each call sees the state left
//! by the previous one and its directives are handed to the transport before
//! the lock is released. Subscriber callbacks run after the lock is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tickhub_core::config::HubConfig;
use tickhub_core::error::HubError;
use tickhub_core::time_util;
use tickhub_core::ws::{DirectiveSink, OnStatusCallback, WsConnConfig, WsTransport};
use tickhub_core::{ConnectionStatus, Directive, Holding, MissingChangePolicy, PricePoint, StatusEvent, Symbol};
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::registry::{PriceCallback, SubscriberId, SubscriptionRegistry};
use crate::valuation::{self, PortfolioValuation};
use crate::wire::MalformedKind;

/// Everything guarded by the hub lock.
struct HubState {
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
}

type SharedState = Arc<Mutex<HubState>>;

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client-side symbol price hub.
///
/// Build one per application with [`PriceHub::new`], share it behind an
/// `Arc`, call [`PriceHub::init`] once a tokio runtime is running, and
/// [`PriceHub::teardown`] on exit. Views call `subscribe` on mount and
/// `deregister_subscriber` on unmount.
pub struct PriceHub {
    state: SharedState,
    sink: Arc<dyn DirectiveSink>,
    transport: Option<Arc<WsTransport>>,
    next_id: AtomicU64,
}

impl PriceHub {
    /// Create a hub backed by a WebSocket transport. Nothing connects until
    /// [`init`](Self::init).
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        config.validate()?;
        let transport = Arc::new(WsTransport::new(WsConnConfig::from_hub_config(&config)));
        Ok(Self {
            state: new_state(config.missing_change),
            sink: transport.clone(),
            transport: Some(transport),
            next_id: AtomicU64::new(1),
        })
    }

    /// Create a hub that hands directives to `sink` instead of a socket.
    /// Inbound frames are fed through [`on_inbound_message`](Self::on_inbound_message).
    pub fn with_sink(sink: Arc<dyn DirectiveSink>, policy: MissingChangePolicy) -> Self {
        Self { state: new_state(policy), sink, transport: None, next_id: AtomicU64::new(1) }
    }

    /// Wire the transport to the registry and dispatcher, then connect.
    ///
    /// Calling it again after a terminal disconnect reconnects.
    pub fn init(&self) -> Result<(), HubError> {
        let Some(transport) = &self.transport else {
            return Ok(());
        };

        let state = self.state.clone();
        transport.on_message(Arc::new(move |text: &str| dispatch(&state, text)));

        let state = self.state.clone();
        transport.on_reconnect(Arc::new(move |go_live: &mut dyn FnMut()| {
            // Every send happens under this lock, so going live and taking the
            // snapshot here splits directives cleanly: earlier ones were
            // dropped and are in the snapshot, later ones are increments.
            let replay = {
                let guard = lock(&state);
                go_live();
                guard.registry.replay_directive()
            };
            info!("[hub] replaying subscriptions: {:?}", replay.as_ref().map(Directive::symbols));
            replay.into_iter().collect()
        }));

        transport.connect()
    }

    /// Stop the transport and drop cached prices. Registered subscribers stay
    /// registered; their owners are responsible for deregistering.
    pub async fn teardown(&self) {
        if let Some(transport) = &self.transport {
            transport.shutdown().await;
        }
        lock(&self.state).dispatcher.cache_mut().clear();
        info!("[hub] torn down");
    }

    /// A fresh id for a new subscriber.
    pub fn next_subscriber_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register interest of `id` in `symbols`, delivering updates to
    /// `callback`. Symbols are normalized to uppercase; blanks are ignored.
    pub fn subscribe<I, S, F>(&self, id: SubscriberId, symbols: I, callback: F)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&Symbol, &PricePoint) + Send + Sync + 'static,
    {
        let callback: PriceCallback = Arc::new(callback);
        let mut state = lock(&self.state);
        let directives = state.registry.subscribe(id, symbols, callback);
        self.emit(&mut state, directives);
    }

    /// Drop interest of `id` in `symbols`.
    pub fn unsubscribe<I, S>(&self, id: SubscriberId, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = lock(&self.state);
        let directives = state.registry.unsubscribe(id, symbols);
        self.emit(&mut state, directives);
    }

    /// Replace the whole symbol set of `id`, sending only the difference.
    pub fn replace_symbols<I, S>(&self, id: SubscriberId, new_symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = lock(&self.state);
        let directives = state.registry.replace_symbols(id, new_symbols);
        self.emit(&mut state, directives);
    }

    /// Remove `id` entirely. Safe to call repeatedly or for unknown ids.
    pub fn deregister_subscriber(&self, id: SubscriberId) {
        let mut state = lock(&self.state);
        let directives = state.registry.deregister(id);
        self.emit(&mut state, directives);
    }

    /// Latest cached price for `symbol` (any case).
    pub fn get_current_price(&self, symbol: &str) -> Option<PricePoint> {
        let symbol = Symbol::parse(symbol)?;
        lock(&self.state).dispatcher.cache().get(&symbol)
    }

    /// Symbols currently subscribed upstream, sorted.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        lock(&self.state).registry.active_symbols()
    }

    /// The symbols `id` holds, or `None` if it is not registered.
    pub fn symbols_of(&self, id: SubscriberId) -> Option<Vec<Symbol>> {
        lock(&self.state).registry.symbols_of(id).map(<[Symbol]>::to_vec)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).registry.subscriber_count()
    }

    /// How many malformed items of `kind` were dropped so far.
    pub fn malformed_count(&self, kind: MalformedKind) -> u64 {
        lock(&self.state).dispatcher.malformed().count(kind)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.as_ref().map(|t| t.status()).unwrap_or_default()
    }

    /// Observe transport status transitions. Ignored for sink-backed hubs.
    pub fn on_status_change<F>(&self, handler: F)
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        if let Some(transport) = &self.transport {
            let handler: OnStatusCallback = Arc::new(handler);
            transport.on_status_change(handler);
        }
    }

    /// Feed one inbound frame through the dispatcher. The transport calls
    /// this for every text frame.
    pub fn on_inbound_message(&self, text: &str) {
        dispatch(&self.state, text);
    }

    /// Value `holdings` against the cached prices.
    pub fn value_portfolio(&self, holdings: &[Holding]) -> PortfolioValuation {
        let state = lock(&self.state);
        valuation::value_portfolio(holdings, |sym| state.dispatcher.cache().get(sym))
    }

    fn emit(&self, state: &mut HubState, directives: Vec<Directive>) {
        for d in directives {
            if let Directive::Unsubscribe(symbols) = &d {
                state.dispatcher.cache_mut().evict(symbols);
            }
            debug!("[hub] {} {:?}", d.event(), d.symbols());
            self.sink.send(&d);
        }
    }
}

fn new_state(policy: MissingChangePolicy) -> SharedState {
    Arc::new(Mutex::new(HubState { registry: SubscriptionRegistry::new(), dispatcher: Dispatcher::new(policy) }))
}

fn dispatch(state: &Mutex<HubState>, text: &str) {
    let deliveries = {
        let mut guard = lock(state);
        let HubState { registry, dispatcher } = &mut *guard;
        dispatcher.ingest(text, registry, time_util::now_ms())
    };
    for d in deliveries {
        // An earlier callback in this batch, or another thread, may have
        // dropped the subscriber since the batch was collected.
        let current = d.is_current(&lock(state).registry);
        if current {
            d.deliver();
        } else {
            debug!("[hub] {} left before {} delivery, skipped", d.subscriber, d.symbol);
        }
    }
}
