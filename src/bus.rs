//! Typed publish/subscribe bus wiring the engines together.
//!
//! All cross-component signalling goes through this bus: the audio manager
//! announces playback boundaries, the avatar controller announces load
//! results, and every component reports failures on the `Error` channel.
//!
//! Contracts:
//! - Listener errors are caught, logged, and re-emitted as [`Event::Error`]
//!   with a `{context, error}` envelope.
//! - The listener list is snapshotted before dispatch, so listeners may
//!   subscribe or unsubscribe re-entrantly without affecting the current
//!   emission.
//! - Listeners run in insertion order; `once` listeners are removed before
//!   their first dispatch runs.
//! - A per-event soft limit (default 10) triggers a one-time leak warning.

use crate::audio::SpeechItem;
use crate::error::Result;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::{error, warn};

/// Events carried by the bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// Avatar asset finished loading and the rig was installed.
    LoadComplete {
        /// Display name of the installed rig.
        name: String,
    },
    /// No 3D context is available; the app continues audio-only.
    GraphicsFallback,
    /// A speech item started producing sound.
    PlayStart(SpeechItem),
    /// A speech item finished (or was stopped).
    PlayEnd(SpeechItem),
    /// The speech queue drained.
    QueueEmpty,
    /// Latest asset price in USD.
    PriceUpdate(f64),
    /// Latest network transactions-per-second reading.
    TpsUpdate(f64),
    /// The embedding surface became visible or hidden.
    VisibilityChanged {
        /// True when the surface is visible.
        visible: bool,
    },
    /// A component failure, re-emitted for observers.
    Error {
        /// Which component or event dispatch produced the failure.
        context: String,
        /// Human-readable failure description.
        message: String,
    },
}

impl Event {
    /// The subscription key for this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::LoadComplete { .. } => EventKind::LoadComplete,
            Event::GraphicsFallback => EventKind::GraphicsFallback,
            Event::PlayStart(_) => EventKind::PlayStart,
            Event::PlayEnd(_) => EventKind::PlayEnd,
            Event::QueueEmpty => EventKind::QueueEmpty,
            Event::PriceUpdate(_) => EventKind::PriceUpdate,
            Event::TpsUpdate(_) => EventKind::TpsUpdate,
            Event::VisibilityChanged { .. } => EventKind::VisibilityChanged,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

/// Subscription key, one per [`Event`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoadComplete,
    GraphicsFallback,
    PlayStart,
    PlayEnd,
    QueueEmpty,
    PriceUpdate,
    TpsUpdate,
    VisibilityChanged,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::LoadComplete => "load:complete",
            EventKind::GraphicsFallback => "graphics:fallback",
            EventKind::PlayStart => "play:start",
            EventKind::PlayEnd => "play:end",
            EventKind::QueueEmpty => "queue:empty",
            EventKind::PriceUpdate => "price:update",
            EventKind::TpsUpdate => "tps:update",
            EventKind::VisibilityChanged => "visibility:changed",
            EventKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// Handle returned by [`EventBus::on`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Handler = Rc<RefCell<dyn FnMut(&Event) -> Result<()>>>;

struct Listener {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

struct Inner {
    listeners: HashMap<EventKind, Vec<Listener>>,
    next_id: u64,
    soft_limit: usize,
    warned: HashSet<EventKind>,
}

/// Single-threaded typed event bus.
///
/// Lives behind an `Rc` shared by every component; the engine mutates all
/// state on one cooperative task, so no locking is needed.
pub struct EventBus {
    inner: RefCell<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Default per-event listener soft limit before a leak warning fires.
    pub const DEFAULT_SOFT_LIMIT: usize = 10;

    /// Create a bus with the default soft limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_soft_limit(Self::DEFAULT_SOFT_LIMIT)
    }

    /// Create a bus with a custom per-event listener soft limit.
    #[must_use]
    pub fn with_soft_limit(soft_limit: usize) -> Self {
        Self {
            inner: RefCell::new(Inner {
                listeners: HashMap::new(),
                next_id: 1,
                soft_limit,
                warned: HashSet::new(),
            }),
        }
    }

    /// Subscribe to an event kind. Listeners run in insertion order.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: FnMut(&Event) -> Result<()> + 'static,
    {
        self.register(kind, handler, false)
    }

    /// Subscribe for a single dispatch; the listener removes itself first.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: FnMut(&Event) -> Result<()> + 'static,
    {
        self.register(kind, handler, true)
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(list) = inner.listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        list.len() != before
    }

    /// Remove every listener for `kind`, or every listener on the bus when
    /// `kind` is `None`.
    pub fn remove_all(&self, kind: Option<EventKind>) {
        let mut inner = self.inner.borrow_mut();
        match kind {
            Some(kind) => {
                inner.listeners.remove(&kind);
            }
            None => inner.listeners.clear(),
        }
    }

    /// Number of listeners currently registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Dispatch an event to all listeners registered for its kind.
    ///
    /// Never panics because of a listener: failures are logged and re-emitted
    /// on the `Error` channel. Failures inside `Error` listeners are only
    /// logged, so dispatch always terminates.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();

        // Snapshot under the borrow, drop `once` listeners before dispatch.
        let snapshot: Vec<(ListenerId, Handler)> = {
            let mut inner = self.inner.borrow_mut();
            let Some(list) = inner.listeners.get_mut(&kind) else {
                return;
            };
            let snapshot = list
                .iter()
                .map(|l| (l.id, Rc::clone(&l.handler)))
                .collect();
            list.retain(|l| !l.once);
            snapshot
        };

        let mut failures: Vec<String> = Vec::new();
        for (id, handler) in snapshot {
            // A listener re-entrantly emitting its own event would hit its
            // own RefCell; skip rather than panic.
            let Ok(mut handler) = handler.try_borrow_mut() else {
                warn!("skipping re-entrant dispatch of {kind} listener {id:?}");
                continue;
            };
            if let Err(e) = handler(&event) {
                error!("listener {id:?} for {kind} failed: {e}");
                failures.push(e.to_string());
            }
        }

        if kind != EventKind::Error {
            for message in failures {
                self.emit(Event::Error {
                    context: kind.to_string(),
                    message,
                });
            }
        }
    }

    fn register<F>(&self, kind: EventKind, handler: F, once: bool) -> ListenerId
    where
        F: FnMut(&Event) -> Result<()> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        let soft_limit = inner.soft_limit;
        let list = inner.listeners.entry(kind).or_default();
        list.push(Listener {
            id,
            once,
            handler: Rc::new(RefCell::new(handler)),
        });
        let count = list.len();
        if count > soft_limit && inner.warned.insert(kind) {
            warn!("possible listener leak: {count} listeners for {kind} (soft limit {soft_limit})");
        }
        id
    }
}
