//! Fan-out connection feeding many observers from one I/O stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::text::Utf8Decoder;

/// Identifier of one subscription, returned by
/// [`ObservableConnection::subscribe`].
pub type SubscriberId = u64;

/// Outbound hook: ships encoded bytes into the transport.
pub type SendFn = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

/// Encoder turning outbound text into transport bytes.
pub type EncodeFn = Arc<dyn Fn(&str) -> Vec<u8> + Send + Sync>;

/// Receiver of decoded inbound data.
///
/// Implemented by observer machines. `data_received` runs on the
/// connection's pump, so implementations must be quick — regex matching,
/// not blocking work.
pub trait DataSubscriber: Send {
    /// Called with each decoded chunk and the time it was read.
    ///
    /// # Errors
    ///
    /// An error is logged by the connection and does not stop delivery to
    /// other subscribers.
    fn data_received(&mut self, chunk: &str, when: DateTime<Utc>) -> Result<()>;

    /// Called exactly once when the connection closes.
    fn connection_closed(&mut self, reason: &str);
}

/// Lifecycle notifications for listeners such as devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The transport finished opening.
    Made,
    /// The transport was lost or closed.
    Lost,
}

struct SubEntry {
    id: SubscriberId,
    sink: Weak<Mutex<dyn DataSubscriber>>,
}

type Listener = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// A named duplex text pipe with subscriber fan-out.
///
/// One connection outlives many observer generations: observers subscribe,
/// watch the stream until their predicate holds, and unsubscribe, while
/// the underlying I/O may even be reopened. Subscribers are held weakly —
/// a dropped observer detaches without explicit cleanup.
pub struct ObservableConnection {
    name: String,
    newline: String,
    open: AtomicBool,
    enabled: AtomicBool,
    how2send: Mutex<Option<SendFn>>,
    encoder: Mutex<Option<EncodeFn>>,
    decoder: Mutex<Utf8Decoder>,
    subscribers: Mutex<Vec<SubEntry>>,
    listeners: Mutex<Vec<Listener>>,
    next_sub_id: AtomicU64,
}

impl ObservableConnection {
    /// Creates a connection with the given name and `"\n"` newline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_newline(name, "\n")
    }

    /// Creates a connection with an explicit outbound newline string.
    #[must_use]
    pub fn with_newline(name: impl Into<String>, newline: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            newline: newline.into(),
            open: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            how2send: Mutex::new(None),
            encoder: Mutex::new(None),
            decoder: Mutex::new(Utf8Decoder::default()),
            subscribers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
        })
    }

    /// Stable connection name, used in logs and error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The newline appended by [`Self::sendline`].
    #[must_use]
    pub fn newline(&self) -> &str {
        &self.newline
    }

    /// Installs the outbound hook. Transports call this while wiring up.
    pub fn set_how2send(&self, hook: SendFn) {
        if let Ok(mut slot) = self.how2send.lock() {
            *slot = Some(hook);
        }
    }

    /// Installs an encoder replacing the default UTF-8 one, e.g. for
    /// devices expecting a legacy charset.
    pub fn set_encoder(&self, encoder: EncodeFn) {
        if let Ok(mut slot) = self.encoder.lock() {
            *slot = Some(encoder);
        }
    }

    /// Enables or disables the connection: while disabled, inbound data
    /// is dropped before reaching subscribers.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns true while inbound delivery is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Marks the connection open. Called by the transport.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Returns true while the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Closes the connection, notifying every subscriber exactly once.
    ///
    /// Idempotent: only the first call delivers close notifications.
    pub fn close(&self, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!(connection = %self.name, reason, "closing connection");
            let entries: Vec<SubEntry> = self
                .subscribers
                .lock()
                .map(|mut subs| subs.drain(..).collect())
                .unwrap_or_default();
            for entry in entries {
                if let Some(sink) = entry.sink.upgrade()
                    && let Ok(mut sink) = sink.lock()
                {
                    sink.connection_closed(reason);
                }
            }
            self.emit(ConnectionEvent::Lost);
        }
    }

    /// Sends text through the encoder into the transport.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ConnectionClosed`] after close, or
    /// [`Error::WrongUsage`] when no transport is attached.
    pub fn send(&self, data: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed(self.name.clone()));
        }
        let hook = self
            .how2send
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or_else(|| {
                Error::WrongUsage(format!("connection '{}' has no transport attached", self.name))
            })?;
        let encoder = self.encoder.lock().ok().and_then(|slot| slot.clone());
        let bytes = encoder.map_or_else(|| data.as_bytes().to_vec(), |encode| encode(data));
        tracing::trace!(connection = %self.name, bytes = bytes.len(), "send");
        hook(&bytes)
    }

    /// Sends text followed by the connection newline.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::send`].
    pub fn sendline(&self, data: &str) -> Result<()> {
        let mut line = String::with_capacity(data.len() + self.newline.len());
        line.push_str(data);
        line.push_str(&self.newline);
        self.send(&line)
    }

    /// Attaches a subscriber; returns its id for later unsubscription.
    ///
    /// Safe to call concurrently with [`Self::data_received`]; the new
    /// subscriber starts seeing data from the next chunk on.
    pub fn subscribe(&self, sink: Weak<Mutex<dyn DataSubscriber>>) -> SubscriberId {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(SubEntry { id, sink });
            tracing::trace!(connection = %self.name, id, total = subs.len(), "subscribed");
        }
        id
    }

    /// Detaches a subscriber. Returns false when the id was unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().is_ok_and(|mut subs| {
            let before = subs.len();
            subs.retain(|entry| entry.id != id);
            before != subs.len()
        })
    }

    /// Number of live subscribers, for diagnostics.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|e| e.sink.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Publishes inbound bytes to every subscriber.
    ///
    /// Runs the incremental decoder, then iterates a snapshot of the
    /// subscriber list so that subscribe/unsubscribe during delivery never
    /// blocks or deadlocks. A failing subscriber is logged and skipped;
    /// its siblings still get the data.
    pub fn data_received(&self, bytes: &[u8], when: DateTime<Utc>) {
        if !self.is_enabled() {
            return;
        }
        let decoded = match self.decoder.lock() {
            Ok(mut decoder) => decoder.feed(bytes),
            Err(_) => return,
        };
        let chunk = match decoded {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(connection = %self.name, %err, "dropping undecodable chunk");
                return;
            }
        };
        if chunk.is_empty() {
            return;
        }
        tracing::trace!(connection = %self.name, chunk = %chunk, "data received");

        let snapshot: Vec<(SubscriberId, Arc<Mutex<dyn DataSubscriber>>)> =
            match self.subscribers.lock() {
                Ok(mut subs) => {
                    subs.retain(|entry| entry.sink.strong_count() > 0);
                    subs.iter()
                        .filter_map(|entry| entry.sink.upgrade().map(|sink| (entry.id, sink)))
                        .collect()
                }
                Err(_) => return,
            };

        for (id, sink) in snapshot {
            let Ok(mut sink) = sink.lock() else { continue };
            if let Err(err) = sink.data_received(&chunk, when) {
                tracing::warn!(
                    connection = %self.name,
                    subscriber = id,
                    %err,
                    "subscriber failed to process data"
                );
            }
        }
    }

    /// Registers a lifecycle listener.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// Announces that the transport finished opening.
    pub fn notify_connection_made(&self) {
        self.emit(ConnectionEvent::Made);
    }

    /// Announces that the transport was lost without an explicit close.
    pub fn notify_connection_lost(&self) {
        self.close("connection lost");
    }

    fn emit(&self, event: ConnectionEvent) {
        let Ok(listeners) = self.listeners.lock() else {
            return;
        };
        for listener in listeners.iter() {
            listener(event);
        }
    }
}

impl std::fmt::Debug for ObservableConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableConnection")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
