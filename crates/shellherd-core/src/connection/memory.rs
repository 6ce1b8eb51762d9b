//! In-memory FIFO transport for tests and examples.
//!
//! Behaves like a cooperative terminal: sent lines are echoed back (shells
//! echo what you type) and scripted responses are injected when a matching
//! command line is written. Tests drive the remote side with
//! [`MemoryIo::inject`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;

use super::observable::ObservableConnection;
use super::Io;
use crate::error::{Error, Result};

/// In-memory transport wired to an [`ObservableConnection`].
pub struct MemoryIo {
    connection: Arc<ObservableConnection>,
    open: AtomicBool,
    echo: AtomicBool,
    banner: Mutex<Option<String>>,
    responses: Mutex<HashMap<String, VecDeque<String>>>,
    /// Pending inbound chunks; drained by whichever call holds the pump.
    inbox: Mutex<VecDeque<String>>,
    pumping: AtomicBool,
}

impl MemoryIo {
    /// Creates a transport and the connection it feeds.
    #[must_use]
    pub fn wire(name: impl Into<String>) -> (Arc<Self>, Arc<ObservableConnection>) {
        let connection = ObservableConnection::new(name);
        let io = Arc::new(Self {
            connection: Arc::clone(&connection),
            open: AtomicBool::new(false),
            echo: AtomicBool::new(true),
            banner: Mutex::new(None),
            responses: Mutex::new(HashMap::new()),
            inbox: Mutex::new(VecDeque::new()),
            pumping: AtomicBool::new(false),
        });
        let weak: Weak<Self> = Arc::downgrade(&io);
        connection.set_how2send(Arc::new(move |bytes| {
            weak.upgrade().map_or_else(
                || Err(Error::WrongUsage("transport is gone".to_string())),
                |io| io.handle_outbound(bytes),
            )
        }));
        (io, connection)
    }

    /// Turns terminal-style echo of sent lines on or off.
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::Relaxed);
    }

    /// Text injected right after the transport opens, e.g. a login banner
    /// ending in the shell prompt.
    pub fn set_open_banner(&self, banner: impl Into<String>) {
        if let Ok(mut slot) = self.banner.lock() {
            *slot = Some(banner.into());
        }
    }

    /// Scripts the output injected when `command` (compared after
    /// trimming the newline) is sent. Multiple outputs for the same
    /// command are served in order; the last one repeats.
    pub fn add_response(&self, command: impl Into<String>, output: impl Into<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses
                .entry(command.into())
                .or_default()
                .push_back(output.into());
        }
    }

    /// Pushes text into the connection as if the remote side sent it.
    ///
    /// Delivery goes through a pump queue: when a subscriber reacts to a
    /// line by sending (a password reply, say), the resulting loopback is
    /// queued and delivered after the subscriber returns — the way a real
    /// transport's reader would hand it over.
    pub fn inject(&self, text: &str) {
        if let Ok(mut inbox) = self.inbox.lock() {
            inbox.push_back(text.to_string());
        }
        if self.pumping.swap(true, Ordering::SeqCst) {
            // Another frame on this or another thread is draining; it will
            // pick up what we queued.
            return;
        }
        loop {
            while let Some(chunk) = self.inbox.lock().ok().and_then(|mut i| i.pop_front()) {
                self.connection.data_received(chunk.as_bytes(), Utc::now());
            }
            self.pumping.store(false, Ordering::SeqCst);
            // Re-check: a chunk may have been queued between the final pop
            // and releasing the pump.
            if self.inbox.lock().is_ok_and(|i| i.is_empty())
                || self.pumping.swap(true, Ordering::SeqCst)
            {
                break;
            }
        }
    }

    fn handle_outbound(&self, bytes: &[u8]) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed(self.connection.name().to_string()));
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        if self.echo.load(Ordering::Relaxed) {
            self.inject(&text);
        }
        let command = text.trim_end_matches(['\r', '\n']);
        let scripted = self.responses.lock().ok().and_then(|mut responses| {
            let queue = responses.get_mut(command)?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        if let Some(output) = scripted {
            self.inject(&output);
        }
        Ok(())
    }
}

impl Io for MemoryIo {
    fn open(&self) -> Result<()> {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.connection.open();
            self.connection.notify_connection_made();
            let banner = self.banner.lock().ok().and_then(|slot| slot.clone());
            if let Some(banner) = banner {
                self.inject(&banner);
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.connection.close("connection closing");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MemoryIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIo")
            .field("connection", &self.connection.name())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DataSubscriber;
    use chrono::DateTime;

    struct Capture(Vec<String>);

    impl DataSubscriber for Capture {
        fn data_received(&mut self, chunk: &str, _when: DateTime<Utc>) -> Result<()> {
            self.0.push(chunk.to_string());
            Ok(())
        }

        fn connection_closed(&mut self, _reason: &str) {}
    }

    fn capture_on(conn: &Arc<ObservableConnection>) -> Arc<Mutex<Capture>> {
        let cap = Arc::new(Mutex::new(Capture(Vec::new())));
        let dynamic: Arc<Mutex<dyn DataSubscriber>> = cap.clone();
        conn.subscribe(Arc::downgrade(&dynamic));
        cap
    }

    #[test]
    fn test_echo_and_scripted_response() {
        let (io, conn) = MemoryIo::wire("mem");
        io.open().unwrap_or(());
        io.add_response("whoami", "operator\nbash$ ");
        let cap = capture_on(&conn);

        conn.sendline("whoami").unwrap_or(());

        let chunks = cap.lock().map(|c| c.0.clone()).unwrap_or_default();
        assert_eq!(chunks, vec!["whoami\n".to_string(), "operator\nbash$ ".to_string()]);
    }

    #[test]
    fn test_send_fails_when_closed() {
        let (io, conn) = MemoryIo::wire("mem");
        io.open().unwrap_or(());
        io.close().unwrap_or(());
        assert!(conn.sendline("ls").is_err());
    }

    #[test]
    fn test_open_banner_injected_once() {
        let (io, conn) = MemoryIo::wire("mem");
        io.set_open_banner("Last login: today\nbash$ ");
        let cap = capture_on(&conn);

        io.open().unwrap_or(());
        io.open().unwrap_or(());

        let chunks = cap.lock().map(|c| c.0.clone()).unwrap_or_default();
        assert_eq!(chunks.len(), 1);
    }
}
