//! Connection state shared by the listener and sender threads.
//!
//! All flags (connection state, clear to send, the resend marker, the stop
//! request) live in one [`LinkState`] behind a single mutex, with a condvar
//! signalled on every change.

use chrono::{DateTime, Utc};
use gcodelink_core::{ConnectionError, DriverError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport
    #[default]
    Disconnected,
    /// Transport open, device not yet answering
    Connected,
    /// Device answering, idle
    Online,
    /// Streaming a program
    Printing,
    /// Print suspended
    Paused,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self != Self::Disconnected
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online | Self::Printing | Self::Paused)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
            Self::Online => write!(f, "Online"),
            Self::Printing => write!(f, "Printing"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

/// Progress of the current or last print
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintProgress {
    /// Main-queue lines transmitted
    pub lines_sent: usize,
    /// Program length, when the source knows it
    pub total: Option<usize>,
    /// Next protocol line number
    pub line_number: i64,
    /// Layer of the last line sent
    pub layer: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

impl PrintProgress {
    /// Fraction sent, 0.0 to 1.0
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.lines_sent as f64 / total as f64),
            None => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LinkState {
    pub connection: ConnectionState,
    pub clear_to_send: bool,
    pub resend_from: Option<i64>,
    pub stop_listening: bool,
    pub failure: Option<ConnectionError>,
    pub progress: PrintProgress,
}

/// Outcome of waiting for the clear-to-send token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    Claimed,
    /// State no longer allows sending
    Invalid,
    TimedOut,
}

/// What the resend marker asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResendStep {
    None,
    Replay(i64),
    CaughtUp,
}

#[derive(Debug, Default)]
pub(crate) struct Link {
    state: Mutex<LinkState>,
    changed: Condvar,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh link for a just-opened transport
    pub fn connected() -> Self {
        let link = Self::new();
        link.state.lock().connection = ConnectionState::Connected;
        link
    }

    pub fn connection(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn clear_to_send(&self) -> bool {
        let state = self.state.lock();
        state.clear_to_send && state.connection.is_online()
    }

    pub fn progress(&self) -> PrintProgress {
        self.state.lock().progress.clone()
    }

    pub fn update_progress(&self, f: impl FnOnce(&mut PrintProgress)) {
        f(&mut self.state.lock().progress);
    }

    fn modify<R>(&self, f: impl FnOnce(&mut LinkState) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.changed.notify_all();
        result
    }

    pub fn set_clear(&self) {
        self.modify(|s| s.clear_to_send = true);
    }

    /// Record a resend request and hand back the token in one step.
    pub fn request_resend(&self, line_number: i64) {
        self.modify(|s| {
            s.resend_from = Some(line_number);
            s.clear_to_send = true;
        });
    }

    pub fn clear_resend(&self) {
        self.modify(|s| s.resend_from = None);
    }

    /// Decide the resend action for the current protocol line number.
    ///
    /// A replay advances the marker under the same lock.
    pub fn next_resend(&self, line_number: i64) -> ResendStep {
        let mut state = self.state.lock();
        match state.resend_from {
            Some(from) if from < line_number => {
                state.resend_from = Some(from + 1);
                ResendStep::Replay(from)
            }
            Some(_) => {
                state.resend_from = None;
                ResendStep::CaughtUp
            }
            None => ResendStep::None,
        }
    }

    /// Wait for and take the clear-to-send token.
    ///
    /// Waits in slices of `poll` and gives up when `valid` rejects the
    /// connection state, a stop was requested, or `deadline` passes.
    pub fn claim_clear(
        &self,
        poll: Duration,
        deadline: Option<Instant>,
        valid: impl Fn(ConnectionState) -> bool,
    ) -> Claim {
        let mut state = self.state.lock();
        loop {
            if state.stop_listening || !valid(state.connection) {
                return Claim::Invalid;
            }
            if state.clear_to_send {
                state.clear_to_send = false;
                return Claim::Claimed;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Claim::TimedOut;
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            self.changed.wait_for(&mut state, slice);
        }
    }

    /// Connected -> Online. Returns false from any other state.
    pub fn go_online(&self) -> bool {
        self.modify(|s| {
            if s.connection == ConnectionState::Connected {
                s.connection = ConnectionState::Online;
                s.clear_to_send = true;
                true
            } else {
                false
            }
        })
    }

    /// The transport failed; nothing more can be sent.
    pub fn go_offline(&self, reason: ConnectionError) {
        self.modify(|s| {
            s.connection = ConnectionState::Disconnected;
            s.clear_to_send = false;
            s.failure = Some(reason);
        });
    }

    /// Online -> Printing, resetting progress.
    pub fn begin_print(&self, total: Option<usize>) -> std::result::Result<(), DriverError> {
        self.modify(|s| {
            match s.connection {
                ConnectionState::Online => {}
                ConnectionState::Printing | ConnectionState::Paused => {
                    return Err(DriverError::AlreadyPrinting)
                }
                ConnectionState::Connected => return Err(DriverError::NotOnline),
                ConnectionState::Disconnected => return Err(DriverError::NotConnected),
            }
            s.connection = ConnectionState::Printing;
            s.resend_from = None;
            s.progress = PrintProgress {
                total,
                started_at: Some(Utc::now()),
                ..PrintProgress::default()
            };
            Ok(())
        })
    }

    /// Printing -> Paused
    pub fn pause(&self) -> std::result::Result<(), DriverError> {
        self.modify(|s| {
            if s.connection != ConnectionState::Printing {
                return Err(DriverError::NotPrinting);
            }
            s.connection = ConnectionState::Paused;
            Ok(())
        })
    }

    /// Paused -> Printing
    pub fn resume(&self) -> std::result::Result<(), DriverError> {
        self.modify(|s| {
            if s.connection != ConnectionState::Paused {
                return Err(DriverError::NotPaused);
            }
            s.connection = ConnectionState::Printing;
            Ok(())
        })
    }

    /// Printing -> Online. Returns false if the print was not running.
    pub fn finish_print(&self) -> bool {
        self.modify(|s| {
            if s.connection == ConnectionState::Printing {
                s.connection = ConnectionState::Online;
                true
            } else {
                false
            }
        })
    }

    /// Ask the listener to stop. Also stops any waiter in `claim_clear`.
    pub fn request_stop(&self) {
        self.modify(|s| s.stop_listening = true);
    }

    pub fn should_stop(&self) -> bool {
        self.state.lock().stop_listening
    }

    /// Final teardown state after a disconnect
    pub fn mark_disconnected(&self) {
        self.modify(|s| {
            s.connection = ConnectionState::Disconnected;
            s.clear_to_send = false;
        });
    }

    /// Block until bring-up succeeds or fails, at most `timeout`.
    pub fn wait_until_online(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.connection.is_online() {
                return Ok(());
            }
            if let Some(failure) = &state.failure {
                return Err(failure.clone().into());
            }
            if state.connection == ConnectionState::Disconnected {
                return Err(DriverError::NotConnected.into());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
            self.changed.wait_for(&mut state, deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_transitions() {
        let link = Link::connected();
        assert_eq!(link.begin_print(None), Err(DriverError::NotOnline));
        assert!(link.go_online());
        assert!(!link.go_online());
        assert!(link.clear_to_send());

        assert_eq!(link.resume(), Err(DriverError::NotPaused));
        assert_eq!(link.pause(), Err(DriverError::NotPrinting));
        link.begin_print(Some(3)).unwrap();
        assert_eq!(link.begin_print(None), Err(DriverError::AlreadyPrinting));
        link.pause().unwrap();
        assert_eq!(link.connection(), ConnectionState::Paused);
        assert!(!link.finish_print());
        link.resume().unwrap();
        assert!(link.finish_print());
        assert_eq!(link.connection(), ConnectionState::Online);
    }

    #[test]
    fn test_next_resend() {
        let link = Link::new();
        assert_eq!(link.next_resend(5), ResendStep::None);
        link.request_resend(3);
        assert_eq!(link.next_resend(5), ResendStep::Replay(3));
        assert_eq!(link.next_resend(5), ResendStep::Replay(4));
        assert_eq!(link.next_resend(5), ResendStep::CaughtUp);
        assert_eq!(link.next_resend(5), ResendStep::None);
    }

    #[test]
    fn test_claim_clear_waits_for_token() {
        let link = Arc::new(Link::connected());
        link.go_online();
        let poll = Duration::from_millis(5);
        let online = |c: ConnectionState| c.is_online();
        assert_eq!(link.claim_clear(poll, None, online), Claim::Claimed);

        let deadline = Some(Instant::now() + Duration::from_millis(20));
        assert_eq!(link.claim_clear(poll, deadline, online), Claim::TimedOut);

        let other = link.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            other.set_clear();
        });
        assert_eq!(link.claim_clear(poll, None, online), Claim::Claimed);
        handle.join().unwrap();

        link.request_stop();
        assert_eq!(link.claim_clear(poll, None, online), Claim::Invalid);
    }

    #[test]
    fn test_wait_until_online_reports_failure() {
        let link = Link::connected();
        link.go_offline(ConnectionError::BringUpTimeout { attempts: 5 });
        let err = link.wait_until_online(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_progress_fraction() {
        let progress = PrintProgress {
            lines_sent: 1,
            total: Some(4),
            ..Default::default()
        };
        assert_eq!(progress.fraction(), Some(0.25));
        assert_eq!(PrintProgress::default().fraction(), None);
    }
}
