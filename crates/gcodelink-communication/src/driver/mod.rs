//! Print driver
//!
//! A [`Printer`] owns one connection at a time. Connecting opens the
//! transport and starts the listener thread, which brings the device online
//! and then classifies every line it sends. Printing starts a sender thread
//! that drives the send engine until the program is exhausted, the print is
//! paused, or the connection goes away.
//!
//! # Example
//!
//! ```no_run
//! use gcodelink_communication::Printer;
//! use gcodelink_gcode::Program;
//! use gcodelink_settings::Config;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> gcodelink_core::Result<()> {
//! let mut printer = Printer::new(Config::for_port("/dev/ttyUSB0", 115_200));
//! printer.connect()?;
//! printer.wait_until_online(Duration::from_secs(5))?;
//! printer.print(Arc::new(Program::from_text("G28\nG1 X10 Y10 F3000\n")?))?;
//! # Ok(())
//! # }
//! ```

mod listener;
mod queue;
mod state;

pub use state::{ConnectionState, PrintProgress};

use crate::communication::serial::SerialConnector;
use crate::communication::{ConnectionParams, Connector};
use crate::response::ResponseClassifier;
use crossbeam_channel::{unbounded, Sender};
use gcodelink_core::{
    thread_safe, DriverError, DriverEvent, Error, Hook, Hooks, Notifier, Result, ThreadSafe,
};
use gcodelink_gcode::{Multipliers, Program, ProgramCursor, ProgramSource};
use gcodelink_settings::Config;
use listener::{BringUp, Listener};
use queue::{Advance, Outbound, SendEngine, Wire};
use state::{Claim, Link};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything tied to one open transport
struct Session {
    id: Uuid,
    link: Arc<Link>,
    wire: Arc<Wire>,
    engine: ThreadSafe<SendEngine>,
    outbox: Sender<Outbound>,
    listener: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

impl Session {
    fn start_sender(&mut self, notifier: &Arc<Notifier>) -> Result<()> {
        self.join_sender();
        let link = self.link.clone();
        let wire = self.wire.clone();
        let engine = self.engine.clone();
        let notifier = notifier.clone();
        let handle = thread::Builder::new()
            .name("gcodelink-sender".to_string())
            .spawn(move || run_sender(&link, &wire, &engine, &notifier))?;
        self.sender = Some(handle);
        Ok(())
    }

    fn join_sender(&mut self) {
        if let Some(handle) = self.sender.take() {
            join_thread(handle, "sender");
        }
    }
}

fn join_thread(handle: JoinHandle<()>, name: &str) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!("The {} thread panicked", name);
    }
}

/// Sender thread body
fn run_sender(link: &Link, wire: &Wire, engine: &ThreadSafe<SendEngine>, notifier: &Notifier) {
    loop {
        let result = engine.lock().advance(link, wire);
        match result {
            Ok(Advance::Finished) => return,
            Ok(Advance::Idle) => {
                if link.should_stop() || link.connection() != ConnectionState::Printing {
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!("Print aborted: {}", err);
                notifier.notify(DriverEvent::CriticalError(err.to_string()));
                match err {
                    Error::Connection(reason) => link.go_offline(reason),
                    _ => {
                        // Nothing went out on this step, so no ack is owed.
                        link.finish_print();
                        link.set_clear();
                    }
                }
                return;
            }
        }
    }
}

/// Host-side driver for one printer
pub struct Printer {
    config: Config,
    connector: Arc<dyn Connector>,
    notifier: Arc<Notifier>,
    session: Option<Session>,
}

impl Printer {
    /// Driver talking to a real serial port
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, SerialConnector)
    }

    /// Driver over any transport
    pub fn with_connector(config: Config, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            notifier: Arc::new(Notifier::default()),
            session: None,
        }
    }

    /// Replace all hooks. Takes effect for the next event.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.notifier = Arc::new(Notifier::new(hooks));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the configured port and start listening.
    ///
    /// Does nothing if a live connection already exists. The device is not
    /// online when this returns; see [`Printer::wait_until_online`].
    pub fn connect(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            if session.link.connection().is_connected() {
                tracing::debug!("Already connected");
                return Ok(());
            }
            // Previous connection died; release its threads first.
            self.disconnect()?;
        }

        let params = ConnectionParams::from_settings(&self.config.connection)?;
        let (reader, writer) = self.connector.open(&params)?;
        let protocol = &self.config.protocol;

        let id = Uuid::new_v4();
        let link = Arc::new(Link::connected());
        let wire = Arc::new(Wire::new(writer, protocol.encoding, self.notifier.clone()));
        let (outbox, outbox_rx) = unbounded();
        let engine = SendEngine::new(
            protocol,
            self.config.multipliers,
            self.config.low_power,
            outbox_rx,
            self.notifier.clone(),
        );
        tracing::info!("Connected to {} (session {})", params.port, id);
        self.notifier.notify(DriverEvent::Connected);

        let listener = Listener {
            reader,
            link: link.clone(),
            wire: wire.clone(),
            notifier: self.notifier.clone(),
            classifier: ResponseClassifier::new(self.config.responses.clone()),
            bring_up: BringUp::from(protocol),
        };
        let spawned = thread::Builder::new()
            .name("gcodelink-listener".to_string())
            .spawn(move || listener.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                let _ = wire.close();
                return Err(err.into());
            }
        };

        self.session = Some(Session {
            id,
            link,
            wire,
            engine: thread_safe(engine),
            outbox,
            listener: Some(handle),
            sender: None,
        });
        Ok(())
    }

    /// Set the port and baud rate, then [`connect`](Printer::connect).
    pub fn connect_to(&mut self, port: impl Into<String>, baud_rate: u32) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.config.connection.port = Some(port.into());
        self.config.connection.baud_rate = Some(baud_rate);
        self.connect()
    }

    /// Stop both threads and close the transport. Calling it again is a no-op.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.link.request_stop();
        if let Some(handle) = session.listener.take() {
            join_thread(handle, "listener");
        }
        session.link.mark_disconnected();
        session.join_sender();
        let closed = session.wire.close();
        tracing::info!("Disconnected (session {})", session.id);
        self.notifier.notify(DriverEvent::Disconnected);
        closed
    }

    /// Block until the device is online, bring-up fails, or `timeout` passes.
    pub fn wait_until_online(&self, timeout: Duration) -> Result<()> {
        self.session()?.link.wait_until_online(timeout)
    }

    /// Start streaming `program`.
    pub fn print(&mut self, program: Arc<Program>) -> Result<()> {
        self.print_source(Box::new(ProgramCursor::new(program)))
    }

    /// Start streaming from any source, e.g. a lazily read file.
    pub fn print_source(&mut self, source: Box<dyn ProgramSource>) -> Result<()> {
        let notifier = self.notifier.clone();
        let protocol = self.config.protocol.clone();
        let session = self
            .session
            .as_mut()
            .ok_or(Error::Driver(DriverError::NotConnected))?;
        let link = session.link.clone();

        let deadline = Instant::now() + protocol.ack_timeout();
        match link.claim_clear(protocol.sleep_interval(), Some(deadline), |c| {
            c == ConnectionState::Online
        }) {
            Claim::Claimed => {}
            Claim::Invalid => return Err(not_ready(link.connection()).into()),
            Claim::TimedOut => {
                return Err(DriverError::Timeout {
                    timeout_ms: protocol.ack_timeout_ms,
                }
                .into())
            }
        }

        let total = source.total();
        if let Err(err) = session.engine.lock().start(source, &session.wire) {
            link.set_clear();
            return Err(err);
        }
        link.begin_print(total)?;
        tracing::info!("Print started");
        notifier.notify(DriverEvent::Started);
        if let Err(err) = session.start_sender(&notifier) {
            link.finish_print();
            return Err(err);
        }
        Ok(())
    }

    /// Suspend the print after the in-flight send completes.
    pub fn pause(&mut self) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(Error::Driver(DriverError::NotConnected))?;
        session.link.pause()?;
        session.join_sender();
        tracing::info!("Print paused");
        self.notifier.notify(DriverEvent::Paused);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        let notifier = self.notifier.clone();
        let session = self
            .session
            .as_mut()
            .ok_or(Error::Driver(DriverError::NotConnected))?;
        session.link.resume()?;
        tracing::info!("Print resumed");
        notifier.notify(DriverEvent::Resumed);
        if let Err(err) = session.start_sender(&notifier) {
            let _ = session.link.pause();
            return Err(err);
        }
        Ok(())
    }

    /// Send a line-numbered command.
    ///
    /// While printing the command is appended to the main queue; otherwise
    /// it is framed and sent once the device is clear to send.
    pub fn send(&self, command: &str) -> Result<()> {
        let session = self.session()?;
        match session.link.connection() {
            ConnectionState::Printing => session.enqueue(Outbound::Append(command.to_string())),
            ConnectionState::Online | ConnectionState::Paused => {
                self.claim(session)?;
                let sent = session.engine.lock().send_numbered(command, &session.wire);
                if sent.is_err() {
                    session.link.set_clear();
                }
                sent
            }
            other => Err(not_ready(other).into()),
        }
    }

    /// Send a command immediately.
    ///
    /// While printing it jumps ahead of the program; otherwise it goes out
    /// raw, without a line number or checksum.
    pub fn send_now(&self, command: &str) -> Result<()> {
        let session = self.session()?;
        match session.link.connection() {
            ConnectionState::Printing => {
                session.enqueue(Outbound::Priority(command.to_string()))
            }
            ConnectionState::Online | ConnectionState::Paused => session.wire.transmit(command),
            other => Err(not_ready(other).into()),
        }
    }

    /// Change multipliers for lines not yet sent.
    pub fn set_multipliers(&mut self, multipliers: Multipliers) {
        self.config.multipliers = multipliers;
        if let Some(session) = &self.session {
            let _ = session.enqueue(Outbound::Multipliers(multipliers));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|s| s.link.connection())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    pub fn is_printing(&self) -> bool {
        self.state() == ConnectionState::Printing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ConnectionState::Paused
    }

    /// Connected, online and not already printing
    pub fn can_print(&self) -> bool {
        self.state() == ConnectionState::Online
    }

    pub fn clear_to_send(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.link.clear_to_send())
            .unwrap_or(false)
    }

    /// Progress of the current or last print on this connection
    pub fn progress(&self) -> PrintProgress {
        self.session
            .as_ref()
            .map(|s| s.link.progress())
            .unwrap_or_default()
    }

    /// Identifier of the current connection
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn set_hook<F>(&self, hook: Hook, callback: F)
    where
        F: Fn(&DriverEvent) + Send + Sync + 'static,
    {
        self.notifier.set_hook(hook, callback);
    }

    pub fn remove_hook(&self, hook: Hook) -> bool {
        self.notifier.remove_hook(hook)
    }

    /// Receive every driver event
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.notifier.subscribe()
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or(Error::Driver(DriverError::NotConnected))
    }

    fn claim(&self, session: &Session) -> Result<()> {
        let protocol = &self.config.protocol;
        let deadline = Instant::now() + protocol.ack_timeout();
        match session
            .link
            .claim_clear(protocol.sleep_interval(), Some(deadline), |c| c.is_online())
        {
            Claim::Claimed => Ok(()),
            Claim::Invalid => Err(not_ready(session.link.connection()).into()),
            Claim::TimedOut => Err(DriverError::Timeout {
                timeout_ms: protocol.ack_timeout_ms,
            }
            .into()),
        }
    }
}

impl Session {
    fn enqueue(&self, message: Outbound) -> Result<()> {
        self.outbox
            .send(message)
            .map_err(|_| Error::Driver(DriverError::NotConnected))
    }
}

fn not_ready(state: ConnectionState) -> DriverError {
    match state {
        ConnectionState::Disconnected => DriverError::NotConnected,
        ConnectionState::Connected => DriverError::NotOnline,
        ConnectionState::Printing | ConnectionState::Paused => DriverError::AlreadyPrinting,
        ConnectionState::Online => DriverError::NotPrinting,
    }
}

impl Drop for Printer {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            tracing::warn!("Error while disconnecting: {}", err);
        }
    }
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer")
            .field("state", &self.state())
            .field("session", &self.session_id())
            .finish()
    }
}
