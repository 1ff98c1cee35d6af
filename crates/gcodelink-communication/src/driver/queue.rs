//! Send engine: what goes on the wire next.
//!
//! Each [`SendEngine::advance`] call performs at most one transmission,
//! chosen by strict priority: a pending resend, then the priority queue, then
//! the next main-queue line. When all three are empty the print finishes.
//!
//! The engine owns the queues and the send window. The listener only touches
//! the resend marker and the clear-to-send token, both through [`Link`].

use super::state::{Claim, ConnectionState, Link, ResendStep};
use crate::communication::TransportWriter;
use crate::framing::{format_for_wire, frame, strip_comment};
use crossbeam_channel::Receiver;
use gcodelink_core::{
    DriverError, DriverEvent, Error, Notifier, ProtocolError, Result,
};
use gcodelink_gcode::{Command, Multipliers, ProgramSource};
use gcodelink_settings::{ProtocolSettings, WireEncoding};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Line number the reset directive is framed with.
const RESET_LINE_NUMBER: i64 = -1;

/// Requests handed to a running sender thread
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    /// Raw command jumping the main queue
    Priority(String),
    /// Numbered command appended to the main queue
    Append(String),
    Multipliers(Multipliers),
}

/// Recently transmitted frames, keyed by protocol line number
#[derive(Debug, Clone)]
pub(crate) struct SendWindow {
    frames: BTreeMap<i64, String>,
    capacity: usize,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a frame, evicting the oldest entries beyond capacity.
    pub fn insert(&mut self, line_number: i64, frame: String) {
        self.frames.insert(line_number, frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_first();
        }
    }

    pub fn get(&self, line_number: i64) -> Option<&str> {
        self.frames.get(&line_number).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Writing half of the transport plus send notification
pub(crate) struct Wire {
    writer: Mutex<Option<Box<dyn TransportWriter>>>,
    encoding: WireEncoding,
    notifier: Arc<Notifier>,
}

impl Wire {
    pub fn new(
        writer: Box<dyn TransportWriter>,
        encoding: WireEncoding,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            encoding,
            notifier,
        }
    }

    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    /// Encode and write one line, then fire the send hook.
    pub fn transmit(&self, text: &str) -> Result<()> {
        let bytes = format_for_wire(text, self.encoding)?;
        self.write_encoded(&bytes, strip_comment(text))
    }

    fn write_encoded(&self, bytes: &[u8], text: &str) -> Result<()> {
        {
            let mut writer = self.writer.lock();
            let writer = writer.as_mut().ok_or(DriverError::NotConnected)?;
            writer.write_all(bytes)?;
        }
        tracing::debug!("> {}", text);
        self.notifier.notify(DriverEvent::Send(text.to_string()));
        Ok(())
    }

    /// Close the transport. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        match self.writer.lock().take() {
            Some(mut writer) => writer.close(),
            None => Ok(()),
        }
    }
}

/// Result of one [`SendEngine::advance`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Not printing, or the state changed while waiting
    Idle,
    /// Replayed the frame with this line number
    Resent(i64),
    SentPriority,
    /// Sent a main-queue frame with this line number
    SentLine(i64),
    /// A line could not be encoded and was skipped
    Skipped,
    /// Main queue exhausted, print complete
    Finished,
}

pub(crate) struct SendEngine {
    source: Option<Box<dyn ProgramSource>>,
    priority: VecDeque<String>,
    tail: VecDeque<String>,
    window: SendWindow,
    line_number: i64,
    multipliers: Multipliers,
    low_power: bool,
    last_layer: Option<u32>,
    lines_sent: usize,
    consecutive_resends: u32,
    max_consecutive_resends: Option<u32>,
    poll: Duration,
    outbox: Receiver<Outbound>,
    notifier: Arc<Notifier>,
}

impl SendEngine {
    pub fn new(
        protocol: &ProtocolSettings,
        multipliers: Multipliers,
        low_power: bool,
        outbox: Receiver<Outbound>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            source: None,
            priority: VecDeque::new(),
            tail: VecDeque::new(),
            window: SendWindow::new(protocol.resend_window),
            line_number: 0,
            multipliers,
            low_power,
            last_layer: None,
            lines_sent: 0,
            consecutive_resends: 0,
            max_consecutive_resends: protocol.max_consecutive_resends,
            poll: protocol.sleep_interval(),
            outbox,
            notifier,
        }
    }

    /// Load a new source and send the line-number reset.
    ///
    /// The caller must hold the clear-to-send token.
    pub fn start(&mut self, mut source: Box<dyn ProgramSource>, wire: &Wire) -> Result<()> {
        source.rewind()?;
        self.source = Some(source);
        self.tail.clear();
        self.window.clear();
        self.line_number = 0;
        self.last_layer = None;
        self.lines_sent = 0;
        self.consecutive_resends = 0;
        self.drain_outbox();
        wire.transmit(&reset_frame())
    }

    /// Send one numbered command outside a print.
    ///
    /// The caller must hold the clear-to-send token.
    pub fn send_numbered(&mut self, command: &str, wire: &Wire) -> Result<()> {
        let command = strip_comment(command);
        if command.is_empty() {
            return Err(ProtocolError::EmptyFrame.into());
        }
        let framed = frame(command, self.line_number);
        let bytes = format_for_wire(&framed, wire.encoding())?;
        self.window.insert(self.line_number, framed.clone());
        self.line_number += 1;
        wire.write_encoded(&bytes, &framed)
    }

    fn drain_outbox(&mut self) {
        while let Ok(message) = self.outbox.try_recv() {
            match message {
                Outbound::Priority(command) => self.priority.push_back(command),
                Outbound::Append(command) => self.tail.push_back(command),
                Outbound::Multipliers(multipliers) => self.multipliers = multipliers,
            }
        }
    }

    /// Perform at most one unit of work.
    pub fn advance(&mut self, link: &Link, wire: &Wire) -> Result<Advance> {
        self.drain_outbox();
        if link.connection() != ConnectionState::Printing {
            return Ok(Advance::Idle);
        }
        match link.claim_clear(self.poll, None, |c| c == ConnectionState::Printing) {
            Claim::Claimed => {}
            Claim::Invalid | Claim::TimedOut => return Ok(Advance::Idle),
        }
        // Commands queued while we were waiting still count for this turn.
        self.drain_outbox();

        if let Some(advance) = self.resend(link, wire)? {
            return Ok(advance);
        }

        if let Some(command) = self.priority.pop_front() {
            if let Err(err) = wire.transmit(&command) {
                return self.skip(link, err);
            }
            return Ok(Advance::SentPriority);
        }

        if let Some(advance) = self.main_queue(link, wire)? {
            return Ok(advance);
        }

        self.finish(link, wire)
    }

    fn resend(&mut self, link: &Link, wire: &Wire) -> Result<Option<Advance>> {
        match link.next_resend(self.line_number) {
            ResendStep::Replay(line_number) => {
                self.consecutive_resends += 1;
                if let Some(max) = self.max_consecutive_resends {
                    if self.consecutive_resends > max {
                        return Err(ProtocolError::ResendStorm {
                            consecutive: self.consecutive_resends,
                        }
                        .into());
                    }
                }
                match self.window.get(line_number) {
                    Some(framed) => {
                        tracing::debug!("Resending line {}", line_number);
                        wire.transmit(framed)?;
                        Ok(Some(Advance::Resent(line_number)))
                    }
                    None => {
                        let err = ProtocolError::ResendOutOfWindow { line_number };
                        tracing::warn!("{}", err);
                        self.notifier.notify(DriverEvent::Error(err.to_string()));
                        link.clear_resend();
                        Ok(None)
                    }
                }
            }
            ResendStep::CaughtUp | ResendStep::None => Ok(None),
        }
    }

    fn main_queue(&mut self, link: &Link, wire: &Wire) -> Result<Option<Advance>> {
        let (text, layer) = match self.source.as_mut() {
            Some(source) => match source.next_line()? {
                Some(next) => {
                    let mut line = next.line;
                    if !self.low_power {
                        line.set_multipliers(self.multipliers);
                    }
                    (line.to_gcode(), next.layer)
                }
                None => match self.tail.pop_front() {
                    Some(command) => (command, None),
                    None => return Ok(None),
                },
            },
            None => match self.tail.pop_front() {
                Some(command) => (command, None),
                None => return Ok(None),
            },
        };

        let line_number = self.line_number;
        let framed = frame(strip_comment(&text), line_number);
        let bytes = match format_for_wire(&framed, wire.encoding()) {
            Ok(bytes) => bytes,
            Err(err) => return self.skip(link, err).map(Some),
        };
        self.window.insert(line_number, framed.clone());
        self.line_number += 1;
        self.lines_sent += 1;
        self.consecutive_resends = 0;
        wire.write_encoded(&bytes, &framed)?;

        let mut changed_layer = None;
        if !self.low_power {
            if let Some(layer) = layer {
                if layer > 0 && self.last_layer != Some(layer) {
                    changed_layer = Some(layer);
                }
                self.last_layer = Some(layer);
            }
        }

        let lines_sent = self.lines_sent;
        let next_line_number = self.line_number;
        let current_layer = self.last_layer;
        link.update_progress(|p| {
            p.lines_sent = lines_sent;
            p.line_number = next_line_number;
            p.layer = current_layer;
        });

        if let Some(layer) = changed_layer {
            tracing::info!("Layer {}", layer);
            self.notifier.notify(DriverEvent::LayerChange(layer));
        }
        Ok(Some(Advance::SentLine(line_number)))
    }

    /// Report a line that cannot be encoded and give the token back.
    fn skip(&mut self, link: &Link, err: Error) -> Result<Advance> {
        match err {
            Error::Protocol(err) => {
                tracing::warn!("Skipping line: {}", err);
                self.notifier.notify(DriverEvent::Error(err.to_string()));
                link.set_clear();
                Ok(Advance::Skipped)
            }
            other => Err(other),
        }
    }

    fn finish(&mut self, link: &Link, wire: &Wire) -> Result<Advance> {
        if !link.finish_print() {
            // Paused or torn down between claiming and here.
            link.set_clear();
            return Ok(Advance::Idle);
        }
        if let Some(source) = self.source.as_mut() {
            source.rewind()?;
        }
        self.line_number = 0;
        self.window.clear();
        self.last_layer = None;
        wire.transmit(&reset_frame())?;
        tracing::info!("Print finished after {} lines", self.lines_sent);
        self.notifier.notify(DriverEvent::Finished);
        Ok(Advance::Finished)
    }
}

fn reset_frame() -> String {
    frame(&Command::SET_LINE_NUM.to_string(), RESET_LINE_NUMBER)
}
