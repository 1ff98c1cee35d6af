//! Listener thread: reads device lines, classifies them and feeds the
//! results back into the shared [`Link`].

use super::queue::Wire;
use super::state::Link;
use crate::communication::{ReadOutcome, TransportReader};
use crate::response::{ResponseClassifier, ResponseKind};
use gcodelink_core::{ConnectionError, DriverEvent, Error, Notifier};
use gcodelink_settings::ProtocolSettings;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bring-up parameters
#[derive(Debug, Clone)]
pub(crate) struct BringUp {
    pub attempts: u32,
    pub interval: Duration,
    pub query: String,
}

impl From<&ProtocolSettings> for BringUp {
    fn from(protocol: &ProtocolSettings) -> Self {
        Self {
            attempts: protocol.bring_up_attempts.max(1),
            interval: protocol.bring_up_interval(),
            query: protocol.bring_up_query.clone(),
        }
    }
}

pub(crate) struct Listener {
    pub reader: Box<dyn TransportReader>,
    pub link: Arc<Link>,
    pub wire: Arc<Wire>,
    pub notifier: Arc<Notifier>,
    pub classifier: ResponseClassifier,
    pub bring_up: BringUp,
}

enum Read {
    Line(String),
    Empty,
    Gone,
}

impl Listener {
    /// Thread body: bring the device online, then dispatch until stopped.
    pub fn run(mut self) {
        if !self.listen_until_online() {
            return;
        }
        while !self.link.should_stop() {
            match self.read() {
                Read::Line(line) => self.dispatch(&line),
                Read::Empty => {}
                Read::Gone => return,
            }
        }
        tracing::debug!("Listener stopped");
    }

    fn read(&mut self) -> Read {
        let outcome = self.reader.read_line();
        if self.link.should_stop() {
            return Read::Gone;
        }
        match outcome {
            Ok(ReadOutcome::Line(line)) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    Read::Empty
                } else {
                    tracing::debug!("< {}", line);
                    Read::Line(line)
                }
            }
            Ok(ReadOutcome::Timeout) => Read::Empty,
            Ok(ReadOutcome::Closed) => {
                self.fail(ConnectionError::ConnectionLost {
                    reason: "device closed the connection".to_string(),
                });
                Read::Gone
            }
            Err(Error::Connection(err)) => {
                self.fail(err);
                Read::Gone
            }
            Err(err) => {
                self.fail(ConnectionError::ConnectionLost {
                    reason: err.to_string(),
                });
                Read::Gone
            }
        }
    }

    fn fail(&self, reason: ConnectionError) {
        tracing::error!("{}", reason);
        let message = reason.to_string();
        self.link.go_offline(reason);
        self.notifier.notify(DriverEvent::CriticalError(message));
    }

    /// Query the device until it answers. Returns false if the session ended.
    fn listen_until_online(&mut self) -> bool {
        if self.link.connection().is_online() {
            return true;
        }
        let mut empty_reads = 0;
        if let Err(err) = self.wire.transmit(&self.bring_up.query) {
            tracing::warn!("Bring-up query failed: {}", err);
        }
        loop {
            if self.link.should_stop() {
                return false;
            }
            match self.read() {
                Read::Gone => return false,
                Read::Empty => {
                    empty_reads += 1;
                    if empty_reads >= self.bring_up.attempts {
                        self.fail(ConnectionError::BringUpTimeout {
                            attempts: empty_reads,
                        });
                        return false;
                    }
                    thread::sleep(self.bring_up.interval);
                    if let Err(err) = self.wire.transmit(&self.bring_up.query) {
                        tracing::warn!("Bring-up query failed: {}", err);
                    }
                }
                Read::Line(line) => {
                    empty_reads = 0;
                    let kind = self.classifier.classify(Some(&line));
                    if kind.brings_online() {
                        if self.link.go_online() {
                            tracing::info!("Device online");
                            self.notifier.notify(DriverEvent::Online);
                        }
                        self.dispatch_kind(kind, &line);
                        return true;
                    }
                    self.dispatch_kind(kind, &line);
                }
            }
        }
    }

    fn dispatch(&self, line: &str) {
        let kind = self.classifier.classify(Some(line));
        self.dispatch_kind(kind, line);
    }

    fn dispatch_kind(&self, kind: ResponseKind, line: &str) {
        match kind {
            ResponseKind::Acknowledged | ResponseKind::Online => {
                self.notifier.notify(DriverEvent::Receive(line.to_string()));
                self.link.set_clear();
            }
            ResponseKind::TemperatureReport => {
                self.notifier
                    .notify(DriverEvent::Temperature(line.to_string()));
            }
            ResponseKind::TemperatureAck => {
                self.notifier
                    .notify(DriverEvent::Temperature(line.to_string()));
                self.link.set_clear();
            }
            ResponseKind::Error => {
                tracing::warn!("Device error: {}", line);
                self.notifier.notify(DriverEvent::Error(line.to_string()));
            }
            ResponseKind::ResendRequest => {
                match self.classifier.extract_resend_line_number(line) {
                    Some(line_number) => {
                        tracing::debug!("Resend requested from {}", line_number);
                        self.link.request_resend(line_number);
                        self.notifier.notify(DriverEvent::Resend(line_number));
                    }
                    None => {
                        tracing::warn!("Unreadable resend request: {}", line);
                        self.notifier
                            .notify(DriverEvent::InvalidResponse(line.to_string()));
                    }
                }
            }
            ResponseKind::Debug => {
                self.notifier.notify(DriverEvent::Debug(line.to_string()));
            }
            ResponseKind::Invalid => {
                self.notifier
                    .notify(DriverEvent::InvalidResponse(line.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::memory::{DeviceEnd, MemoryConnector};
    use crate::communication::{ConnectionParams, Connector};
    use crate::driver::state::ConnectionState;
    use gcodelink_core::Hook;
    use gcodelink_settings::{ResponseVocabulary, WireEncoding};
    use parking_lot::Mutex;

    fn listener(attempts: u32) -> (Listener, DeviceEnd, Arc<Mutex<Vec<DriverEvent>>>) {
        let (connector, devices) = MemoryConnector::pair();
        let params = ConnectionParams {
            port: "memory".to_string(),
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(5),
        };
        let (reader, writer) = connector.open(&params).unwrap();
        let device = devices.try_recv().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(Notifier::default());
        for hook in Hook::ALL {
            let events = events.clone();
            notifier.set_hook(hook, move |e| events.lock().push(e.clone()));
        }
        let listener = Listener {
            reader,
            link: Arc::new(Link::connected()),
            wire: Arc::new(Wire::new(writer, WireEncoding::Ascii, notifier.clone())),
            notifier,
            classifier: ResponseClassifier::new(ResponseVocabulary::default()),
            bring_up: BringUp {
                attempts,
                interval: Duration::from_millis(1),
                query: "M105".to_string(),
            },
        };
        (listener, device, events)
    }

    #[test]
    fn test_bring_up_on_greeting() {
        let (mut listener, device, events) = listener(5);
        device.to_host.send("start".to_string()).unwrap();
        assert!(listener.listen_until_online());
        assert_eq!(listener.link.connection(), ConnectionState::Online);
        assert_eq!(device.from_host.try_recv().unwrap(), "M105");
        assert!(events.lock().contains(&DriverEvent::Online));
    }

    #[test]
    fn test_bring_up_gives_up_after_empty_reads() {
        let (mut listener, device, events) = listener(3);
        assert!(!listener.listen_until_online());
        assert_eq!(listener.link.connection(), ConnectionState::Disconnected);
        // Initial query plus one after each of the first two empty reads.
        assert_eq!(device.from_host.try_iter().count(), 3);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, DriverEvent::CriticalError(_))));
        let err = listener
            .link
            .wait_until_online(Duration::from_millis(1))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    struct ScriptedReader(std::collections::VecDeque<ReadOutcome>);

    impl TransportReader for ScriptedReader {
        fn read_line(&mut self) -> gcodelink_core::Result<ReadOutcome> {
            Ok(self.0.pop_front().unwrap_or(ReadOutcome::Timeout))
        }
    }

    #[test]
    fn test_bring_up_counts_consecutive_empty_reads() {
        let (mut listener, device, events) = listener(3);
        let busy = || ReadOutcome::Line("echo:busy processing".to_string());
        listener.reader = Box::new(ScriptedReader(
            vec![
                ReadOutcome::Timeout,
                busy(),
                ReadOutcome::Timeout,
                ReadOutcome::Timeout,
                busy(),
                ReadOutcome::Timeout,
                ReadOutcome::Line("start".to_string()),
            ]
            .into(),
        ));

        assert!(listener.listen_until_online());
        assert_eq!(listener.link.connection(), ConnectionState::Online);
        // Initial query plus one after each of the four empty reads.
        assert_eq!(device.from_host.try_iter().count(), 5);
        assert!(!events
            .lock()
            .iter()
            .any(|e| matches!(e, DriverEvent::CriticalError(_))));
    }

    #[test]
    fn test_dispatch_updates_link() {
        let (listener, _device, events) = listener(5);
        listener.link.go_online();
        listener.link.begin_print(None).unwrap();
        let poll = Duration::from_millis(1);
        let printing = |c: ConnectionState| c == ConnectionState::Printing;
        assert_eq!(
            listener.link.claim_clear(poll, None, printing),
            crate::driver::state::Claim::Claimed
        );

        listener.dispatch("T:200 /200");
        assert!(!listener.link.clear_to_send());
        listener.dispatch("ok T:200 /200");
        assert!(listener.link.clear_to_send());

        listener.dispatch("Resend: 7");
        assert_eq!(
            listener.link.next_resend(9),
            crate::driver::state::ResendStep::Replay(7)
        );
        listener.dispatch("garbage");
        listener.dispatch("rs");

        let events = events.lock();
        assert!(events.contains(&DriverEvent::Temperature("T:200 /200".to_string())));
        assert!(events.contains(&DriverEvent::Resend(7)));
        assert!(events.contains(&DriverEvent::InvalidResponse("garbage".to_string())));
        assert!(events.contains(&DriverEvent::InvalidResponse("rs".to_string())));
    }

    #[test]
    fn test_closed_transport_is_fatal() {
        let (mut listener, device, events) = listener(5);
        device.to_host.send("ok".to_string()).unwrap();
        assert!(listener.listen_until_online());
        drop(device);
        let link = listener.link.clone();
        listener.run();
        assert_eq!(link.connection(), ConnectionState::Disconnected);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, DriverEvent::CriticalError(_))));
    }
}
