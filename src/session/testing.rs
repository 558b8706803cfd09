//! In-memory transport and handlers for session and supervisor tests.

use super::{EventHandler, TransportEvent, XmppTransport};
use crate::error::TransportError;
use crate::model::{Identity, InboundEvent, Jid, OutboundPresence};
use crate::xmpp::XmppEndpoint;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn test_identity() -> Identity {
    Identity {
        application_id: "guestbook".to_string(),
        login_host: "example.com".to_string(),
        messaging_host: "xmpp.internal".to_string(),
        password: "secret".to_string(),
    }
}

#[derive(Debug, Default)]
struct Calls {
    connect_targets: Vec<String>,
    auths: usize,
    initial_presences: usize,
    polls: usize,
    sent: Vec<OutboundPresence>,
}

/// Shared record of what scripted transports were asked to do. Survives the
/// transports themselves, so a supervisor test can inspect every attempt.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Calls>>);

impl CallLog {
    pub fn connects(&self) -> usize {
        self.0.lock().unwrap().connect_targets.len()
    }

    pub fn connect_targets(&self) -> Vec<String> {
        self.0.lock().unwrap().connect_targets.clone()
    }

    pub fn auths(&self) -> usize {
        self.0.lock().unwrap().auths
    }

    pub fn initial_presences(&self) -> usize {
        self.0.lock().unwrap().initial_presences
    }

    pub fn polls(&self) -> usize {
        self.0.lock().unwrap().polls
    }

    pub fn sent(&self) -> Vec<OutboundPresence> {
        self.0.lock().unwrap().sent.clone()
    }
}

/// Plays back a fixed list of events, then reports the stream closed.
pub struct ScriptedTransport {
    log: CallLog,
    refuse_connect: bool,
    reject_auth: bool,
    fail_sends: bool,
    script: VecDeque<Result<TransportEvent, TransportError>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_log(CallLog::default())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            refuse_connect: false,
            reject_auth: false,
            fail_sends: false,
            script: VecDeque::new(),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn fail_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn with_event(mut self, event: TransportEvent) -> Self {
        self.script.push_back(Ok(event));
        self
    }

    pub fn with_error(mut self, error: TransportError) -> Self {
        self.script.push_back(Err(error));
        self
    }
}

#[async_trait]
impl XmppTransport for ScriptedTransport {
    async fn connect(&mut self, endpoint: &XmppEndpoint, _domain: &str) -> Result<(), TransportError> {
        self.log.0.lock().unwrap().connect_targets.push(endpoint.to_string());
        if self.refuse_connect {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(())
    }

    async fn authenticate(&mut self, _jid: &Jid, _password: &str) -> Result<(), TransportError> {
        self.log.0.lock().unwrap().auths += 1;
        if self.reject_auth {
            return Err(TransportError::AuthRejected("not-authorized".to_string()));
        }
        Ok(())
    }

    async fn send_initial_presence(&mut self) -> Result<(), TransportError> {
        self.log.0.lock().unwrap().initial_presences += 1;
        Ok(())
    }

    async fn next_event(&mut self, _timeout: Duration) -> Result<TransportEvent, TransportError> {
        self.log.0.lock().unwrap().polls += 1;
        self.script.pop_front().unwrap_or(Ok(TransportEvent::Closed))
    }

    async fn send(&mut self, presence: &OutboundPresence) -> Result<(), TransportError> {
        if self.fail_sends {
            return Err(TransportError::Closed);
        }
        self.log.0.lock().unwrap().sent.push(presence.clone());
        Ok(())
    }
}

/// Records every event it sees and answers with nothing.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<InboundEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<InboundEvent> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &InboundEvent, _identity: &Identity) -> Vec<OutboundPresence> {
        self.seen.lock().unwrap().push(event.clone());
        Vec::new()
    }
}
