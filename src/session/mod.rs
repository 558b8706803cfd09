//! XMPP session lifecycle.
//!
//! [`SessionConnection`] drives one login on top of an [`XmppTransport`]:
//! connect, authenticate, announce presence, then poll one event at a time
//! and hand it to the handler registered for its kind. A session that reports
//! [`PollResult::Lost`] is finished; [`ReconnectSupervisor`] replaces it with
//! a fresh one.

mod supervisor;
#[cfg(test)]
pub(crate) mod testing;

pub use supervisor::ReconnectSupervisor;

use crate::error::{SessionError, TransportError};
use crate::model::{EventKind, Identity, InboundEvent, Jid, OutboundPresence, SessionState};
use crate::xmpp::{parse_endpoint, XmppEndpoint};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one poll waits for a protocol event.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// What a transport produced while waiting for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message or presence stanza for the handlers.
    Stanza(InboundEvent),
    /// Protocol housekeeping the transport answered by itself (pings, iq errors).
    Handled,
    /// Nothing arrived before the timeout.
    Idle,
    /// The server replaced this login with another one for the same account.
    Conflict,
    /// The server ended the stream or the socket reached EOF.
    Closed,
}

/// The messaging capability a session is built on.
///
/// [`crate::xmpp::XmppClient`] talks to a real server; tests plug in a
/// scripted implementation.
#[async_trait]
pub trait XmppTransport: Send {
    /// Open the stream to `endpoint` for the XMPP `domain`, including any TLS negotiation.
    async fn connect(&mut self, endpoint: &XmppEndpoint, domain: &str) -> Result<(), TransportError>;

    /// Log in as `jid` and bind a resource.
    async fn authenticate(&mut self, jid: &Jid, password: &str) -> Result<(), TransportError>;

    /// Broadcast initial availability without requesting the roster.
    async fn send_initial_presence(&mut self) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next event.
    async fn next_event(&mut self, timeout: Duration) -> Result<TransportEvent, TransportError>;

    async fn send(&mut self, presence: &OutboundPresence) -> Result<(), TransportError>;
}

/// Reacts to one kind of inbound event. The returned stanzas are sent, in
/// order, over the session that received the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &InboundEvent, identity: &Identity) -> Vec<OutboundPresence>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Progressed,
    TimedOut,
    Lost,
}

pub struct SessionConnection<T> {
    transport: T,
    identity: Arc<Identity>,
    state: SessionState,
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl<T: XmppTransport> SessionConnection<T> {
    pub fn new(transport: T, identity: Arc<Identity>) -> Self {
        Self {
            transport,
            identity,
            state: SessionState::Disconnected,
            handlers: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Open the transport to the messaging host. Any failure is fatal.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.require(SessionState::Disconnected, "connect")?;

        let endpoint = parse_endpoint(&self.identity.messaging_host);
        info!(endpoint = %endpoint, domain = %self.identity.login_host, "Connecting");

        if let Err(source) = self
            .transport
            .connect(&endpoint, &self.identity.login_host)
            .await
        {
            error!(endpoint = %endpoint, error = %source, "Could not connect");
            return Err(SessionError::Unreachable {
                server: endpoint.to_string(),
                source,
            });
        }

        self.state = SessionState::Connecting;
        info!(endpoint = %endpoint, "Connected");
        Ok(())
    }

    /// Log in with the identity's credentials. Any failure is fatal.
    pub async fn authenticate(&mut self) -> Result<(), SessionError> {
        self.require(SessionState::Connecting, "authenticate")?;

        let jid = self.identity.jid();
        let user = jid.node.clone().unwrap_or_default();

        if let Err(source) = self
            .transport
            .authenticate(&jid, &self.identity.password)
            .await
        {
            error!(user = %user, error = %source, "Could not authenticate");
            return Err(SessionError::AuthenticationRejected {
                user,
                server: self.identity.messaging_host.clone(),
                source,
            });
        }

        self.state = SessionState::Authenticated;
        info!(jid = %jid, "Authenticated");
        Ok(())
    }

    /// Set the handler for `kind`, returning the one it replaces.
    pub fn register_handler(
        &mut self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        self.handlers.insert(kind, handler)
    }

    /// Send initial presence. A write failure means the session is already lost.
    pub async fn announce_presence(&mut self) -> Result<(), SessionError> {
        self.require(SessionState::Authenticated, "announce presence")?;

        if let Err(e) = self.transport.send_initial_presence().await {
            self.state = SessionState::Lost;
            return Err(SessionError::Lost(e));
        }
        debug!("Initial presence sent");
        Ok(())
    }

    /// Wait for one event, dispatch it synchronously, and report the outcome.
    pub async fn poll(&mut self, timeout: Duration) -> PollResult {
        if self.state != SessionState::Authenticated {
            warn!(state = %self.state, "Poll on a session that is not authenticated");
            return PollResult::Lost;
        }

        let result = match self.transport.next_event(timeout).await {
            Ok(TransportEvent::Stanza(event)) => match self.dispatch(event).await {
                Ok(()) => PollResult::Progressed,
                Err(e) => {
                    error!(error = %e, "Failed to send reply stanza");
                    PollResult::Lost
                }
            },
            Ok(TransportEvent::Handled) => PollResult::Progressed,
            Ok(TransportEvent::Idle) => PollResult::TimedOut,
            Ok(TransportEvent::Conflict) => {
                warn!("Session replaced by another login for the same account");
                PollResult::Lost
            }
            Ok(TransportEvent::Closed) => {
                info!("Stream closed by server");
                PollResult::Lost
            }
            Err(e) => {
                error!(error = %e, "Transport error while polling");
                PollResult::Lost
            }
        };

        if result == PollResult::Lost {
            self.state = SessionState::Lost;
        }
        result
    }

    /// Poll until the session is lost. Returns the number of events processed.
    pub async fn run_until_lost(&mut self, timeout: Duration) -> u64 {
        let mut processed = 0u64;
        loop {
            match self.poll(timeout).await {
                PollResult::Progressed => processed += 1,
                PollResult::TimedOut => {}
                PollResult::Lost => return processed,
            }
        }
    }

    async fn dispatch(&mut self, event: InboundEvent) -> Result<(), TransportError> {
        let Some(handler) = self.handlers.get(&event.kind()).cloned() else {
            debug!(kind = ?event.kind(), "No handler registered, dropping event");
            return Ok(());
        };

        for presence in handler.handle(&event, &self.identity).await {
            self.transport.send(&presence).await?;
        }
        Ok(())
    }
}
