//! Data carried between the XMPP session and the handlers.

use std::fmt;

/// An XMPP address: `node@domain/resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jid {
    pub node: Option<String>,
    pub domain: String,
    pub resource: Option<String>,
}

impl Jid {
    /// Split a JID string into its parts. Never fails; an input without `@`
    /// is treated as a bare domain.
    pub fn parse(input: &str) -> Self {
        let (bare, resource) = match input.split_once('/') {
            Some((bare, res)) if !res.is_empty() => (bare, Some(res.to_string())),
            Some((bare, _)) => (bare, None),
            None => (input, None),
        };
        let (node, domain) = match bare.split_once('@') {
            Some((node, domain)) if !node.is_empty() => (Some(node.to_string()), domain),
            Some((_, domain)) => (None, domain),
            None => (None, bare),
        };
        Self {
            node,
            domain: domain.to_string(),
            resource,
        }
    }

    /// The JID without its resource part.
    pub fn bare(&self) -> String {
        match &self.node {
            Some(node) => format!("{}@{}", node, self.domain),
            None => self.domain.clone(),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bare())?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

/// The bridge's own account. Fixed for the process lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub application_id: String,
    /// Host the backend is reached on; also the XMPP domain of the account.
    pub login_host: String,
    /// Where the XMPP server listens (`host`, `host:port`, `tcp://..`, `tls://..`).
    pub messaging_host: String,
    pub password: String,
}

impl Identity {
    /// `applicationId@loginHost`
    pub fn jid(&self) -> Jid {
        Jid {
            node: Some(self.application_id.clone()),
            domain: self.login_host.clone(),
            resource: None,
        }
    }
}

// Password stays out of logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("application_id", &self.application_id)
            .field("login_host", &self.login_host)
            .field("messaging_host", &self.messaging_host)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticated,
    Lost,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::Lost => "lost",
        };
        f.write_str(label)
    }
}

/// A chat message received for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Bare JID of the sender.
    pub from: String,
    pub to: String,
    /// `None` for body-less messages such as chat-state notifications.
    pub body: Option<String>,
    /// Value of the `type` attribute (`chat`, `normal`, ...).
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceKind {
    Available,
    Unavailable,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Probe,
    Error,
    Unknown(String),
}

impl PresenceKind {
    /// Map the `type` attribute of a presence stanza; a missing type means available.
    pub fn from_type_attr(value: Option<&str>) -> Self {
        match value {
            None => PresenceKind::Available,
            Some("unavailable") => PresenceKind::Unavailable,
            Some("subscribe") => PresenceKind::Subscribe,
            Some("subscribed") => PresenceKind::Subscribed,
            Some("unsubscribe") => PresenceKind::Unsubscribe,
            Some("unsubscribed") => PresenceKind::Unsubscribed,
            Some("probe") => PresenceKind::Probe,
            Some("error") => PresenceKind::Error,
            Some(other) => PresenceKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PresenceKind::Available => "available",
            PresenceKind::Unavailable => "unavailable",
            PresenceKind::Subscribe => "subscribe",
            PresenceKind::Subscribed => "subscribed",
            PresenceKind::Unsubscribe => "unsubscribe",
            PresenceKind::Unsubscribed => "unsubscribed",
            PresenceKind::Probe => "probe",
            PresenceKind::Error => "error",
            PresenceKind::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    /// Full JID of the sender, as received.
    pub from: String,
    pub kind: PresenceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Presence,
}

/// A protocol event handed to the registered handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(IncomingMessage),
    Presence(PresenceEvent),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Message(_) => EventKind::Message,
            InboundEvent::Presence(_) => EventKind::Presence,
        }
    }
}

/// Presence types the bridge ever sends to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Subscribe,
    Subscribed,
}

impl PresenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceType::Subscribe => "subscribe",
            PresenceType::Subscribed => "subscribed",
        }
    }
}

/// A directed presence stanza queued by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPresence {
    pub to: String,
    pub kind: PresenceType,
}
