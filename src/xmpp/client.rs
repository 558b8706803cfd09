//! Minimal XMPP client transport.
//!
//! Implements just enough of RFC 6120/6121 for the receiver: STARTTLS, SASL
//! PLAIN, resource binding, presence, and answering the iq requests servers
//! send to idle clients.

use super::endpoint::{ConnectionMode, XmppEndpoint};
use super::framing::{stream_header, StanzaBuffer};
use super::stanza::{self, classify, is_stream_header, Element, Inbound, StreamFeatures};
use super::tls::{upgrade_to_tls, TlsSettings};
use crate::error::TransportError;
use crate::model::{InboundEvent, Jid, OutboundPresence};
use crate::session::{TransportEvent, XmppTransport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

/// TCP connection timeout for the XMPP server.
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for each negotiation step (stream header, features, TLS, SASL, bind).
const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum allowed size for an incomplete stanza in the read buffer.
///
/// If the buffer exceeds this limit after stanza extraction, the connection is
/// treated as broken. Typical stanzas are a few KB.
const MAX_STANZA_BUFFER_SIZE: usize = 1_024 * 1_024;

const BIND_ID: &str = "bind_1";
const SESSION_ID: &str = "session_1";

/// The socket under the XML stream, before or after a TLS upgrade.
enum XmppStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl XmppStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            XmppStream::Plain(s) => s.read(buf).await,
            XmppStream::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            XmppStream::Plain(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            XmppStream::Tls(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
        }
    }
}

pub struct XmppClient {
    tls: TlsSettings,
    stream: Option<XmppStream>,
    buffer: StanzaBuffer,
    /// Stanzas extracted but not yet handed out.
    pending: VecDeque<String>,
    domain: String,
    features: StreamFeatures,
    bound_jid: Option<String>,
}

impl XmppClient {
    pub fn new(tls: TlsSettings) -> Self {
        Self {
            tls,
            stream: None,
            buffer: StanzaBuffer::new(),
            pending: VecDeque::new(),
            domain: String::new(),
            features: StreamFeatures::default(),
            bound_jid: None,
        }
    }

    fn stream(&mut self) -> Result<&mut XmppStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }

    async fn write(&mut self, data: &str) -> Result<(), TransportError> {
        debug!(data = %stanza::redact_credentials(data), "XMPP out");
        self.stream()?.write_all(data.as_bytes()).await?;
        Ok(())
    }

    /// Read once from the socket into the stanza buffer. `Ok(false)` on EOF.
    async fn fill(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let mut read_buf = [0u8; 8192];
        let stream = self.stream()?;
        let n = match tokio::time::timeout(timeout, stream.read(&mut read_buf)).await {
            Ok(read) => read?,
            Err(_) => return Err(TransportError::Timeout("waiting for server data")),
        };
        if n == 0 {
            return Ok(false);
        }
        debug!(bytes = n, "Received from server");

        self.buffer.extend(&read_buf[..n]);
        self.pending.extend(self.buffer.drain_stanzas());

        if self.buffer.len() > MAX_STANZA_BUFFER_SIZE {
            return Err(TransportError::Protocol(format!(
                "stanza buffer exceeded {} bytes",
                MAX_STANZA_BUFFER_SIZE
            )));
        }
        Ok(true)
    }

    /// Next complete stanza, waiting at most until `deadline`.
    async fn next_stanza(&mut self, deadline: Instant) -> Result<String, TransportError> {
        loop {
            if let Some(stanza) = self.pending.pop_front() {
                debug!(stanza = %stanza, "XMPP in");
                return Ok(stanza);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout("waiting for server stanza"));
            }
            if !self.fill(remaining).await? {
                return Err(TransportError::Closed);
            }
        }
    }

    /// Send a stream header and read the server's header and features.
    async fn open_stream(&mut self) -> Result<(), TransportError> {
        let header = stream_header(&self.domain);
        self.write(&header).await?;

        let deadline = Instant::now() + NEGOTIATION_TIMEOUT;
        let mut got_stream_header = false;
        loop {
            let stanza = self.next_stanza(deadline).await?;
            if is_stream_header(&stanza) {
                got_stream_header = true;
                continue;
            }
            if !got_stream_header {
                return Err(TransportError::Protocol(format!(
                    "expected stream header, got: {}",
                    stanza
                )));
            }
            if let Inbound::StreamError(condition) = classify(&stanza)? {
                return Err(TransportError::Protocol(format!(
                    "server rejected stream: {}",
                    condition
                )));
            }
            self.features = StreamFeatures::parse(&stanza)?;
            debug!(features = ?self.features, "Stream features");
            return Ok(());
        }
    }

    /// Negotiate STARTTLS on the current plain stream and restart it.
    async fn starttls(&mut self) -> Result<(), TransportError> {
        self.write(&stanza::starttls_request()).await?;
        let reply = self.next_stanza(Instant::now() + NEGOTIATION_TIMEOUT).await?;
        let reply = Element::parse(&reply)?;
        if reply.is("failure", stanza::NS_TLS) {
            return Err(TransportError::Tls("server rejected STARTTLS".to_string()));
        }
        if !reply.is("proceed", stanza::NS_TLS) {
            return Err(TransportError::Protocol(format!(
                "unexpected STARTTLS response <{}>",
                reply.name
            )));
        }

        let tcp = match self.stream.take() {
            Some(XmppStream::Plain(tcp)) => tcp,
            Some(XmppStream::Tls(_)) => {
                return Err(TransportError::Tls("stream is already encrypted".to_string()))
            }
            None => return Err(TransportError::Closed),
        };
        // Anything buffered was sent in plaintext and must not be trusted.
        if !self.buffer.is_empty() || !self.pending.is_empty() {
            warn!(bytes = self.buffer.len(), stanzas = self.pending.len(), "Discarding data received before TLS upgrade");
        }
        self.buffer.clear();
        self.pending.clear();
        let tls = upgrade_to_tls(tcp, &self.domain, self.tls.insecure, NEGOTIATION_TIMEOUT).await?;
        self.stream = Some(XmppStream::Tls(Box::new(tls)));
        info!(domain = %self.domain, "STARTTLS upgrade complete");

        self.open_stream().await
    }

    /// Wait for the reply to iq `id`, queueing any other stanzas that arrive first.
    async fn await_iq_result(&mut self, id: &str) -> Result<Element, TransportError> {
        let deadline = Instant::now() + NEGOTIATION_TIMEOUT;
        let mut held = Vec::new();
        let result = loop {
            let raw = match self.next_stanza(deadline).await {
                Ok(raw) => raw,
                Err(e) => break Err(e),
            };
            let element = Element::parse(&raw)?;
            if element.name == "iq" && element.attr("id") == Some(id) {
                break if element.attr("type") == Some("result") {
                    Ok(element)
                } else {
                    Err(TransportError::Protocol(format!("iq {} failed: {}", id, raw)))
                };
            }
            held.push(raw);
        };
        // Put early stanzas back in front, in arrival order.
        for raw in held.into_iter().rev() {
            self.pending.push_front(raw);
        }
        result
    }

    async fn answer_iq(&mut self, iq: &stanza::Iq) -> Result<(), TransportError> {
        if iq.is_ping() {
            debug!(from = ?iq.from, "Answering ping");
            self.write(&stanza::iq_result(iq)).await
        } else if iq.is_request() {
            debug!(from = ?iq.from, payload = ?iq.payload.as_ref().map(|p| p.name.as_str()), "Unsupported iq request");
            self.write(&stanza::iq_not_implemented(iq)).await
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl XmppTransport for XmppClient {
    async fn connect(&mut self, endpoint: &XmppEndpoint, domain: &str) -> Result<(), TransportError> {
        self.domain = domain.to_string();

        let tcp = tokio::time::timeout(
            TCP_CONNECT_TIMEOUT,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout("connecting to XMPP server"))??;
        info!(endpoint = %endpoint, "TCP connected");

        match endpoint.mode {
            ConnectionMode::DirectTls => {
                let tls = upgrade_to_tls(tcp, domain, self.tls.insecure, NEGOTIATION_TIMEOUT).await?;
                self.stream = Some(XmppStream::Tls(Box::new(tls)));
                self.open_stream().await?;
            }
            ConnectionMode::Tcp => {
                self.stream = Some(XmppStream::Plain(tcp));
                self.open_stream().await?;
                match self.features.starttls {
                    Some(_) if self.tls.starttls => self.starttls().await?,
                    Some(true) => {
                        return Err(TransportError::Tls(
                            "server requires STARTTLS but it is disabled".to_string(),
                        ))
                    }
                    _ => warn!(endpoint = %endpoint, "Continuing without TLS"),
                }
            }
        }
        Ok(())
    }

    async fn authenticate(&mut self, jid: &Jid, password: &str) -> Result<(), TransportError> {
        if !self.features.supports_mechanism("PLAIN") {
            return Err(TransportError::Protocol(format!(
                "server offers no supported SASL mechanism (offered: {:?})",
                self.features.mechanisms
            )));
        }

        let user = jid.node.as_deref().unwrap_or_default();
        self.write(&stanza::sasl_plain_auth(user, password)).await?;
        let reply = self.next_stanza(Instant::now() + NEGOTIATION_TIMEOUT).await?;
        let reply = Element::parse(&reply)?;
        if reply.is("failure", stanza::NS_SASL) {
            let condition = reply
                .children
                .iter()
                .map(Element::local_name)
                .find(|name| *name != "text")
                .unwrap_or("not-authorized");
            return Err(TransportError::AuthRejected(condition.to_string()));
        }
        if !reply.is("success", stanza::NS_SASL) {
            return Err(TransportError::Protocol(format!(
                "unexpected SASL response <{}>",
                reply.name
            )));
        }

        // Authenticated streams restart from scratch.
        self.buffer.clear();
        self.pending.clear();
        self.open_stream().await?;

        if !self.features.bind {
            return Err(TransportError::Protocol(
                "server does not offer resource binding".to_string(),
            ));
        }
        self.write(&stanza::bind_request(BIND_ID, jid.resource.as_deref()))
            .await?;
        let bound = self.await_iq_result(BIND_ID).await?;
        self.bound_jid = bound
            .child_ns("bind", stanza::NS_BIND)
            .and_then(|b| b.child("jid"))
            .map(|j| j.text.trim().to_string());

        if self.features.session_required {
            self.write(&stanza::session_request(SESSION_ID)).await?;
            self.await_iq_result(SESSION_ID).await?;
        }

        info!(jid = ?self.bound_jid, "Resource bound");
        Ok(())
    }

    async fn send_initial_presence(&mut self) -> Result<(), TransportError> {
        self.write(stanza::initial_presence()).await
    }

    async fn next_event(&mut self, timeout: Duration) -> Result<TransportEvent, TransportError> {
        let raw = match self.next_stanza(Instant::now() + timeout).await {
            Ok(raw) => raw,
            Err(TransportError::Timeout(_)) => return Ok(TransportEvent::Idle),
            Err(TransportError::Closed) => return Ok(TransportEvent::Closed),
            Err(e) => return Err(e),
        };

        let event = match classify(&raw)? {
            Inbound::Message(message) => TransportEvent::Stanza(InboundEvent::Message(message)),
            Inbound::Presence(presence) => TransportEvent::Stanza(InboundEvent::Presence(presence)),
            Inbound::Iq(iq) => {
                self.answer_iq(&iq).await?;
                TransportEvent::Handled
            }
            Inbound::StreamError(condition) if condition == "conflict" => TransportEvent::Conflict,
            Inbound::StreamError(condition) => {
                warn!(condition = %condition, "Stream error from server");
                TransportEvent::Closed
            }
            Inbound::StreamEnd => TransportEvent::Closed,
            Inbound::StreamHeader => TransportEvent::Handled,
            Inbound::Other(name) => {
                debug!(element = %name, "Ignoring unexpected element");
                TransportEvent::Handled
            }
        };
        Ok(event)
    }

    async fn send(&mut self, presence: &OutboundPresence) -> Result<(), TransportError> {
        self.write(&stanza::directed_presence(presence)).await
    }
}
