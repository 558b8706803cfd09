//! Stanza parsing and rendering.
//!
//! Inbound stanzas are parsed once into a small element tree and then mapped
//! to the typed events the rest of the receiver works with. Outbound stanzas
//! are rendered from fixed templates with every attribute value escaped.

use super::framing::STREAM_CLOSE;
use crate::error::TransportError;
use crate::model::{IncomingMessage, Jid, OutboundPresence, PresenceEvent, PresenceKind};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quick_xml::escape::escape;
use std::borrow::Cow;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub const NS_TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const NS_PING: &str = "urn:xmpp:ping";

/// A parsed XML element. Names keep their prefix (`stream:features`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, TransportError> {
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| TransportError::Protocol(format!("bad attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| TransportError::Protocol(format!("bad attribute value: {}", e)))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            ..Self::default()
        })
    }

    /// Parse one complete element.
    pub fn parse(xml: &str) -> Result<Self, TransportError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        loop {
            let event = reader
                .read_event()
                .map_err(|e| TransportError::Protocol(format!("malformed stanza: {}", e)))?;
            match event {
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Element::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| TransportError::Protocol("unbalanced end tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        match text.unescape() {
                            Ok(unescaped) => current.text.push_str(&unescaped),
                            Err(_) => current.text.push_str(&String::from_utf8_lossy(&text)),
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => {
                    return Err(TransportError::Protocol("incomplete stanza".to_string()));
                }
                _ => {}
            }
        }
    }

    pub fn local_name(&self) -> &str {
        self.name
            .rsplit_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    pub fn has_child(&self, local_name: &str) -> bool {
        self.child(local_name).is_some()
    }

    /// The namespace declared on this element, if any.
    pub fn ns(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    /// Whether this element is `local_name` in namespace `ns`.
    pub fn is(&self, local_name: &str, ns: &str) -> bool {
        self.local_name() == local_name && self.ns() == Some(ns)
    }

    /// First child `local_name` declared in namespace `ns`.
    pub fn child_ns(&self, local_name: &str, ns: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(local_name, ns))
    }
}

/// What the server offered in `<stream:features/>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFeatures {
    /// `Some(required)` when STARTTLS is offered.
    pub starttls: Option<bool>,
    pub mechanisms: Vec<String>,
    pub bind: bool,
    /// RFC 3921 session establishment is advertised and not marked optional.
    pub session_required: bool,
}

impl StreamFeatures {
    pub fn parse(xml: &str) -> Result<Self, TransportError> {
        let root = Element::parse(xml)?;
        if root.local_name() != "features" {
            return Err(TransportError::Protocol(format!(
                "expected stream features, got <{}>",
                root.name
            )));
        }

        let starttls = root
            .child_ns("starttls", NS_TLS)
            .map(|tls| tls.has_child("required"));
        let mechanisms = root
            .child_ns("mechanisms", NS_SASL)
            .map(|m| {
                m.children
                    .iter()
                    .filter(|c| c.local_name() == "mechanism")
                    .map(|c| c.text.trim().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let session_required = root
            .child_ns("session", NS_SESSION)
            .map(|s| !s.has_child("optional"))
            .unwrap_or(false);

        Ok(Self {
            starttls,
            mechanisms,
            bind: root.child_ns("bind", NS_BIND).is_some(),
            session_required,
        })
    }

    pub fn supports_mechanism(&self, mechanism: &str) -> bool {
        self.mechanisms.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iq {
    pub id: Option<String>,
    pub from: Option<String>,
    pub kind: String,
    pub payload: Option<Element>,
}

impl Iq {
    pub fn is_request(&self) -> bool {
        self.kind == "get" || self.kind == "set"
    }

    pub fn is_ping(&self) -> bool {
        self.kind == "get"
            && self
                .payload
                .as_ref()
                .is_some_and(|p| p.local_name() == "ping" && p.attr("xmlns") == Some(NS_PING))
    }
}

/// A stanza read from the server after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(IncomingMessage),
    Presence(PresenceEvent),
    Iq(Iq),
    /// `<stream:error>` with its defined condition.
    StreamError(String),
    StreamEnd,
    /// The server's stream header, repeated after a restart.
    StreamHeader,
    Other(String),
}

pub fn is_stream_header(stanza: &str) -> bool {
    let trimmed = stanza.trim_start();
    let without_decl = if trimmed.starts_with("<?xml") {
        trimmed
            .find("?>")
            .map(|pos| trimmed[pos + 2..].trim_start())
            .unwrap_or(trimmed)
    } else {
        trimmed
    };
    without_decl.starts_with("<stream:stream")
}

/// Map one extracted stanza to an [`Inbound`] event.
pub fn classify(stanza: &str) -> Result<Inbound, TransportError> {
    if stanza.trim() == STREAM_CLOSE {
        return Ok(Inbound::StreamEnd);
    }
    if is_stream_header(stanza) {
        return Ok(Inbound::StreamHeader);
    }

    let element = Element::parse(stanza)?;
    let inbound = match element.name.as_str() {
        "message" => Inbound::Message(IncomingMessage {
            from: Jid::parse(element.attr("from").unwrap_or_default()).bare(),
            to: element.attr("to").unwrap_or_default().to_string(),
            body: element.child("body").map(|b| b.text.clone()),
            kind: element.attr("type").unwrap_or("normal").to_string(),
        }),
        "presence" => Inbound::Presence(PresenceEvent {
            from: element.attr("from").unwrap_or_default().to_string(),
            kind: PresenceKind::from_type_attr(element.attr("type")),
        }),
        "iq" => Inbound::Iq(Iq {
            id: element.attr("id").map(str::to_string),
            from: element.attr("from").map(str::to_string),
            kind: element.attr("type").unwrap_or_default().to_string(),
            payload: element.children.first().cloned(),
        }),
        "stream:error" => {
            let condition = element
                .children
                .iter()
                .map(Element::local_name)
                .find(|name| *name != "text")
                .unwrap_or("undefined-condition")
                .to_string();
            Inbound::StreamError(condition)
        }
        _ => Inbound::Other(element.name.clone()),
    };
    Ok(inbound)
}

pub fn starttls_request() -> String {
    format!("<starttls xmlns='{}'/>", NS_TLS)
}

/// SASL PLAIN: base64 of `\0user\0password`.
pub fn sasl_plain_auth(user: &str, password: &str) -> String {
    let credentials = BASE64.encode(format!("\0{}\0{}", user, password));
    format!(
        "<auth xmlns='{}' mechanism='PLAIN'>{}</auth>",
        NS_SASL, credentials
    )
}

/// Copy of `stanza` safe for traffic logs: SASL payloads, which carry the
/// encoded password, are replaced.
pub fn redact_credentials(stanza: &str) -> Cow<'_, str> {
    let trimmed = stanza.trim_start();
    if !(trimmed.starts_with("<auth") || trimmed.starts_with("<response")) {
        return Cow::Borrowed(stanza);
    }
    match (stanza.find('>'), stanza.rfind("</")) {
        (Some(open_end), Some(close)) if open_end < close => Cow::Owned(format!(
            "{}[redacted]{}",
            &stanza[..=open_end],
            &stanza[close..]
        )),
        _ => Cow::Borrowed(stanza),
    }
}

pub fn bind_request(id: &str, resource: Option<&str>) -> String {
    match resource {
        Some(resource) => format!(
            "<iq type='set' id='{}'><bind xmlns='{}'><resource>{}</resource></bind></iq>",
            escape(id),
            NS_BIND,
            escape(resource)
        ),
        None => format!(
            "<iq type='set' id='{}'><bind xmlns='{}'/></iq>",
            escape(id),
            NS_BIND
        ),
    }
}

pub fn session_request(id: &str) -> String {
    format!(
        "<iq type='set' id='{}'><session xmlns='{}'/></iq>",
        escape(id),
        NS_SESSION
    )
}

/// Initial availability, without a roster request.
pub fn initial_presence() -> &'static str {
    "<presence/>"
}

pub fn directed_presence(presence: &OutboundPresence) -> String {
    format!(
        "<presence to='{}' type='{}'/>",
        escape(&presence.to),
        presence.kind.as_str()
    )
}

fn iq_reply_head(kind: &str, request: &Iq) -> String {
    let mut head = format!("<iq type='{}'", kind);
    if let Some(id) = &request.id {
        head.push_str(&format!(" id='{}'", escape(id)));
    }
    if let Some(from) = &request.from {
        head.push_str(&format!(" to='{}'", escape(from)));
    }
    head
}

pub fn iq_result(request: &Iq) -> String {
    format!("{}/>", iq_reply_head("result", request))
}

pub fn iq_not_implemented(request: &Iq) -> String {
    format!(
        "{}><error type='cancel'><feature-not-implemented xmlns='{}'/></error></iq>",
        iq_reply_head("error", request),
        NS_STANZAS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PresenceType;

    #[test]
    fn test_parse_message() {
        let inbound = classify(
            "<message from='alice@example.com/phone' to='guestbook@example.com' type='chat' id='m1'>\
             <body>Hi &amp; bye</body><active xmlns='http://jabber.org/protocol/chatstates'/></message>",
        )
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Message(IncomingMessage {
                from: "alice@example.com".to_string(),
                to: "guestbook@example.com".to_string(),
                body: Some("Hi & bye".to_string()),
                kind: "chat".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_message_without_body_or_type() {
        let inbound = classify(
            "<message from='alice@example.com'><composing xmlns='http://jabber.org/protocol/chatstates'/></message>",
        )
        .unwrap();
        match inbound {
            Inbound::Message(message) => {
                assert_eq!(message.body, None);
                assert_eq!(message.kind, "normal");
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_presence_keeps_full_sender() {
        assert_eq!(
            classify("<presence from='bob@example.com/desk' type='subscribe'/>").unwrap(),
            Inbound::Presence(PresenceEvent {
                from: "bob@example.com/desk".to_string(),
                kind: PresenceKind::Subscribe,
            })
        );
        assert_eq!(
            classify("<presence from='bob@example.com/desk'><show>away</show></presence>").unwrap(),
            Inbound::Presence(PresenceEvent {
                from: "bob@example.com/desk".to_string(),
                kind: PresenceKind::Available,
            })
        );
    }

    #[test]
    fn test_parse_ping() {
        let inbound = classify(
            "<iq from='example.com' to='guestbook@example.com/r' id='p1' type='get'><ping xmlns='urn:xmpp:ping'/></iq>",
        )
        .unwrap();
        let Inbound::Iq(iq) = inbound else {
            panic!("expected iq");
        };
        assert!(iq.is_ping());
        assert!(iq.is_request());
        assert_eq!(iq_result(&iq), "<iq type='result' id='p1' to='example.com'/>");
    }

    #[test]
    fn test_unknown_iq_gets_feature_not_implemented() {
        let Inbound::Iq(iq) = classify(
            "<iq from='peer@example.com/x' id='v1' type='get'><query xmlns='jabber:iq:version'/></iq>",
        )
        .unwrap() else {
            panic!("expected iq");
        };
        assert!(!iq.is_ping());
        let reply = iq_not_implemented(&iq);
        assert!(reply.starts_with("<iq type='error' id='v1' to='peer@example.com/x'>"));
        assert!(reply.contains("<feature-not-implemented"));
    }

    #[test]
    fn test_parse_stream_error_conflict() {
        assert_eq!(
            classify(
                "<stream:error><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>\
                 <text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>Replaced by new connection</text></stream:error>"
            )
            .unwrap(),
            Inbound::StreamError("conflict".to_string())
        );
    }

    #[test]
    fn test_parse_stream_framing() {
        assert_eq!(classify("</stream:stream>").unwrap(), Inbound::StreamEnd);
        assert_eq!(
            classify("<?xml version='1.0'?><stream:stream from='example.com' id='x' version='1.0'>")
                .unwrap(),
            Inbound::StreamHeader
        );
    }

    #[test]
    fn test_parse_features() {
        let features = StreamFeatures::parse(
            "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>SCRAM-SHA-1</mechanism><mechanism>PLAIN</mechanism></mechanisms></stream:features>",
        )
        .unwrap();
        assert_eq!(features.starttls, Some(true));
        assert!(features.supports_mechanism("PLAIN"));
        assert!(!features.bind);

        let features = StreamFeatures::parse(
            "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
             <session xmlns='urn:ietf:params:xml:ns:xmpp-session'><optional/></session></stream:features>",
        )
        .unwrap();
        assert_eq!(features.starttls, None);
        assert!(features.bind);
        assert!(!features.session_required);
    }

    #[test]
    fn test_features_ignore_foreign_namespaces() {
        let features = StreamFeatures::parse(
            "<stream:features><starttls xmlns='urn:example:not-tls'><required/></starttls>\
             <mechanisms xmlns='urn:example:other'><mechanism>PLAIN</mechanism></mechanisms>\
             <bind xmlns='urn:example:other'/></stream:features>",
        )
        .unwrap();
        assert_eq!(features.starttls, None);
        assert!(!features.supports_mechanism("PLAIN"));
        assert!(!features.bind);
    }

    #[test]
    fn test_element_namespace_match() {
        let success = Element::parse("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>").unwrap();
        assert!(success.is("success", NS_SASL));
        assert!(!success.is("success", NS_TLS));
        assert!(!Element::parse("<success/>").unwrap().is("success", NS_SASL));
    }

    #[test]
    fn test_features_rejects_other_elements() {
        assert!(StreamFeatures::parse("<presence/>").is_err());
    }

    #[test]
    fn test_incomplete_stanza_is_an_error() {
        assert!(Element::parse("<message><body>x</body>").is_err());
    }

    #[test]
    fn test_sasl_plain() {
        // "\0guestbook\0secret"
        assert_eq!(
            sasl_plain_auth("guestbook", "secret"),
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>AGd1ZXN0Ym9vawBzZWNyZXQ=</auth>"
        );
    }

    #[test]
    fn test_redact_credentials() {
        let auth = sasl_plain_auth("guestbook", "secret");
        let redacted = redact_credentials(&auth);
        assert_eq!(
            redacted,
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>[redacted]</auth>"
        );
        assert!(!redacted.contains("AGd1ZXN0Ym9vawBzZWNyZXQ="));

        let presence = "<presence/>";
        assert!(matches!(redact_credentials(presence), Cow::Borrowed(p) if p == presence));
        let bind = bind_request("bind_1", None);
        assert_eq!(redact_credentials(&bind), bind);
    }

    #[test]
    fn test_directed_presence_escapes_target() {
        let presence = OutboundPresence {
            to: "o'brien@example.com".to_string(),
            kind: PresenceType::Subscribed,
        };
        assert_eq!(
            directed_presence(&presence),
            "<presence to='o&apos;brien@example.com' type='subscribed'/>"
        );
    }

    #[test]
    fn test_bind_request() {
        assert_eq!(
            bind_request("bind_1", None),
            "<iq type='set' id='bind_1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></iq>"
        );
        assert!(bind_request("bind_1", Some("web")).contains("<resource>web</resource>"));
    }
}
