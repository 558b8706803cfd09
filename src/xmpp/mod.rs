//! XMPP client connection used by the receiver session.
//!
//! Architecture:
//! ```text
//! ReconnectSupervisor ──► SessionConnection ──► XmppClient ──TCP/TLS──► XMPP server
//! ```

mod client;
mod endpoint;
mod framing;
mod stanza;
mod tls;

pub use client::XmppClient;
pub use endpoint::{parse_endpoint, XmppEndpoint};
pub use tls::{init_crypto_provider, TlsSettings};
