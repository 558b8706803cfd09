//! Delivery of chat messages to the application's backend.
//!
//! Every message becomes one form-encoded `POST /_ah/xmpp/message/chat/` on a
//! fresh connection to `{login_host}:{port}`, where the port is looked up
//! again for each message. Delivery is best effort: failures are logged and
//! the message is dropped, never retried, and never allowed to disturb the
//! XMPP session.

use crate::error::ForwardError;
use crate::model::{Identity, InboundEvent, IncomingMessage, OutboundPresence};
use crate::port_resolver::PortResolver;
use crate::session::EventHandler;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error, info, warn};

pub const CHAT_PATH: &str = "/_ah/xmpp/message/chat/";

#[derive(Debug, Serialize)]
struct ChatForm<'a> {
    from: &'a str,
    to: &'a str,
    body: &'a str,
}

pub struct MessageForwarder {
    client: reqwest::Client,
    ports: PortResolver,
}

impl MessageForwarder {
    pub fn new(ports: PortResolver) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client, ports })
    }

    /// Deliver `message`, logging the outcome. Never fails.
    pub async fn forward(&self, message: &IncomingMessage, identity: &Identity) {
        info!(from = %message.from, body = ?message.body, kind = %message.kind, "Received message");

        let Some(body) = message.body.as_deref() else {
            debug!(from = %message.from, "Message has no body, not forwarding");
            return;
        };

        match self.try_forward(&message.from, body, identity).await {
            Ok(status) if status.is_success() => {
                info!(status = status.as_u16(), "POST XMPP message returned status");
            }
            Ok(status) => {
                warn!(status = status.as_u16(), "POST XMPP message returned unexpected status");
            }
            Err(ForwardError::Resolution(e)) => {
                error!(app = %identity.application_id, error = %e, "Could not resolve backend port, dropping message");
            }
            Err(e) => {
                error!(error = %e, "Could not deliver message to backend, dropping it");
            }
        }
    }

    /// One delivery attempt; returns the backend's response status.
    pub async fn try_forward(
        &self,
        from: &str,
        body: &str,
        identity: &Identity,
    ) -> Result<StatusCode, ForwardError> {
        let port = self.ports.resolve(&identity.application_id).await?;
        let url = format!("http://{}:{}{}", identity.login_host, port, CHAT_PATH);
        let to = identity.jid().to_string();

        debug!(url = %url, "Attempting to open connection");
        let response = self
            .client
            .post(&url)
            .form(&ChatForm {
                from,
                to: &to,
                body,
            })
            .send()
            .await?;
        Ok(response.status())
    }
}

#[async_trait]
impl EventHandler for MessageForwarder {
    async fn handle(&self, event: &InboundEvent, identity: &Identity) -> Vec<OutboundPresence> {
        if let InboundEvent::Message(message) = event {
            self.forward(message, identity).await;
        }
        Vec::new()
    }
}
