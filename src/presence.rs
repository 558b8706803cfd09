use crate::model::{Identity, InboundEvent, OutboundPresence, PresenceEvent, PresenceKind, PresenceType};
use crate::session::EventHandler;
use async_trait::async_trait;
use tracing::info;

/// Accepts every subscription request and subscribes back, so peers never
/// wait on a manual approval.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceResponder;

impl PresenceResponder {
    /// The stanzas to send in reply to `event`, in send order.
    pub fn respond(&self, event: &PresenceEvent) -> Vec<OutboundPresence> {
        info!(from = %event.from, kind = event.kind.as_str(), "Received presence");

        match event.kind {
            PresenceKind::Subscribe => vec![
                OutboundPresence {
                    to: event.from.clone(),
                    kind: PresenceType::Subscribed,
                },
                OutboundPresence {
                    to: event.from.clone(),
                    kind: PresenceType::Subscribe,
                },
            ],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl EventHandler for PresenceResponder {
    async fn handle(&self, event: &InboundEvent, _identity: &Identity) -> Vec<OutboundPresence> {
        match event {
            InboundEvent::Presence(presence) => self.respond(presence),
            InboundEvent::Message(_) => Vec::new(),
        }
    }
}
