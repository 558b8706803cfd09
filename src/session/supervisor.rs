use super::{EventHandler, SessionConnection, XmppTransport, POLL_TIMEOUT};
use crate::error::SessionError;
use crate::model::{EventKind, Identity};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, Instrument};

/// Keeps the bridge online: runs one session at a time and replaces it as soon
/// as it is lost.
///
/// There is no backoff and no retry limit. Connect and authentication
/// failures are not retried at all; they end [`ReconnectSupervisor::run`] so
/// the process exits and its external supervisor can restart it.
pub struct ReconnectSupervisor<F> {
    identity: Arc<Identity>,
    new_transport: F,
    message_handler: Arc<dyn EventHandler>,
    presence_handler: Arc<dyn EventHandler>,
    poll_timeout: Duration,
}

impl<F, T> ReconnectSupervisor<F>
where
    F: FnMut() -> T,
    T: XmppTransport,
{
    pub fn new(
        identity: Arc<Identity>,
        new_transport: F,
        message_handler: Arc<dyn EventHandler>,
        presence_handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            identity,
            new_transport,
            message_handler,
            presence_handler,
            poll_timeout: POLL_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Run sessions forever. Returns only with a fatal error.
    pub async fn run(&mut self) -> Result<Infallible, SessionError> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let span = info_span!("session", attempt, jid = %self.identity.jid());
            self.run_session().instrument(span).await?;
        }
    }

    /// One full session: returns `Ok` once the connection is lost.
    async fn run_session(&mut self) -> Result<(), SessionError> {
        let mut session = SessionConnection::new((self.new_transport)(), self.identity.clone());
        session.connect().await?;
        session.authenticate().await?;
        session.register_handler(EventKind::Message, self.message_handler.clone());
        session.register_handler(EventKind::Presence, self.presence_handler.clone());

        match session.announce_presence().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(error = %e, "Lost connection");
                return Ok(());
            }
        }

        info!("Listening for incoming messages");
        let processed = session.run_until_lost(self.poll_timeout).await;
        error!(processed, state = %session.state(), "Lost connection");
        Ok(())
    }
}
