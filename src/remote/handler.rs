use std::sync::Arc;

use russh::{
    Channel,
    client::{self, Handler},
};
use tokio::net::UnixStream;
use tracing::info;

use super::{
    SessionError,
    known_hosts::{HostKeyStatus, HostKeyVerifier},
};

pub(super) struct ClientHandler {
    /// these are needed for the server validation callback
    server_address: String,
    server_port: u16,
    verifier: Arc<dyn HostKeyVerifier>,
}
impl ClientHandler {
    pub fn new(server_address: &str, server_port: u16, verifier: Arc<dyn HostKeyVerifier>) -> Self {
        ClientHandler {
            server_address: server_address.to_string(),
            server_port,
            verifier,
        }
    }
}
impl Handler for ClientHandler {
    type Error = SessionError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(Default::default());
        tracing::debug!(
            "{}:{} got server key: {}",
            self.server_address,
            self.server_port,
            fingerprint
        );
        match self
            .verifier
            .verify(&self.server_address, self.server_port, server_public_key)
        {
            HostKeyStatus::Known => Ok(true),
            HostKeyStatus::Unknown => {
                info!(
                    "accepting unknown host key {} for {}",
                    fingerprint, self.server_address
                );
                Ok(true)
            }
            HostKeyStatus::Changed => {
                tracing::error!("{} host key has changed!", self.server_address);
                Err(SessionError::HostKeyMismatch(self.server_address.clone()))
            }
        }
    }

    /// Only reached when agent forwarding was requested on one of our channels:
    /// the remote side's agent requests are piped to the local agent.
    async fn server_channel_open_agent_forward(
        &mut self,
        channel: Channel<client::Msg>,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let Ok(agent_socket) = std::env::var("SSH_AUTH_SOCK") else {
            tracing::warn!(
                "{} asked for the ssh agent but SSH_AUTH_SOCK is not set",
                self.server_address
            );
            return Ok(());
        };
        tokio::spawn(async move {
            let mut agent = match UnixStream::connect(&agent_socket).await {
                Ok(agent) => agent,
                Err(e) => {
                    tracing::warn!("cannot reach the ssh agent at {agent_socket}: {e}");
                    return;
                }
            };
            let stream = channel.into_stream();
            tokio::pin!(stream);
            if let Err(e) = tokio::io::copy_bidirectional(&mut stream, &mut agent).await {
                tracing::debug!("agent forwarding ended: {e}");
            }
        });
        Ok(())
    }
}
