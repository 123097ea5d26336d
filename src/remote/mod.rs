use std::sync::Arc;

use async_trait::async_trait;
use known_hosts::{HostKeyVerifier, KnownHostsFile};
use session::SshSession;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::config::ResolvedConnection;

pub(crate) mod handler;
pub(crate) mod known_hosts;
pub(crate) mod session;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("ssh error: {1}")]
    Ssh(russh::Error, String),
    #[error("private key error: {1}")]
    PrivateKey(russh::keys::Error, String),
    #[error("env variable for private key passphrase error: {0}")]
    EnvError(String),
    #[error("{user}@{host} was rejected by the server")]
    AuthenticationFailed { host: String, user: String },
    #[error("host key for {0} does not match the one in known_hosts!")]
    HostKeyMismatch(String),
    #[error("`{command}` exited with status {exit_status}: {stderr}")]
    CommandFailed {
        command: String,
        exit_status: u32,
        stderr: String,
    },
    #[error("`{0}` ended without reporting an exit status")]
    NoExitStatus(String),
}
impl From<russh::Error> for SessionError {
    fn from(value: russh::Error) -> Self {
        let str_val = value.to_string();
        Self::Ssh(value, str_val)
    }
}
impl From<russh::keys::Error> for SessionError {
    fn from(value: russh::keys::Error) -> Self {
        let str_val = value.to_string();
        Self::PrivateKey(value, str_val)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

/// One authenticated connection to a single host.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait RemoteSession: Send {
    fn host(&self) -> String;
    /// Runs `command` and waits for it to finish. A non-zero exit status is an error.
    /// With `echo` set the command is printed before it runs.
    async fn run(&mut self, command: &str, echo: bool) -> Result<CommandOutput, SessionError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &ResolvedConnection,
    ) -> Result<Box<dyn RemoteSession>, SessionError>;
}

pub(crate) struct SshConnector {
    verifier: Arc<dyn HostKeyVerifier>,
}
impl SshConnector {
    pub fn new() -> Self {
        SshConnector {
            verifier: Arc::new(KnownHostsFile),
        }
    }
}
#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &ResolvedConnection,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        let session = SshSession::connect(target, self.verifier.clone()).await?;
        Ok(Box::new(session))
    }
}
