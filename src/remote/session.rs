use std::{env::VarError, sync::Arc};

use async_trait::async_trait;
use russh::{
    ChannelMsg, client,
    keys::{PrivateKey, PrivateKeyWithHashAlg, load_secret_key},
};

use super::{
    CommandOutput, RemoteSession, SessionError, handler::ClientHandler,
    known_hosts::HostKeyVerifier,
};
use crate::config::{KeyPassphrase, ResolvedConnection};

pub(crate) struct SshSession {
    /// the configured domain, used to tag every log line
    host: String,
    forward_agent: bool,
    handle: client::Handle<ClientHandler>,
}

impl SshSession {
    pub async fn connect(
        target: &ResolvedConnection,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<SshSession, SessionError> {
        let private_key = load_private_key(&target.key_filename, &target.key_passphrase)?;
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(
            config,
            (target.host.as_str(), target.port),
            ClientHandler::new(&target.host, target.port, verifier),
        )
        .await?;
        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
        let auth_res = handle
            .authenticate_publickey(
                target.user.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(private_key), hash_alg),
            )
            .await?;
        if !auth_res.success() {
            return Err(SessionError::AuthenticationFailed {
                host: target.host.clone(),
                user: target.user.clone(),
            });
        }
        tracing::debug!("authenticated as {}@{}", target.user, target.host);
        Ok(SshSession {
            host: target.host.clone(),
            forward_agent: target.forward_agent,
            handle,
        })
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> String {
        self.host.clone()
    }

    async fn run(&mut self, command: &str, echo: bool) -> Result<CommandOutput, SessionError> {
        if echo {
            println!("{command}");
        }
        let mut channel = self.handle.channel_open_session().await?;
        if self.forward_agent {
            channel.agent_forward(false).await?;
        }
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).trim_end().to_string(),
            exit_status: exit_status.ok_or_else(|| SessionError::NoExitStatus(command.to_string()))?,
        };
        tracing::debug!("{}: `{command}` exited with {}", self.host, output.exit_status);
        if output.exit_status != 0 {
            return Err(SessionError::CommandFailed {
                command: command.to_string(),
                exit_status: output.exit_status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

fn load_private_key(
    key_path: &str,
    passphrase: &Option<KeyPassphrase>,
) -> Result<PrivateKey, SessionError> {
    match passphrase {
        Some(KeyPassphrase {
            value: Some(plaintext),
            ..
        }) => Ok(load_secret_key(key_path, Some(plaintext.as_str()))?),
        Some(KeyPassphrase {
            from_env: Some(env_var),
            value: None,
        }) => {
            let env_value = std::env::var(env_var).map_err(|e| match e {
                VarError::NotPresent => {
                    SessionError::EnvError(format!("{env_var} not found in the environment!"))
                }
                VarError::NotUnicode(_) => {
                    SessionError::EnvError(format!("{env_var} is not unicode!"))
                }
            })?;
            Ok(load_secret_key(key_path, Some(env_value.as_str()))?)
        }
        _ => Ok(load_secret_key(key_path, None)?),
    }
}
