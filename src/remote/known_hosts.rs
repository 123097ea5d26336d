use russh::keys::{self, PublicKey};

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum HostKeyStatus {
    /// the key is recorded for this host and matches
    Known,
    /// nothing is recorded for this host
    Unknown,
    /// a different key is recorded for this host
    Changed,
}

#[cfg_attr(test, automock)]
pub(crate) trait HostKeyVerifier: Send + Sync {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyStatus;
}

/// Looks server keys up in the user's `~/.ssh/known_hosts`. Unknown hosts are
/// never written back.
pub(crate) struct KnownHostsFile;

impl HostKeyVerifier for KnownHostsFile {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyStatus {
        match keys::check_known_hosts(host, port, key) {
            Ok(true) => HostKeyStatus::Known,
            Ok(false) => HostKeyStatus::Unknown,
            Err(keys::Error::KeyChanged { line }) => {
                tracing::debug!("{host}: known_hosts line {line} holds another key");
                HostKeyStatus::Changed
            }
            Err(e) => {
                // a missing or unreadable known_hosts counts as an unknown host
                tracing::warn!("cannot check known_hosts for {host}: {e}");
                HostKeyStatus::Unknown
            }
        }
    }
}
