use std::path::Path;

use serde::{
    Deserialize,
    de::{self, Visitor},
};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_PATH: &str = "config.yaml";
pub const DEFAULT_LOG_FILE: &str = "backup.log";
pub const DEFAULT_RUNTIME: &str = "docker";
pub const DEFAULT_BACKUP_COMMAND: &str = "./restore_backup_start.sh backup";
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("malformed config: {1}")]
    Parse(serde_yaml::Error, String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("{host}: no `{field}` given and no `default_{field}` to fall back to")]
    Unresolved { host: String, field: &'static str },
}
impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        let str_value = value.to_string();
        ConfigError::Parse(value, str_value)
    }
}

#[derive(Deserialize, Debug, PartialEq)]
pub(crate) struct BackupConfig {
    /// kept optional so that a missing list is reported as such instead of a
    /// generic parse error
    #[serde(default)]
    pub connections: Option<Vec<ConnectionEntry>>,
    #[serde(flatten)]
    pub defaults: ConnectionDefaults,
    #[serde(default)]
    pub partial_container_names: Option<Vec<String>>,
    #[serde(default)]
    pub host_failure_policy: HostFailurePolicy,
    #[serde(default = "default_runtime")]
    pub container_runtime: String,
    #[serde(default = "default_backup_command")]
    pub backup_command: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub log_level: LogLevel,
}
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub(crate) struct ConnectionDefaults {
    #[serde(default)]
    pub default_user: Option<String>,
    #[serde(default)]
    pub default_key_filename: Option<String>,
    #[serde(default)]
    pub default_key_passphrase: Option<KeyPassphrase>,
    #[serde(default)]
    pub default_forward_agent: bool,
    #[serde(default)]
    pub default_port: Option<u16>,
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct ConnectionEntry {
    pub domain: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub key_filename: Option<String>,
    pub key_passphrase: Option<KeyPassphrase>,
    pub forward_agent: Option<bool>,
}
#[derive(Clone, PartialEq, Debug)]
pub(crate) struct KeyPassphrase {
    /// the passphrase is stored in plaintext inside the configuration file
    pub value: Option<String>,
    /// the passphrase must be fetched from an environment variable (env-var-name)
    pub from_env: Option<String>,
}
#[derive(Deserialize, Debug, PartialEq, Clone, Copy, Default)]
pub(crate) enum HostFailurePolicy {
    /// an unreachable host stops the whole run
    #[default]
    #[serde(alias = "abort", alias = "ABORT")]
    Abort,
    /// an unreachable host is logged and the run moves on to the next one
    #[serde(alias = "skip", alias = "SKIP")]
    Skip,
}
#[derive(Deserialize, Debug, PartialEq, Clone, Copy, Default)]
pub(crate) enum LogLevel {
    #[serde(alias = "error", alias = "ERROR")]
    Error,
    #[serde(alias = "warn", alias = "WARN", alias = "warning")]
    Warn,
    #[default]
    #[serde(alias = "info", alias = "INFO")]
    Info,
    #[serde(alias = "debug", alias = "DEBUG")]
    Debug,
    #[serde(alias = "trace", alias = "TRACE")]
    Trace,
}

/// A host entry after default substitution: everything needed to open a session.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_filename: String,
    pub key_passphrase: Option<KeyPassphrase>,
    pub forward_agent: bool,
}

fn default_runtime() -> String {
    DEFAULT_RUNTIME.to_string()
}
fn default_backup_command() -> String {
    DEFAULT_BACKUP_COMMAND.to_string()
}
fn default_log_file() -> String {
    DEFAULT_LOG_FILE.to_string()
}

impl BackupConfig {
    /// An absent or empty list means every running container is backed up.
    pub fn name_filters(&self) -> &[String] {
        self.partial_container_names.as_deref().unwrap_or_default()
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

pub(crate) fn load_configuration(path: impl AsRef<Path>) -> Result<BackupConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
    parse_configuration(&text)
}

pub(crate) fn parse_configuration(text: &str) -> Result<BackupConfig, ConfigError> {
    let config: BackupConfig = serde_yaml::from_str(text)?;
    if config.connections.is_none() {
        return Err(ConfigError::MissingField("connections"));
    }
    Ok(config)
}

/// Merges a host entry with the configured defaults. Entry values win.
pub(crate) fn resolve(
    entry: &ConnectionEntry,
    defaults: &ConnectionDefaults,
) -> Result<ResolvedConnection, ConfigError> {
    let unresolved = |field| ConfigError::Unresolved {
        host: entry.domain.clone(),
        field,
    };
    let user = entry
        .user
        .as_ref()
        .or(defaults.default_user.as_ref())
        .ok_or_else(|| unresolved("user"))?;
    let key_filename = entry
        .key_filename
        .as_ref()
        .or(defaults.default_key_filename.as_ref())
        .ok_or_else(|| unresolved("key_filename"))?;
    Ok(ResolvedConnection {
        host: entry.domain.clone(),
        port: entry
            .port
            .or(defaults.default_port)
            .unwrap_or(DEFAULT_SSH_PORT),
        user: user.clone(),
        key_filename: key_filename.clone(),
        key_passphrase: entry
            .key_passphrase
            .clone()
            .or_else(|| defaults.default_key_passphrase.clone()),
        forward_agent: entry.forward_agent.unwrap_or(defaults.default_forward_agent),
    })
}

impl<'de> Deserialize<'de> for KeyPassphrase {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct KeyPassphraseVisitor;
        impl<'de> Visitor<'de> for KeyPassphraseVisitor {
            type Value = KeyPassphrase;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter
                    .write_str("a map with at least one between `from_env` or `value` set")
            }
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut from_env = None;
                let mut value = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "from_env" => from_env = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        _ => return Err(de::Error::unknown_field(&key, &["from_env", "value"])),
                    }
                }

                if from_env.is_none() && value.is_none() {
                    return Err(de::Error::custom(
                        "at least one between `from_env` or `value` must be provided!",
                    ));
                }
                if value.is_some() {
                    from_env = None; // value takes precedence
                }
                Ok(KeyPassphrase { value, from_env })
            }
        }
        deserializer.deserialize_map(KeyPassphraseVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_basic_deserialization() {
        let config_str = r#"
            default_user: backup
            default_key_filename: /home/backup/.ssh/id_ed25519
            default_forward_agent: true
            connections:
              - domain: h1.example.com
              - domain: h2.example.com
                user: root
                port: 2222
                key_filename: /root/.ssh/id_rsa
                forward_agent: false
            partial_container_names:
              - db
              - odoo
        "#;
        let config = parse_configuration(config_str).unwrap();
        let connections = config.connections.as_ref().unwrap();
        assert_eq!(connections.len(), 2);
        assert_eq!(
            connections[0],
            ConnectionEntry {
                domain: String::from("h1.example.com"),
                port: None,
                user: None,
                key_filename: None,
                key_passphrase: None,
                forward_agent: None,
            }
        );
        assert_eq!(
            config.defaults,
            ConnectionDefaults {
                default_user: Some(String::from("backup")),
                default_key_filename: Some(String::from("/home/backup/.ssh/id_ed25519")),
                default_key_passphrase: None,
                default_forward_agent: true,
                default_port: None,
            }
        );
        assert_eq!(config.name_filters(), ["db", "odoo"]);
        assert_eq!(config.host_failure_policy, HostFailurePolicy::Abort);
        assert_eq!(config.container_runtime, "docker");
        assert_eq!(config.backup_command, "./restore_backup_start.sh backup");
        assert_eq!(config.log_file, "backup.log");
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn absent_or_null_filters_match_everything() {
        let absent = parse_configuration("connections: []").unwrap();
        assert!(absent.name_filters().is_empty());
        let null = parse_configuration("connections: []\npartial_container_names:\n").unwrap();
        assert!(null.name_filters().is_empty());
    }

    #[test]
    fn missing_connections_is_reported() {
        let result = parse_configuration("default_user: backup\n");
        assert!(matches!(result, Err(ConfigError::MissingField("connections"))));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let result = parse_configuration("connections: [domain: {");
        assert!(matches!(result, Err(ConfigError::Parse(_, _))));
        let result = parse_configuration("connections:\n  - user: nobody\n");
        assert!(matches!(result, Err(ConfigError::Parse(_, _))));
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        let result = load_configuration("/nonexistent/container-backup/config.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_, _))));
    }

    #[test]
    fn check_policy_and_runtime_overrides() {
        let config_str = r#"
            connections: []
            host_failure_policy: skip
            container_runtime: podman
            backup_command: ./backup.sh
            log_file: /var/log/container-backup.log
            log_level: DEBUG
        "#;
        let config = parse_configuration(config_str).unwrap();
        assert_eq!(config.host_failure_policy, HostFailurePolicy::Skip);
        assert_eq!(config.container_runtime, "podman");
        assert_eq!(config.backup_command, "./backup.sh");
        assert_eq!(config.log_file, "/var/log/container-backup.log");
        assert_eq!(LevelFilter::from(config.log_level), LevelFilter::DEBUG);
    }

    #[test]
    fn check_passphrase_deserialization() {
        let config_str = r#"
            default_key_passphrase:
              from_env: BACKUP_KEY_PASSPHRASE
            connections:
              - domain: h1
                key_passphrase:
                  value: plaintext
              - domain: h2
                key_passphrase:
                  value: plaintext
                  from_env: IGNORED
        "#;
        let config = parse_configuration(config_str).unwrap();
        let connections = config.connections.unwrap();
        assert_eq!(
            config.defaults.default_key_passphrase,
            Some(KeyPassphrase {
                from_env: Some(String::from("BACKUP_KEY_PASSPHRASE")),
                value: None,
            })
        );
        let expected = Some(KeyPassphrase {
            value: Some(String::from("plaintext")),
            from_env: None,
        });
        assert_eq!(connections[0].key_passphrase, expected);
        assert_eq!(connections[1].key_passphrase, expected);

        let empty = parse_configuration("connections:\n  - domain: h1\n    key_passphrase: {}\n");
        assert!(matches!(empty, Err(ConfigError::Parse(_, _))));
    }

    #[test]
    fn resolve_prefers_entry_values() {
        let defaults = ConnectionDefaults {
            default_user: Some(String::from("backup")),
            default_key_filename: Some(String::from("default_key")),
            default_key_passphrase: None,
            default_forward_agent: true,
            default_port: Some(2200),
        };
        let entry = ConnectionEntry {
            domain: String::from("h1"),
            port: Some(22),
            user: Some(String::from("root")),
            key_filename: Some(String::from("own_key")),
            key_passphrase: None,
            forward_agent: Some(false),
        };
        assert_eq!(
            resolve(&entry, &defaults).unwrap(),
            ResolvedConnection {
                host: String::from("h1"),
                port: 22,
                user: String::from("root"),
                key_filename: String::from("own_key"),
                key_passphrase: None,
                forward_agent: false,
            }
        );

        let bare = ConnectionEntry {
            domain: String::from("h2"),
            port: None,
            user: None,
            key_filename: None,
            key_passphrase: None,
            forward_agent: None,
        };
        assert_eq!(
            resolve(&bare, &defaults).unwrap(),
            ResolvedConnection {
                host: String::from("h2"),
                port: 2200,
                user: String::from("backup"),
                key_filename: String::from("default_key"),
                key_passphrase: None,
                forward_agent: true,
            }
        );
    }

    #[test]
    fn resolve_requires_user_and_key() {
        let entry = ConnectionEntry {
            domain: String::from("h1"),
            port: None,
            user: None,
            key_filename: Some(String::from("key")),
            key_passphrase: None,
            forward_agent: None,
        };
        let err = resolve(&entry, &ConnectionDefaults::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Unresolved { ref host, field: "user" } if host == "h1"
        ));

        let entry = ConnectionEntry {
            user: Some(String::from("root")),
            key_filename: None,
            ..entry
        };
        let err = resolve(&entry, &ConnectionDefaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Unresolved { field: "key_filename", .. }));

        let resolved = resolve(
            &ConnectionEntry {
                key_filename: Some(String::from("key")),
                ..entry
            },
            &ConnectionDefaults::default(),
        )
        .unwrap();
        assert_eq!(resolved.port, DEFAULT_SSH_PORT);
        assert!(!resolved.forward_agent);
    }
}
