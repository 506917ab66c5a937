//! Configuration loading for devlink.
//!
//! TOML profiles layered under `DEVLINK_*` environment variables, and
//! translation to `devlink_api::DeviceConfig`. The CLI adds flag
//! overrides on top of what this crate resolves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use devlink_api::{AuthMode, DeviceConfig, Protocol, Verify};

/// Prefix for environment overrides (`DEVLINK_HOST`, `DEVLINK_VERIFY_SSL`, ...).
pub const ENV_PREFIX: &str = "DEVLINK_";

/// Profile used when neither the caller nor the file names one.
pub const DEFAULT_PROFILE: &str = "default";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no host configured for profile '{profile}'")]
    NoHost { profile: String },

    #[error("profile '{profile}' not found in {}", path.display())]
    UnknownProfile { profile: String, path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Device(#[from] devlink_api::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    /// Named device profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, DeviceSettings>,
}

impl Config {
    /// Name of the profile to use: the requested one, else the file's
    /// `default_profile`, else `"default"`.
    pub fn profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| DEFAULT_PROFILE.into())
    }
}

/// `verify_ssl = true | false | "/path/to/ca.pem"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum VerifySetting {
    Enabled(bool),
    CaBundle(PathBuf),
}

impl From<VerifySetting> for Verify {
    fn from(setting: VerifySetting) -> Self {
        match setting {
            VerifySetting::Enabled(enabled) => Self::from(enabled),
            VerifySetting::CaBundle(path) => Self::CaBundle(path),
        }
    }
}

/// One device, as written in a profile or the environment.
///
/// Everything is optional here; defaults are applied by
/// [`into_device_config`](Self::into_device_config).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DeviceSettings {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// `http` or `https` (default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,

    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext password. Prefer `DEVLINK_PASSWORD`.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_mode: Option<AuthMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_ssl: Option<VerifySetting>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_fingerprint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<PathBuf>,

    /// Seconds; fractions allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<f64>,

    /// Seconds; fractions allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_connections: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_maxsize: Option<usize>,
}

impl DeviceSettings {
    /// Validate and build the runtime configuration.
    ///
    /// `profile` only appears in error messages.
    pub fn into_device_config(self, profile: &str) -> Result<DeviceConfig, ConfigError> {
        let host = self
            .host
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::NoHost {
                profile: profile.into(),
            })?;

        let mut builder = DeviceConfig::builder(host, self.protocol.unwrap_or(Protocol::Https));
        if let Some(port) = self.port {
            builder = builder.port(port);
        }

        match (self.username, self.password) {
            (Some(username), password) => {
                builder =
                    builder.credentials(username, SecretString::from(password.unwrap_or_default()));
            }
            (None, Some(_)) => {
                return Err(ConfigError::Validation {
                    field: "password".into(),
                    reason: "set without a username".into(),
                });
            }
            (None, None) => {}
        }

        if let Some(mode) = self.auth_mode {
            builder = builder.auth_mode(mode);
        }
        if let Some(verify) = self.verify_ssl {
            builder = builder.verify(verify);
        }
        if let Some(pin) = self.pinned_fingerprint {
            builder = builder.pinned_fingerprint(pin);
        }
        if let Some(cert) = self.client_cert_path {
            builder = builder.client_cert_path(cert);
        }
        if let Some(key) = self.client_key_path {
            builder = builder.client_key_path(key);
        }
        if let Some(secs) = self.connect_timeout {
            builder = builder.connect_timeout(seconds("connect_timeout", secs)?);
        }
        if let Some(secs) = self.read_timeout {
            builder = builder.read_timeout(seconds("read_timeout", secs)?);
        }
        if let Some(count) = self.pool_connections {
            builder = builder.pool_connections(count);
        }
        if let Some(size) = self.pool_maxsize {
            builder = builder.pool_maxsize(size);
        }

        Ok(builder.build()?)
    }
}

fn seconds(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("{secs} is not a valid number of seconds: {e}"),
    })
}

/// Accept strings, but also bare numbers and booleans, as text. Env
/// values like `DEVLINK_PASSWORD=1234` arrive as integers.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Text(s) => s,
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "devlink", "devlink").map_or_else(
        || PathBuf::from(".devlink").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the whole file. A missing file yields an empty config.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .extract()?;
    Ok(config)
}

/// Resolve one profile: file values first, then `DEVLINK_*` overrides.
///
/// Returns the profile name actually used alongside its settings. A
/// profile named explicitly must exist in the file; the implicit default
/// may be absent, in which case only the environment contributes.
pub fn load_profile(
    path: &Path,
    requested: Option<&str>,
) -> Result<(String, DeviceSettings), ConfigError> {
    let file = load_config(path)?;
    let name = file.profile_name(requested);
    if requested.is_some() && !file.profiles.contains_key(&name) {
        return Err(ConfigError::UnknownProfile {
            profile: name,
            path: path.to_path_buf(),
        });
    }

    let profile = Figment::from(Toml::file(path)).focus(&format!("profiles.{name}"));
    let settings: DeviceSettings = Figment::new()
        .merge(Serialized::defaults(DeviceSettings::default()))
        .merge(profile)
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["profile", "config"]))
        .extract()?;
    Ok((name, settings))
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
