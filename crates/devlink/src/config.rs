//! CLI-specific configuration: flag overrides on top of `devlink-config`.

use devlink_api::DeviceConfig;
use devlink_config::{DeviceSettings, VerifySetting};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Resolve the device to talk to: profile, then environment, then flags.
pub fn resolve_device_config(global: &GlobalOpts) -> Result<DeviceConfig, CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(devlink_config::config_path);
    let (profile, mut settings) = devlink_config::load_profile(&path, global.profile.as_deref())?;
    tracing::debug!(%profile, path = %path.display(), "loaded profile");

    apply_overrides(&mut settings, global);
    if settings.host.is_none() {
        return Err(CliError::NoHost {
            profile,
            path: path.display().to_string(),
        });
    }
    Ok(settings.into_device_config(&profile)?)
}

fn apply_overrides(settings: &mut DeviceSettings, global: &GlobalOpts) {
    if let Some(host) = &global.host {
        settings.host = Some(host.clone());
    }
    if let Some(port) = global.port {
        settings.port = Some(port);
    }
    if let Some(protocol) = global.protocol {
        settings.protocol = Some(protocol.into());
    }
    if let Some(username) = &global.username {
        settings.username = Some(username.clone());
    }
    if let Some(password) = &global.password {
        settings.password = Some(password.clone());
    }
    if let Some(auth) = global.auth {
        settings.auth_mode = Some(auth.into());
    }
    if global.insecure {
        settings.verify_ssl = Some(VerifySetting::Enabled(false));
    }
    if let Some(ca) = &global.ca_cert {
        settings.verify_ssl = Some(VerifySetting::CaBundle(ca.clone()));
    }
    if let Some(pin) = &global.pin {
        settings.pinned_fingerprint = Some(pin.clone());
    }
    if let Some(cert) = &global.client_cert {
        settings.client_cert_path = Some(cert.clone());
    }
    if let Some(key) = &global.client_key {
        settings.client_key_path = Some(key.clone());
    }
    if let Some(timeout) = global.timeout {
        settings.connect_timeout = Some(timeout);
        settings.read_timeout = Some(timeout);
    }
}
