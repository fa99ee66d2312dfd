//! Meshnet / VPN device API
//!
//! The object and free functions exported to the host: a [`Telio`] device,
//! key helpers, feature and meshnet config parsing, build identification
//! and the process-wide logger.

pub mod callbacks;
pub mod device;
pub mod error;
pub mod exports;
pub mod keys;
pub mod types;

use std::sync::Arc;

pub use callbacks::{
    ForeignEventCb, ForeignLoggerCb, ForeignProtectCb, TelioEventCb, TelioLoggerCb,
    TelioProtectCb,
};
pub use device::{DataPlane, DetachedDataPlane, Telio, TunnelSpec};
pub use error::{TelioError, TelioResult};
pub use keys::{KeyError, PublicKey, SecretKey};
pub use types::*;

pub fn generate_secret_key() -> SecretKey {
    SecretKey::generate()
}

pub fn generate_public_key(secret_key: SecretKey) -> PublicKey {
    secret_key.public()
}

/// Release tag, `TELIO_VERSION_TAG` at build time when set.
pub fn get_version_tag() -> String {
    option_env!("TELIO_VERSION_TAG")
        .map(str::to_string)
        .unwrap_or_else(|| format!("v{}", env!("CARGO_PKG_VERSION")))
}

/// Source revision, `TELIO_COMMIT_SHA` at build time when set.
pub fn get_commit_sha() -> String {
    option_env!("TELIO_COMMIT_SHA").unwrap_or("dev").to_string()
}

pub fn get_default_adapter() -> TelioAdapterType {
    if cfg!(target_os = "windows") {
        TelioAdapterType::WindowsNativeTun
    } else {
        TelioAdapterType::BoringTun
    }
}

pub fn get_default_feature_config() -> Features {
    Features::default()
}

/// Parse feature JSON; missing fields take their defaults.
pub fn deserialize_feature_config(fstr: &str) -> TelioResult<Features> {
    serde_json::from_str(fstr).map_err(|e| {
        tracing::debug!(error = %e, "rejected feature config");
        TelioError::BadConfig
    })
}

pub fn deserialize_meshnet_config(cfg_str: &str) -> TelioResult<Config> {
    serde_json::from_str(cfg_str).map_err(|e| {
        tracing::debug!(error = %e, "rejected meshnet config");
        TelioError::BadConfig
    })
}

pub fn set_global_logger(log_level: TelioLogLevel, logger: Arc<dyn TelioLoggerCb>) {
    crate::logging::set_global_logger(log_level, logger);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_tag() {
        assert!(get_version_tag().starts_with('v') || option_env!("TELIO_VERSION_TAG").is_some());
        assert!(!get_commit_sha().is_empty());
    }

    #[test]
    fn test_public_key_derivation() {
        let secret = generate_secret_key();
        assert_eq!(generate_public_key(secret), secret.public());
    }

    #[test]
    fn test_feature_config_parsing() {
        assert_eq!(deserialize_feature_config("{}").unwrap(), get_default_feature_config());
        assert_eq!(deserialize_feature_config("{"), Err(TelioError::BadConfig));
        assert_eq!(
            deserialize_feature_config(r#"{"hide_ips": "yes"}"#),
            Err(TelioError::BadConfig)
        );
    }

    #[test]
    fn test_meshnet_config_requires_this() {
        assert_eq!(deserialize_meshnet_config("{}"), Err(TelioError::BadConfig));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_default_adapter() {
        assert_eq!(get_default_adapter(), TelioAdapterType::BoringTun);
        assert!(get_default_adapter().is_supported());
    }
}
