use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Prefix for environment overrides, e.g. `RELAYGATE__RELAY__MAX_RETRIES=3`.
pub const ENV_PREFIX: &str = "RELAYGATE";

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
///
/// The file is optional; environment overrides and the `PORT` variable are
/// applied on top of it.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let mut server_config = load_layers(config_path, false)?;
    apply_port_override(&mut server_config, std::env::var("PORT").ok().as_deref())?;
    Ok(server_config)
}

/// Load configuration from the file only, failing if it does not exist
/// (used for the validate command)
pub async fn load_config_unchecked(config_path: &str) -> Result<ServerConfig> {
    load_layers(config_path, true)
}

fn load_layers(config_path: &str, file_required: bool) -> Result<ServerConfig> {
    let path = Path::new(config_path);

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let mut builder = Config::builder().add_source(
        File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        )
        .required(file_required),
    );
    if !file_required {
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
    }

    let settings = builder
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))
}

/// Apply the legacy `PORT` variable, which replaces the listen port.
pub fn apply_port_override(config: &mut ServerConfig, port: Option<&str>) -> Result<()> {
    let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("Invalid PORT value: {port}"))?;
    config.override_port(port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:8443"

[tls]
cert_path = "/etc/relaygate/cert.pem"
key_path = "/etc/relaygate/key.pem"

[relay]
max_retries = 3
retry_delay_ms = 250
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config_unchecked(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8443");
        assert_eq!(config.tls.cert_path, "/etc/relaygate/cert.pem");
        assert_eq!(config.relay.max_retries, 3);
        assert_eq!(config.relay.retry_delay_ms, 250);
        // Untouched sections keep their defaults
        assert_eq!(config.relay.connect_timeout_ms, 10_000);
        assert_eq!(config.forward.user_agent, "BotNodeSDK/0.0.1");
    }

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
tls:
  enabled: false
forward:
  timeout_secs: 5
logging:
  json: false
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config_unchecked(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(!config.tls.enabled);
        assert_eq!(config.forward.timeout_secs, 5);
        assert!(!config.logging.json);
    }

    #[tokio::test]
    async fn test_missing_file_is_required_for_unchecked_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(
            load_config_unchecked(path.to_str().unwrap())
                .await
                .is_err()
        );
    }

    #[test]
    fn test_port_override() {
        let mut config = ServerConfig::default();
        apply_port_override(&mut config, Some("8080")).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");

        apply_port_override(&mut config, None).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");

        let invalid = apply_port_override(&mut config, Some("not-a-port"));
        assert!(invalid.is_err());
    }
}
