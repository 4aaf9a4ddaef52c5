//! Configuration management for the buffer orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub stellar: StellarConfig,
    pub wallet_provider: WalletProviderConfig,
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Attempts when polling the chain for a submitted transaction.
    pub chain_poll_attempts: u32,
    /// Fixed spacing between chain poll attempts, in milliseconds.
    pub chain_poll_interval_ms: u64,
    /// Attempts when waiting for a newly created vault to be observably live.
    pub vault_poll_attempts: u32,
    pub vault_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StellarConfig {
    /// Transaction signing happens client-side, so only the RPC endpoint
    /// is needed here; the network passphrase lives with the signer.
    pub soroban_rpc_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    pub factory_url: String,
    /// Asset the vault holds (contract address of the underlying token).
    pub asset_address: String,
    /// Yield strategy the vault allocates deposits to.
    pub strategy_address: String,
    /// System-default buffer contract used when a user has no vault yet.
    pub default_buffer_contract: Option<String>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL must be configured");
        }
        if self.stellar.soroban_rpc_url.is_empty() {
            anyhow::bail!("Soroban RPC URL must be configured");
        }
        if self.wallet_provider.base_url.is_empty() {
            anyhow::bail!("Wallet provider base URL must be configured");
        }
        if self.vault.factory_url.is_empty() {
            anyhow::bail!("Vault factory URL must be configured");
        }
        if self.orchestrator.chain_poll_attempts == 0 {
            anyhow::bail!("Chain poll attempts must be at least 1");
        }
        if self.vault.default_buffer_contract.is_none() {
            tracing::warn!(
                "No default buffer contract configured - deposits require a per-user vault"
            );
        }
        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(&input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_full_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[orchestrator]
chain_poll_attempts = 10
chain_poll_interval_ms = 2000
vault_poll_attempts = 15
vault_poll_interval_ms = 2000

[database]
url = "postgres://localhost/buffer"
max_connections = 10
min_connections = 1

[api]
host = "0.0.0.0"
port = 8080

[metrics]
enabled = true
port = 9090

[stellar]
soroban_rpc_url = "https://soroban-testnet.stellar.org"

[wallet_provider]
base_url = "https://custody.example.com"

[vault]
factory_url = "https://factory.example.com"
asset_address = "CASSET"
strategy_address = "CSTRAT"
default_buffer_contract = "CBUFFER"
"#
        )
        .unwrap();

        let settings = Settings::load_from(&file.path().to_path_buf()).unwrap();
        assert_eq!(settings.orchestrator.chain_poll_attempts, 10);
        assert_eq!(settings.orchestrator.chain_poll_interval_ms, 2000);
        assert_eq!(
            settings.vault.default_buffer_contract.as_deref(),
            Some("CBUFFER")
        );
        assert!(settings.wallet_provider.api_key.is_none());
    }

    #[test]
    fn test_zero_poll_attempts_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[orchestrator]
chain_poll_attempts = 0
chain_poll_interval_ms = 2000
vault_poll_attempts = 15
vault_poll_interval_ms = 2000

[database]
url = "postgres://localhost/buffer"
max_connections = 10
min_connections = 1

[api]
host = "0.0.0.0"
port = 8080

[metrics]
enabled = false
port = 9090

[stellar]
soroban_rpc_url = "https://soroban-testnet.stellar.org"

[wallet_provider]
base_url = "https://custody.example.com"

[vault]
factory_url = "https://factory.example.com"
asset_address = "CASSET"
strategy_address = "CSTRAT"
"#
        )
        .unwrap();

        assert!(Settings::load_from(&file.path().to_path_buf()).is_err());
    }
}
