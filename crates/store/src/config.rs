use serde::Deserialize;

use crate::ConfigError;

/// Configuration for a [`MemoryStore`](crate::MemoryStore).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
	/// Number of propose/compare rounds a transaction gets before it reports "not committed".
	pub max_transaction_attempts: u32,
	/// Deliver the current value (or the current children) right after a subscription is made.
	pub deliver_initial_snapshots: bool,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			max_transaction_attempts: 25,
			deliver_initial_snapshots: true,
		}
	}
}

impl StoreConfig {
	/// Parses a configuration from TOML text. Missing fields take their defaults.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.max_transaction_attempts == 0 {
			return Err(ConfigError::Invalid("max-transaction-attempts must be > 0".into()));
		}
		Ok(())
	}
}
