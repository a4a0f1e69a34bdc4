use serde::Deserialize;

use crate::Result;

/// Configuration injected into a [`Service`](crate::Service) and every handle it builds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceConfig {
	/// Label recorded on log lines emitted by handles of this service.
	pub name: String,
	/// Identifies this client in logs and to collaborators that need an agent string.
	pub client_agent: String,
	/// Emit `"change"` for empty record snapshots instead of suppressing them.
	pub emit_empty_records: bool,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			name: "tether".into(),
			client_agent: "unknown".into(),
			emit_empty_records: false,
		}
	}
}

impl ServiceConfig {
	/// Parses a configuration from TOML text. Missing fields take their defaults.
	pub fn from_toml_str(text: &str) -> Result<Self> {
		Ok(toml::from_str(text)?)
	}
}
