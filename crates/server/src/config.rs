use std::{env, fs, path::Path};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "RUNEKEYS_CONFIG";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
	pub server: ServerConfig,
	pub public_key: PublicKeyConfig,
	pub email: EmailConfig,
	pub i18n: I18nConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
	/// Attach a strict `Content-Security-Policy` header to every response.
	pub csp: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublicKeyConfig {
	/// Keys with no verified user id may be purged after this many days.
	/// `0` disables the sweep.
	pub purge_time_in_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
	/// SMTP relay host. An empty host selects the logging stub transport,
	/// which records mail instead of delivering it.
	pub host: String,
	pub port: u16,
	pub user: Option<String>,
	pub pass: Option<String>,
	/// Sender mailbox, e.g. `Runekeys <noreply@example.com>`.
	pub sender: String,
	/// Use implicit TLS towards the relay.
	pub tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct I18nConfig {
	pub locales: Vec<String>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 8888,
			csp: true,
		}
	}
}

impl Default for PublicKeyConfig {
	fn default() -> Self {
		Self {
			purge_time_in_days: 30,
		}
	}
}

impl Default for EmailConfig {
	fn default() -> Self {
		Self {
			host: String::new(),
			port: 465,
			user: None,
			pass: None,
			sender: "Runekeys <noreply@localhost>".to_string(),
			tls: true,
		}
	}
}

impl Default for I18nConfig {
	fn default() -> Self {
		Self {
			locales: vec!["en".to_string(), "de".to_string()],
		}
	}
}

impl Config {
	/// Loads the configuration named by `RUNEKEYS_CONFIG`, falling back to
	/// `config.toml`, falling back to the built-in defaults when neither
	/// exists.
	pub fn load() -> Result<Self> {
		let path = env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
		if !Path::new(&path).exists() {
			tracing::info!(%path, "no configuration file, using defaults");
			return Ok(Self::default());
		}
		Self::from_file(&path)
	}

	pub fn from_file(path: &str) -> Result<Self> {
		let raw = fs::read_to_string(path).map_err(|err| Error::Other(err.into()))?;
		toml::from_str(&raw).map_err(|err| Error::Other(err.into()))
	}
}
