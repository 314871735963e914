//! Desired-state files.
//!
//! A file holds either one client configuration or a `clients` list:
//!
//! ```toml
//! [[clients]]
//! client_id = "app_1"
//! authentication_method = "private_key_jwt"
//!
//! [[clients.credentials]]
//! credential_type = "public_key"
//! pem = "-----BEGIN PUBLIC KEY-----\n..."
//! ```

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use clientauth::ClientCredentialsConfig;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum DesiredFile {
    Many { clients: Vec<ClientCredentialsConfig> },
    One(ClientCredentialsConfig),
}

impl DesiredFile {
    fn into_configs(self) -> Vec<ClientCredentialsConfig> {
        match self {
            Self::Many { clients } => clients,
            Self::One(config) => vec![config],
        }
    }
}

/// Loads client configurations from `path`; `-` reads JSON from stdin.
pub fn load(path: &Path) -> Result<Vec<ClientCredentialsConfig>> {
    if path.as_os_str() == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read stdin")?;
        return parse_json(&content);
    }

    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let configs = if is_toml {
        parse_toml(&content)
    } else {
        parse_json(&content)
    };
    configs.with_context(|| format!("Invalid desired-state file {}", path.display()))
}

fn parse_json(content: &str) -> Result<Vec<ClientCredentialsConfig>> {
    let file: DesiredFile = serde_json::from_str(content)?;
    non_empty(file.into_configs())
}

fn parse_toml(content: &str) -> Result<Vec<ClientCredentialsConfig>> {
    let file: DesiredFile = toml::from_str(content)?;
    non_empty(file.into_configs())
}

fn non_empty(configs: Vec<ClientCredentialsConfig>) -> Result<Vec<ClientCredentialsConfig>> {
    if configs.is_empty() {
        anyhow::bail!("no clients declared");
    }
    Ok(configs)
}
