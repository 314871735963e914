use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clientauth::ClientAuthConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfileConfig {
    pub server: Option<String>,
    pub format: Option<String>,
    pub prune: Option<bool>,
}

pub type ConfigFile = HashMap<String, ProfileConfig>;

fn config_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".clientauth");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn credentials_path(profile: &str) -> Result<PathBuf> {
    Ok(config_dir()?.join(format!("credentials.{profile}.json")))
}

fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn load_all() -> Result<ConfigFile> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(ConfigFile::new());
    }
    let content = fs::read_to_string(&path)?;
    let cfg: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(cfg)
}

pub fn load_profile(profile: &str) -> Result<ProfileConfig> {
    let mut all = load_all()?;
    Ok(all.remove(profile).unwrap_or_default())
}

pub fn save_profile(profile: &str, config: &ProfileConfig) -> Result<()> {
    let mut all = load_all()?;
    all.insert(profile.to_string(), config.clone());
    let content = toml::to_string_pretty(&all)?;
    fs::write(config_path()?, content)?;
    Ok(())
}

pub fn resolve_server(cli_server: Option<&str>, profile: &str) -> Result<String> {
    // 1. --server flag / CLIENTAUTH_URL env
    if let Some(s) = cli_server {
        return Ok(s.to_string());
    }
    // 2. config.toml profile
    if let Some(s) = load_profile(profile)?.server {
        return Ok(s);
    }
    // 3. Stored token for this profile
    if let Some(stored) = crate::auth::load_token(profile)? {
        return Ok(stored.server);
    }
    anyhow::bail!(
        "No management API URL configured. Use --server, set CLIENTAUTH_URL, or run: clientauth config set server <url>"
    )
}

pub fn resolve_token(cli_token: Option<&str>, profile: &str) -> Result<Option<String>> {
    if let Some(t) = cli_token {
        return Ok(Some(t.to_string()));
    }
    Ok(crate::auth::load_token(profile)?.map(|stored| stored.token))
}

/// Loads the reconciler settings and applies the connection overrides.
pub fn load_settings(cli: &Cli) -> Result<ClientAuthConfig> {
    let mut settings = match &cli.config {
        Some(path) => read_settings(path)?,
        None => ClientAuthConfig::default(),
    };

    let profile = load_profile(&cli.profile)?;
    if let Some(prune) = profile.prune {
        settings.reconcile.prune_detached_credentials = prune;
    }

    let from_file = (!settings.management.base_url.is_empty())
        .then(|| settings.management.base_url.clone());
    settings.management.base_url =
        resolve_server(cli.server.as_deref().or(from_file.as_deref()), &cli.profile)?;
    if let Some(token) = resolve_token(cli.token.as_deref(), &cli.profile)? {
        settings.management.token = Some(token);
    }

    settings.validate()?;
    tracing::debug!(base_url = %settings.management.base_url, "resolved management API");
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<ClientAuthConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid settings file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_read_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [management]
            base_url = "https://tenant.example.com/api/v2"
            request_timeout = "10s"

            [reconcile]
            prune_detached_credentials = true
            "#
        )
        .unwrap();

        let settings = read_settings(file.path()).unwrap();
        assert_eq!(settings.management.request_timeout, Duration::from_secs(10));
        assert!(settings.reconcile.prune_detached_credentials);
    }

    #[test]
    fn test_profile_roundtrip_through_toml() {
        let mut all = ConfigFile::new();
        all.insert(
            "staging".to_string(),
            ProfileConfig {
                server: Some("https://staging.example.com/api/v2".to_string()),
                format: None,
                prune: Some(false),
            },
        );
        let text = toml::to_string_pretty(&all).unwrap();
        let parsed: ConfigFile = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed["staging"].server.as_deref(),
            Some("https://staging.example.com/api/v2")
        );
    }
}
