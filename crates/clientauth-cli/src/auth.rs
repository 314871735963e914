use std::fs;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::credentials_path;

/// Management API token stored per profile.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredToken {
    pub server: String,
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
}

impl StoredToken {
    pub fn new(server: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            token: token.into(),
            saved_at: OffsetDateTime::now_utc(),
        }
    }

    /// Token with everything but the last four characters masked.
    pub fn masked(&self) -> String {
        let visible: String = self
            .token
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("****{visible}")
    }
}

pub fn load_token(profile: &str) -> Result<Option<StoredToken>> {
    let path = credentials_path(profile)?;
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let token: StoredToken = serde_json::from_str(&content)?;
    Ok(Some(token))
}

pub fn save_token(profile: &str, token: &StoredToken) -> Result<()> {
    let path = credentials_path(profile)?;
    let content = serde_json::to_string_pretty(token)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn remove_token(profile: &str) -> Result<bool> {
    let path = credentials_path(profile)?;
    if path.exists() {
        fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
