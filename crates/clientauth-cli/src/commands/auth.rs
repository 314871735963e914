use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use colored::Colorize;

use crate::auth::{self, StoredToken};
use crate::cli::LoginArgs;
use crate::output::print_success;

pub fn login(server: &str, args: &LoginArgs, profile: &str) -> Result<()> {
    let token = match &args.token {
        Some(token) => token.clone(),
        None => prompt_token()?,
    };
    if token.trim().is_empty() {
        anyhow::bail!("Token must not be empty");
    }

    let stored = StoredToken::new(server, token.trim());
    auth::save_token(profile, &stored)?;
    print_success(&format!(
        "Saved token {} for {} (profile: {})",
        stored.masked(),
        server.cyan(),
        profile.cyan()
    ));
    Ok(())
}

pub fn logout(profile: &str) -> Result<()> {
    if auth::remove_token(profile)? {
        print_success("Logged out (token removed)");
    } else {
        println!("No token found for profile \"{profile}\"");
    }
    Ok(())
}

fn prompt_token() -> Result<String> {
    print!("Management API token: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read token from stdin")?;
    Ok(line.trim_end().to_string())
}
