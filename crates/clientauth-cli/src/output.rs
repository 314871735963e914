use clientauth::{Credential, CredentialsState, ReconcilePlan, TeardownOutcome};
use colored::Colorize;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use time::format_description::well_known::Rfc3339;

use crate::cli::OutputFormat;

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => print_error(&format!("Failed to render JSON: {e}")),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_state(state: &CredentialsState, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(state),
        OutputFormat::Table => print_state_table(state),
    }
}

pub fn print_plan(plan: &ReconcilePlan, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(plan),
        OutputFormat::Table => {
            let text = plan.to_string();
            for line in text.lines() {
                if let Some(client) = line.strip_prefix("client ") {
                    println!("{} {}", "Client:".cyan(), client.cyan());
                } else if line.trim_start().starts_with("delete")
                    || line.trim_start().starts_with("detach and delete")
                {
                    println!("{}", line.red());
                } else if line.contains(": create") {
                    println!("{}", line.green());
                } else {
                    println!("{line}");
                }
            }
        }
    }
}

pub fn print_teardown(client_id: &str, outcome: &TeardownOutcome, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(outcome),
        OutputFormat::Table => match outcome {
            TeardownOutcome::AlreadyGone => {
                println!("Client {} no longer exists, nothing to tear down", client_id.cyan());
            }
            TeardownOutcome::Reset { method, deleted } => {
                print_success(&format!(
                    "Reset {} to {} ({} credential(s) deleted)",
                    client_id.cyan(),
                    method,
                    deleted.len()
                ));
                for id in deleted {
                    println!("  {} {id}", "deleted".red());
                }
            }
        },
    }
}

fn print_state_table(state: &CredentialsState) {
    println!("{} {}", "Client:".cyan(), state.client_id.cyan());
    let method = state
        .method()
        .map_or_else(|| "(unmanaged)".to_string(), |m| m.to_string());
    println!("{} {}", "Method:".cyan(), method);

    if let Some(binding) = &state.authentication_method
        && !binding.credentials().is_empty()
    {
        println!("{}", credential_table(binding.credentials()));
    }

    if let Some(sro) = &state.signed_request_object {
        println!(
            "{} required = {}",
            "Signed request object:".cyan(),
            sro.required
        );
        if !sro.credentials.is_empty() {
            println!("{}", credential_table(&sro.credentials));
        }
    }
}

fn credential_table(credentials: &[Credential]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["ID", "Name", "Type", "Key / Subject", "Expires"]);
    for c in credentials {
        let identity = c
            .key_id
            .as_deref()
            .or(c.subject_dn.as_deref())
            .or(c.thumbprint_sha256.as_deref())
            .unwrap_or("-");
        let expires = c
            .expires_at
            .and_then(|t| t.format(&Rfc3339).ok())
            .unwrap_or_else(|| "-".to_string());
        builder.push_record([
            c.id.as_deref().unwrap_or("-"),
            c.name.as_deref().unwrap_or("-"),
            c.credential_type.as_str(),
            identity,
            expires.as_str(),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}
