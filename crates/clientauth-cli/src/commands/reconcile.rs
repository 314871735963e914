use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clientauth::{
    ClientAuthConfig, ClientCredentialsResource, CredentialsError, HttpManagementApi,
    ReconcileContext,
};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::cli::OutputFormat;
use crate::desired;
use crate::output::{
    print_error, print_plan, print_state, print_success, print_teardown, print_warning,
};

fn resource(settings: &ClientAuthConfig) -> Result<ClientCredentialsResource<HttpManagementApi>> {
    let api = HttpManagementApi::new(&settings.management)
        .context("Failed to build management API client")?;
    Ok(ClientCredentialsResource::new(api))
}

fn context(
    settings: &ClientAuthConfig,
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> ReconcileContext {
    let ctx = ReconcileContext::new()
        .with_cancellation(cancel)
        .with_options(settings.reconcile.options());
    match timeout.or(settings.reconcile.deadline) {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx,
    }
}

pub async fn plan(
    settings: &ClientAuthConfig,
    file: &Path,
    cancel: CancellationToken,
    format: OutputFormat,
) -> Result<()> {
    let configs = desired::load(file)?;
    let resource = resource(settings)?;
    let ctx = context(settings, cancel, None);

    for config in &configs {
        match resource.plan(&ctx, config).await? {
            Some(plan) => print_plan(&plan, format),
            None => print_warning(&format!(
                "Client {} not found, skipping",
                config.client_id.cyan()
            )),
        }
    }
    Ok(())
}

pub async fn apply(
    settings: &ClientAuthConfig,
    file: &Path,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    format: OutputFormat,
) -> Result<()> {
    let configs = desired::load(file)?;
    let resource = resource(settings)?;
    let ctx = context(settings, cancel, timeout);

    let mut failed = 0usize;
    for config in &configs {
        match resource.update(&ctx, config).await {
            Ok(Some(state)) => {
                print_success(&format!("Reconciled {}", config.client_id.cyan()));
                print_state(&state, format);
            }
            Ok(None) => {
                print_warning(&format!(
                    "Client {} not found, skipping",
                    config.client_id.cyan()
                ));
            }
            Err(e @ CredentialsError::Cancelled { .. }) => return Err(e.into()),
            Err(e) => {
                tracing::error!(client_id = %config.client_id, category = %e.category(), "reconcile failed");
                print_error(&format!("{}: {e}", config.client_id));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} client(s) failed; re-run to converge", configs.len());
    }
    Ok(())
}

pub async fn show(
    settings: &ClientAuthConfig,
    client_id: &str,
    cancel: CancellationToken,
    format: OutputFormat,
) -> Result<()> {
    let resource = resource(settings)?;
    let ctx = context(settings, cancel, None);
    match resource.read(&ctx, client_id).await? {
        Some(state) => print_state(&state, format),
        None => anyhow::bail!("Client {client_id} not found"),
    }
    Ok(())
}

pub async fn teardown(
    settings: &ClientAuthConfig,
    client_id: &str,
    yes: bool,
    cancel: CancellationToken,
    format: OutputFormat,
) -> Result<()> {
    if !yes && !confirm(client_id)? {
        println!("Aborted");
        return Ok(());
    }
    let resource = resource(settings)?;
    let ctx = context(settings, cancel, None);
    let outcome = resource.delete(&ctx, client_id).await?;
    print_teardown(client_id, &outcome, format);
    Ok(())
}

fn confirm(client_id: &str) -> Result<bool> {
    print!(
        "Delete all credentials of {} and reset its method? [y/N] ",
        client_id.cyan()
    );
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
