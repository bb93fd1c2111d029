use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::{info, instrument};

use crate::cli::OutputFormat;
use crate::error::InteractionError;
use crate::hw::Device;
use crate::reader::{ConnectivitySession, DiscoveryStatus, StopReason};
use crate::terminal::TerminalClient;

use super::ui::{DeviceTableView, DiscoverySummaryView, Painter, Spinner};

/// Arguments for the `discover` command.
#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Stop once this many readers have been found.
    #[arg(long)]
    limit: Option<usize>,
}

impl DiscoverArgs {
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }
}

/// JSON shape of a finished discovery run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryReport<'a> {
    devices: &'a [Device],
    stop_reason: Option<String>,
}

/// Executes the `discover` command.
#[instrument(skip(session, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    session: &ConnectivitySession,
    args: &DiscoverArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let spinner = Spinner::new(
        terminal_client.stderr_is_terminal() && output_format == OutputFormat::Pretty,
    );
    spinner
        .with_spinner("Discovering readers...", || async {
            session.start_discovery().await;
            wait_for_discovery(session, args.limit).await
        })
        .await?;
    session.cancel_discovery().await;

    let devices = session.registry().snapshot();
    let stop_reason = last_stop(&session.discovery_status().borrow());

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{}",
                DiscoverySummaryView::new(devices.len(), stop_reason.as_ref(), &painter)
            )?;
            if !devices.is_empty() {
                writeln!(out, "{}", DeviceTableView::new(&devices, &painter))?;
            }
        }
        OutputFormat::Json => {
            let report = DiscoveryReport {
                devices: &devices,
                stop_reason: stop_reason.as_ref().map(ToString::to_string),
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

async fn wait_for_discovery(
    session: &ConnectivitySession,
    limit: Option<usize>,
) -> Result<(), InteractionError> {
    let mut status = session.discovery_status();
    let mut devices = session.devices();

    loop {
        if !status.borrow_and_update().is_discovering() {
            return Ok(());
        }
        if limit.is_some_and(|limit| devices.borrow_and_update().len() >= limit) {
            info!(?limit, "device limit reached");
            return Ok(());
        }

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|source| InteractionError::CtrlC { source })?;
                info!("discovery interrupted");
                return Ok(());
            }
            _changed = status.changed() => {}
            _changed = devices.changed() => {}
        }
    }
}

fn last_stop(status: &DiscoveryStatus) -> Option<StopReason> {
    match status {
        DiscoveryStatus::Idle { last_stop } => last_stop.clone(),
        DiscoveryStatus::Discovering => None,
    }
}
