use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::{info, instrument};

use crate::cli::OutputFormat;
use crate::error::{CliConfigError, InteractionError};
use crate::inventory::{ExpectedItem, load_inventory};
use crate::reader::ConnectivitySession;
use crate::terminal::TerminalClient;

use super::ui::{ConnectedView, Painter, ProgressView, SessionResultView, Spinner};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Reader id or address to connect to.
    #[arg(long)]
    address: String,
    /// JSON file listing expected items as `[{"name": ..., "identifier": ...}]`.
    #[arg(long, conflicts_with = "item")]
    items: Option<PathBuf>,
    /// One expected item as `NAME=IDENTIFIER`; repeatable.
    #[arg(long = "item", value_name = "NAME=IDENTIFIER")]
    item: Vec<ExpectedItem>,
}

impl ScanArgs {
    /// Creates scan arguments from inline expected items.
    #[must_use]
    pub fn new(address: impl Into<String>, items: Vec<ExpectedItem>) -> Self {
        Self {
            address: address.into(),
            items: None,
            item: items,
        }
    }

    /// Creates scan arguments that read expected items from a JSON file.
    #[must_use]
    pub fn from_file(address: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            items: Some(path.into()),
            item: Vec::new(),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn expected_items(&self) -> Result<Vec<ExpectedItem>> {
        if let Some(path) = &self.items {
            return Ok(load_inventory(path)?);
        }
        if self.item.is_empty() {
            return Err(CliConfigError::MissingInventory.into());
        }
        Ok(self.item.clone())
    }
}

/// Executes the `scan` command.
#[instrument(skip(session, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    session: &ConnectivitySession,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let expected = args.expected_items()?;
    let pretty = output_format == OutputFormat::Pretty;
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let spinner = Spinner::new(terminal_client.stderr_is_terminal() && pretty);

    let device = spinner
        .with_spinner(&format!("Connecting to {}...", args.address()), || {
            session.connect(args.address())
        })
        .await?;
    if pretty {
        writeln!(out, "{}", ConnectedView::new(&device, expected.len(), &painter))?;
    }

    let handle = match session.start_session(expected) {
        Ok(handle) => handle,
        Err(error) => {
            session.disconnect().await;
            return Err(error.into());
        }
    };
    let mut progress = handle.progress();
    let interrupter = handle.interrupter();
    let finished = handle.finished();
    tokio::pin!(finished);
    let mut progress_open = true;

    let result = loop {
        tokio::select! {
            result = &mut finished => break result?,
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|source| InteractionError::CtrlC { source })?;
                info!("scan interrupted by operator");
                interrupter.cancel();
            }
            changed = progress.changed(), if progress_open => {
                if changed.is_err() {
                    progress_open = false;
                    continue;
                }
                let current = *progress.borrow_and_update();
                if pretty {
                    writeln!(out, "{}", ProgressView::new(current, &painter))?;
                }
            }
        }
    };
    session.settle().await;

    match output_format {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(out, "{}", SessionResultView::new(&result, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &result)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn inline_items_are_used_when_no_file_is_given() {
        let args = ScanArgs::new("dev-1", vec![ExpectedItem::new("Laptop", "A1")]);

        assert_eq!(
            vec![ExpectedItem::new("Laptop", "A1")],
            args.expected_items().expect("items")
        );
    }

    #[test]
    fn missing_inventory_is_rejected() {
        let error = ScanArgs::new("dev-1", Vec::new())
            .expected_items()
            .expect_err("no items should fail");

        assert_matches!(
            error.downcast_ref::<CliConfigError>(),
            Some(CliConfigError::MissingInventory)
        );
    }
}
