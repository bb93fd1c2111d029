use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::config::ScanConfig;
use crate::hw::{FakeRadio, Radio, RadioBackend, radio_from_backend};
use crate::reader::ConnectivitySession;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a radio backed by the host's BLE adapters.
///
/// # Errors
///
/// Returns an error if the BLE manager cannot be created.
pub async fn real_radio() -> Result<Arc<dyn Radio>> {
    Ok(radio_from_backend(RadioBackend::Real).await?)
}

/// Creates a radio backed by fake fixtures.
#[must_use]
pub fn fake_radio(fake_args: FakeArgs) -> Arc<FakeRadio> {
    Arc::new(FakeRadio::new(fake_args.into_backend_config()))
}

/// Creates the fake radio when fake settings are present, the real one otherwise.
///
/// # Errors
///
/// Returns an error if the real BLE manager cannot be created.
pub async fn radio_for(maybe_fake_args: Option<FakeArgs>) -> Result<Arc<dyn Radio>> {
    let backend = match maybe_fake_args {
        Some(fake_args) => RadioBackend::Fake(fake_args.into_backend_config()),
        None => RadioBackend::Real,
    };
    Ok(radio_from_backend(backend).await?)
}

/// Runs the CLI command against `radio`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = tagscan::Args::try_parse_from([
///     "tagscan",
///     "--fake",
///     "--fake-scan",
///     "dev-1|RFD40|AA:BB:CC:DD:EE:01",
///     "discover",
///     "--limit",
///     "1",
/// ])?;
/// let config = args.scan_config()?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let radio = tagscan::radio_for(maybe_fake_args).await?;
/// let mut out = Vec::new();
/// tagscan::run(command, &mut out, radio, config).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the reader interaction
/// fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    radio: Arc<dyn Radio>,
    config: ScanConfig,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        radio,
        config,
        None,
        None,
    )
    .await
}

/// Runs the CLI command with injected clients and explicit output settings.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the reader interaction
/// fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, radio, config),
    level = "info",
    fields(command = %command_name(&command), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    radio: Arc<dyn Radio>,
    config: ScanConfig,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "tagscan",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let output_format = output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let session = ConnectivitySession::builder()
        .radio(radio)
        .discovery_timeout(config.discovery_timeout())
        .connect_timeout(config.connect_timeout())
        .maybe_name_filter(config.name_filter().map(str::to_string))
        .build();

    match command {
        Command::Discover(args) => {
            crate::cli::discover::run(&session, &args, out, terminal_client, output_format).await
        }
        Command::Scan(args) => {
            crate::cli::scan::run(&session, &args, out, terminal_client, output_format).await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Discover(_args) => "discover",
        Command::Scan(_args) => "scan",
    }
}
