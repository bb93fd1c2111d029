use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::discover::DiscoverArgs;
use crate::cli::scan::ScanArgs;
use crate::config::ScanConfig;
use crate::error::{CliConfigError, ConfigError, FixtureError};
use crate::hw::{FakeBackendConfig, ReadScript, ScanFixture};

/// Command-line options for the handheld RFID reader tool.
#[derive(Debug, Parser)]
#[command(
    name = "tagscan",
    about = "Discover handheld RFID readers and reconcile tag reads against an expected inventory."
)]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Config file; defaults to `scan-config.json` in the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Discovery watchdog (e.g. `30s`, `2m`).
    #[arg(long, global = true, value_parser = parse_duration)]
    discovery_timeout: Option<Duration>,
    /// Connect attempt timeout (e.g. `20s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    connect_timeout: Option<Duration>,
    /// Only list readers whose name starts with this prefix.
    #[arg(long, global = true)]
    name_filter: Option<String>,
    /// Uses the fake radio backend with fixture-driven discovery and reads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `id|name|address;...` (`-` for no name).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake reader lines separated by `;`; prefix with `!` for an error event.
    #[arg(long, global = true, requires = "fake")]
    fake_reads: Option<ReadScript>,
    /// Makes the fake scan fail with this reason after the fixture is played.
    #[arg(long, global = true, requires = "fake")]
    fake_scan_failure: Option<String>,
    /// Delay before each fake device is found (e.g. `250ms`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    /// Delay before each fake reader line.
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_read_interval: Option<Duration>,
    /// Delay before a fake connect completes.
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_connect_delay: Option<Duration>,
    /// Makes every fake connect attempt fail.
    #[arg(long, global = true, requires = "fake")]
    fake_connect_failure: bool,
    /// Drops the fake link after the last scripted read.
    #[arg(long, global = true, requires = "fake")]
    fake_drop: bool,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use tagscan::{Args, Command, DiscoverArgs};
    ///
    /// let discover = Args::new(Command::Discover(DiscoverArgs::new(Some(1))));
    /// let _ = discover;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            config: None,
            discovery_timeout: None,
            connect_timeout: None,
            name_filter: None,
            fake: false,
            fake_scan: None,
            fake_reads: None,
            fake_scan_failure: None,
            fake_discovery_delay: None,
            fake_read_interval: None,
            fake_connect_delay: None,
            fake_connect_failure: false,
            fake_drop: false,
            command,
        }
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            reads,
            scan_failure,
            discovery_delay,
            read_interval,
            connect_delay,
            connect_failure,
            drop_after_reads,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_reads = reads;
        self.fake_scan_failure = scan_failure;
        self.fake_discovery_delay = Some(discovery_delay);
        self.fake_read_interval = Some(read_interval);
        self.fake_connect_delay = Some(connect_delay);
        self.fake_connect_failure = connect_failure;
        self.fake_drop = drop_after_reads;
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Resolves the scan config: defaults, then the config file, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn scan_config(&self) -> Result<ScanConfig, ConfigError> {
        Ok(ScanConfig::load(self.config.as_deref())?.with_overrides(
            self.discovery_timeout,
            self.connect_timeout,
            self.name_filter.clone(),
        ))
    }

    /// Splits parsed CLI arguments into command and optional fake-radio settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_reads,
            fake_scan_failure,
            fake_discovery_delay,
            fake_read_interval,
            fake_connect_delay,
            fake_connect_failure,
            fake_drop,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                reads: fake_reads,
                scan_failure: fake_scan_failure,
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
                read_interval: fake_read_interval.unwrap_or(Duration::ZERO),
                connect_delay: fake_connect_delay.unwrap_or(Duration::ZERO),
                connect_failure: fake_connect_failure,
                drop_after_reads: fake_drop,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake radio arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(name = scan, with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    reads: Option<ReadScript>,
    #[builder(into)]
    scan_failure: Option<String>,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default)]
    read_interval: Duration,
    #[builder(default)]
    connect_delay: Duration,
    #[builder(default)]
    connect_failure: bool,
    #[builder(default)]
    drop_after_reads: bool,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            reads,
            scan_failure,
            discovery_delay,
            read_interval,
            connect_delay,
            connect_failure,
            drop_after_reads,
        } = self;

        FakeBackendConfig::builder()
            .scan_fixture(scan_fixture)
            .maybe_reads(reads)
            .maybe_scan_failure(scan_failure)
            .discovery_delay(discovery_delay)
            .read_interval(read_interval)
            .connect_delay(connect_delay)
            .connect_failure(connect_failure)
            .drop_after_reads(drop_after_reads)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover nearby readers until the watchdog expires, the limit is reached, or Ctrl+C.
    Discover(DiscoverArgs),
    /// Connect to a reader and tick off expected items as their tags are read.
    Scan(ScanArgs),
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Result rendering selected by `--output`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
