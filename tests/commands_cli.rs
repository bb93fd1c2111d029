use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::Value;

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl tagscan::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

const READERS: &str =
    "dev-1|RFD40 A|AA:01;dev-2|-|AA:02;dev-3|AA:BB:CC:DD:EE:03|AA:03;dev-4|RFD40 B|AA:04";

async fn run_with_parsed_args(args: tagscan::Args) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let log_level = args.log_level();
    let output_format = args.output_format();
    let config = args.scan_config()?;
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let radio = tagscan::radio_for(maybe_fake_args).await?;
    tagscan::run_with_clients_and_log_level(
        command,
        &mut output,
        &FakeTerminalClient,
        radio,
        config,
        log_level,
        output_format,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv(argv: &[&str]) -> anyhow::Result<String> {
    let parsed_args = tagscan::Args::try_parse_from(argv.iter().copied())?;
    run_with_parsed_args(parsed_args).await
}

async fn run_json(argv: &[&str]) -> anyhow::Result<Value> {
    let stdout = run_with_argv(argv).await?;
    Ok(serde_json::from_str(&stdout)?)
}

fn ids(report: &Value) -> Vec<&str> {
    report["devices"]
        .as_array()
        .map(|devices| devices.iter().filter_map(|device| device["id"].as_str()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn discover_lists_only_named_readers_until_watchdog() -> anyhow::Result<()> {
    let report = run_json(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--discovery-timeout",
        "100ms",
        "--output",
        "json",
        "discover",
    ])
    .await?;

    assert_eq!(vec!["dev-1", "dev-4"], ids(&report));
    assert_eq!("timed out", report["stopReason"]);
    assert_eq!("named", report["devices"][0]["name"]["kind"]);
    Ok(())
}

#[tokio::test]
async fn discover_stops_at_limit() -> anyhow::Result<()> {
    let report = run_json(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-discovery-delay",
        "10ms",
        "--output",
        "json",
        "discover",
        "--limit",
        "1",
    ])
    .await?;

    assert_eq!(vec!["dev-1"], ids(&report));
    assert_eq!("cancelled", report["stopReason"]);
    Ok(())
}

#[tokio::test]
async fn discover_applies_name_filter() -> anyhow::Result<()> {
    let report = run_json(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        "dev-1|RFD40 A|AA:01;dev-2|Headset|AA:02",
        "--name-filter",
        "Head",
        "--discovery-timeout",
        "50ms",
        "--output",
        "json",
        "discover",
    ])
    .await?;

    assert_eq!(vec!["dev-2"], ids(&report));
    Ok(())
}

#[tokio::test]
async fn discover_reports_radio_failure_and_keeps_devices() -> anyhow::Result<()> {
    let report = run_json(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-scan-failure",
        "adapter reset",
        "--output",
        "json",
        "discover",
    ])
    .await?;

    assert_eq!(vec!["dev-1", "dev-4"], ids(&report));
    assert_eq!(
        "radio reported a scan failure: adapter reset",
        report["stopReason"]
    );
    Ok(())
}

#[tokio::test]
async fn discover_pretty_output_summarises_run() -> anyhow::Result<()> {
    let stdout = run_with_argv(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--discovery-timeout",
        "50ms",
        "--output",
        "pretty",
        "discover",
    ])
    .await?;

    let first_line = stdout.lines().next().unwrap_or_default();
    assert_eq!("Discovery: 2 reader(s) found (timed out)", first_line);
    assert!(stdout.contains("RFD40 B"));
    Ok(())
}

#[tokio::test]
async fn scan_completes_when_every_item_is_read() -> anyhow::Result<()> {
    let result = run_json(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-reads",
        "A1,-40;A1;000000X;B2,-52",
        "--output",
        "json",
        "scan",
        "--address",
        "AA:01",
        "--item",
        "Laptop=A1",
        "--item",
        "Monitor=B2",
    ])
    .await?;

    assert_eq!("completed", result["state"]);
    assert_eq!("dev-1", result["device"]["id"]);
    assert_eq!(2, result["progress"]["found"]);
    assert_eq!(
        vec![true, true],
        result["items"]
            .as_array()
            .map(|items| items.iter().filter_map(|item| item["found"].as_bool()).collect::<Vec<_>>())
            .unwrap_or_default()
    );
    Ok(())
}

#[tokio::test]
async fn scan_reports_connection_failure_when_link_drops() -> anyhow::Result<()> {
    let result = run_json(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-reads",
        "A1;Z9",
        "--fake-read-interval",
        "5ms",
        "--fake-drop",
        "--output",
        "json",
        "scan",
        "--address",
        "dev-1",
        "--item",
        "Laptop=A1",
        "--item",
        "Monitor=B2",
    ])
    .await?;

    assert_eq!("connection_failed", result["state"]);
    assert_eq!(1, result["progress"]["found"]);
    assert_eq!(true, result["items"][0]["found"]);
    assert_eq!(false, result["items"][1]["found"]);
    Ok(())
}

#[tokio::test]
async fn scan_reads_expected_items_from_file() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("tagscan-items-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"[{"name": "Laptop", "identifier": "A1"}, {"name": "Dock", "identifier": "C3"}]"#,
    )?;
    let path_arg = path.display().to_string();

    let result = run_json(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-reads",
        "C3;A1",
        "--output",
        "json",
        "scan",
        "--address",
        "dev-1",
        "--items",
        &path_arg,
    ])
    .await;
    let _ = std::fs::remove_file(&path);

    let result = result?;
    assert_eq!("completed", result["state"]);
    assert_eq!("Dock", result["items"][1]["name"]);
    Ok(())
}

#[tokio::test]
async fn scan_pretty_output_renders_result_table() -> anyhow::Result<()> {
    let stdout = run_with_argv(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-reads",
        "A1",
        "--output",
        "pretty",
        "scan",
        "--address",
        "dev-4",
        "--item",
        "Laptop=A1",
    ])
    .await?;

    let first_line = stdout.lines().next().unwrap_or_default();
    assert_eq!("Connected: RFD40 B (AA:04) - expecting 1 item(s)", first_line);
    assert!(stdout.contains("Scan session:"));
    assert!(stdout.contains("completed"));
    Ok(())
}

#[tokio::test]
async fn scan_fails_when_connect_is_refused() {
    let error = run_with_argv(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-connect-failure",
        "scan",
        "--address",
        "dev-1",
        "--item",
        "Laptop=A1",
    ])
    .await
    .expect_err("refused connect should fail the command");

    let rendered = format!("{error:#}");
    assert!(rendered.contains("failed to connect to `dev-1`"));
    assert!(rendered.contains("refused"));
}

#[tokio::test]
async fn scan_fails_for_unknown_reader() {
    let error = run_with_argv(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "scan",
        "--address",
        "dev-9",
        "--item",
        "Laptop=A1",
    ])
    .await
    .expect_err("unknown reader should fail the command");

    assert!(format!("{error:#}").contains("no device with id or address `dev-9`"));
}

#[tokio::test]
async fn scan_times_out_slow_connect() {
    let error = run_with_argv(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "--fake-connect-delay",
        "5s",
        "--connect-timeout",
        "30ms",
        "scan",
        "--address",
        "dev-1",
        "--item",
        "Laptop=A1",
    ])
    .await
    .expect_err("slow connect should time out");

    assert!(format!("{error:#}").contains("timed out after 30ms"));
}

#[tokio::test]
async fn scan_rejects_duplicate_expected_identifiers() {
    let error = run_with_argv(&[
        "tagscan",
        "--fake",
        "--fake-scan",
        READERS,
        "scan",
        "--address",
        "dev-1",
        "--item",
        "Laptop=A1",
        "--item",
        "Spare=A1",
    ])
    .await
    .expect_err("duplicate identifiers should fail");

    assert!(format!("{error:#}").contains("`A1` appears more than once"));
}

#[tokio::test]
async fn scan_requires_expected_items() {
    let error = run_with_argv(&[
        "tagscan", "--fake", "--fake-scan", READERS, "scan", "--address", "dev-1",
    ])
    .await
    .expect_err("missing inventory should fail");

    assert!(format!("{error:#}").contains("at least one --item"));
}

#[test]
fn items_file_conflicts_with_inline_items() {
    let result = tagscan::Args::try_parse_from([
        "tagscan",
        "scan",
        "--address",
        "dev-1",
        "--items",
        "items.json",
        "--item",
        "Laptop=A1",
    ]);

    assert_eq!(
        clap::error::ErrorKind::ArgumentConflict,
        result.expect_err("conflicting flags").kind()
    );
}

#[test]
fn fake_builder_rejects_invalid_fixture() {
    let result = tagscan::FakeArgs::builder().scan("invalid-record");

    assert!(matches!(
        result,
        Err(tagscan::FixtureError::InvalidRecordFieldCount)
    ));
}
