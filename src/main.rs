use std::process::ExitCode;

use clap::Parser;

use tagscan::{Args, SystemTerminalClient, radio_for, run_with_clients_and_log_level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let output_format = args.output_format();
        let config = args.scan_config()?;
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let radio = radio_for(maybe_fake_args).await?;

        run_with_clients_and_log_level(
            command,
            &mut stdout,
            &SystemTerminalClient,
            radio,
            config,
            log_level,
            output_format,
        )
        .await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
