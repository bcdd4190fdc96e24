use clap::Parser;
use conctl::config::{self, AttachArgs, Cli, Command, ExecArgs};
use conctl::console::RemoteConsole;
use conctl::error::Result;
use conctl::telnet::TelnetClient;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Exec(args) => run_exec(args).await,
        Command::Attach(args) => run_attach(args).await,
    }
}

async fn run_exec(args: ExecArgs) -> Result<()> {
    let config = config::Config::load(&args.common)?;
    init_logging(&config.logging);

    let profile = config.profile_for(&args.common.host);
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(profile.expect_timeout);

    let mut client = TelnetClient::connect(&args.common.host, args.common.port, profile).await?;
    let console: &mut dyn RemoteConsole = &mut client;
    if args.login {
        console
            .login(&config.credentials.username, &config.credentials.password, false)
            .await?;
    }
    let result = console.exec_cmd(&args.cmd, timeout).await;
    console.close().await;

    let (rc, output) = result?;
    println!("{output}");
    if rc != 0 {
        tracing::warn!(rc, cmd = %args.cmd, "Command returned non-zero");
        std::process::exit(rc.clamp(1, 255));
    }
    Ok(())
}

async fn run_attach(args: AttachArgs) -> Result<()> {
    let config = config::Config::load(&args.common)?;
    init_logging(&config.logging);

    let profile = config.profile_for(&args.common.host);
    let mut client = TelnetClient::connect(&args.common.host, args.common.port, profile).await?;
    let result = client.interact().await;
    client.close().await;
    result
}

fn init_logging(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(logging.level.clone());
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
