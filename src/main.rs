//! cliwright CLI: declarative CLI specifications, compiled or interpreted.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "cliwright",
    version,
    about = "Turn a declarative CLI specification into a Rust program, or run it live"
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: cliwright::cli::Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = cliwright::cli::dispatch(cli.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
