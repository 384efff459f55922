//! `duplex`: interop checker, benchmark, ad hoc caller and reference service.

mod cmd;
mod logging;
mod target;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "duplex",
    version,
    about = "A utility for working with the duplex protocol stack"
)]
struct Cli {
    /// Value codec: cbor or json.
    #[arg(long, global = true, env = "DUPLEX_CODEC", default_value = "cbor")]
    codec: String,

    #[command(flatten)]
    log: logging::LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check an implementation against the reference interop service
    Check(cmd::check::Args),
    /// Measure byte-stream throughput
    Bench(cmd::bench::Args),
    /// Call a remote function
    Call(cmd::call::Args),
    /// Run the interop service
    Interop(cmd::interop::Args),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.log.init();
    let codec = duplex::codec::from_name(&cli.codec)?;
    tracing::debug!(codec = codec.name(), command = ?cli.command, "Starting");

    match cli.command {
        Command::Check(args) => cmd::check::run(args, codec).await,
        Command::Bench(args) => cmd::bench::run(args, codec).await,
        Command::Call(args) => cmd::call::run(args, codec).await,
        Command::Interop(args) => cmd::interop::run(args, codec).await,
    }
}
