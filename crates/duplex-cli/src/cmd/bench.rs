use std::time::Instant;

use anyhow::ensure;
use duplex::codec::SharedCodec;
use duplex::interop::CallbackService;
use duplex::rpc::{Client, Server};
use rand::RngCore;

use crate::target::Target;

const MB: usize = 1 << 20;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Shell command, tcp://host:port or udp://host:port. Defaults to
    /// running `duplex interop` as a child process.
    pub target: Option<String>,

    /// Payload sizes in megabytes.
    #[arg(long, value_delimiter = ',', default_value = "256,512,1024")]
    pub sizes: Vec<usize>,
}

pub async fn run(args: Args, codec: SharedCodec) -> anyhow::Result<()> {
    let target = Target::connect(args.target.as_deref(), &codec).await?;

    let server = Server::new(CallbackService.into_mux(), codec.clone());
    let session = target.session.clone();
    tokio::spawn(async move { server.respond(session).await });

    let client = Client::new(target.session.clone(), codec);
    let outcome = bench(&client, &args.sizes).await;
    target.shutdown().await?;
    outcome
}

async fn bench(client: &Client, sizes: &[usize]) -> anyhow::Result<()> {
    for &size in sizes {
        let mut data = vec![0u8; size * MB];
        rand::rng().fill_bytes(&mut data);
        let len = data.len();

        let start = Instant::now();
        let received = super::echo_bytes(client, data).await?;
        let elapsed = start.elapsed();

        ensure!(received.len() == len, "byte stream buffer does not match");
        let throughput = received.len() as f64 / elapsed.as_secs_f64() / MB as f64;
        println!(
            "Bytes: {} MB RTT: {elapsed:?} Thru: {} MB/s",
            received.len() / MB,
            throughput as u64
        );
    }
    Ok(())
}
