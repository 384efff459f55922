use anyhow::{Context, bail, ensure};
use duplex::codec::SharedCodec;
use duplex::interop::CallbackService;
use duplex::rpc::{Client, Server};
use rand::RngCore;
use serde_json::{Value, json};

use crate::target::Target;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Shell command, tcp://host:port or udp://host:port. Defaults to
    /// running `duplex interop` as a child process.
    pub target: Option<String>,
}

fn values() -> [Value; 5] {
    [
        json!(100),
        json!(true),
        json!("hello"),
        json!({"foo": "bar"}),
        json!([1, 2, 3]),
    ]
}

pub async fn run(args: Args, codec: SharedCodec) -> anyhow::Result<()> {
    tracing::info!(codec = codec.name(), "Running interop check");
    let target = Target::connect(args.target.as_deref(), &codec).await?;

    let server = Server::new(CallbackService.into_mux(), codec.clone());
    let session = target.session.clone();
    tokio::spawn(async move { server.respond(session).await });

    let client = Client::new(target.session.clone(), codec);
    let outcome = checks(&client).await;
    target.shutdown().await?;
    outcome
}

async fn checks(client: &Client) -> anyhow::Result<()> {
    for selector in ["Error", "BadSelector"] {
        match client.call(selector, "test").await {
            Ok(_) => bail!("{selector}: expected error"),
            Err(e) => {
                let message = e.to_string();
                println!("Error: {}", message.trim_start_matches("remote: "));
            }
        }
    }

    for value in values() {
        let (reply, _) = client
            .call_into::<Value, _>("Unary", &value)
            .await
            .with_context(|| format!("Unary {value}"))?;
        println!("Unary: {value} {reply}");
        ensure!(reply == value, "Unary: sent {value}, got {reply}");
    }

    let response = client.call("Stream", &()).await.context("Stream")?;
    let (mut reader, mut writer) = response.into_split();
    let send = tokio::spawn(async move {
        for value in values() {
            writer.send_value(&value).await?;
        }
        writer.close().await?;
        anyhow::Ok(())
    });
    let mut echoed = Vec::new();
    while let Some(value) = reader.recv_value().await? {
        println!("Stream: {value}");
        echoed.push(value);
    }
    send.await.context("stream sender panicked")??;
    ensure!(echoed == values(), "Stream: echo does not match");

    for size in [1usize, 1024, 1 << 20] {
        let mut data = vec![0u8; size];
        rand::rng().fill_bytes(&mut data);
        let received = super::echo_bytes(client, data.clone()).await?;
        ensure!(received == data, "byte stream buffer does not match");
        println!("Bytes: {}", received.len());
    }

    Ok(())
}
