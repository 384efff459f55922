pub mod bench;
pub mod call;
pub mod check;
pub mod interop;

use anyhow::Context;
use duplex::rpc::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Sends `data` through the remote `Bytes` echo and returns what came back.
async fn echo_bytes(client: &Client, data: Vec<u8>) -> anyhow::Result<Vec<u8>> {
    let response = client.call("Bytes", &()).await?;
    let (mut reader, mut writer) = response.into_split();
    let expected = data.len();
    let send = tokio::spawn(async move {
        writer.write_all(&data).await?;
        writer.close().await
    });

    let mut received = Vec::with_capacity(expected);
    reader.read_to_end(&mut received).await?;
    send.await.context("byte sender panicked")??;
    Ok(received)
}
