use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use duplex::codec::SharedCodec;
use duplex::interop::InteropService;
use duplex::mux::quic::{QuicListener, ServerTls};
use duplex::mux::{self, Session};
use duplex::rpc::Server;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Listen address: udp://host:port or host:port for QUIC, tcp://host:port
    /// for TCP. Serves on stdio when omitted.
    pub addr: Option<String>,
}

pub async fn run(args: Args, codec: SharedCodec) -> anyhow::Result<()> {
    let server = Server::new(InteropService.into_mux(), codec);

    let Some(addr) = args.addr else {
        let session: Arc<dyn Session> = Arc::new(mux::dial_stdio());
        server.respond(session).await?;
        return Ok(());
    };

    if let Some(addr) = addr.strip_prefix("tcp://") {
        serve_tcp(server, addr).await
    } else {
        let addr = addr.strip_prefix("udp://").unwrap_or(&addr);
        let resolved = tokio::net::lookup_host(addr)
            .await?
            .next()
            .with_context(|| format!("invalid listen address: {addr}"))?;
        serve_quic(server, resolved).await
    }
}

async fn serve_tcp(server: Server, addr: &str) -> anyhow::Result<()> {
    let listener = mux::listen_tcp(addr).await?;
    eprintln!("* Listening on tcp://{}...", listener.local_addr()?);
    loop {
        let session = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        spawn_session(&server, Arc::new(session));
    }
}

async fn serve_quic(server: Server, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = QuicListener::bind(addr, ServerTls::self_signed()?)?;
    eprintln!("* Listening on udp://{}...", listener.local_addr()?);
    loop {
        let session = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                listener.close();
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        spawn_session(&server, Arc::new(session));
    }
}

fn spawn_session(server: &Server, session: Arc<dyn Session>) {
    let server = server.clone();
    tokio::spawn(async move {
        if let Err(e) = server.respond(session).await {
            tracing::warn!(error = %e, "Session ended with error");
        }
    });
}
