//! Connecting `check` and `bench` to the implementation under test.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use duplex::codec::SharedCodec;
use duplex::mux::{self, Session};
use tokio::process::{Child, Command};
use url::Url;

/// A session to the implementation under test, plus its process if we
/// spawned one.
pub struct Target {
    pub session: Arc<dyn Session>,
    child: Option<Child>,
}

impl Target {
    /// No target: run `duplex interop` as a child. `tcp://` and `udp://`
    /// dial. Anything else is a shell command speaking duplex on its stdio.
    pub async fn connect(target: Option<&str>, codec: &SharedCodec) -> anyhow::Result<Self> {
        let Some(target) = target else {
            let exe = std::env::current_exe().context("locating own executable")?;
            let mut command = Command::new(exe);
            command.arg("interop");
            return Self::spawn(command, codec);
        };

        match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "tcp" | "udp") => Self::dial(&url).await,
            _ => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(target);
                Self::spawn(command, codec)
            }
        }
    }

    fn spawn(mut command: Command, codec: &SharedCodec) -> anyhow::Result<Self> {
        command
            .env("DUPLEX_CODEC", codec.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command.spawn().context("spawning interop process")?;
        let stdin = child.stdin.take().context("child stdin")?;
        let stdout = child.stdout.take().context("child stdout")?;
        tracing::debug!(pid = ?child.id(), "Spawned interop process");
        Ok(Self {
            session: Arc::new(mux::from_io(stdout, stdin)),
            child: Some(child),
        })
    }

    async fn dial(url: &Url) -> anyhow::Result<Self> {
        let host = url.host_str().context("target has no host")?;
        let port = url.port().context("target has no port")?;
        let addr = format!("{host}:{port}");
        let session: Arc<dyn Session> = match url.scheme() {
            "tcp" => Arc::new(mux::dial_tcp(&addr).await?),
            "udp" => Arc::new(
                mux::quic::dial(&addr, "localhost", mux::quic::Trust::Insecure).await?,
            ),
            other => bail!("unsupported protocol: {other}"),
        };
        Ok(Self {
            session,
            child: None,
        })
    }

    /// Closes the session and reaps the child.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Err(e) = self.session.close().await {
            tracing::debug!(error = %e, "Session close failed");
        }
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    tracing::debug!(%status, "Interop process exited");
                }
                Err(_) => {
                    tracing::warn!("Interop process did not exit, killing");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}
