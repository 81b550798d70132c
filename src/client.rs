// =============================================================================
// Query client — one-shot CLI commands against a running service
// =============================================================================
//
// The add/remove/snapshot/exposure/stats subcommands speak the same
// control protocol as any other subscriber: connect, send one command,
// print the reply, disconnect.
// =============================================================================

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::config::RmsConfig;
use crate::server::protocol::ClientCommand;

/// Connect to the running service's push channel, issue one command, and
/// pretty-print the reply to stdout.
pub async fn run_command(config: &RmsConfig, command: ClientCommand) -> Result<()> {
    let url = format!("ws://{}:{}/ws", client_host(&config.ws_host), config.ws_port);

    let (mut socket, _) = connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to monitor service at {url}"))?;

    let payload = serde_json::to_string(&command).context("failed to encode command")?;
    socket
        .send(Message::Text(payload))
        .await
        .context("failed to send command")?;

    // The server pushes an `initial` frame on connect and may interleave
    // tick updates; the reply is the first frame that is neither.
    while let Some(msg) = socket.next().await {
        let msg = msg.context("connection lost while waiting for reply")?;
        if let Message::Text(text) = msg {
            let frame: serde_json::Value =
                serde_json::from_str(&text).context("malformed frame from server")?;
            match frame["type"].as_str() {
                Some("initial") | Some("update") => {
                    debug!(frame_type = %frame["type"], "skipping pushed frame");
                }
                _ => {
                    println!("{}", serde_json::to_string_pretty(&frame)?);
                    socket.close(None).await.ok();
                    return Ok(());
                }
            }
        }
    }

    bail!("connection closed before a reply arrived")
}

/// A bind-all listen address is not a dialable host.
fn client_host(host: &str) -> &str {
    if host == "0.0.0.0" {
        "127.0.0.1"
    } else {
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_all_maps_to_loopback() {
        assert_eq!(client_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(client_host("monitor.internal"), "monitor.internal");
    }
}
