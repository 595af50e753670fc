// ABOUTME: SOCKS5 tunnel to the SSH target through an already connected proxy stream.
// ABOUTME: Uses tokio-socks for negotiation, with username/password auth when the proxy URL carries it.

use super::{ProxyAddress, Target};
use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_socks::tcp::Socks5Stream;

/// Negotiate a CONNECT to `target`, returning the stream positioned at the
/// start of the tunnelled connection.
pub(crate) async fn connect<S>(stream: S, proxy: &ProxyAddress, target: &Target) -> Result<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let destination = (target.host.as_str(), target.port);
    let negotiated = match proxy.credentials() {
        Some((user, pass)) => {
            Socks5Stream::connect_with_password_and_socket(stream, destination, user, pass).await
        }
        None => Socks5Stream::connect_with_socket(stream, destination).await,
    };

    let tunnel = negotiated.map_err(|e: tokio_socks::Error| Error::ProxyHandshakeFailed {
        target: target.to_string(),
        reason: e.to_string(),
    })?;

    tracing::debug!("SOCKS5 tunnel to {} established via {}", target, proxy);
    Ok(tunnel.into_inner())
}
