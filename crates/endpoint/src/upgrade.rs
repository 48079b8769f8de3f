// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte bridge from a foreign connection to the HTTP upstream.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Errors from the upstream bridge. Logged only; the peer never sees them.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("connect to upstream {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Copy `client` to `upstream` and back until both directions finish.
///
/// `reader` must still hold every byte the client sent, including any that
/// were inspected during classification. Returns the bytes copied in each
/// direction as `(to_upstream, to_client)`.
pub async fn forward<R, W>(
    mut reader: R,
    mut writer: W,
    upstream: &str,
) -> Result<(u64, u64), UpgradeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let stream = TcpStream::connect(upstream)
        .await
        .map_err(|source| UpgradeError::Connect { addr: upstream.to_string(), source })?;
    stream.set_nodelay(true)?;
    let (mut up_read, mut up_write) = stream.into_split();

    let to_upstream = async {
        let n = tokio::io::copy(&mut reader, &mut up_write).await?;
        up_write.shutdown().await?;
        Ok::<_, std::io::Error>(n)
    };
    let to_client = async {
        let n = tokio::io::copy(&mut up_read, &mut writer).await?;
        writer.shutdown().await?;
        Ok::<_, std::io::Error>(n)
    };
    let (sent, received) = tokio::try_join!(to_upstream, to_client)?;
    debug!(upstream, sent, received, "upstream bridge finished");
    Ok((sent, received))
}

#[cfg(test)]
#[path = "upgrade_tests.rs"]
mod tests;
