use std::{path::Path, time::Duration};

use serde::Serialize;
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};

/// Opens and immediately drops a TCP connection to `127.0.0.1:{port}`.
///
/// Any failure, including the timeout, reads as "not listening".
pub async fn probe(port: u16, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(err)) => {
            tracing::trace!(port, error = %err, "probe refused");
            false
        }
        Err(_) => {
            tracing::trace!(port, "probe timed out");
            false
        }
    }
}

/// Writes `value` as pretty JSON through a sibling temp file and a rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let data = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}
