use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use matterfs_core::DriveError;

use super::protocol::BridgeResponse;
use crate::bridge::BridgeRequest;
use crate::mount::MountManager;

/// Answer bridge requests from `reader`, writing responses to `writer`.
///
/// Each request is dispatched on its own task so a slow download does not
/// block unrelated callbacks; responses are multiplexed through a channel
/// and may arrive out of order. Returns when the reader reaches EOF (the
/// bridge process went away).
pub async fn serve<R, W>(
    mount: Arc<MountManager>,
    reader: R,
    writer: W,
) -> Result<(), DriveError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<BridgeResponse>(64);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = rx.recv().await {
            let line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    warn!("failed to encode bridge response: {}", e);
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                warn!("bridge writer closed, stopping response task");
                break;
            }
        }
    });

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: BridgeRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                // Without a parseable id there is nothing to correlate.
                warn!("dropping malformed bridge request: {}", e);
                continue;
            }
        };

        debug!(id = request.id, "bridge request received");
        let mount = Arc::clone(&mount);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = mount.handle_request(request).await;
            let _ = tx.send(response).await;
        });
    }

    drop(tx);
    let _ = writer_task.await;
    Ok(())
}
