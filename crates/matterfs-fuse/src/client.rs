use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use matterfs_remote::bridge::{
    BridgeError, BridgeOp, BridgeReply, BridgeRequest, BridgeResponse, ErrorCode, REQUEST_TIMEOUT,
};
use matterfs_remote::MountManager;

/// Client side of the bridge protocol.
///
/// Runs in the bridge process; requests travel as JSON lines over the
/// process channel and responses are routed back by id. Every call carries
/// a timeout so a stuck mount manager surfaces as `IoError` instead of
/// hanging an OS callback forever.
pub struct BridgeClient {
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeResponse>>>>,
    line_tx: mpsc::Sender<String>,
    timeout: std::time::Duration,
}

impl BridgeClient {
    /// Connect over an async byte channel (child-process stdio, a socket,
    /// or an in-memory duplex in tests).
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_timeout(reader, writer, REQUEST_TIMEOUT)
    }

    pub fn with_timeout<R, W>(reader: R, writer: W, timeout: std::time::Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = line_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    warn!("bridge channel writer closed");
                    break;
                }
            }
        });

        let router_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response: BridgeResponse = match serde_json::from_str(&line) {
                            Ok(response) => response,
                            Err(e) => {
                                warn!("dropping malformed bridge response: {}", e);
                                continue;
                            }
                        };
                        let waiter = {
                            let mut guard =
                                router_pending.lock().unwrap_or_else(|e| e.into_inner());
                            guard.remove(&response.id)
                        };
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!(id = response.id, "response for abandoned request"),
                        }
                    }
                    Ok(None) | Err(_) => {
                        debug!("bridge channel closed, dropping pending requests");
                        router_pending
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .clear();
                        break;
                    }
                }
            }
        });

        BridgeClient {
            next_id: AtomicU64::new(0),
            pending,
            line_tx,
            timeout,
        }
    }

    /// Wire the client to a mount manager in the same process through an
    /// in-memory duplex channel. The protocol boundary is preserved, which
    /// is also the fault-injection seam used in tests.
    pub fn in_process(manager: Arc<MountManager>) -> Self {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        tokio::spawn(async move {
            if let Err(e) =
                matterfs_remote::bridge::serve(manager, BufReader::new(server_read), server_write)
                    .await
            {
                warn!("bridge server ended with error: {}", e);
            }
        });
        let (client_read, client_write) = tokio::io::split(client_io);
        Self::connect(client_read, client_write)
    }

    /// Send one operation and wait for its reply.
    pub async fn call(&self, op: BridgeOp) -> Result<BridgeReply, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            guard.insert(id, tx);
        }

        let line = serde_json::to_string(&BridgeRequest { id, op }).map_err(|e| BridgeError {
            code: ErrorCode::IoError,
            message: format!("encode failed: {}", e),
        })?;
        if self.line_tx.send(line).await.is_err() {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(BridgeError {
                code: ErrorCode::IoError,
                message: "bridge channel closed".to_string(),
            });
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(BridgeError {
                code: ErrorCode::IoError,
                message: "bridge connection closed".to_string(),
            }),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                Err(BridgeError {
                    code: ErrorCode::IoError,
                    message: format!("bridge request timed out after {:?}", self.timeout),
                })
            }
        }
    }
}
