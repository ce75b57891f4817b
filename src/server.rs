//! The TCP accept loop and per-connection read/decode/dispatch/write loop.
//!
//! Each connection gets its own task; the only shared state is the `Store`
//! (behind its own lock) and a pair of process-wide monotone counters used
//! purely for observability (`connection_id`, `request_id`).

use crate::commands::dispatch;
use crate::resp::{Reply, RespCodec};
use crate::store::Store;
use anyhow::Context;
use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::{Decoder, Encoder};

pub struct Server {
    addr: String,
    read_chunk_size: usize,
    store: Arc<Store>,
    next_connection_id: AtomicU64,
    next_request_id: AtomicU64,
}

impl Server {
    pub fn new(addr: String, read_chunk_size: usize, store: Arc<Store>) -> Self {
        Server {
            addr,
            read_chunk_size,
            store,
            next_connection_id: AtomicU64::new(0),
            next_request_id: AtomicU64::new(0),
        }
    }

    /// Binds the listener and runs the accept loop until `shutdown` fires.
    /// A bind failure is fatal and propagates to the caller.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("failed to bind listener on {}", self.addr))?;
        tracing::info!(addr = %self.addr, "listening");
        self.serve(listener, shutdown).await
    }

    /// Runs the accept loop against an already-bound listener until `shutdown`
    /// fires. Split out from `run` so tests can bind an ephemeral port and
    /// discover the real address before the accept loop starts.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
                            tracing::debug!(connection_id, %peer, "connection accepted");
                            let server = Arc::clone(&self);
                            let conn_shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, connection_id, conn_shutdown).await;
                            });
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed, retrying");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("accept loop stopped");
        Ok(())
    }

    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        connection_id: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut codec = RespCodec;
        let mut buf = BytesMut::with_capacity(self.read_chunk_size);
        let mut chunk = vec![0u8; self.read_chunk_size];

        'connection: loop {
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(args)) => {
                        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
                        tracing::trace!(connection_id, request_id, "request decoded");
                        let reply = dispatch(args, &self.store).await;
                        self.send_reply(&mut stream, &mut codec, reply, connection_id, request_id).await;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(connection_id, error = %err, "protocol error");
                        let reply = Reply::error(format!("Protocol error: {err}"));
                        self.send_reply(&mut stream, &mut codec, reply, connection_id, 0).await;
                        break 'connection;
                    }
                }
            }

            tokio::select! {
                read = stream.read(&mut chunk) => {
                    match read {
                        Ok(0) => {
                            tracing::debug!(connection_id, "connection closed by peer");
                            break 'connection;
                        }
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        Err(err) => {
                            tracing::warn!(connection_id, error = %err, "read failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!(connection_id, "connection closing on shutdown");
                        break 'connection;
                    }
                }
            }
        }
    }

    /// Encodes and writes `reply`. A write error is logged and otherwise
    /// ignored — the connection's read loop stays up so the client can keep
    /// sending requests even after a transient write failure.
    async fn send_reply(
        &self,
        stream: &mut TcpStream,
        codec: &mut RespCodec,
        reply: Reply,
        connection_id: u64,
        request_id: u64,
    ) {
        let mut out = BytesMut::new();
        if codec.encode(reply, &mut out).is_err() {
            return;
        }
        match stream.write_all(&out).await {
            Ok(()) => {
                tracing::trace!(connection_id, request_id, "reply sent");
            }
            Err(err) => {
                tracing::warn!(connection_id, error = %err, "write failed");
            }
        }
    }
}
