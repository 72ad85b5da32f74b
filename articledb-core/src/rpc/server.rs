use super::handler::Handler;
use super::transport::{decode_frame, encode_frame, frame_codec, server_handshake};
use crate::error::Result;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Depth of the per-connection queue of finished answers.
const ANSWER_QUEUE: usize = 256;

/// Accept loop serving one [`Handler`] over TCP.
pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<Handler>,
}

impl RpcServer {
    pub fn new(listener: TcpListener, handler: Arc<Handler>) -> Self {
        Self { listener, handler }
    }

    pub async fn bind(addr: &str, handler: Arc<Handler>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, handler))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("RPC server listening on {}", self.listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let handler = Arc::clone(&self.handler);
                            tokio::spawn(async move {
                                if let Err(error) = serve_connection(stream, addr, handler).await {
                                    tracing::warn!("Connection from {} ended: {}", addr, error);
                                }
                            });
                        }
                        Err(error) => {
                            tracing::error!("Failed to accept connection: {}", error);
                        }
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("RPC server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Serves one connection. Every request runs in its own task; answers are
/// written in completion order.
pub async fn serve_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<Handler>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    server_handshake(&mut stream).await?;
    tracing::debug!("Accepted RPC connection from {}", addr);

    let (mut sink, mut frames) = Framed::new(stream, frame_codec()).split();
    let (answers, mut queued) = mpsc::channel::<Bytes>(ANSWER_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(frame) = queued.recv().await {
            if let Err(error) = sink.send(frame).await {
                tracing::debug!("Writing to {} failed: {}", addr, error);
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        let (id, message) = decode_frame(frame?)?;
        let handler = Arc::clone(&handler);
        let answers = answers.clone();
        tokio::spawn(async move {
            let answer = handler.handle_message(&message).await;
            let _ = answers.send(encode_frame(id, &answer)).await;
        });
    }

    drop(answers);
    let _ = writer.await;
    tracing::debug!("RPC connection from {} closed", addr);
    Ok(())
}
