//! Connection setup and framing.
//!
//! A connection opens with a seven byte hello (`DB-RPC` plus the protocol
//! version) that the server echoes. After that every frame is a 4-byte
//! big-endian length, an 8-byte request id and the message.

use crate::error::{ArticleDbError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::LengthDelimitedCodec;

pub const PROTOCOL_NAME: &[u8; 6] = b"DB-RPC";
pub const PROTOCOL_VERSION: u8 = 0;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HELLO_LEN: usize = PROTOCOL_NAME.len() + 1;

fn hello() -> [u8; HELLO_LEN] {
    let mut hello = [0u8; HELLO_LEN];
    hello[..PROTOCOL_NAME.len()].copy_from_slice(PROTOCOL_NAME);
    hello[PROTOCOL_NAME.len()] = PROTOCOL_VERSION;
    hello
}

fn check_hello(received: &[u8; HELLO_LEN]) -> Result<()> {
    if &received[..PROTOCOL_NAME.len()] != PROTOCOL_NAME {
        return Err(ArticleDbError::InvalidRequest(format!(
            "not a DB-RPC peer: {:?}",
            String::from_utf8_lossy(&received[..PROTOCOL_NAME.len()])
        )));
    }
    let version = received[PROTOCOL_NAME.len()];
    if version != PROTOCOL_VERSION {
        return Err(ArticleDbError::InvalidRequest(format!(
            "unsupported DB-RPC version {}",
            version
        )));
    }
    Ok(())
}

pub async fn client_handshake<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&hello()).await?;
    stream.flush().await?;

    let mut answer = [0u8; HELLO_LEN];
    stream.read_exact(&mut answer).await?;
    check_hello(&answer)
}

pub async fn server_handshake<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut received = [0u8; HELLO_LEN];
    stream.read_exact(&mut received).await?;
    check_hello(&received)?;

    stream.write_all(&hello()).await?;
    stream.flush().await?;
    Ok(())
}

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn encode_frame(id: u64, message: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(8 + message.len());
    frame.put_u64(id);
    frame.put_slice(message);
    frame.freeze()
}

pub fn decode_frame(mut frame: BytesMut) -> Result<(u64, Bytes)> {
    if frame.len() < 8 {
        return Err(ArticleDbError::Corrupt(format!(
            "frame of {} bytes has no request id",
            frame.len()
        )));
    }
    let id = frame.get_u64();
    Ok((id, frame.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    #[tokio::test]
    async fn test_handshake_and_frames_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let server_task = tokio::spawn(async move {
            server_handshake(&mut server).await.unwrap();
            let mut framed = Framed::new(server, frame_codec());
            let frame = framed.next().await.unwrap().unwrap();
            let (id, message) = decode_frame(frame).unwrap();
            framed.send(encode_frame(id, &message[..])).await.unwrap();
        });

        client_handshake(&mut client).await.unwrap();
        let mut framed = Framed::new(client, frame_codec());
        framed.send(encode_frame(42, b"ping")).await.unwrap();
        let (id, message) = decode_frame(framed.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(id, 42);
        assert_eq!(&message[..], b"ping");

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_rejects_foreign_hello() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"HTTP/1.1").await.unwrap();
        assert!(matches!(
            server_handshake(&mut server).await,
            Err(ArticleDbError::InvalidRequest(_))
        ));

        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"DB-RPC\x07").await.unwrap();
        assert!(server_handshake(&mut server).await.is_err());
    }

    #[test]
    fn test_short_frame_is_corrupt() {
        assert!(decode_frame(BytesMut::from(&b"abc"[..])).is_err());
    }
}
