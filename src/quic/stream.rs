//! Logical streams of an upgraded connection

use bytes::Bytes;
use quinn::{ReadToEndError, RecvStream, SendStream, StreamId, VarInt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::{Result, TransportError};

/// Bidirectional logical stream over an upgraded connection
#[derive(Debug)]
pub struct BiStream {
    id: StreamId,
    send: SendStream,
    recv: RecvStream,
}

impl BiStream {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self {
            id: send.id(),
            send,
            recv,
        }
    }

    /// QUIC stream id; both halves share it
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.send.write(data).await?)
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.send.write_all(data).await?;
        Ok(())
    }

    /// Half-closes the sending side; the peer observes end of stream
    pub fn finish(&mut self) -> Result<()> {
        self.send.finish()?;
        Ok(())
    }

    /// Abandons the sending side with an application error code
    pub fn reset(&mut self, code: u32) -> Result<()> {
        self.send.reset(VarInt::from_u32(code))?;
        Ok(())
    }

    /// Asks the peer to stop sending
    pub fn stop(&mut self, code: u32) -> Result<()> {
        self.recv.stop(VarInt::from_u32(code))?;
        Ok(())
    }

    /// Reads into `buf`; `None` once the peer has finished
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        Ok(self.recv.read(buf).await?)
    }

    pub async fn read_to_end(&mut self, max_size: usize) -> Result<Vec<u8>> {
        let id = self.id;
        self.recv.read_to_end(max_size).await.map_err(|e| match e {
            ReadToEndError::TooLong => {
                TransportError::Stream(format!("{} carried more than {} bytes", id, max_size))
            }
            other => other.into(),
        })
    }

    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let chunk = self.recv.read_chunk(usize::MAX, true).await?;
        Ok(chunk.map(|chunk| chunk.bytes))
    }

    pub fn split(self) -> (SendStream, RecvStream) {
        (self.send, self.recv)
    }
}

// quinn's streams carry inherent poll_* methods with their own error types,
// so the tokio traits are named explicitly
impl AsyncRead for BiStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for BiStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}
