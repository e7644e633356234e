// link.rs: half-duplex serial link to the meter

use std::future::Future;

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::*;

pub const PZEM_BAUD: u32 = 9600;

/// Byte pipe to the meter. `recv` waits until at least one byte is
/// available and returns how many were read; zero means the link is gone.
pub trait MeterLink: Send {
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), ProtocolError>> + Send;
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, ProtocolError>> + Send;
    /// Drop whatever a late answer left in the receive buffer.
    fn discard_input(&mut self) {}
}

/// Adapter for any tokio byte stream.
pub struct StreamLink<S> {
    stream: S,
}

impl<S> StreamLink<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> MeterLink for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        Ok(self.stream.read(buf).await?)
    }

    /// Read whatever is already buffered without waiting for more.
    fn discard_input(&mut self) {
        let mut scratch = [0u8; 64];
        let mut dropped = 0;
        while let Some(Ok(n)) = self.stream.read(&mut scratch).now_or_never() {
            if n == 0 {
                break;
            }
            dropped += n;
        }
        if dropped > 0 {
            debug!("Discarded {dropped} stale bytes");
        }
    }
}

/// Fill `buf` completely within `limit`. A short frame at the deadline is a
/// timeout, never a partial decode.
pub async fn receive_exact<L: MeterLink>(
    link: &mut L,
    buf: &mut [u8],
    limit: Duration,
) -> Result<(), ProtocolError> {
    let want = buf.len();
    let mut got = 0;
    let filled = timeout(limit, async {
        while got < want {
            match link.recv(&mut buf[got..]).await? {
                0 => return Err(ProtocolError::LinkClosed),
                n => got += n,
            }
        }
        Ok(())
    })
    .await;

    match filled {
        Ok(res) => res,
        Err(_) => Err(ProtocolError::FrameTimeout { got, want }),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn assembles_fragmented_frame() {
        let (near, mut far) = duplex(64);
        let mut link = StreamLink::new(near);
        tokio::spawn(async move {
            far.write_all(&[1, 2]).await.unwrap();
            sleep(Duration::from_millis(5)).await;
            far.write_all(&[3, 4, 5]).await.unwrap();
            sleep(Duration::from_millis(100)).await;
        });
        let mut buf = [0u8; 5];
        receive_exact(&mut link, &mut buf, Duration::from_millis(80))
            .await
            .unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn short_frame_times_out() {
        let (near, mut far) = duplex(64);
        let mut link = StreamLink::new(near);
        far.write_all(&[0xF8, 0x04, 0x14]).await.unwrap();
        let mut buf = [0u8; 25];
        let res = receive_exact(&mut link, &mut buf, Duration::from_millis(30)).await;
        assert_eq!(res, Err(ProtocolError::FrameTimeout { got: 3, want: 25 }));
        drop(far);
    }

    #[tokio::test]
    async fn discard_drops_buffered_bytes_only() {
        let (near, mut far) = duplex(64);
        let mut link = StreamLink::new(near);
        link.discard_input();

        far.write_all(&[0xF8, 0x42, 0xC2, 0x41]).await.unwrap();
        link.discard_input();

        far.write_all(&[7, 8]).await.unwrap();
        let mut buf = [0u8; 2];
        receive_exact(&mut link, &mut buf, Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(buf, [7, 8]);
    }
}
// EOF
