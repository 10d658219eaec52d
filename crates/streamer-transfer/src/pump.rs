use std::borrow::Cow;

use streamer_crypto::ChunkCipher;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::ProgressPolicy;
use crate::error::PumpError;
use crate::progress::ProgressThrottle;

/// Moves bytes from a source to a sink in fixed-size chunks through an
/// optional [`ChunkCipher`].
#[derive(Debug, Clone)]
pub struct StreamPump {
    chunk_size: usize,
    policy: ProgressPolicy,
}

impl StreamPump {
    pub fn new(chunk_size: usize, policy: ProgressPolicy) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            policy,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Pump `source` into `sink` until the source is exhausted.
    ///
    /// `on_progress(bytes_written, total_bytes)` is called once with 0 before
    /// the first read, then as the policy allows after each write, and always
    /// with the final count on success. `is_cancelled` is polled before every
    /// write; a cancelled run never finalizes the cipher.
    ///
    /// Returns the number of bytes written to `sink`.
    pub async fn run<R, W, P, C>(
        &self,
        source: &mut R,
        sink: &mut W,
        mut cipher: Option<ChunkCipher>,
        total_bytes: u64,
        mut on_progress: P,
        is_cancelled: C,
    ) -> Result<u64, PumpError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
        P: FnMut(u64, u64),
        C: Fn() -> bool,
    {
        let mut throttle = ProgressThrottle::new(self.policy);
        let mut buf = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;
        let mut chunk_idx: u64 = 0;

        on_progress(0, total_bytes);

        loop {
            let n = read_chunk(source, &mut buf)
                .await
                .map_err(PumpError::SourceFailed)?;
            if n == 0 {
                break;
            }

            let out: Cow<'_, [u8]> = match cipher.as_mut() {
                Some(c) => Cow::Owned(c.update(&buf[..n])?),
                None => Cow::Borrowed(&buf[..n]),
            };

            if is_cancelled() {
                debug!(chunk_idx, written, "pump cancelled");
                return Err(PumpError::Cancelled);
            }

            if !out.is_empty() {
                sink.write_all(&out).await.map_err(PumpError::SinkFailed)?;
                written += out.len() as u64;
                if throttle.offer(written, total_bytes) {
                    on_progress(written, total_bytes);
                }
            }
            chunk_idx += 1;
        }

        if is_cancelled() {
            debug!(chunk_idx, written, "pump cancelled before finalize");
            return Err(PumpError::Cancelled);
        }

        if let Some(c) = cipher {
            let tail = c.finalize()?;
            if !tail.is_empty() {
                sink.write_all(&tail).await.map_err(PumpError::SinkFailed)?;
                written += tail.len() as u64;
            }
        }

        sink.flush().await.map_err(PumpError::SinkFailed)?;

        if throttle.last_reported() != written {
            throttle.force(written);
            on_progress(written, total_bytes);
        }

        debug!(chunks = chunk_idx, written, "pump finished");
        Ok(written)
    }
}

/// Read until `buf` is full or the source hits EOF.
async fn read_chunk<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
