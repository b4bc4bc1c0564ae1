//! Single-pass SHA-256 over a byte stream that is simultaneously buffered
//! into a sink (normally a scratch file on disk).

use std::io;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Digest and length of everything that passed through a [`ContentHasher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex, 64 characters.
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    buffer_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ContentHasher {
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Copies `source` into `sink` until EOF, hashing every byte on the way.
    ///
    /// Memory use is bounded by the buffer size. The sink is flushed before
    /// returning. A read or write error aborts the copy; whatever reached the
    /// sink so far is the caller's to discard.
    pub async fn copy<R, W>(&self, source: &mut R, sink: &mut W) -> io::Result<ContentDigest>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.buffer_size];
        let mut size: u64 = 0;

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            sink.write_all(&buf[..n]).await?;
            size += n as u64;
        }
        sink.flush().await?;

        Ok(ContentDigest {
            sha256: hex::encode(hasher.finalize()),
            size,
        })
    }
}
