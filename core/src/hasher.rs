use crate::{ContentHash, HashAlgorithm};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental content hasher over either supported algorithm.
pub enum ContentHasher {
    Md5(md5::Context),
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => ContentHasher::Md5(md5::Context::new()),
            HashAlgorithm::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Md5(ctx) => ctx.consume(data),
            ContentHasher::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    pub fn finalize(self) -> ContentHash {
        match self {
            ContentHasher::Md5(ctx) => ContentHash::from(ctx.compute()),
            ContentHasher::Blake3(hasher) => ContentHash::from(hasher.finalize()),
        }
    }
}

#[cfg(test)]
pub(crate) fn hash_data(algorithm: HashAlgorithm, data: &[u8]) -> ContentHash {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hashes everything `reader` yields, returning the digest and the byte count.
pub async fn hash_reader<R>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<(ContentHash, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize(), total))
}

/// Side of a streaming copy that failed.
#[derive(Debug)]
pub enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Streams `reader` into `writer`, hashing the bytes as they pass through.
///
/// The writer is shut down once the reader is exhausted.
pub async fn copy_hashed<R, W>(
    algorithm: HashAlgorithm,
    reader: &mut R,
    writer: &mut W,
) -> std::result::Result<(ContentHash, u64), CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(CopyError::Read)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await.map_err(CopyError::Write)?;
        total += n as u64;
    }
    writer.shutdown().await.map_err(CopyError::Write)?;
    Ok((hasher.finalize(), total))
}
