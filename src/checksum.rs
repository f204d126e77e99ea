//! 128비트 콘텐츠 다이제스트 (MD5)

use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// 다이제스트 길이 (바이트)
pub const CHECKSUM_LEN: usize = 16;

/// 파일 내용 체크섬
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    pub fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    /// 한 번에 계산
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = ChecksumHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// 빈 콘텐츠의 다이제스트
    pub fn empty() -> Self {
        ChecksumHasher::new().finalize()
    }

    /// 소문자 32자 hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; CHECKSUM_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::MalformedResponse(format!("체크섬 '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// 증분 다이제스트 누산기
#[derive(Clone, Default)]
pub struct ChecksumHasher {
    inner: Md5,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Checksum {
        let digest = self.inner.finalize();
        let mut bytes = [0u8; CHECKSUM_LEN];
        bytes.copy_from_slice(&digest);
        Checksum(bytes)
    }
}

impl fmt::Debug for ChecksumHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChecksumHasher")
    }
}

/// 리더를 끝까지 청크 단위로 읽어 (크기, 체크섬) 계산
///
/// 전체 내용을 메모리에 올리지 않음
pub async fn digest_reader<R: AsyncRead + Unpin>(
    reader: &mut R,
    chunk_size: usize,
) -> Result<(u64, Checksum)> {
    let mut hasher = ChecksumHasher::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((total, hasher.finalize()))
}
