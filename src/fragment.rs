//! 프래그먼트와 종료 마커 정의
//!
//! - Fragment: `[u32 BE 순번][페이로드]` 한 데이터그램
//! - End: 리터럴 `END` 3바이트 한 데이터그램
//!
//! 길이 필드가 없으므로 데이터그램 경계가 곧 프레임 경계임

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result, END_MARKER, SEQUENCE_PREFIX_LEN};

/// 프래그먼트 순번 (0부터 1씩 증가)
pub type SequenceNumber = u32;

/// 프래그먼트 (송신 데이터그램 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// 순번
    pub sequence: SequenceNumber,

    /// 실제 데이터
    pub payload: Bytes,
}

impl Fragment {
    pub fn new(sequence: SequenceNumber, payload: Bytes) -> Self {
        Self { sequence, payload }
    }

    /// 프래그먼트를 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(SEQUENCE_PREFIX_LEN + self.payload.len());
        buf.put_u32(self.sequence);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// 수신 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Fragment(Fragment),
    End,
}

impl Frame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::Fragment(fragment) => fragment.to_bytes(),
            Frame::End => END_MARKER.to_vec(),
        }
    }

    /// 바이트에서 프레임 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes == END_MARKER {
            return Ok(Frame::End);
        }
        if bytes.len() < SEQUENCE_PREFIX_LEN {
            return Err(Error::MalformedFrame {
                len: bytes.len(),
                min: SEQUENCE_PREFIX_LEN,
            });
        }

        let sequence = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let payload = Bytes::copy_from_slice(&bytes[SEQUENCE_PREFIX_LEN..]);
        Ok(Frame::Fragment(Fragment { sequence, payload }))
    }
}

/// 프래그먼트 생성기 (송신측)
pub struct FragmentBuilder {
    fragment_size: usize,
    next_sequence: u64,
}

impl FragmentBuilder {
    pub fn new(fragment_size: usize) -> Self {
        Self {
            fragment_size: fragment_size.max(1),
            next_sequence: 0,
        }
    }

    /// 다음에 부여할 순번
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// 메모리 데이터를 프래그먼트들로 분할
    pub fn split(&mut self, data: &[u8]) -> Result<Vec<Fragment>> {
        data.chunks(self.fragment_size)
            .map(|chunk| self.seal(Bytes::copy_from_slice(chunk)))
            .collect()
    }

    /// 리더에서 다음 프래그먼트를 읽음 (EOF면 None)
    ///
    /// 마지막을 제외한 모든 프래그먼트는 정확히 `fragment_size` 바이트
    pub async fn next_from<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Fragment>> {
        let mut buf = BytesMut::zeroed(self.fragment_size);
        let mut filled = 0;

        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        self.seal(buf.freeze()).map(Some)
    }

    fn seal(&mut self, payload: Bytes) -> Result<Fragment> {
        let sequence = SequenceNumber::try_from(self.next_sequence).map_err(|_| {
            Error::SequenceOverflow {
                size: self.next_sequence * self.fragment_size as u64,
            }
        })?;
        self.next_sequence += 1;
        Ok(Fragment::new(sequence, payload))
    }
}
