//! 재조립 버퍼 (클라이언트측)
//!
//! 도착 순서와 무관하게 프래그먼트를 받아 연속 바이트 스트림으로 복원함.
//! 프래그먼트는 순번이 `expected_sequence`와 같을 때만 출력에 기록되고
//! 다이제스트에 반영됨. 먼저 도착한 프래그먼트는 `pending`에 보류됨.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::checksum::{Checksum, ChecksumHasher};
use crate::fragment::{Fragment, SequenceNumber};
use crate::message::Descriptor;
use crate::stats::TransferStats;
use crate::{Error, Result};

/// 프래그먼트 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// 기록됨 (`drained`: 함께 해소된 보류 프래그먼트 수)
    Written { drained: usize },

    /// 순서가 어긋나 보류됨
    Buffered,

    /// 이미 기록했거나 보류 중인 순번
    Duplicate,
}

/// 재조립 상태
pub struct ReassemblyBuffer<W> {
    writer: W,
    total_size: u64,
    expected_sequence: u64,
    pending: BTreeMap<SequenceNumber, Bytes>,
    max_pending: usize,
    hasher: ChecksumHasher,
    bytes_written: u64,
    stats: TransferStats,
}

impl<W: AsyncWrite + Unpin> ReassemblyBuffer<W> {
    pub fn new(writer: W, total_size: u64, max_pending: usize) -> Self {
        Self {
            writer,
            total_size,
            expected_sequence: 0,
            pending: BTreeMap::new(),
            max_pending,
            hasher: ChecksumHasher::new(),
            bytes_written: 0,
            stats: TransferStats::new(),
        }
    }

    /// 프래그먼트 수용
    pub async fn accept(&mut self, fragment: Fragment) -> Result<Placement> {
        let sequence = fragment.sequence as u64;

        if sequence < self.expected_sequence || self.pending.contains_key(&fragment.sequence) {
            self.stats.duplicates += 1;
            return Ok(Placement::Duplicate);
        }

        if sequence > self.expected_sequence {
            if self.pending.len() >= self.max_pending {
                return Err(Error::BufferOverflow {
                    max_pending: self.max_pending,
                });
            }
            self.stats.out_of_order += 1;
            self.pending.insert(fragment.sequence, fragment.payload);
            self.stats.peak_pending = self.stats.peak_pending.max(self.pending.len());
            return Ok(Placement::Buffered);
        }

        self.write(fragment.payload).await?;

        // 연속된 보류 프래그먼트 해소
        let mut drained = 0;
        while let Some(payload) = SequenceNumber::try_from(self.expected_sequence)
            .ok()
            .and_then(|next| self.pending.remove(&next))
        {
            self.write(payload).await?;
            drained += 1;
        }

        Ok(Placement::Written { drained })
    }

    async fn write(&mut self, payload: Bytes) -> Result<()> {
        self.writer.write_all(&payload).await?;
        self.hasher.update(&payload);
        self.bytes_written += payload.len() as u64;
        self.expected_sequence += 1;
        self.stats.record_fragment(payload.len());
        Ok(())
    }

    /// 목표 크기 도달 여부
    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.total_size
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 다음에 필요한 순번
    pub fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 기록 종료: 출력 flush 후 검증 결과 반환
    pub async fn finish(mut self) -> Result<Reassembled<W>> {
        self.writer.flush().await?;
        Ok(Reassembled {
            writer: self.writer,
            bytes_written: self.bytes_written,
            checksum: self.hasher.finalize(),
            stats: self.stats,
        })
    }
}

/// 재조립 종료 결과
pub struct Reassembled<W> {
    pub writer: W,
    pub bytes_written: u64,
    pub checksum: Checksum,
    pub stats: TransferStats,
}

impl<W> Reassembled<W> {
    /// 디스크립터와 크기 및 체크섬이 모두 일치하는지
    pub fn matches(&self, descriptor: &Descriptor) -> bool {
        self.bytes_written == descriptor.total_size && self.checksum == descriptor.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentBuilder;
    use rand::seq::SliceRandom;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    fn descriptor(data: &[u8]) -> Descriptor {
        Descriptor {
            filename: "sample".into(),
            total_size: data.len() as u64,
            checksum: Checksum::compute(data),
        }
    }

    async fn reassemble(fragments: Vec<Fragment>, total: u64) -> Reassembled<Vec<u8>> {
        let mut buffer = ReassemblyBuffer::new(Vec::new(), total, 1024);
        for fragment in fragments {
            buffer.accept(fragment).await.unwrap();
        }
        buffer.finish().await.unwrap()
    }

    #[tokio::test]
    async fn test_in_order() {
        let data = sample(10_000);
        let fragments = FragmentBuilder::new(4096).split(&data).unwrap();
        let result = reassemble(fragments, data.len() as u64).await;

        assert_eq!(result.writer, data);
        assert!(result.matches(&descriptor(&data)));
        assert_eq!(result.stats.fragments, 3);
        assert_eq!(result.stats.out_of_order, 0);
    }

    #[tokio::test]
    async fn test_reverse_order_drains_pending() {
        let data = sample(500);
        let mut fragments = FragmentBuilder::new(100).split(&data).unwrap();
        fragments.reverse();

        let mut buffer = ReassemblyBuffer::new(Vec::new(), 500, 1024);
        for fragment in fragments.drain(..4) {
            assert_eq!(buffer.accept(fragment).await.unwrap(), Placement::Buffered);
            assert_eq!(buffer.bytes_written(), 0);
        }
        assert_eq!(buffer.pending_len(), 4);

        let first = fragments.pop().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(
            buffer.accept(first).await.unwrap(),
            Placement::Written { drained: 4 }
        );
        assert!(buffer.is_complete());
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.expected_sequence(), 5);

        let result = buffer.finish().await.unwrap();
        assert_eq!(result.writer, data);
        assert_eq!(result.stats.peak_pending, 4);
    }

    #[tokio::test]
    async fn test_any_permutation_matches_in_order() {
        let data = sample(20_000);
        let fragments = FragmentBuilder::new(1000).split(&data).unwrap();
        let mut rng = rand::thread_rng();

        for _ in 0..25 {
            let mut shuffled = fragments.clone();
            shuffled.shuffle(&mut rng);
            let result = reassemble(shuffled, data.len() as u64).await;
            assert_eq!(result.writer, data);
            assert!(result.matches(&descriptor(&data)));
        }
    }

    #[tokio::test]
    async fn test_duplicates_ignored() {
        let data = sample(300);
        let fragments = FragmentBuilder::new(100).split(&data).unwrap();

        let mut buffer = ReassemblyBuffer::new(Vec::new(), 300, 1024);
        buffer.accept(fragments[0].clone()).await.unwrap();
        assert_eq!(
            buffer.accept(fragments[0].clone()).await.unwrap(),
            Placement::Duplicate
        );
        buffer.accept(fragments[2].clone()).await.unwrap();
        assert_eq!(
            buffer.accept(fragments[2].clone()).await.unwrap(),
            Placement::Duplicate
        );
        buffer.accept(fragments[1].clone()).await.unwrap();

        let result = buffer.finish().await.unwrap();
        assert_eq!(result.writer, data);
        assert_eq!(result.stats.duplicates, 2);
    }

    #[tokio::test]
    async fn test_missing_fragment_never_matches() {
        let data = sample(10_000);
        let mut fragments = FragmentBuilder::new(4096).split(&data).unwrap();
        fragments.remove(1);

        let result = reassemble(fragments, data.len() as u64).await;
        assert_eq!(result.bytes_written, 4096);
        assert!(!result.matches(&descriptor(&data)));
    }

    #[tokio::test]
    async fn test_same_size_different_content_fails_checksum() {
        let data = sample(200);
        let mut corrupted = data.clone();
        corrupted[150] ^= 0xff;
        let fragments = FragmentBuilder::new(100).split(&corrupted).unwrap();

        let result = reassemble(fragments, 200).await;
        assert_eq!(result.bytes_written, 200);
        assert!(!result.matches(&descriptor(&data)));
    }

    #[tokio::test]
    async fn test_empty_transfer_is_complete() {
        let buffer = ReassemblyBuffer::new(Vec::new(), 0, 16);
        assert!(buffer.is_complete());
        let result = buffer.finish().await.unwrap();
        assert_eq!(result.checksum, Checksum::empty());
        assert!(result.matches(&descriptor(&[])));
    }

    #[tokio::test]
    async fn test_pending_overflow() {
        let mut buffer = ReassemblyBuffer::new(Vec::new(), 1000, 2);
        buffer
            .accept(Fragment::new(5, Bytes::from_static(b"x")))
            .await
            .unwrap();
        buffer
            .accept(Fragment::new(6, Bytes::from_static(b"x")))
            .await
            .unwrap();
        assert!(matches!(
            buffer.accept(Fragment::new(7, Bytes::from_static(b"x"))).await,
            Err(Error::BufferOverflow { max_pending: 2 })
        ));
    }
}
