//! 전송 통계

use std::time::{Duration, Instant};

/// 단일 전송 통계 (송신/수신 공용)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 처리한 프래그먼트 수
    pub fragments: u64,

    /// 처리한 페이로드 바이트
    pub bytes: u64,

    /// 순서가 어긋나 보류된 프래그먼트 수
    pub out_of_order: u64,

    /// 중복 수신 프래그먼트 수
    pub duplicates: u64,

    /// 동시에 보류된 최대 프래그먼트 수
    pub peak_pending: usize,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            fragments: 0,
            bytes: 0,
            out_of_order: 0,
            duplicates: 0,
            peak_pending: 0,
        }
    }

    /// 프래그먼트 기록
    pub fn record_fragment(&mut self, size: usize) {
        self.fragments += 1;
        self.bytes += size as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Fragments: {} | Bytes: {} | Throughput: {:.2} MB/s | Out-of-order: {} | Duplicates: {}",
            self.elapsed().as_secs_f64(),
            self.fragments,
            self.bytes,
            self.throughput() / 1_000_000.0,
            self.out_of_order,
            self.duplicates,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 서버 전체 통계
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// 수신한 DOWNLOAD 요청 수
    pub requests: u64,

    /// 종료 마커까지 전송 완료한 수
    pub completed: u64,

    /// NOT_FOUND 응답 수
    pub not_found: u64,

    /// INVALID_FORMAT 응답 수
    pub invalid: u64,

    /// INTERNAL_ERROR 응답 또는 전송 중단 수
    pub internal_errors: u64,

    /// 총 전송 프래그먼트 수
    pub fragments_sent: u64,

    /// 총 전송 페이로드 바이트
    pub bytes_sent: u64,
}

impl ServerStats {
    /// 완료된 전송 반영
    pub fn record_transfer(&mut self, transfer: &TransferStats) {
        self.completed += 1;
        self.fragments_sent += transfer.fragments;
        self.bytes_sent += transfer.bytes;
    }

    pub fn summary(&self) -> String {
        format!(
            "Requests: {} | Completed: {} | Not found: {} | Invalid: {} | Internal errors: {} | Fragments: {} | Bytes: {}",
            self.requests,
            self.completed,
            self.not_found,
            self.invalid,
            self.internal_errors,
            self.fragments_sent,
            self.bytes_sent,
        )
    }
}
