//! 프로토콜 설정

use std::time::Duration;

use rand::Rng;

use crate::{
    Error, Result, DEFAULT_FRAGMENT_SIZE, DEFAULT_RECV_TIMEOUT_MS, DEFAULT_SOCKET_BUFFER_SIZE,
    DEFAULT_WORKERS, MAX_DATAGRAM_SIZE, SEQUENCE_PREFIX_LEN,
};

/// SFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 프래그먼트 페이로드 최대 크기 (바이트)
    pub fragment_size: usize,

    /// 수신 타임아웃 (밀리초)
    /// 디스크립터 대기와 프래그먼트 수신에 동일하게 적용
    pub recv_timeout_ms: u64,

    /// 최대 동시 워커 수
    pub max_workers: usize,

    /// 요청 데이터그램 최대 길이 (초과하면 INVALID_FORMAT)
    pub control_buffer_size: usize,

    /// 데이터그램 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 소켓 커널 송수신 버퍼 요청 크기 (SO_RCVBUF/SO_SNDBUF)
    /// 커널 상한(net.core.rmem_max 등)에 따라 줄어들 수 있음
    pub socket_buffer_size: usize,

    /// 다이제스트 계산 시 읽기 단위 (바이트)
    pub read_chunk_size: usize,

    /// 프래그먼트 전송 간격 (마이크로초)
    /// 0이면 최대 속도로 전송. 재전송이 없으므로 수신측 소켓 버퍼가
    /// 넘치지 않을 정도로 유지해야 함
    pub fragment_interval_us: u64,

    /// 보류(순서 어긋난) 프래그먼트 최대 개수
    pub max_pending_fragments: usize,

    /// 전송 시도 재시도 정책
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS, // 5초
            max_workers: DEFAULT_WORKERS,
            control_buffer_size: 1024,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            read_chunk_size: 64 * 1024, // 64KB
            fragment_interval_us: 50,   // 최대 약 80MB/s
            max_pending_fragments: 16 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 수신 타임아웃
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// 프래그먼트 전송 간격 (0이면 None)
    pub fn fragment_interval(&self) -> Option<Duration> {
        (self.fragment_interval_us > 0).then(|| Duration::from_micros(self.fragment_interval_us))
    }

    /// 파일 크기에 필요한 프래그먼트 수
    pub fn fragments_for(&self, total_size: u64) -> u64 {
        total_size.div_ceil(self.fragment_size as u64)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.fragment_size == 0 || self.fragment_size + SEQUENCE_PREFIX_LEN > MAX_DATAGRAM_SIZE {
            return Err(Error::InvalidConfig(format!(
                "fragment_size는 1 ~ {} 사이여야 함: {}",
                MAX_DATAGRAM_SIZE - SEQUENCE_PREFIX_LEN,
                self.fragment_size
            )));
        }
        if self.recv_timeout_ms == 0 {
            return Err(Error::InvalidConfig("recv_timeout_ms는 0일 수 없음".into()));
        }
        if self.max_workers == 0 {
            return Err(Error::InvalidConfig("max_workers는 0일 수 없음".into()));
        }
        if self.recv_buffer_size < self.fragment_size + SEQUENCE_PREFIX_LEN {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size({})가 프래그먼트 프레임보다 작음",
                self.recv_buffer_size
            )));
        }
        if self.control_buffer_size == 0 {
            return Err(Error::InvalidConfig("control_buffer_size는 0일 수 없음".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::InvalidConfig("read_chunk_size는 0일 수 없음".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry.max_attempts는 0일 수 없음".into()));
        }
        Ok(())
    }

    /// 저사양 기기용 설정
    pub fn low_spec() -> Self {
        Self {
            max_workers: 2,
            read_chunk_size: 16 * 1024,
            fragment_interval_us: 100, // 약간의 간격
            max_pending_fragments: 2048,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            fragment_size: 1024, // 작은 프래그먼트
            recv_timeout_ms: 10_000,
            fragment_interval_us: 200,
            retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

/// 재시도 정책
///
/// 다운로드 워커 상태 머신 전체를 감싸는 확장 지점.
/// 기본값은 1회 시도 (재시도 없음).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (1이면 재시도 없음)
    pub max_attempts: u32,

    /// 첫 재시도 전 대기 (밀리초)
    pub base_backoff_ms: u64,

    /// 최대 대기 (밀리초)
    pub max_backoff_ms: u64,

    /// 대기 시간에 더할 최대 지터 (밀리초)
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_backoff_ms: 500,
            max_backoff_ms: 8000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// 재시도 없음
    pub fn none() -> Self {
        Self::default()
    }

    /// `attempt`번째 시도 실패 후 대기 시간 (지수 백오프 + 지터)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .base_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// 추가 시도 가능 여부
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
