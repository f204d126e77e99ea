//! 에러 타입 정의

use thiserror::Error;

/// SFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 요청: {0}")]
    MalformedRequest(String),

    #[error("잘못된 응답: {0}")]
    MalformedResponse(String),

    #[error("잘못된 프레임: {len} bytes (최소 {min} bytes 필요)")]
    MalformedFrame { len: usize, min: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("버퍼 오버플로우: 보류 프래그먼트 최대 {max_pending}개 초과")]
    BufferOverflow { max_pending: usize },

    #[error("순번 오버플로우: 파일 크기 {size} bytes는 u32 순번 범위를 넘음")]
    SequenceOverflow { size: u64 },

    #[error("전송 중 파일 변경됨: expected {expected} bytes, read {actual} bytes")]
    FileChanged { expected: u64, actual: u64 },

    #[error("파일 목록 없음: {0}")]
    FileListMissing(String),

    #[error("워커 실패: {0}")]
    WorkerFailed(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
