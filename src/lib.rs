//! # SFT (Sequenced File Transfer)
//!
//! UDP 기반 순번 프래그먼트 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **요청/응답 핸드쉐이크**: `DOWNLOAD` 요청 → `OK`/`ERR` 디스크립터 응답
//! - **순번 프래그먼트**: 4바이트 빅엔디언 순번 + 최대 4096바이트 페이로드
//! - **순서 무관 재조립**: 먼저 도착한 프래그먼트는 보류 후 연속될 때 기록
//! - **종단 무결성 검증**: 크기 + MD5 다이제스트 일치 시에만 최종 파일로 교체
//! - **워커 풀**: 파일 목록을 고정 수의 동시 워커로 다운로드
//!
//! 재전송/혼잡제어는 하지 않음. 손실은 감지만 하고 해당 전송 시도 전체를 실패 처리함.

pub mod checksum;
pub mod client;
pub mod config;
pub mod error;
pub mod filelist;
pub mod fragment;
pub mod message;
pub mod pool;
pub mod reassembly;
pub mod server;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use checksum::Checksum;
pub use client::{DownloadWorker, FailureReason, TransferOutcome, TransferState, TransferStatus};
pub use config::{Config, RetryPolicy};
pub use error::{Error, Result};
pub use fragment::{Fragment, FragmentBuilder, Frame, SequenceNumber};
pub use message::{Command, Descriptor, ErrorReason, Request, Response};
pub use pool::WorkerPool;
pub use reassembly::{Placement, ReassemblyBuffer};
pub use server::Server;
pub use stats::{ServerStats, TransferStats};
pub use transport::{Connector, Transport, UdpConnector, UdpTransport};

/// 기본 프래그먼트 페이로드 크기 (바이트)
pub const DEFAULT_FRAGMENT_SIZE: usize = 4096;

/// 순번 접두사 길이 (u32 빅엔디언)
pub const SEQUENCE_PREFIX_LEN: usize = 4;

/// 종료 마커 리터럴
///
/// 순번 접두사(4바이트)보다 짧으므로 어떤 프래그먼트와도 구별됨
pub const END_MARKER: &[u8] = b"END";

/// UDP 데이터그램 최대 페이로드 (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// 기본 소켓 커널 버퍼 요청 크기 (2MB)
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// 기본 수신 타임아웃 (밀리초)
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 5000;

/// 기본 동시 워커 수
pub const DEFAULT_WORKERS: usize = 4;

/// 수신 중인 임시 파일 접미사
pub const PROVISIONAL_SUFFIX: &str = ".download";
