//! 다운로드 워커 (클라이언트측)
//!
//! 파일 하나의 전송 시도를 상태 머신으로 진행함
//!
//! ```text
//! REQUESTING → AWAITING_DESCRIPTOR → RECEIVING → { VERIFIED | FAILED }
//! ```
//!
//! - 시도마다 전송 핸들 1개를 열고, 종료 상태에서 무조건 닫음
//! - 수신 데이터는 시도마다 고유한 `<name>.XXXXXX.download` 임시 파일에 기록
//!   (같은 이름을 동시에 받는 워커끼리 임시 파일을 공유하지 않음)
//! - 검증 성공 시 최종 이름으로 rename, 실패 시 임시 파일 삭제
//! - 취소 토큰은 모든 수신 대기 지점에서 확인

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::fragment::Frame;
use crate::message::{Descriptor, ErrorReason, Request, Response};
use crate::reassembly::ReassemblyBuffer;
use crate::stats::TransferStats;
use crate::transport::{Connector, Transport};
use crate::{Config, Error, PROVISIONAL_SUFFIX};

/// 진행률 로그 간격 (프래그먼트 수)
const PROGRESS_EVERY: u64 = 256;

/// 임시 파일 쓰기 버퍼 크기
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Requesting,
    AwaitingDescriptor,
    Receiving,
    Verified,
    Failed,
}

/// 최종 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Verified,
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Verified => f.write_str("VERIFIED"),
            TransferStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// 실패 이유
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("not-found")]
    NotFound,

    #[error("server-error: {0}")]
    ServerError(ErrorReason),

    #[error("protocol-error: {0}")]
    Protocol(String),

    #[error("no-response")]
    NoResponse,

    #[error("incomplete: {received}/{expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("checksum-mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: Checksum, actual: Checksum },

    #[error("io-error: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

impl FailureReason {
    /// 같은 파일을 다시 시도할 가치가 있는지
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::NoResponse
                | FailureReason::Incomplete { .. }
                | FailureReason::ChecksumMismatch { .. }
        )
    }
}

impl From<Error> for FailureReason {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => FailureReason::Io(io.to_string()),
            other => FailureReason::Protocol(other.to_string()),
        }
    }
}

/// 파일별 전송 결과 기록
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub filename: String,
    pub status: TransferStatus,
    pub reason: Option<FailureReason>,

    /// 최종 파일 경로 (VERIFIED일 때만)
    pub path: Option<PathBuf>,

    /// 시도 횟수
    pub attempts: u32,

    pub elapsed: Duration,
    pub stats: TransferStats,
}

impl TransferOutcome {
    fn verified(filename: &str, path: PathBuf, stats: TransferStats, started: Instant) -> Self {
        Self {
            filename: filename.to_string(),
            status: TransferStatus::Verified,
            reason: None,
            path: Some(path),
            attempts: 1,
            elapsed: started.elapsed(),
            stats,
        }
    }

    pub(crate) fn failed(filename: &str, reason: FailureReason, started: Instant) -> Self {
        Self {
            filename: filename.to_string(),
            status: TransferStatus::Failed,
            reason: Some(reason),
            path: None,
            attempts: 1,
            elapsed: started.elapsed(),
            stats: TransferStats::new(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == TransferStatus::Verified
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.filename, self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({})", reason)?;
        }
        if self.attempts > 1 {
            write!(f, " after {} attempts", self.attempts)?;
        }
        Ok(())
    }
}

/// 다운로드 워커
pub struct DownloadWorker<C> {
    config: Config,
    connector: Arc<C>,
    output_dir: PathBuf,
}

impl<C: Connector> DownloadWorker<C> {
    pub fn new(config: Config, connector: C, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            output_dir: output_dir.into(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 파일 하나에 대한 전송 시도 1회
    pub async fn download(&self, filename: &str, cancel: &CancellationToken) -> TransferOutcome {
        let started = Instant::now();

        let Some(final_path) = self.target_path(filename) else {
            return TransferOutcome::failed(
                filename,
                FailureReason::Protocol(format!("안전하지 않은 파일 이름: {}", filename)),
                started,
            );
        };

        let transport = match self.connector.open().await {
            Ok(transport) => transport,
            Err(e) => return TransferOutcome::failed(filename, e.into(), started),
        };

        let result = self.run(&transport, filename, &final_path, cancel).await;

        // 종료 상태에서 전송 핸들 닫기
        drop(transport);

        match result {
            Ok(stats) => {
                info!("{} 다운로드 및 검증 완료 ({})", filename, stats.summary());
                TransferOutcome::verified(filename, final_path, stats, started)
            }
            Err(reason) => {
                warn!("{} 다운로드 실패: {}", filename, reason);
                TransferOutcome::failed(filename, reason, started)
            }
        }
    }

    async fn run(
        &self,
        transport: &C::Transport,
        filename: &str,
        final_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferStats, FailureReason> {
        let server = self.connector.server_addr();
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        // REQUESTING
        let mut state = TransferState::Requesting;
        debug!("{} {:?}", filename, state);
        transport
            .send_to(&Request::new(filename).to_bytes(), server)
            .await?;

        // AWAITING_DESCRIPTOR
        state = TransferState::AwaitingDescriptor;
        debug!("{} {:?}", filename, state);
        let descriptor = self
            .await_descriptor(transport, server, &mut buf, cancel)
            .await?;
        if descriptor.filename != filename {
            return Err(FailureReason::Protocol(format!(
                "다른 파일의 디스크립터: {}",
                descriptor.filename
            )));
        }

        // RECEIVING
        state = TransferState::Receiving;
        debug!(
            "{} {:?} (size: {} bytes, checksum: {})",
            filename, state, descriptor.total_size, descriptor.checksum
        );
        let (file, provisional) = create_provisional(final_path).await?;
        let result = self
            .receive(transport, server, &mut buf, &descriptor, file, cancel)
            .await;

        match result {
            Ok(stats) => match provisional.persist(final_path) {
                Ok(()) => {
                    debug!("{} {:?}", filename, TransferState::Verified);
                    Ok(stats)
                }
                // 실패 시 e.path가 drop되며 임시 파일도 삭제됨
                Err(e) => Err(FailureReason::Io(e.error.to_string())),
            },
            Err(reason) => {
                debug!("{} {:?}", filename, TransferState::Failed);
                discard(provisional);
                Err(reason)
            }
        }
    }

    /// 디스크립터 응답 대기
    async fn await_descriptor(
        &self,
        transport: &C::Transport,
        server: SocketAddr,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<Descriptor, FailureReason> {
        loop {
            let Some((len, from)) = self.recv(transport, buf, cancel).await? else {
                return Err(FailureReason::NoResponse);
            };
            if from != server {
                debug!("서버가 아닌 {}의 데이터그램 무시", from);
                continue;
            }

            return match Response::from_bytes(&buf[..len])? {
                Response::Ok(descriptor) => Ok(descriptor),
                Response::Err {
                    reason: ErrorReason::NotFound,
                    ..
                } => Err(FailureReason::NotFound),
                Response::Err { reason, .. } => Err(FailureReason::ServerError(reason)),
            };
        }
    }

    /// 프래그먼트 수신 후 임시 파일 검증
    async fn receive(
        &self,
        transport: &C::Transport,
        server: SocketAddr,
        buf: &mut [u8],
        descriptor: &Descriptor,
        file: File,
        cancel: &CancellationToken,
    ) -> Result<TransferStats, FailureReason> {
        let mut buffer = ReassemblyBuffer::new(
            BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            descriptor.total_size,
            self.config.max_pending_fragments,
        );

        while !buffer.is_complete() {
            let Some((len, from)) = self.recv(transport, buf, cancel).await? else {
                debug!(
                    "{} 수신 타임아웃: {}/{} bytes",
                    descriptor.filename,
                    buffer.bytes_written(),
                    descriptor.total_size
                );
                break;
            };
            if from != server {
                continue;
            }

            match Frame::from_bytes(&buf[..len])? {
                Frame::End => break,
                Frame::Fragment(fragment) => {
                    buffer.accept(fragment).await?;
                }
            }

            let fragments = buffer.stats().fragments;
            if fragments > 0 && fragments % PROGRESS_EVERY == 0 && descriptor.total_size > 0 {
                debug!(
                    "[Progress {}] {}/{} ({:.1}%)",
                    descriptor.filename,
                    buffer.bytes_written(),
                    descriptor.total_size,
                    buffer.bytes_written() as f64 / descriptor.total_size as f64 * 100.0
                );
            }
        }

        let result = buffer.finish().await?;
        result
            .writer
            .get_ref()
            .sync_all()
            .await
            .map_err(Error::from)?;

        if result.bytes_written != descriptor.total_size {
            return Err(FailureReason::Incomplete {
                received: result.bytes_written,
                expected: descriptor.total_size,
            });
        }
        if !result.matches(descriptor) {
            return Err(FailureReason::ChecksumMismatch {
                expected: descriptor.checksum,
                actual: result.checksum,
            });
        }
        Ok(result.stats)
    }

    /// 취소 가능한 타임아웃 수신
    async fn recv(
        &self,
        transport: &C::Transport,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<Option<(usize, SocketAddr)>, FailureReason> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            result = transport.recv_timeout(buf, self.config.recv_timeout()) => {
                result.map_err(FailureReason::from)
            }
        }
    }

    /// 출력 디렉터리 아래 최종 경로 (절대 경로, `..` 거부)
    fn target_path(&self, filename: &str) -> Option<PathBuf> {
        let relative = Path::new(filename);
        let safe = !filename.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir));
        safe.then(|| self.output_dir.join(relative))
    }
}

/// 최종 경로와 같은 디렉터리에 이번 시도 전용 임시 파일 생성
///
/// 같은 디렉터리여야 rename이 원자적임
async fn create_provisional(final_path: &Path) -> Result<(File, TempPath), FailureReason> {
    let dir = final_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(dir).await.map_err(Error::from)?;

    let mut prefix = final_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    prefix.push(".");

    let provisional = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(PROVISIONAL_SUFFIX)
        .tempfile_in(dir)
        .map_err(Error::from)?;

    // 임시 파일 기본 권한(0600) 대신 일반 파일 권한
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        provisional
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(Error::from)?;
    }

    let (file, path) = provisional.into_parts();
    debug!("임시 파일 생성: {:?}", path);
    Ok((File::from_std(file), path))
}

/// 임시 파일 삭제
fn discard(provisional: TempPath) {
    let path = provisional.to_path_buf();
    match provisional.close() {
        Ok(()) => debug!("임시 파일 삭제: {:?}", path),
        Err(e) => warn!("임시 파일 삭제 실패 {:?}: {}", path, e),
    }
}
