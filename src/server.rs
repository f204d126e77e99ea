//! 서버 (송신측)
//!
//! - `DOWNLOAD` 요청마다 별도 태스크에서 전송 처리
//! - 한 번의 청크 단위 읽기로 크기와 다이제스트 계산
//! - 같은 파일 핸들을 처음으로 되감아 프래그먼트 스트리밍 후 종료 마커 전송
//!
//! 재전송은 하지 않음. 전송 실패는 해당 전송만 중단하며 서버 루프는 계속 동작함.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum::digest_reader;
use crate::fragment::FragmentBuilder;
use crate::message::{Command, Descriptor, ErrorReason, Response};
use crate::stats::{ServerStats, TransferStats};
use crate::transport::{Transport, UdpTransport};
use crate::{Config, Error, Result, END_MARKER};

/// 요청 접두사 (형식 오류 응답 판단용)
const DOWNLOAD_PREFIX: &[u8] = b"DOWNLOAD";

/// 파일 서버
pub struct Server<T> {
    /// 설정
    config: Config,

    /// 제공 루트 디렉터리
    root: PathBuf,

    /// 데이터그램 전송
    transport: Arc<T>,

    /// 진행 중 전송 (peer → 파일 이름)
    active: DashMap<SocketAddr, String>,

    /// 서버 통계
    stats: RwLock<ServerStats>,
}

impl Server<UdpTransport> {
    /// UDP 소켓 바인딩 후 서버 생성
    pub async fn bind(config: Config, root: impl Into<PathBuf>, addr: SocketAddr) -> Result<Self> {
        let transport = UdpTransport::bind_with_buffer(addr, config.socket_buffer_size)?;
        Self::new(config, root, transport)
    }
}

impl<T: Transport + 'static> Server<T> {
    pub fn new(config: Config, root: impl Into<PathBuf>, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            root: root.into(),
            transport: Arc::new(transport),
            active: DashMap::new(),
            stats: RwLock::new(ServerStats::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// 통계 반환
    pub fn stats(&self) -> ServerStats {
        self.stats.read().clone()
    }

    /// 진행 중 전송 수
    pub fn active_transfers(&self) -> usize {
        self.active.len()
    }

    /// 수신 루프
    ///
    /// 잘못된 데이터그램이나 수신 에러는 로그만 남기고 계속 진행함
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        // 한도보다 1바이트 크게 받아 초과 요청을 잘림 없이 감지
        let mut buf = vec![0u8; self.config.control_buffer_size + 1];

        info!(
            "SFT 서버 시작: {}, root={:?}",
            self.local_addr()?,
            self.root
        );

        loop {
            let (len, peer) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.transport.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                        continue;
                    }
                },
            };

            self.dispatch(&buf[..len], peer).await;
        }

        info!("SFT 서버 종료: {}", self.stats().summary());
        Ok(())
    }

    /// 데이터그램 하나 처리
    async fn dispatch(self: &Arc<Self>, data: &[u8], peer: SocketAddr) {
        if data.len() > self.config.control_buffer_size {
            warn!("{} 요청이 너무 김: {} bytes 초과", peer, self.config.control_buffer_size);
            if data.starts_with(DOWNLOAD_PREFIX) {
                self.stats.write().requests += 1;
                if let Err(e) = self.reject("", ErrorReason::InvalidFormat, peer).await {
                    warn!("{} 에러 응답 전송 실패: {}", peer, e);
                }
            }
            return;
        }

        match Command::from_bytes(data) {
            Ok(Command::Download(request)) => {
                debug!("DOWNLOAD {} from {}", request.filename, peer);
                self.stats.write().requests += 1;

                // 느린 전송이 서버 루프를 막지 않도록 별도 태스크
                let server = Arc::clone(self);
                tokio::spawn(async move {
                    server.handle(&request.filename, peer).await;
                });
            }
            Ok(Command::Quit) => {
                info!("클라이언트 {} 종료 요청", peer);
            }
            Err(e) if data.starts_with(DOWNLOAD_PREFIX) => {
                warn!("{} 요청 형식 오류: {}", peer, e);
                self.stats.write().requests += 1;
                if let Err(e) = self.reject("", ErrorReason::InvalidFormat, peer).await {
                    warn!("{} 에러 응답 전송 실패: {}", peer, e);
                }
            }
            Err(e) => {
                warn!("{} 알 수 없는 데이터그램 무시: {}", peer, e);
            }
        }
    }

    /// 파일 하나 전송
    ///
    /// 스트림 끝까지 전송했으면 전송 통계 반환
    pub async fn handle(&self, requested_filename: &str, peer: SocketAddr) -> Option<TransferStats> {
        self.active.insert(peer, requested_filename.to_string());
        let result = self.transfer(requested_filename, peer).await;
        self.active.remove(&peer);

        match result {
            Ok(Some(stats)) => {
                info!(
                    "{} → {} 전송 완료: {}",
                    requested_filename,
                    peer,
                    stats.summary()
                );
                self.stats.write().record_transfer(&stats);
                Some(stats)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{} → {} 전송 중단: {}", requested_filename, peer, e);
                self.stats.write().internal_errors += 1;
                None
            }
        }
    }

    async fn transfer(&self, requested: &str, peer: SocketAddr) -> Result<Option<TransferStats>> {
        let Some(path) = self.resolve(requested) else {
            self.reject(requested, ErrorReason::InvalidFormat, peer).await?;
            return Ok(None);
        };

        let mut file = match open_regular(&path).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                debug!("파일 없음: {:?}", path);
                self.reject(requested, ErrorReason::NotFound, peer).await?;
                return Ok(None);
            }
            Err(e) => {
                warn!("파일 열기 실패 {:?}: {}", path, e);
                self.reject(requested, ErrorReason::InternalError, peer).await?;
                return Ok(None);
            }
        };

        let descriptor = match self.describe(requested, &mut file).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("디스크립터 계산 실패 {:?}: {}", path, e);
                self.reject(requested, ErrorReason::InternalError, peer).await?;
                return Ok(None);
            }
        };

        self.transport
            .send_to(&Response::Ok(descriptor.clone()).to_bytes(), peer)
            .await?;
        debug!(
            "디스크립터 전송: {} SIZE {} CHECKSUM {}",
            descriptor.filename, descriptor.total_size, descriptor.checksum
        );

        self.stream(&mut file, &descriptor, peer).await.map(Some)
    }

    /// 요청 이름을 루트 아래 경로로 변환 (절대 경로, `..` 거부)
    fn resolve(&self, requested: &str) -> Option<PathBuf> {
        let relative = Path::new(requested);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        safe.then(|| self.root.join(relative))
    }

    /// 한 번의 청크 단위 읽기로 크기와 체크섬 계산 후 파일을 처음으로 되감음
    async fn describe(&self, requested: &str, file: &mut File) -> Result<Descriptor> {
        file.seek(SeekFrom::Start(0)).await?;
        let (total_size, checksum) = digest_reader(file, self.config.read_chunk_size).await?;

        if self.config.fragments_for(total_size) > u32::MAX as u64 + 1 {
            return Err(Error::SequenceOverflow { size: total_size });
        }

        file.seek(SeekFrom::Start(0)).await?;
        Ok(Descriptor {
            filename: requested.to_string(),
            total_size,
            checksum,
        })
    }

    /// 프래그먼트 스트리밍 후 종료 마커 전송
    ///
    /// 디스크립터 크기까지만 읽음. 그보다 적게 읽었으면 두 번의 읽기
    /// 사이에 파일이 줄어든 것이므로 `FileChanged`. 늘어난 부분은 보내지 않음
    async fn stream(
        &self,
        file: &mut File,
        descriptor: &Descriptor,
        peer: SocketAddr,
    ) -> Result<TransferStats> {
        let mut builder = FragmentBuilder::new(self.config.fragment_size);
        let mut stats = TransferStats::new();
        let mut pacer = self.config.fragment_interval().map(Pacer::new);
        let mut reader = (&mut *file).take(descriptor.total_size);

        while let Some(fragment) = builder.next_from(&mut reader).await? {
            if let Some(pacer) = pacer.as_mut() {
                pacer.wait().await;
            }
            self.transport.send_to(&fragment.to_bytes(), peer).await?;
            stats.record_fragment(fragment.len());
        }

        self.transport.send_to(END_MARKER, peer).await?;

        if stats.bytes != descriptor.total_size {
            return Err(Error::FileChanged {
                expected: descriptor.total_size,
                actual: stats.bytes,
            });
        }

        Ok(stats)
    }

    /// `ERR` 응답 전송
    async fn reject(&self, filename: &str, reason: ErrorReason, peer: SocketAddr) -> Result<()> {
        {
            let mut stats = self.stats.write();
            match reason {
                ErrorReason::NotFound => stats.not_found += 1,
                ErrorReason::InvalidFormat => stats.invalid += 1,
                ErrorReason::InternalError => stats.internal_errors += 1,
            }
        }

        let response = Response::Err {
            filename: filename.to_string(),
            reason,
        };
        self.transport.send_to(&response.to_bytes(), peer).await
    }
}

/// 전송 간격 조절기
///
/// 타이머 해상도(약 1ms)보다 짧은 간격도 평균 속도를 지키도록 마감 시각을
/// 누적하고, 밀린 만큼은 최대 `PACER_BURST`개까지 몰아서 보냄
struct Pacer {
    interval: Duration,
    burst: Duration,
    next: Instant,
}

/// 한 번에 몰아서 보낼 수 있는 최대 프래그먼트 수
const PACER_BURST: u32 = 16;

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            burst: interval * PACER_BURST,
            next: Instant::now(),
        }
    }

    async fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            tokio::time::sleep_until(self.next).await;
        } else if now.duration_since(self.next) > self.burst {
            self.next = now.checked_sub(self.burst).unwrap_or(now);
        }
        self.next += self.interval;
    }
}

/// 일반 파일 열기 (없거나 파일이 아니면 None)
async fn open_regular(path: &Path) -> Result<Option<File>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if !file.metadata().await?.is_file() {
        return Ok(None);
    }
    Ok(Some(file))
}
