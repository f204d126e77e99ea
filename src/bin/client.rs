//! SFT 클라이언트 - Sequenced File Transfer
//!
//! 파일 목록의 파일들을 워커 풀로 동시에 다운로드하고 검증
//!
//! 사용법:
//!   cargo run --release --bin sft-client -- <HOST> <PORT> <FILE_LIST> [WORKERS] [OPTIONS]
//!
//! 예시:
//!   # 워커 4개 (기본)
//!   cargo run --release --bin sft-client -- 127.0.0.1 9000 files.txt
//!
//!   # 워커 8개, 3회까지 재시도, downloads/ 에 저장
//!   cargo run --release --bin sft-client -- 192.168.1.100 9000 files.txt 8 --retries 3 -o downloads

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sft::filelist::read_file_list;
use sft::{
    Config, DownloadWorker, RetryPolicy, UdpConnector, WorkerPool, DEFAULT_RECV_TIMEOUT_MS,
    DEFAULT_WORKERS,
};

/// SFT Client - Sequenced File Transfer 클라이언트
#[derive(Parser, Debug)]
#[command(name = "sft-client", version, about)]
struct Args {
    /// 서버 호스트
    host: String,

    /// 서버 포트
    port: u16,

    /// 다운로드할 파일 목록 (한 줄에 하나)
    file_list: PathBuf,

    /// 동시 워커 수
    #[arg(default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// 저장 디렉터리
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// 수신 타임아웃 (밀리초)
    #[arg(short, long, default_value_t = DEFAULT_RECV_TIMEOUT_MS)]
    timeout_ms: u64,

    /// 실패한 파일의 재시도 횟수 (0 = 재시도 없음)
    #[arg(short, long, default_value_t = 0)]
    retries: u32,
}

/// `--retries N` → 최초 시도 1회 + 재시도 N회
fn retry_policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: retries.saturating_add(1),
        ..RetryPolicy::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let server_addr: SocketAddr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| format!("Cannot resolve {}:{}", args.host, args.port))?;

    let config = Config {
        recv_timeout_ms: args.timeout_ms,
        max_workers: args.workers,
        retry: retry_policy(args.retries),
        ..Config::default()
    };
    config.validate()?;

    let filenames = read_file_list(&args.file_list).await?;

    info!("SFT Client starting...");
    info!("Server address: {}", server_addr);
    info!("Files: {}, workers: {}", filenames.len(), config.max_workers);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfers...");
            interrupt.cancel();
        }
    });

    let concurrency = config.max_workers;
    let connector =
        UdpConnector::new(server_addr).with_socket_buffer_size(config.socket_buffer_size);
    let worker = DownloadWorker::new(config, connector, args.output_dir);
    let pool = WorkerPool::new(worker).with_cancel(cancel);
    let outcomes = pool.run(filenames, concurrency).await?;

    // === 결과 정리 ===
    let failed = outcomes.iter().filter(|o| !o.is_verified()).count();
    for outcome in &outcomes {
        if outcome.is_verified() {
            info!("  {} ({:.2}s)", outcome, outcome.elapsed.as_secs_f64());
        } else {
            warn!("  {}", outcome);
        }
    }
    info!(
        "Transfer complete: {} verified, {} failed",
        outcomes.len() - failed,
        failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
