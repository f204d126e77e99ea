//! SFT 서버 - Sequenced File Transfer
//!
//! 루트 디렉터리의 파일을 UDP로 제공
//! - `DOWNLOAD <filename>` 요청마다 디스크립터 + 프래그먼트 + 종료 마커 전송
//!
//! 사용법:
//!   cargo run --release --bin sft-server -- --port 9000 [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리 제공
//!   cargo run --release --bin sft-server -- --port 9000
//!
//!   # 특정 디렉터리 + 전송 간격 100us
//!   cargo run --release --bin sft-server -- -p 9000 --root ./files --fragment-interval-us 100

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sft::{Config, Server, DEFAULT_FRAGMENT_SIZE};

/// SFT Server - Sequenced File Transfer 서버
#[derive(Parser, Debug)]
#[command(name = "sft-server", version, about)]
struct Args {
    /// 수신 포트
    #[arg(short, long)]
    port: u16,

    /// 바인드 주소
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// 제공할 루트 디렉터리
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// 프래그먼트 페이로드 크기 (바이트)
    #[arg(long, default_value_t = DEFAULT_FRAGMENT_SIZE)]
    fragment_size: usize,

    /// 프래그먼트 전송 간격 (마이크로초, 0 = 최대 속도)
    #[arg(long)]
    fragment_interval_us: Option<u64>,
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

    let mut config = Config {
        fragment_size: args.fragment_size,
        ..Config::default()
    };
    if let Some(interval) = args.fragment_interval_us {
        config.fragment_interval_us = interval;
    }

    info!("SFT Server starting...");
    info!("Root directory: {:?}", args.root);
    info!(
        "Fragment size: {} bytes, interval: {}us",
        config.fragment_size, config.fragment_interval_us
    );

    let bind_addr = SocketAddr::new(args.bind, args.port);
    let server = Arc::new(Server::bind(config, args.root, bind_addr).await?);
    info!("Server listening on {}", server.local_addr()?);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            shutdown.cancel();
        }
    });

    server.serve(cancel).await?;
    Ok(())
}
