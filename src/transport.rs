//! 데이터그램 전송 추상화
//!
//! 코덱은 길이 필드 없이 데이터그램 경계에 의존하므로
//! 모든 구현은 "send 1회 = 수신 가능한 메시지 1개"를 보장해야 함.
//! 스트림 전송으로 옮길 경우 길이 접두사 프레이밍을 별도로 넣어야 함.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::{Result, DEFAULT_SOCKET_BUFFER_SIZE};

/// 데이터그램 전송
pub trait Transport: Send + Sync {
    /// 데이터그램 하나 전송
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> impl Future<Output = Result<()>> + Send;

    /// 데이터그램 하나 수신
    fn recv_from(&self, buf: &mut [u8]) -> impl Future<Output = Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> Result<SocketAddr>;

    /// 타임아웃 수신 (타임아웃이면 `None`)
    fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<(usize, SocketAddr)>>> + Send {
        async move {
            match tokio::time::timeout(timeout, self.recv_from(buf)).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            }
        }
    }
}

/// UDP 소켓 전송
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// 커널 송수신 버퍼를 키운 소켓 바인딩
    ///
    /// 재전송이 없으므로 수신 버퍼가 넘치면 곧 전송 실패임.
    /// 커널이 요청 크기를 거부하거나 줄이면 경고만 남기고 계속함.
    /// tokio 런타임 안에서 호출해야 함.
    pub fn bind_with_buffer(addr: SocketAddr, buffer_size: usize) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
            warn!("SO_RCVBUF {} 설정 실패: {}", buffer_size, e);
        }
        if let Err(e) = socket.set_send_buffer_size(buffer_size) {
            warn!("SO_SNDBUF {} 설정 실패: {}", buffer_size, e);
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        if let Ok(actual) = socket.recv_buffer_size() {
            if actual < buffer_size {
                debug!("수신 버퍼 {} bytes 요청, 커널 허용 {} bytes", buffer_size, actual);
            }
        }

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<()> {
        self.socket.send_to(buf, target).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// 전송 시도마다 새 전송 핸들을 여는 팩토리 (클라이언트측)
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    /// 새 전송 핸들 열기
    fn open(&self) -> impl Future<Output = Result<Self::Transport>> + Send;

    /// 서버 주소
    fn server_addr(&self) -> SocketAddr;
}

/// 시도마다 임시 포트 UDP 소켓을 바인딩
#[derive(Debug, Clone)]
pub struct UdpConnector {
    server_addr: SocketAddr,
    bind_addr: SocketAddr,
    socket_buffer_size: usize,
}

impl UdpConnector {
    pub fn new(server_addr: SocketAddr) -> Self {
        let bind_addr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        Self {
            server_addr,
            bind_addr,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
        }
    }

    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    /// 소켓 커널 버퍼 요청 크기
    pub fn with_socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = size;
        self
    }
}

impl Connector for UdpConnector {
    type Transport = UdpTransport;

    async fn open(&self) -> Result<UdpTransport> {
        let transport = UdpTransport::bind_with_buffer(self.bind_addr, self.socket_buffer_size)?;
        debug!("전송 소켓 바인딩: {:?}", transport.local_addr().ok());
        Ok(transport)
    }

    fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_send_one_message() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"first", b_addr).await.unwrap();
        a.send_to(b"second!", b_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");
        assert_eq!(from, a.local_addr().unwrap());
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second!");
    }

    #[tokio::test]
    async fn test_recv_timeout_returns_none() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let result = a
            .recv_timeout(&mut buf, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_bind_with_buffer_grows_receive_buffer() {
        let small = UdpTransport::bind_with_buffer("127.0.0.1:0".parse().unwrap(), 8 * 1024).unwrap();
        let large = UdpTransport::bind_with_buffer(
            "127.0.0.1:0".parse().unwrap(),
            DEFAULT_SOCKET_BUFFER_SIZE,
        )
        .unwrap();

        let small_size = socket2::SockRef::from(&small.socket).recv_buffer_size().unwrap();
        let large_size = socket2::SockRef::from(&large.socket).recv_buffer_size().unwrap();
        assert!(large_size > small_size, "{} <= {}", large_size, small_size);

        // 일반 소켓처럼 동작
        large.send_to(b"ping", small.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = small.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_connector_opens_fresh_sockets() {
        let connector = UdpConnector::new("127.0.0.1:9".parse().unwrap())
            .with_bind_addr("127.0.0.1:0".parse().unwrap());
        let first = connector.open().await.unwrap();
        let second = connector.open().await.unwrap();
        assert_ne!(first.local_addr().unwrap(), second.local_addr().unwrap());
        assert_eq!(connector.server_addr().port(), 9);
    }
}
