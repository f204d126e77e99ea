//! 테스트 공용 도구 (루프백 UDP 서버, 손실 주입 전송)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::fragment::Frame;
use crate::server::Server;
use crate::transport::{Transport, UdpConnector, UdpTransport};
use crate::{Config, Result};

/// 임시 루트 디렉터리를 제공하는 루프백 서버
pub(crate) struct TestServer<T: Transport + 'static = UdpTransport> {
    pub addr: SocketAddr,
    pub root: TempDir,
    pub server: Arc<Server<T>>,
    cancel: CancellationToken,
}

impl TestServer<UdpTransport> {
    pub async fn spawn(config: Config) -> Self {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        Self::spawn_with(config, transport).await
    }
}

impl<T: Transport + 'static> TestServer<T> {
    pub async fn spawn_with(config: Config, transport: T) -> Self {
        let root = tempfile::tempdir().unwrap();
        let server = Arc::new(Server::new(config, root.path(), transport).unwrap());
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();

        tokio::spawn(Arc::clone(&server).serve(cancel.clone()));

        Self {
            addr,
            root,
            server,
            cancel,
        }
    }

    pub fn write_file(&self, name: &str, data: &[u8]) {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, data).unwrap();
    }

    pub fn connector(&self) -> UdpConnector {
        UdpConnector::new(self.addr).with_bind_addr("127.0.0.1:0".parse().unwrap())
    }
}

impl<T: Transport + 'static> Drop for TestServer<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 지정한 순번의 프래그먼트를 보내지 않는 전송
pub(crate) struct DropFragments {
    inner: UdpTransport,
    dropped: Vec<u32>,
}

impl DropFragments {
    pub async fn bind(dropped: Vec<u32>) -> Self {
        let inner = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        Self { inner, dropped }
    }
}

impl Transport for DropFragments {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<()> {
        if let Ok(Frame::Fragment(fragment)) = Frame::from_bytes(buf) {
            if !buf.starts_with(b"OK") && self.dropped.contains(&fragment.sequence) {
                return Ok(());
            }
        }
        self.inner.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// 파일이 `dir` 아래에 남아 있는지 (하위 디렉터리 포함)
pub(crate) fn list_files(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                names.push(
                    path.strip_prefix(dir)
                        .unwrap()
                        .to_string_lossy()
                        .into_owned(),
                );
            }
        }
    }
    names.sort();
    names
}
