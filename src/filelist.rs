//! 다운로드할 파일 목록 읽기 (한 줄에 파일 이름 하나)

use std::path::Path;

use crate::{Error, Result};

/// 줄 단위 파일 목록 파싱 (앞뒤 공백 제거, 빈 줄 무시)
pub fn parse_file_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// 파일 목록 읽기
pub async fn read_file_list(path: &Path) -> Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(parse_file_list(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::FileListMissing(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_skips_blank_lines() {
        let list = parse_file_list("a.txt\n\n  b.bin  \r\n\t\nc\n");
        assert_eq!(list, vec!["a.txt", "b.bin", "c"]);
    }

    #[tokio::test]
    async fn test_read_file_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.txt");
        std::fs::write(&path, "one\ntwo\n").unwrap();
        assert_eq!(read_file_list(&path).await.unwrap(), vec!["one", "two"]);

        let missing = dir.path().join("nope.txt");
        assert!(matches!(
            read_file_list(&missing).await,
            Err(Error::FileListMissing(_))
        ));
    }
}
