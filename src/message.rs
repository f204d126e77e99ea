//! 제어 메시지 정의
//!
//! 제어 메시지는 공백으로 구분된 ASCII 한 줄
//!
//! ```text
//! 요청:     DOWNLOAD <filename>
//! 종료:     QUIT
//! 성공 응답: OK <filename> SIZE <u64> CHECKSUM <32자 hex>
//! 실패 응답: ERR <filename 또는 공백> <NOT_FOUND | INVALID_FORMAT | INTERNAL_ERROR>
//! ```
//!
//! 파일 이름은 공백을 포함할 수 없음 (응답이 공백 토큰으로 파싱되므로)

use std::fmt;
use std::str::FromStr;

use crate::checksum::Checksum;
use crate::{Error, Result};

const DOWNLOAD: &str = "DOWNLOAD";
const QUIT: &str = "QUIT";
const OK: &str = "OK";
const ERR: &str = "ERR";
const SIZE: &str = "SIZE";
const CHECKSUM: &str = "CHECKSUM";

/// 서버가 보고하는 실패 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    /// 요청한 파일이 없음
    NotFound,

    /// 요청 형식 오류
    InvalidFormat,

    /// 서버 내부 오류
    InternalError,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::NotFound => "NOT_FOUND",
            ErrorReason::InvalidFormat => "INVALID_FORMAT",
            ErrorReason::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NOT_FOUND" => Ok(ErrorReason::NotFound),
            "INVALID_FORMAT" => Ok(ErrorReason::InvalidFormat),
            "INTERNAL_ERROR" => Ok(ErrorReason::InternalError),
            other => Err(Error::MalformedResponse(format!("알 수 없는 이유: {}", other))),
        }
    }
}

/// 전송 요청 (클라이언트 → 서버)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub filename: String,
}

impl Request {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}", DOWNLOAD, self.filename).into_bytes()
    }
}

/// 서버가 수신하는 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Download(Request),
    Quit,
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::Download(request) => request.to_bytes(),
            Command::Quit => QUIT.as_bytes().to_vec(),
        }
    }

    /// 명령 파싱
    ///
    /// `DOWNLOAD` 뒤에 파일 이름이 없거나 공백이 섞이면 `MalformedRequest`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::MalformedRequest("UTF-8 아님".into()))?
            .trim();

        let mut tokens = text.split_whitespace();
        match tokens.next() {
            Some(DOWNLOAD) => {
                let filename = tokens
                    .next()
                    .ok_or_else(|| Error::MalformedRequest("파일 이름 없음".into()))?;
                if tokens.next().is_some() {
                    return Err(Error::MalformedRequest(format!(
                        "파일 이름에 공백 포함: '{}'",
                        text
                    )));
                }
                Ok(Command::Download(Request::new(filename)))
            }
            Some(QUIT) if tokens.next().is_none() => Ok(Command::Quit),
            _ => Err(Error::MalformedRequest(format!("알 수 없는 명령: '{}'", text))),
        }
    }
}

/// 전송 디스크립터 (서버 계산, 클라이언트 수신)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub filename: String,
    pub total_size: u64,
    pub checksum: Checksum,
}

/// 서버 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Descriptor),
    Err {
        /// 요청 파일 이름 (형식 오류 시 비어 있을 수 있음)
        filename: String,
        reason: ErrorReason,
    },
}

impl Response {
    pub fn not_found(filename: impl Into<String>) -> Self {
        Response::Err {
            filename: filename.into(),
            reason: ErrorReason::NotFound,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Ok(d) => format!(
                "{} {} {} {} {} {}",
                OK,
                d.filename,
                SIZE,
                d.total_size,
                CHECKSUM,
                d.checksum.to_hex()
            )
            .into_bytes(),
            Response::Err { filename, reason } if filename.is_empty() => {
                format!("{} {}", ERR, reason).into_bytes()
            }
            Response::Err { filename, reason } => {
                format!("{} {} {}", ERR, filename, reason).into_bytes()
            }
        }
    }

    /// 응답 파싱
    ///
    /// `OK`/`ERR` 이외의 모든 입력은 `MalformedResponse`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::MalformedResponse("UTF-8 아님".into()))?;
        let tokens: Vec<&str> = text.split_whitespace().collect();

        match tokens.first().copied() {
            Some(OK) => Self::parse_ok(&tokens).map(Response::Ok),
            Some(ERR) => {
                let reason: ErrorReason = tokens
                    .last()
                    .filter(|_| tokens.len() >= 2)
                    .ok_or_else(|| Error::MalformedResponse("ERR 이유 없음".into()))?
                    .parse()?;
                let filename = match tokens.len() {
                    2 => String::new(),
                    3 => tokens[1].to_string(),
                    n => {
                        return Err(Error::MalformedResponse(format!(
                            "ERR 토큰 수 {}",
                            n
                        )))
                    }
                };
                Ok(Response::Err { filename, reason })
            }
            _ => Err(Error::MalformedResponse(format!(
                "알 수 없는 응답: '{}'",
                text.chars().take(64).collect::<String>()
            ))),
        }
    }

    fn parse_ok(tokens: &[&str]) -> Result<Descriptor> {
        let value_after = |key: &str| -> Result<&str> {
            let idx = tokens
                .iter()
                .position(|t| *t == key)
                .ok_or_else(|| Error::MalformedResponse(format!("{} 없음", key)))?;
            tokens
                .get(idx + 1)
                .copied()
                .ok_or_else(|| Error::MalformedResponse(format!("{} 값 없음", key)))
        };

        let filename = match tokens.get(1) {
            Some(&t) if t != SIZE && t != CHECKSUM => t.to_string(),
            _ => return Err(Error::MalformedResponse("파일 이름 없음".into())),
        };
        let total_size = value_after(SIZE)?
            .parse::<u64>()
            .map_err(|e| Error::MalformedResponse(format!("SIZE: {}", e)))?;
        let checksum = Checksum::from_hex(value_after(CHECKSUM)?)?;

        Ok(Descriptor {
            filename,
            total_size,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encoding() {
        assert_eq!(Request::new("a.txt").to_bytes(), b"DOWNLOAD a.txt");
        assert_eq!(Command::Quit.to_bytes(), b"QUIT");
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            Command::from_bytes(b"DOWNLOAD report.pdf\n").unwrap(),
            Command::Download(Request::new("report.pdf"))
        );
        assert_eq!(Command::from_bytes(b"QUIT").unwrap(), Command::Quit);

        assert!(matches!(
            Command::from_bytes(b"DOWNLOAD"),
            Err(Error::MalformedRequest(_))
        ));
        assert!(matches!(
            Command::from_bytes(b"DOWNLOAD   "),
            Err(Error::MalformedRequest(_))
        ));
        assert!(matches!(
            Command::from_bytes(b"DOWNLOAD two words"),
            Err(Error::MalformedRequest(_))
        ));
        assert!(Command::from_bytes(b"UPLOAD x").is_err());
        assert!(Command::from_bytes(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_ok_response_wire_format() {
        let descriptor = Descriptor {
            filename: "data.bin".into(),
            total_size: 10_000,
            checksum: Checksum::empty(),
        };
        let bytes = Response::Ok(descriptor.clone()).to_bytes();
        assert_eq!(
            bytes,
            b"OK data.bin SIZE 10000 CHECKSUM d41d8cd98f00b204e9800998ecf8427e".to_vec()
        );
        assert_eq!(Response::from_bytes(&bytes).unwrap(), Response::Ok(descriptor));
    }

    #[test]
    fn test_err_response_forms() {
        assert_eq!(Response::not_found("x.bin").to_bytes(), b"ERR x.bin NOT_FOUND");
        assert_eq!(
            Response::from_bytes(b"ERR x.bin NOT_FOUND").unwrap(),
            Response::not_found("x.bin")
        );

        let anonymous = Response::Err {
            filename: String::new(),
            reason: ErrorReason::InvalidFormat,
        };
        assert_eq!(anonymous.to_bytes(), b"ERR INVALID_FORMAT");
        assert_eq!(Response::from_bytes(b"ERR INVALID_FORMAT").unwrap(), anonymous);

        assert_eq!(
            Response::from_bytes(b"ERR f INTERNAL_ERROR").unwrap(),
            Response::Err {
                filename: "f".into(),
                reason: ErrorReason::InternalError
            }
        );
    }

    #[test]
    fn test_malformed_responses() {
        for bad in [
            &b""[..],
            b"HELLO",
            b"ERR",
            b"ERR x.bin WHATEVER",
            b"OK",
            b"OK SIZE 10 CHECKSUM d41d8cd98f00b204e9800998ecf8427e",
            b"OK f SIZE CHECKSUM d41d8cd98f00b204e9800998ecf8427e",
            b"OK f SIZE -1 CHECKSUM d41d8cd98f00b204e9800998ecf8427e",
            b"OK f SIZE 10 CHECKSUM nothex",
            b"OK f SIZE 10",
            b"\x00\x00\x00\x01payload",
        ] {
            assert!(
                matches!(Response::from_bytes(bad), Err(Error::MalformedResponse(_))),
                "should reject {:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }
}
