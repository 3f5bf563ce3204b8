use std::fmt;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Why a transport operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The subject process could not be started
    Spawn,
    /// An underlying read or write failed
    Io,
    /// The stream ended before the requested bytes or line arrived
    UnexpectedEof,
    /// A bounded wait expired
    Timeout,
    /// The connection was already closed
    Closed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Spawn => "spawn",
            TransportErrorKind::Io => "io",
            TransportErrorKind::UnexpectedEof => "unexpected eof",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Harness error types
///
/// どのエラーも現在のテストケースだけを失敗させる。ランナーが捕捉して
/// 失敗として記録し、次のテストへ進む。
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("framing error: {0}")]
    Framing(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("assertion mismatch: {0}")]
    AssertionMismatch(String),

    #[error("subject exit failure: {0}")]
    SubjectExitFailure(String),
}

impl HarnessError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        HarnessError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(what: &str) -> Self {
        Self::transport(TransportErrorKind::Timeout, format!("timed out waiting for {}", what))
    }

    pub fn closed() -> Self {
        Self::transport(TransportErrorKind::Closed, "connection already closed")
    }

    /// Transport-level kind, if this is a transport error
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            HarnessError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// 接続の読み取り位置が不定になるエラーかどうか
    ///
    /// Transport/Framing エラーの後はフレーム境界が失われているので、
    /// 同じ接続でこれ以上リクエストを送ってはいけない。
    pub fn poisons_connection(&self) -> bool {
        matches!(self, HarnessError::Transport { .. } | HarnessError::Framing(_))
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportErrorKind::UnexpectedEof,
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Io,
        };
        HarnessError::transport(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_transport_kind() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "early eof");
        let err: HarnessError = eof.into();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::UnexpectedEof));

        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: HarnessError = broken.into();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Io));
    }

    #[test]
    fn test_poisoning() {
        assert!(HarnessError::timeout("header line").poisons_connection());
        assert!(HarnessError::Framing("bad".into()).poisons_connection());
        assert!(!HarnessError::Decode("bad json".into()).poisons_connection());
        assert!(!HarnessError::AssertionMismatch("diff".into()).poisons_connection());
    }

    #[test]
    fn test_display() {
        let err = HarnessError::timeout("response body");
        assert_eq!(
            err.to_string(),
            "transport error (timeout): timed out waiting for response body"
        );
    }
}
