use async_trait::async_trait;
use log::{debug, warn};
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{HarnessError, HarnessResult, TransportErrorKind};

/// 1行（ヘッダー行）として読み込む最大バイト数
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Byte-level connection to a subject
///
/// Every read is bounded by the transport's timeout. After `close` every
/// other operation fails with a `Closed` transport error; `close` itself may
/// be called again and does nothing.
#[async_trait]
pub trait Transport: Send {
    /// Write all bytes and flush immediately
    async fn write(&mut self, bytes: &[u8]) -> HarnessResult<()>;

    /// Read up to and including the next `\n`, at most [`MAX_LINE_BYTES`]
    async fn read_line(&mut self) -> HarnessResult<Vec<u8>>;

    /// Read exactly `n` bytes
    async fn read_bytes(&mut self, n: usize) -> HarnessResult<Vec<u8>>;

    /// Release the connection
    async fn close(&mut self) -> HarnessResult<()>;
}

/// Transport over any pair of async byte streams
///
/// テストでは `tokio::io::duplex` を渡してインメモリの相手として使う。
pub struct StreamTransport<R, W> {
    reader: Option<BufReader<R>>,
    writer: Option<W>,
    read_timeout: Duration,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, read_timeout: Duration) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            writer: Some(writer),
            read_timeout,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        let writer = self.writer.as_mut().ok_or_else(HarnessError::closed)?;

        let write = async {
            writer.write_all(bytes).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        timeout(self.read_timeout, write)
            .await
            .map_err(|_| HarnessError::timeout("write to subject"))??;

        Ok(())
    }

    async fn read_line(&mut self) -> HarnessResult<Vec<u8>> {
        let reader = self.reader.as_mut().ok_or_else(HarnessError::closed)?;

        let mut line = Vec::new();
        let mut limited = (&mut *reader).take(MAX_LINE_BYTES as u64);
        let bytes_read = timeout(self.read_timeout, limited.read_until(b'\n', &mut line))
            .await
            .map_err(|_| HarnessError::timeout("header line"))??;

        if bytes_read == 0 {
            return Err(HarnessError::transport(
                TransportErrorKind::UnexpectedEof,
                "stream closed before a line arrived",
            ));
        }
        if !line.ends_with(b"\n") {
            if line.len() >= MAX_LINE_BYTES {
                return Err(HarnessError::Framing(format!(
                    "line exceeds {} bytes without a terminator",
                    MAX_LINE_BYTES
                )));
            }
            return Err(HarnessError::transport(
                TransportErrorKind::UnexpectedEof,
                format!("stream closed mid-line after {} bytes", line.len()),
            ));
        }

        Ok(line)
    }

    async fn read_bytes(&mut self, n: usize) -> HarnessResult<Vec<u8>> {
        let reader = self.reader.as_mut().ok_or_else(HarnessError::closed)?;

        // 宣言された長さを先に確保せず、届いた分だけ読み進める
        let mut buffer = Vec::new();
        let mut limited = (&mut *reader).take(n as u64);
        let bytes_read = timeout(self.read_timeout, limited.read_to_end(&mut buffer))
            .await
            .map_err(|_| HarnessError::timeout("message body"))??;

        if bytes_read < n {
            return Err(HarnessError::transport(
                TransportErrorKind::UnexpectedEof,
                format!("stream closed after {} of {} body bytes", bytes_read, n),
            ));
        }

        Ok(buffer)
    }

    async fn close(&mut self) -> HarnessResult<()> {
        if let Some(mut writer) = self.writer.take() {
            // 相手側にEOFを伝える。既に切れていても構わない
            let _ = writer.shutdown().await;
        }
        self.reader.take();
        Ok(())
    }
}

/// Transport over a spawned subject process's stdin/stdout
///
/// stderr は別タスクでログに転送し、プロトコルのストリームとは混ぜない。
pub struct ProcessTransport {
    child: Option<Child>,
    stream: StreamTransport<ChildStdout, ChildStdin>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessTransport {
    /// Spawn the subject and wire pipes to its stdin and stdout
    pub async fn start<S, I, A>(program: S, args: I, read_timeout: Duration) -> HarnessResult<Self>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let program = program.as_ref();
        debug!("Spawning subject: {}", program.to_string_lossy());

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HarnessError::transport(
                    TransportErrorKind::Spawn,
                    format!("failed to start {}: {}", program.to_string_lossy(), e),
                )
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            HarnessError::transport(TransportErrorKind::Spawn, "child process stdin not available")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            HarnessError::transport(TransportErrorKind::Spawn, "child process stdout not available")
        })?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(Self::stderr_handler(stderr)));

        Ok(Self {
            child: Some(child),
            stream: StreamTransport::new(stdout, stdin, read_timeout),
            stderr_task,
        })
    }

    /// OS process id of the subject, while it is running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Forward subject stderr to the log
    async fn stderr_handler(stderr: tokio::process::ChildStderr) {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();

        // UTF-8 でない出力でも読み続ける。途中でやめるとパイプが閉じて相手が SIGPIPE で死ぬ
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let trimmed = text.trim_end();
                    if !trimmed.is_empty() {
                        warn!("subject stderr: {}", trimmed);
                    }
                }
                Err(e) => {
                    debug!("Error reading subject stderr: {}", e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn write(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        self.stream.write(bytes).await
    }

    async fn read_line(&mut self) -> HarnessResult<Vec<u8>> {
        self.stream.read_line().await
    }

    async fn read_bytes(&mut self, n: usize) -> HarnessResult<Vec<u8>> {
        self.stream.read_bytes(n).await
    }

    /// Close the pipes, kill the subject and wait for it to exit
    async fn close(&mut self) -> HarnessResult<()> {
        self.stream.close().await?;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // 既に終了している場合の kill 失敗は無視する
        if let Err(e) = child.start_kill() {
            debug!("Kill signal not delivered: {}", e);
        }

        let status = timeout(self.stream.read_timeout(), child.wait())
            .await
            .map_err(|_| HarnessError::timeout("subject exit"))??;
        debug!("Subject exited with status: {}", status);

        if let Some(task) = self.stderr_task.take() {
            if timeout(Duration::from_millis(500), task).await.is_err() {
                debug!("Stderr forwarder still running after exit");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const SHORT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_read_line_and_bytes() {
        let (client, mut server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        server.write_all(b"Content-Length: 2\r\n\r\nok").await.unwrap();

        assert_eq!(transport.read_line().await.unwrap(), b"Content-Length: 2\r\n");
        assert_eq!(transport.read_line().await.unwrap(), b"\r\n");
        assert_eq!(transport.read_bytes(2).await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (client, server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        transport.write(b"hello").await.unwrap();

        let (mut peer_read, _peer_write) = tokio::io::split(server);
        let mut buf = [0u8; 5];
        peer_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_read_bytes_times_out() {
        let (client, _server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        let err = transport.read_bytes(4).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_read_bytes_eof_before_length() {
        let (client, mut server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        server.write_all(b"abc").await.unwrap();
        drop(server);

        let err = transport.read_bytes(10).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_read_line_eof_mid_line() {
        let (client, mut server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        server.write_all(b"Content-Len").await.unwrap();
        drop(server);

        let err = transport.read_line().await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let (client, mut server) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        server.write_all(&vec![b'a'; MAX_LINE_BYTES + 16]).await.unwrap();

        let err = transport.read_line().await.unwrap_err();
        assert!(matches!(err, HarnessError::Framing(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_read_bytes_exact_length() {
        let (client, mut server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        server.write_all(b"abcdef").await.unwrap();

        assert_eq!(transport.read_bytes(4).await.unwrap(), b"abcd");
        assert_eq!(transport.read_bytes(2).await.unwrap(), b"ef");
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let (client, _server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = StreamTransport::new(read_half, write_half, SHORT);

        transport.close().await.unwrap();

        let err = transport.write(b"x").await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Closed));
        let err = transport.read_line().await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Closed));

        // 二度目の close は何もしない
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let result = ProcessTransport::start(
            "/nonexistent/allium-lsp-does-not-exist",
            Vec::<String>::new(),
            SHORT,
        )
        .await;

        match result {
            Err(err) => assert_eq!(err.transport_kind(), Some(TransportErrorKind::Spawn)),
            Ok(_) => panic!("spawning a missing executable should fail"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_close_kills_subject() {
        let mut transport = ProcessTransport::start("cat", Vec::<String>::new(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(transport.pid().is_some());

        transport.write(b"line\n").await.unwrap();
        assert_eq!(transport.read_line().await.unwrap(), b"line\n");

        transport.close().await.unwrap();
        assert!(transport.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_stderr_keeps_subject_alive() {
        let script = "printf '\\377\\n' >&2; sleep 0.3; echo more >&2; echo alive";
        let mut transport = ProcessTransport::start("sh", ["-c", script], Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(transport.read_line().await.unwrap(), b"alive\n");
        transport.close().await.unwrap();
    }
}
