use log::{debug, warn};
use serde_json::Value;
use std::ffi::OsStr;
use std::time::Duration;

use super::codec::{decode_frame, encode};
use super::transport::{ProcessTransport, Transport};
use super::types::Response;
use crate::error::{HarnessError, HarnessResult, TransportErrorKind};

/// Lifecycle of one connection
///
/// `Unstarted → Started → (Sending → AwaitingResponse → Settled)* → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unstarted,
    Started,
    Sending,
    AwaitingResponse,
    Settled,
    Closed,
}

/// Strict request/response JSON-RPC client over a [`Transport`]
///
/// `&mut self` on every call keeps at most one request in flight. Request ids
/// start at 0 and grow by one per request sent on this connection.
pub struct JsonRpcClient<T: Transport> {
    transport: Option<T>,
    state: ConnectionState,
    next_id: u64,
    /// 読み取り位置が失われた理由。設定後は新しいリクエストを送らない
    broken: Option<String>,
}

impl<T: Transport> Default for JsonRpcClient<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> JsonRpcClient<T> {
    /// Create a client with no transport attached
    pub fn new() -> Self {
        Self {
            transport: None,
            state: ConnectionState::Unstarted,
            next_id: 0,
            broken: None,
        }
    }

    /// Create a client already connected to `transport`
    pub fn connect(transport: T) -> Self {
        let mut client = Self::new();
        client.transport = Some(transport);
        client.state = ConnectionState::Started;
        client
    }

    /// Attach a transport to an unstarted client
    pub fn attach(&mut self, transport: T) -> HarnessResult<()> {
        if self.state != ConnectionState::Unstarted {
            return Err(HarnessError::transport(
                TransportErrorKind::Io,
                format!("cannot attach a transport in state {:?}", self.state),
            ));
        }
        self.transport = Some(transport);
        self.state = ConnectionState::Started;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of requests sent so far, which is also the next id
    pub fn requests_sent(&self) -> u64 {
        self.next_id
    }

    /// Send one request and wait for its response
    ///
    /// A response with a mismatched id is a decode error. After a transport or
    /// framing error the connection is unusable and every later request fails
    /// with a transport error.
    pub async fn request(&mut self, method: &str, params: Value) -> HarnessResult<Response> {
        match self.state {
            ConnectionState::Unstarted => {
                return Err(HarnessError::transport(
                    TransportErrorKind::Closed,
                    "connection not started",
                ))
            }
            ConnectionState::Closed => return Err(HarnessError::closed()),
            // 前回の呼び出しが途中で中断された
            ConnectionState::Sending | ConnectionState::AwaitingResponse => {
                if self.broken.is_none() {
                    self.broken = Some("previous request was interrupted".to_string());
                }
            }
            ConnectionState::Started | ConnectionState::Settled => {}
        }
        if let Some(reason) = &self.broken {
            return Err(HarnessError::transport(
                TransportErrorKind::Io,
                format!("connection unusable: {}", reason),
            ));
        }

        let transport = self.transport.as_mut().ok_or_else(HarnessError::closed)?;

        let id = self.next_id;
        self.next_id += 1;
        let frame = encode(method, &params, id);
        debug!("Sending request: {} (id: {}, {} bytes)", method, id, frame.len());

        self.state = ConnectionState::Sending;
        if let Err(e) = transport.write(&frame).await {
            self.broken = Some(e.to_string());
            return Err(e);
        }

        self.state = ConnectionState::AwaitingResponse;
        let response = match decode_frame(transport).await {
            Ok(response) => response,
            Err(e) => {
                if e.poisons_connection() {
                    self.broken = Some(e.to_string());
                } else {
                    // 本文は読み切っているので次のリクエストは送れる
                    self.state = ConnectionState::Settled;
                }
                return Err(e);
            }
        };
        self.state = ConnectionState::Settled;

        if response.id_u64() != Some(id) {
            return Err(HarnessError::Decode(format!(
                "response id {} does not match request id {}",
                response.id, id
            )));
        }

        Ok(response)
    }

    /// Close the transport; later requests fail with a transport error
    pub async fn close(&mut self) -> HarnessResult<()> {
        self.state = ConnectionState::Closed;
        match self.transport.take() {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        }
    }
}

impl JsonRpcClient<ProcessTransport> {
    /// Spawn a subject process and connect to its stdio
    pub async fn spawn<S, I, A>(program: S, args: I, read_timeout: Duration) -> HarnessResult<Self>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let transport = ProcessTransport::start(program, args, read_timeout).await?;
        Ok(Self::connect(transport))
    }
}

impl<T: Transport> Drop for JsonRpcClient<T> {
    fn drop(&mut self) {
        if self.transport.is_some() {
            warn!("JsonRpcClient dropped without close; relying on kill-on-drop");
        }
    }
}
