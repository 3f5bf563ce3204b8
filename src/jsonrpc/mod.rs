//! JSON-RPC 2.0 client side for testing a language server over stdio
//!
//! ## 主要コンポーネント
//!
//! - [`types`]: リクエスト/レスポンスの型定義
//! - [`codec`]: Content-Length フレーミングのエンコード/デコード
//! - [`transport`]: 子プロセスの stdin/stdout を包むトランスポート
//! - [`client`]: リクエストIDと接続状態を管理するクライアント
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use allium_harness::jsonrpc::JsonRpcClient;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn demo() -> allium_harness::HarnessResult<()> {
//! let mut client = JsonRpcClient::spawn("allium-lsp", Vec::<String>::new(), Duration::from_secs(5)).await?;
//! let response = client.request("initialize", json!({"processId": 1000, "rootUri": null, "capabilities": {}})).await;
//! client.close().await?;
//! # response.map(|_| ())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{ConnectionState, JsonRpcClient};
pub use codec::{decode_frame, encode, encode_frame, read_frame, FramedMessage};
pub use transport::{ProcessTransport, StreamTransport, Transport};
pub use types::{ErrorCode, ErrorObject, Request, Response};
