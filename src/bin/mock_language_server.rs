//! Stand-in allium language server for exercising the harness
//!
//! Speaks Content-Length framed JSON-RPC on stdio. `--mode` selects how it
//! answers `initialize`, including deliberately broken answers.

use allium_harness::jsonrpc::{
    encode_frame, read_frame, ErrorCode, ErrorObject, Request, Response, StreamTransport, Transport,
};
use allium_harness::scenario::initialize_expected_result;
use allium_harness::TransportErrorKind;
use clap::{Parser, ValueEnum};
use log::{debug, info};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Answer like the real server
    Conforming,
    /// Report server version 0.0.2
    WrongVersion,
    /// Declare a longer body than is sent, then exit
    Truncated,
    /// Never answer
    Silent,
    /// Send a framed body that is not JSON
    Garbage,
    /// Answer with a JSON-RPC error
    Error,
    /// Send a pretty-printed body spanning several lines
    Multiline,
    /// Terminate headers with a bare newline
    BareNewline,
}

#[derive(Parser, Debug)]
#[command(about = "Mock allium language server")]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Conforming)]
    mode: Mode,
}

type StdioTransport = StreamTransport<tokio::io::Stdin, tokio::io::Stdout>;

/// Write one response frame followed by a CRLF, as the real server does
async fn send(transport: &mut StdioTransport, response: &Response) -> Result<(), Box<dyn std::error::Error>> {
    let body = serde_json::to_vec(response)?;
    transport.write(&encode_frame(&body)).await?;
    transport.write(b"\r\n").await?;
    Ok(())
}

async fn handle_initialize(
    transport: &mut StdioTransport,
    mode: Mode,
    id: Value,
) -> Result<bool, Box<dyn std::error::Error>> {
    match mode {
        Mode::Conforming => {
            send(transport, &Response::success(id, initialize_expected_result())).await?;
        }
        Mode::WrongVersion => {
            let mut result = initialize_expected_result();
            result["serverInfo"]["version"] = json!("0.0.2");
            send(transport, &Response::success(id, result)).await?;
        }
        Mode::Truncated => {
            let body = serde_json::to_vec(&Response::success(id, initialize_expected_result()))?;
            let header = format!("Content-Length: {}\r\n\r\n", body.len() + 20);
            transport.write(header.as_bytes()).await?;
            transport.write(&body).await?;
            // ストリームを閉じて終了
            return Ok(false);
        }
        Mode::Silent => {
            info!("Ignoring initialize");
        }
        Mode::Garbage => {
            transport.write(&encode_frame(b"{\"jsonrpc\": \"2.0\", \"id\": ")).await?;
        }
        Mode::Error => {
            send(transport, &Response::error(id, ErrorObject::new(ErrorCode::InternalError, None))).await?;
        }
        Mode::Multiline => {
            let body = serde_json::to_vec_pretty(&Response::success(id, initialize_expected_result()))?;
            transport.write(&encode_frame(&body)).await?;
        }
        Mode::BareNewline => {
            let body = serde_json::to_vec(&Response::success(id, initialize_expected_result()))?;
            let frame = format!("Content-Length: {}\n\n", body.len());
            transport.write(frame.as_bytes()).await?;
            transport.write(&body).await?;
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    eprintln!("mock_language_server: mode={:?}", args.mode);

    let mut transport = StreamTransport::new(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Duration::from_secs(3600),
    );

    loop {
        let frame = match read_frame(&mut transport).await {
            Ok(frame) => frame,
            Err(e) if e.transport_kind() == Some(TransportErrorKind::UnexpectedEof) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let value = frame.json()?;
        let Some(id) = value.get("id").cloned() else {
            // 通知: exit のみ扱う
            if value.get("method") == Some(&json!("exit")) {
                break;
            }
            continue;
        };

        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let error = ErrorObject::new(ErrorCode::InvalidRequest, Some(json!(e.to_string())));
                send(&mut transport, &Response::error(id, error)).await?;
                continue;
            }
        };
        debug!("Handling request: {} (id: {})", request.method, request.id);

        match request.method.as_str() {
            "initialize" => {
                if !handle_initialize(&mut transport, args.mode, id).await? {
                    break;
                }
            }
            "echo" => send(&mut transport, &Response::success(id, request.params)).await?,
            "shutdown" => send(&mut transport, &Response::success(id, Value::Null)).await?,
            _ => {
                let error = ErrorObject::new(ErrorCode::MethodNotFound, None);
                send(&mut transport, &Response::error(id, error)).await?;
            }
        }
    }

    transport.close().await?;
    Ok(())
}
