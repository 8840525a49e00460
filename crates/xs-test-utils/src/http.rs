//! Minimal HTTP responder standing in for an engine's HTTP proxy inbound.
//!
//! Every request, whatever its target, is answered with a fixed status after
//! a fixed delay. Connections that close without sending a request (readiness
//! checks) are ignored.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// How a mock proxy answers.
#[derive(Debug, Clone, Copy)]
pub struct Responder {
    pub status: u16,
    pub delay: Duration,
    /// Accept requests but never answer.
    pub hang: bool,
    /// Read each request, then close the connection without a response.
    pub drop_requests: bool,
}

impl Default for Responder {
    fn default() -> Self {
        Self {
            status: 204,
            delay: Duration::ZERO,
            hang: false,
            drop_requests: false,
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        403 => "Forbidden",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Status",
    }
}

async fn read_request_head(stream: &mut TcpStream) -> bool {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return true;
                }
                if buf.len() > 64 * 1024 {
                    return false;
                }
            }
        }
    }
}

async fn handle(mut stream: TcpStream, responder: Responder) {
    if !read_request_head(&mut stream).await {
        return;
    }
    if responder.hang {
        std::future::pending::<()>().await;
    }
    if responder.drop_requests {
        return;
    }
    if !responder.delay.is_zero() {
        tokio::time::sleep(responder.delay).await;
    }
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        responder.status,
        reason(responder.status)
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Accept loop over an already bound listener. Aborting the returned future's
/// task closes the listener and every open connection.
pub async fn serve(listener: TcpListener, responder: Responder) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handle(stream, responder));
                }
                Err(_) => break,
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

/// Start a mock HTTP proxy on an ephemeral loopback port.
pub async fn start_mock_http_proxy(
    responder: Responder,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    Ok((addr, tokio::spawn(serve(listener, responder))))
}
