//! Minimal HTTP server speaking just enough SSE for the client tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What one accepted connection gets.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Status line only, empty body.
    Status(u16),
    /// 200 with an event-stream body, then close.
    Events(String),
    /// 200, send the body, then hold the connection open until the client leaves.
    EventsThenHold(String),
}

#[derive(Debug, Default)]
pub struct Seen {
    pub requests: Vec<String>,
    /// Connections whose client hung up while we were holding them.
    pub client_closed: usize,
}

pub struct SseServer {
    pub base: String,
    pub seen: Arc<Mutex<Seen>>,
}

impl SseServer {
    /// Serve `script` in order; after it runs out, every further connection
    /// gets the last entry again.
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Seen::default()));
        let seen_task = seen.clone();
        tokio::spawn(async move {
            let mut n = 0usize;
            loop {
                let (sock, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let reply = script
                    .get(n)
                    .or_else(|| script.last())
                    .cloned()
                    .unwrap_or(Reply::Status(404));
                n += 1;
                tokio::spawn(serve(sock, reply, seen_task.clone()));
            }
        });
        Self {
            base: format!("http://{}/v1", addr),
            seen,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().requests.clone()
    }

    pub fn client_closed(&self) -> usize {
        self.seen.lock().unwrap().client_closed
    }
}

async fn read_head(sock: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match sock.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

async fn serve(mut sock: TcpStream, reply: Reply, seen: Arc<Mutex<Seen>>) {
    let head = read_head(&mut sock).await;
    seen.lock().unwrap().requests.push(head);

    let sse_head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
    match reply {
        Reply::Status(code) => {
            let resp = format!(
                "HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                code
            );
            let _ = sock.write_all(resp.as_bytes()).await;
        }
        Reply::Events(body) => {
            let _ = sock.write_all(sse_head.as_bytes()).await;
            let _ = sock.write_all(body.as_bytes()).await;
        }
        Reply::EventsThenHold(body) => {
            let _ = sock.write_all(sse_head.as_bytes()).await;
            let _ = sock.write_all(body.as_bytes()).await;
            let _ = sock.flush().await;
            let mut buf = [0u8; 64];
            loop {
                match tokio::time::timeout(Duration::from_secs(10), sock.read(&mut buf)).await {
                    Ok(Ok(0)) | Ok(Err(_)) => {
                        seen.lock().unwrap().client_closed += 1;
                        return;
                    }
                    Ok(Ok(_)) => continue,
                    Err(_) => return,
                }
            }
        }
    }
    let _ = sock.shutdown().await;
}
