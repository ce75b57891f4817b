//! End-to-end scenarios driven over a real loopback TCP socket: ping/pong,
//! set/get with and without expiry, list push/range/len, scalar-to-list
//! coercion, request pipelining, and malformed-frame handling.

use redis_lite::server::Server;
use redis_lite::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

async fn spawn_server() -> (std::net::SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Arc::new(Store::new());
    let server = Arc::new(Server::new(addr.to_string(), 512, store));
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = server.serve(listener, rx).await;
    });
    (addr, tx)
}

async fn roundtrip(stream: &mut TcpStream, request: &[u8], expect: &[u8]) {
    stream.write_all(request).await.unwrap();
    let mut buf = vec![0u8; expect.len().max(64)];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], expect);
}

#[tokio::test]
async fn ping_pong() {
    let (addr, _tx) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    roundtrip(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}

#[tokio::test]
async fn set_then_get() {
    let (addr, _tx) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    roundtrip(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n",
        b"+OK\r\n",
    )
    .await;
    roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$1\r\nv\r\n").await;
}

#[tokio::test]
async fn set_with_px_expires() {
    let (addr, _tx) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    roundtrip(
        &mut stream,
        b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$2\r\n10\r\n",
        b"+OK\r\n",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn list_push_range_len() {
    let (addr, _tx) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    roundtrip(
        &mut stream,
        b"*5\r\n$5\r\nRPUSH\r\n$1\r\nL\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        b":3\r\n",
    )
    .await;
    roundtrip(
        &mut stream,
        b"*4\r\n$6\r\nLRANGE\r\n$1\r\nL\r\n$1\r\n0\r\n$2\r\n-1\r\n",
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
    )
    .await;
    roundtrip(&mut stream, b"*2\r\n$4\r\nLLEN\r\n$1\r\nL\r\n", b":3\r\n").await;
}

#[tokio::test]
async fn scalar_coerces_to_list_on_lpush() {
    let (addr, _tx) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    roundtrip(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$1\r\nL\r\n$5\r\nhello\r\n",
        b"+OK\r\n",
    )
    .await;
    roundtrip(
        &mut stream,
        b"*3\r\n$5\r\nLPUSH\r\n$1\r\nL\r\n$1\r\nx\r\n",
        b":2\r\n",
    )
    .await;
    roundtrip(
        &mut stream,
        b"*4\r\n$6\r\nLRANGE\r\n$1\r\nL\r\n$1\r\n0\r\n$2\r\n-1\r\n",
        b"*2\r\n$1\r\nx\r\n$5\r\nhello\r\n",
    )
    .await;
    roundtrip(
        &mut stream,
        b"*2\r\n$3\r\nGET\r\n$1\r\nL\r\n",
        b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
    )
    .await;
}

#[tokio::test]
async fn pipelined_requests_on_one_connection() {
    let (addr, _tx) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n")
        .await
        .unwrap();
    let mut buf = vec![0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n+PONG\r\n");
}

#[tokio::test]
async fn malformed_frame_gets_protocol_error_and_connection_closes() {
    let (addr, _tx) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"$3\r\nfoo\r\n").await.unwrap();
    let mut buf = vec![0u8; 128];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(buf[..n].starts_with(b"-Protocol error:"));
}
