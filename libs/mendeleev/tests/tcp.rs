//! Engine over a real TCP socket against an in-process device

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mendeleev::constants::{DATA_OFFSET, MSG_OVERHEAD};
use mendeleev::frame;
use mendeleev::{Context, ErrorRecovery, MendeleevError};

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Read one request frame from the master
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut req = vec![0u8; DATA_OFFSET];
    socket.read_exact(&mut req).await.unwrap();
    let rest = frame::data_length(&req) + MSG_OVERHEAD - DATA_OFFSET;
    let mut tail = vec![0u8; rest];
    socket.read_exact(&mut tail).await.unwrap();
    req.extend_from_slice(&tail);
    req
}

fn confirm(req: &[u8], data: &[u8]) -> Vec<u8> {
    frame::encode_frame(
        frame::source(req),
        frame::destination(req),
        frame::sequence(req),
        frame::command(req),
        data,
    )
    .unwrap()
}

async fn master(port: u16) -> Context {
    let mut ctx = Context::new_tcp("127.0.0.1", port).unwrap();
    ctx.set_slave(0x10).unwrap();
    ctx.set_response_timeout(1, 0).unwrap();
    ctx.connect().await.unwrap();
    ctx
}

#[tokio::test]
async fn version_over_tcp() {
    let (listener, port) = listener().await;
    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let req = read_request(&mut socket).await;
        // Split the reply to exercise length discovery on a stream
        let rsp = confirm(&req, b"tcp-gw 0.9");
        socket.write_all(&rsp[..10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.write_all(&rsp[10..]).await.unwrap();
        req
    });

    let mut ctx = master(port).await;
    assert_eq!(ctx.transport_type(), "tcp");
    let version = ctx.get_version().await.unwrap();
    assert_eq!(version, b"tcp-gw 0.9".to_vec());

    let req = device.await.unwrap();
    assert_eq!(frame::destination(&req), 0x10);
    assert_eq!(frame::command(&req), 0x03);
    assert!(frame::verify_frame(&req).is_ok());

    ctx.free().await;
}

#[tokio::test]
async fn commands_share_one_connection() {
    let (listener, port) = listener().await;
    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut sequences = Vec::new();
        for _ in 0..3 {
            let req = read_request(&mut socket).await;
            sequences.push(frame::sequence(&req));
            socket.write_all(&confirm(&req, &[])).await.unwrap();
        }
        sequences
    });

    let mut ctx = master(port).await;
    ctx.set_color(&[0x00, 0x80, 0xFF]).await.unwrap();
    ctx.set_mode(&[0x01]).await.unwrap();
    ctx.set_output(&[0x01, 0x00]).await.unwrap();

    assert_eq!(device.await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn peer_close_is_reset_and_link_recovery_reconnects() {
    let (listener, port) = listener().await;
    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        drop(socket);
        // Second connection opened by the recovery
        let (socket, _) = listener.accept().await.unwrap();
        socket
    });

    let mut ctx = master(port).await;
    ctx.set_error_recovery(ErrorRecovery::LINK);

    let err = ctx.get_version().await.unwrap_err();
    assert!(matches!(err, MendeleevError::ConnectionReset));
    assert!(ctx.is_connected());

    let _second = device.await.unwrap();
}

#[tokio::test]
async fn silent_peer_times_out() {
    let (listener, port) = listener().await;
    let _device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut ctx = master(port).await;
    ctx.set_response_timeout(0, 50_000).unwrap();

    let err = ctx.get_version().await.unwrap_err();
    assert!(matches!(err, MendeleevError::Timeout));
}

#[tokio::test]
async fn connect_refused_without_listener() {
    let (listener, port) = listener().await;
    drop(listener);

    let mut ctx = Context::new_tcp("127.0.0.1", port).unwrap();
    let err = ctx.connect().await.unwrap_err();
    assert!(err.is_link_error());
    assert!(!ctx.is_connected());
}
