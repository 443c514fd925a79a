#![allow(dead_code)]

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use btc_peer_pool::{
    frame, ConnectionConfig, MessageHeader, Network, ServiceFlags, VersionPayload, HEADER_SIZE,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub fn full_node() -> ServiceFlags {
    ServiceFlags::NODE_NETWORK | ServiceFlags::NODE_BLOOM | ServiceFlags::NODE_WITNESS
}

pub fn hash(last: u8) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[31] = last;
    hash
}

/// Connection settings pointing at a simulated peer. The heartbeat is slow
/// unless a test asks otherwise.
pub fn config(port: u16) -> ConnectionConfig {
    ConnectionConfig::default()
        .with_port(port)
        .with_ping_interval(Duration::from_secs(60))
}

pub async fn bind() -> anyhow::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

pub async fn read_frame(stream: &mut TcpStream) -> anyhow::Result<(MessageHeader, Vec<u8>)> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let header = MessageHeader::from_bytes(&header)?;

    let mut payload = vec![0u8; header.payload_len()];
    stream.read_exact(&mut payload).await?;
    Ok((header, payload))
}

pub async fn send(stream: &mut TcpStream, command: &str, payload: &[u8]) -> anyhow::Result<()> {
    stream
        .write_all(&frame(Network::MainNet, command, payload)?)
        .await?;
    Ok(())
}

pub fn inv_payload(entries: &[(u32, u8)]) -> Vec<u8> {
    let mut payload = vec![entries.len() as u8];
    for (kind, last) in entries {
        payload.extend_from_slice(&kind.to_le_bytes());
        payload.extend_from_slice(&hash(*last));
    }
    payload
}

/// Plays the remote side of the handshake: waits for our version, answers
/// with one advertising `services`, then acknowledges our verack with
/// `reply`. Returns the version we sent.
pub async fn accept_handshake(
    stream: &mut TcpStream,
    services: ServiceFlags,
    reply: &str,
) -> anyhow::Result<VersionPayload> {
    let (header, payload) = read_frame(stream).await?;
    anyhow::ensure!(
        header.command_name() == "version",
        "expected version, got {}",
        header.command_name()
    );
    let ours = VersionPayload::from_bytes(&payload)?;

    let mut version = VersionPayload::new(Network::MainNet, 0x5eed);
    version.services = services.to_u64();
    version.user_agent = "/Satoshi:26.0.0/".to_string();
    send(stream, "version", &version.to_bytes()?).await?;

    let (header, _) = read_frame(stream).await?;
    anyhow::ensure!(
        header.command_name() == "verack",
        "expected verack, got {}",
        header.command_name()
    );
    send(stream, reply, &[]).await?;

    Ok(ours)
}

/// Answers pings with pongs until the other side goes away.
pub async fn answer_until_closed(mut stream: TcpStream) {
    while let Ok((header, payload)) = read_frame(&mut stream).await {
        if header.command_name() == "ping" && send(&mut stream, "pong", &payload).await.is_err() {
            break;
        }
    }
}

/// Accepts connections forever, running `session` on each.
pub fn serve<F, Fut>(listener: TcpListener, session: F)
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(session(stream));
        }
    });
}

/// Polls `condition` until it holds or `within` runs out.
pub async fn wait_until<F: Fn() -> bool>(condition: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}
