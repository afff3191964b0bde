//! The UDP server loop: decodes inbound datagrams, feeds them to the peer
//! engine, and ships back whatever frames it produces. A single socket
//! handles both control and bulk data traffic, matching the protocol's
//! one-endpoint-per-peer design.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use codec::Frame;
use engine::{BlockCache, Outbound, Peer};

use crate::config::Config;
use crate::diagnostics;
use crate::statistics::{Stat, Statistics};

/// Largest datagram we'll read in one call; comfortably above any realistic
/// `DATA` frame built from `origination.packet_size`.
const RECV_BUF_LEN: usize = 65536;

pub async fn run(config: Arc<Config>, stats: Statistics) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(("0.0.0.0", config.peer.listen_port)).await?);

    log::info!(
        "scdt peer listening: port={}, is_root={}, root={}:{}",
        config.peer.listen_port,
        config.peer.is_root,
        config.peer.remote_address,
        config.peer.remote_port,
    );

    let cache = BlockCache::new(config.cache.cache_size, config.cache.block_size)?;
    let root = SocketAddrV4::new(config.peer.remote_address, config.peer.remote_port);

    let peer = Arc::new(Mutex::new(if config.peer.is_root {
        Peer::new_root(cache)
    } else {
        Peer::new_member(root, cache)
    }));

    if !config.peer.is_root {
        let outbound = peer.lock().await.bootstrap(Instant::now());
        send_all(&socket, outbound, &stats).await;
    }

    if config.peer.is_root {
        spawn_originator(config.clone(), peer.clone(), socket.clone(), stats.clone());
    }

    let mut buf = vec![0u8; RECV_BUF_LEN];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (size, source) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        log::error!("udp recv failed: {e}");
                        continue;
                    }
                };

                let Some(source) = as_v4(source) else {
                    log::warn!("dropping datagram from non-ipv4 source: {source}");
                    continue;
                };

                stats.record(&[Stat::ReceivedBytes(size), Stat::ReceivedPkts(1)]);

                let frame = match Frame::decode(&buf[..size]) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::debug!("dropping malformed frame from {source}: {e}");
                        continue;
                    }
                };

                let was_nack = matches!(frame, Frame::Nack { .. });
                let outbound = peer.lock().await.handle_frame(source, frame, Instant::now());

                if was_nack && outbound.iter().any(|o| matches!(o.frame, Frame::Data { .. })) {
                    stats.record(&[Stat::NacksServed(1)]);
                }

                send_all(&socket, outbound, &stats).await;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                break;
            }
        }
    }

    let guard = peer.lock().await;
    let last_latency_ms = guard.last_origination_timestamp().map(|sent_at| (now_secs() - sent_at) * 1000.0);

    if let Err(e) = diagnostics::record_shutdown(last_latency_ms, guard.child_count()) {
        log::warn!("failed to persist shutdown diagnostics: {e}");
    }

    Ok(())
}

fn spawn_originator(config: Arc<Config>, peer: Arc<Mutex<Peer>>, socket: Arc<UdpSocket>, stats: Statistics) {
    let packet_size = config.origination.packet_size;
    let interval = Duration::from_millis(config.origination.interval_ms);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            let outbound = peer.lock().await.originate(packet_size, now_secs());
            send_all(&socket, outbound, &stats).await;
        }
    });
}

async fn send_all(socket: &UdpSocket, outbound: Vec<Outbound<'_>>, stats: &Statistics) {
    let mut buf = BytesMut::new();

    for item in outbound {
        let is_nack = matches!(item.frame, Frame::Nack { .. });
        item.frame.encode(&mut buf);

        match socket.send_to(&buf, SocketAddr::V4(item.to)).await {
            Ok(n) => {
                let mut recorded = vec![Stat::SentBytes(n), Stat::SentPkts(1)];
                if is_nack {
                    recorded.push(Stat::NacksSent(1));
                }
                stats.record(&recorded);
            }
            Err(e) => log::error!("udp send to {} failed: {e}", item.to),
        }
    }
}

fn as_v4(addr: SocketAddr) -> Option<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(_) => None,
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
