//! # Transport
//!
//! UDP multicast send/receive (§4.2). Unlike this codebase's existing
//! MQTT-based `Replicator`, there is no broker here: every peer joins the
//! same multicast group and both publishes and subscribes on the same
//! socket. Loop prevention (§4.4) therefore can't rely on "don't echo my own
//! publish" the way the MQTT client does — multicast loopback is left on
//! (§9 Open Question, resolved) and self-originated frames are instead
//! filtered by `origin_id` once decoded, one layer up in the replicator.
//!
//! `tokio::net::UdpSocket` has no multicast-join or `SO_REUSEADDR` API of
//! its own, so the socket is built and configured with `socket2` first, then
//! handed to tokio via `from_std`. Every other example repo in this pack
//! predates needing UDP multicast, so `socket2` is the one dependency this
//! module adds beyond the inherited stack (see DESIGN.md).

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::config::PeerConfig;

/// A joined multicast group, ready to broadcast and receive raw frames.
///
/// Frame loss, truncation, and reordering are all expected and handled
/// above this layer (§3 Invariant 2); `Transport` itself never retries.
pub struct Transport {
    socket: UdpSocket,
    group: SocketAddrV4,
    max_frame_bytes: usize,
}

impl Transport {
    /// Bind, join `config.group` on `config.port`, and set the configured
    /// TTL. Errors here are one-shot setup failures (§1) and propagate as
    /// `anyhow::Error` rather than the crate's typed `Error`, matching this
    /// codebase's split between construction-time and steady-state errors.
    pub async fn bind(config: &PeerConfig) -> anyhow::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        socket.bind(&SocketAddr::V4(bind_addr).into())?;
        socket.set_nonblocking(true)?;

        socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_ttl_v4(config.ttl)?;
        // Loopback stays on: without a broker, a single-process multi-peer
        // test (and a single-host multi-peer deployment) depends on the OS
        // delivering a peer's own multicast frames back to this host.
        socket.set_multicast_loop_v4(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        Ok(Self {
            socket,
            group: SocketAddrV4::new(config.group, config.port),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    /// Broadcast `frame` to the multicast group. Per §4.2 and §7, send
    /// failures are logged and swallowed: a dropped frame is just one more
    /// instance of the lossy delivery the protocol already tolerates.
    pub async fn send(&self, frame: &[u8]) {
        if frame.len() > self.max_frame_bytes {
            warn!(
                "dropping outbound frame of {} bytes, exceeds max_frame_bytes {}",
                frame.len(),
                self.max_frame_bytes
            );
            return;
        }
        if let Err(e) = self.socket.send_to(frame, SocketAddr::V4(self.group)).await {
            debug!("transport send failed: {e}");
        }
    }

    /// Await the next datagram, truncated to `max_frame_bytes`. Returns
    /// `None` only on an unrecoverable socket error (closed/invalid fd);
    /// ordinary OS-level packet loss never reaches here at all.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; self.max_frame_bytes];
        match self.socket.recv_from(&mut buf).await {
            Ok((n, _peer)) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(e) => {
                warn!("transport recv failed: {e}");
                None
            }
        }
    }

    /// Best-effort local port, useful in tests that bind several peers on
    /// an ephemeral port range.
    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Leave the multicast group (§4.7: `close` "leaves the multicast
    /// group, closes the transport"). The underlying socket itself closes
    /// when the last `Arc<Transport>` drops; this just releases group
    /// membership up front instead of waiting on that drop.
    pub fn close(&self) {
        if let Err(e) = self.socket.leave_multicast_v4(*self.group.ip(), Ipv4Addr::UNSPECIFIED) {
            debug!("failed to leave multicast group: {e}");
        }
    }
}
