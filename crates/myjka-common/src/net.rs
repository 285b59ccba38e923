// net.rs — global network dispatch functions
// Converted from: myjka-original/qcommon/net_ip.cpp
//
// In the C original, NET_GetPacket() and NET_SendPacket() are global
// functions any module can call. Here incoming datagrams flow through a
// bounded queue filled by the socket pump (or by tests / the loopback),
// and outgoing datagrams go through a registered send handler.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Mutex, OnceLock};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use socket2::{Domain, Protocol, Socket, Type};

use crate::qcommon::{NetAdr, NetAdrType, NetSrc, SizeBuf};

// =============================================================================
// Address utility functions (pure logic, no sockets)
// =============================================================================

/// Compare two net addresses including port.
pub fn net_compare_adr(a: &NetAdr, b: &NetAdr) -> bool {
    if a.adr_type != b.adr_type {
        return false;
    }
    match a.adr_type {
        NetAdrType::Loopback => true,
        NetAdrType::Ip | NetAdrType::Broadcast => a.ip == b.ip && a.port == b.port,
        _ => false,
    }
}

/// Compare two net addresses ignoring port.
pub fn net_compare_base_adr(a: &NetAdr, b: &NetAdr) -> bool {
    if a.adr_type != b.adr_type {
        return false;
    }
    match a.adr_type {
        NetAdrType::Loopback => true,
        NetAdrType::Ip | NetAdrType::Broadcast => a.ip == b.ip,
        _ => false,
    }
}

/// Compare the leading `netmask` bits of two addresses. Used by the ban
/// list for subnet rules.
pub fn net_compare_base_adr_mask(a: &NetAdr, b: &NetAdr, netmask: u32) -> bool {
    if a.adr_type != b.adr_type {
        return false;
    }
    if a.adr_type == NetAdrType::Loopback {
        return true;
    }
    if a.adr_type != NetAdrType::Ip {
        return false;
    }

    let netmask = netmask.min(32);
    if netmask == 0 {
        return true;
    }
    let mask = (!0u32) << (32 - netmask);
    let av = u32::from_be_bytes(a.ip);
    let bv = u32::from_be_bytes(b.ip);
    (av & mask) == (bv & mask)
}

/// Convert a NetAdr to a human-readable string.
pub fn net_adr_to_string(a: &NetAdr) -> String {
    match a.adr_type {
        NetAdrType::Loopback => "loopback".to_string(),
        NetAdrType::Bot => "bot".to_string(),
        NetAdrType::Bad => "bad".to_string(),
        NetAdrType::Ip | NetAdrType::Broadcast => {
            format!("{}.{}.{}.{}:{}", a.ip[0], a.ip[1], a.ip[2], a.ip[3], a.port)
        }
    }
}

/// True for the loopback interface only.
pub fn net_is_local_address(a: &NetAdr) -> bool {
    match a.adr_type {
        NetAdrType::Loopback => true,
        NetAdrType::Ip => a.ip[0] == 127,
        _ => false,
    }
}

/// Sys_IsLANAddress — loopback or a private IPv4 range.
pub fn sys_is_lan_address(a: &NetAdr) -> bool {
    match a.adr_type {
        NetAdrType::Loopback => true,
        NetAdrType::Ip => {
            a.ip[0] == 127
                || a.ip[0] == 10
                || (a.ip[0] == 192 && a.ip[1] == 168)
                || (a.ip[0] == 172 && (16..=31).contains(&a.ip[1]))
        }
        _ => false,
    }
}

// =============================================================================
// Inbound packet queue
//
// The socket pump (or the loopback) produces; the main loop consumes.
// Bounded so a flood can only cost us packets, never memory.
// =============================================================================

pub struct QueuedPacket {
    pub from: NetAdr,
    pub data: Vec<u8>,
}

/// Queue capacity — handles typical burst traffic without excessive memory use.
pub const QUEUE_CAPACITY: usize = 1024;

static SERVER_QUEUE: OnceLock<(Sender<QueuedPacket>, Receiver<QueuedPacket>)> = OnceLock::new();

fn server_queue() -> &'static (Sender<QueuedPacket>, Receiver<QueuedPacket>) {
    SERVER_QUEUE.get_or_init(|| bounded(QUEUE_CAPACITY))
}

/// Hand an incoming datagram to the server. Returns `false` if the queue
/// is full and the packet was dropped.
pub fn net_queue_packet(from: NetAdr, data: Vec<u8>) -> bool {
    match server_queue().0.try_send(QueuedPacket { from, data }) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => false,
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// NET_GetPacket — pull the next queued datagram, if any.
pub fn net_get_packet(_sock: NetSrc, from: &mut NetAdr, message: &mut SizeBuf) -> bool {
    match server_queue().1.try_recv() {
        Ok(packet) => {
            *from = packet.from;
            message.clear();
            let len = packet.data.len().min(message.maxsize as usize);
            message.data[..len].copy_from_slice(&packet.data[..len]);
            message.cursize = len as i32;
            true
        }
        Err(_) => false,
    }
}

// =============================================================================
// Outbound dispatch
// =============================================================================

pub type SendHandler = Box<dyn Fn(NetSrc, &[u8], &NetAdr) + Send>;

static SEND_HANDLER: Mutex<Option<SendHandler>> = Mutex::new(None);

/// Register the function that actually puts datagrams on the wire.
/// Tests install a capturing handler here.
pub fn net_set_send_handler(handler: SendHandler) {
    let mut h = SEND_HANDLER.lock().unwrap();
    *h = Some(handler);
}

pub fn net_clear_send_handler() {
    let mut h = SEND_HANDLER.lock().unwrap();
    *h = None;
}

/// NET_SendPacket — dispatch an outgoing datagram. Without a registered
/// handler the packet is silently dropped.
pub fn net_send_packet(sock: NetSrc, data: &[u8], to: &NetAdr) {
    if to.adr_type == NetAdrType::Bot || to.adr_type == NetAdrType::Bad {
        return;
    }
    let h = SEND_HANDLER.lock().unwrap();
    if let Some(ref handler) = *h {
        handler(sock, data, to);
    }
}

// =============================================================================
// UDP sockets
// =============================================================================

/// Open a non-blocking UDP socket bound to `port` on all interfaces.
pub fn net_open_ip(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

pub fn net_adr_from_sockaddr(addr: &SocketAddr) -> NetAdr {
    match addr {
        SocketAddr::V4(v4) => NetAdr::ip4(v4.ip().octets(), v4.port()),
        SocketAddr::V6(_) => NetAdr::default(),
    }
}

pub fn net_sockaddr_from_adr(adr: &NetAdr) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(adr.ip.into(), adr.port))
}

/// Drain every datagram currently readable on `socket` into the inbound
/// queue. Called once per frame by the dedicated server loop.
pub fn net_pump_socket(socket: &UdpSocket) {
    let mut buf = [0u8; crate::qcommon::MAX_PACKET_LEN + 64];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, addr)) => {
                let from = net_adr_from_sockaddr(&addr);
                net_queue_packet(from, buf[..len].to_vec());
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(_) => return,
        }
    }
}

// ============================================================
// Tests
// ============================================================
