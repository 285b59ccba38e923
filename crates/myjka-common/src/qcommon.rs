// qcommon.rs — definitions common to the network and server layers
// Converted from: myjka-original/qcommon/qcommon.h

// ============================================================
// SizeBuf (msg_t)
// ============================================================

pub const MAX_MSGLEN: usize = 49152;

/// Maximum size of a single datagram on the wire. Messages larger than
/// this are fragmented by the netchan.
pub const MAX_PACKET_LEN: usize = 1400;

#[derive(Debug, Clone)]
pub struct SizeBuf {
    pub data: Vec<u8>,
    pub maxsize: i32,
    pub cursize: i32,
    pub readcount: i32,
    pub allow_overflow: bool,
    pub overflowed: bool,
}

impl SizeBuf {
    pub fn new(maxsize: i32) -> Self {
        Self {
            data: vec![0u8; maxsize as usize],
            maxsize,
            cursize: 0,
            readcount: 0,
            allow_overflow: false,
            overflowed: false,
        }
    }

    pub fn clear(&mut self) {
        self.cursize = 0;
        self.readcount = 0;
        self.overflowed = false;
    }

    /// Append raw bytes, flagging overflow instead of growing.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.cursize as usize + bytes.len() > self.maxsize as usize {
            if !self.allow_overflow {
                crate::common::com_printf("SizeBuf::write: overflow\n");
            }
            self.overflowed = true;
            return;
        }
        let start = self.cursize as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.cursize += bytes.len() as i32;
    }
}

// ============================================================
// Protocol
// ============================================================

pub const PROTOCOL_VERSION: i32 = 26;

pub const PORT_SERVER: u16 = 29070;

/// Per-direction reliable command ring size.
pub const MAX_RELIABLE_COMMANDS: usize = 64;

/// Maximum usercmds a single move block may carry.
pub const MAX_PACKET_USERCMDS: usize = 32;

/// Number of old messages that must be kept for delta and ping bookkeeping.
pub const PACKET_BACKUP: usize = 32;
pub const PACKET_MASK: usize = PACKET_BACKUP - 1;

pub const MAX_DOWNLOAD_WINDOW: usize = 8;
pub const MAX_DOWNLOAD_BLKSIZE: usize = 1024;

pub const MAX_CONFIGSTRINGS: usize = 1700;
pub const MAX_GENTITIES: usize = 1024;

pub const CS_PLAYERS: usize = 544;

// error levels for com_error
pub const ERR_FATAL: i32 = 0;
pub const ERR_DROP: i32 = 1;

// ============================================================
// server to client ops
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SvcOps {
    Bad = 0,
    Nop = 1,
    Gamestate = 2,
    ConfigString = 3,  // [short] [string] only in gamestate messages
    Baseline = 4,      // only in gamestate messages
    ServerCommand = 5, // [string] to be executed by client game module
    Download = 6,      // [short] size [size bytes]
    Snapshot = 7,
    SetGame = 8,
    MapChange = 9,
    EOF = 10,
}

// ============================================================
// client to server ops
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClcOps {
    Bad = 0,
    Nop = 1,
    Move = 2,          // [usercmd_t]
    MoveNoDelta = 3,   // [usercmd_t]
    ClientCommand = 4, // [string] message
    EOF = 5,
}

// ============================================================
// Network address
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetAdrType {
    #[default]
    Bad,
    Bot,
    Loopback,
    Broadcast,
    Ip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetAdr {
    pub adr_type: NetAdrType,
    pub ip: [u8; 4],
    pub port: u16,
}

impl NetAdr {
    pub fn ip4(ip: [u8; 4], port: u16) -> Self {
        Self {
            adr_type: NetAdrType::Ip,
            ip,
            port,
        }
    }

    pub fn loopback() -> Self {
        Self {
            adr_type: NetAdrType::Loopback,
            ip: [127, 0, 0, 1],
            port: 0,
        }
    }

    pub fn bot() -> Self {
        Self {
            adr_type: NetAdrType::Bot,
            ip: [0; 4],
            port: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetSrc {
    Client,
    #[default]
    Server,
}

// ============================================================
// NetChan
//
// The channel handles packet sequencing and fragmentation of messages
// larger than MAX_PACKET_LEN. Reliability is layered above it by the
// server command / client command sequence numbers.
// ============================================================

#[derive(Debug, Clone)]
pub struct NetChan {
    pub sock: NetSrc,

    /// Count of packets dropped between the last two received.
    pub dropped: i32,

    pub remote_address: NetAdr,
    /// qport value to write when transmitting (clients only).
    pub qport: i32,

    pub incoming_sequence: i32,
    pub outgoing_sequence: i32,

    // incoming fragment assembly buffer
    pub fragment_sequence: i32,
    pub fragment_buffer: Vec<u8>,

    // outgoing fragment state
    pub unsent_fragments: bool,
    pub unsent_fragment_start: usize,
    pub unsent_buffer: Vec<u8>,

    pub last_received: i32,
    pub last_sent: i32,
}

impl NetChan {
    pub fn new() -> Self {
        Self {
            sock: NetSrc::Server,
            dropped: 0,
            remote_address: NetAdr::default(),
            qport: 0,
            incoming_sequence: 0,
            outgoing_sequence: 1,
            fragment_sequence: 0,
            fragment_buffer: Vec::new(),
            unsent_fragments: false,
            unsent_fragment_start: 0,
            unsent_buffer: Vec::new(),
            last_received: 0,
            last_sent: 0,
        }
    }
}

impl Default for NetChan {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizebuf_write_and_overflow() {
        let mut buf = SizeBuf::new(4);
        buf.write(&[1, 2, 3]);
        assert_eq!(buf.cursize, 3);
        assert!(!buf.overflowed);

        buf.allow_overflow = true;
        buf.write(&[4, 5]);
        assert!(buf.overflowed);
        assert_eq!(buf.cursize, 3); // overflowing write is discarded
    }

    #[test]
    fn test_sizebuf_clear() {
        let mut buf = SizeBuf::new(16);
        buf.write(&[1, 2, 3]);
        buf.readcount = 2;
        buf.clear();
        assert_eq!(buf.cursize, 0);
        assert_eq!(buf.readcount, 0);
    }

    #[test]
    fn test_netchan_defaults() {
        let chan = NetChan::new();
        assert_eq!(chan.incoming_sequence, 0);
        assert_eq!(chan.outgoing_sequence, 1);
        assert!(!chan.unsent_fragments);
    }

    #[test]
    fn test_packet_mask() {
        assert_eq!(PACKET_BACKUP & PACKET_MASK, 0);
        assert_eq!((PACKET_BACKUP + 3) & PACKET_MASK, 3);
    }
}
