// net_chan.rs — network channel implementation
// Converted from: myjka-original/qcommon/net_chan.cpp
//
// Handles packet sequencing and fragmentation over UDP. Reliable
// delivery is layered above the channel by the server/client command
// sequence numbers, so the channel itself only orders and reassembles.

use crate::common::{
    msg_begin_reading, msg_read_long, msg_read_short, msg_write_long, msg_write_short,
};
use crate::qcommon::{NetAdr, NetChan, NetSrc, SizeBuf, MAX_MSGLEN, MAX_PACKET_LEN};

/// Top bit of the sequence number marks a fragmented packet.
pub const FRAGMENT_BIT: u32 = 1 << 31;

/// Payload bytes per fragment. A fragment shorter than this marks the
/// end of the fragmented message, so an exactly-full final fragment
/// forces one extra zero-length fragment.
pub const FRAGMENT_SIZE: usize = MAX_PACKET_LEN - 100;

/// Set up a new network channel.
pub fn netchan_setup(sock: NetSrc, chan: &mut NetChan, adr: NetAdr, qport: i32) {
    *chan = NetChan::new();
    chan.sock = sock;
    chan.remote_address = adr;
    chan.qport = qport;
    chan.incoming_sequence = 0;
    chan.outgoing_sequence = 1;
}

/// Send a message through the channel, fragmenting if necessary.
pub fn netchan_transmit(chan: &mut NetChan, data: &[u8], curtime: i32) {
    if data.len() > MAX_MSGLEN {
        crate::common::com_error(
            crate::qcommon::ERR_DROP,
            &format!("netchan_transmit: length = {}", data.len()),
        );
    }

    chan.unsent_fragment_start = 0;

    // fragment large messages
    if data.len() >= FRAGMENT_SIZE {
        chan.unsent_fragments = true;
        chan.unsent_buffer = data.to_vec();

        // only send the first fragment now; the rest are drained by the
        // per-frame send loop
        netchan_transmit_next_fragment(chan, curtime);
        return;
    }

    let mut send = SizeBuf::new((MAX_PACKET_LEN + 64) as i32);
    msg_write_long(&mut send, chan.outgoing_sequence);
    if matches!(chan.sock, NetSrc::Client) {
        msg_write_short(&mut send, chan.qport);
    }
    send.write(data);

    chan.outgoing_sequence += 1;
    chan.last_sent = curtime;

    let cursize = send.cursize as usize;
    crate::net::net_send_packet(chan.sock, &send.data[..cursize], &chan.remote_address);
}

/// Send one fragment of the pending message.
pub fn netchan_transmit_next_fragment(chan: &mut NetChan, curtime: i32) {
    let mut send = SizeBuf::new((MAX_PACKET_LEN + 64) as i32);
    msg_write_long(&mut send, (chan.outgoing_sequence as u32 | FRAGMENT_BIT) as i32);
    if matches!(chan.sock, NetSrc::Client) {
        msg_write_short(&mut send, chan.qport);
    }

    let remaining = chan.unsent_buffer.len() - chan.unsent_fragment_start;
    let fragment_length = remaining.min(FRAGMENT_SIZE);

    msg_write_short(&mut send, chan.unsent_fragment_start as i32);
    msg_write_short(&mut send, fragment_length as i32);
    let start = chan.unsent_fragment_start;
    send.write(&chan.unsent_buffer[start..start + fragment_length]);

    let cursize = send.cursize as usize;
    crate::net::net_send_packet(chan.sock, &send.data[..cursize], &chan.remote_address);

    chan.unsent_fragment_start += fragment_length;
    chan.last_sent = curtime;

    // the message is complete once everything is sent AND the final
    // fragment was short of FRAGMENT_SIZE
    if chan.unsent_fragment_start == chan.unsent_buffer.len() && fragment_length != FRAGMENT_SIZE {
        chan.outgoing_sequence += 1;
        chan.unsent_fragments = false;
        chan.unsent_buffer.clear();
    }
}

/// Process an incoming packet. Returns true if the packet is in order and
/// complete; the message read position is left just past the header.
///
/// For fragmented packets, returns false until the last fragment arrives,
/// at which point the message buffer is rewritten with the assembled
/// payload.
pub fn netchan_process(chan: &mut NetChan, msg: &mut SizeBuf, curtime: i32) -> bool {
    msg_begin_reading(msg);
    let raw = msg_read_long(msg) as u32;
    let fragmented = raw & FRAGMENT_BIT != 0;
    let sequence = (raw & !FRAGMENT_BIT) as i32;

    // the qport was already used by the caller to locate the channel
    if matches!(chan.sock, NetSrc::Server) {
        let _qport = msg_read_short(msg);
    }

    // the fragment offset is a bare 16 bit field; messages are capped at
    // MAX_MSGLEN so it cannot wrap
    let mut fragment_start = 0usize;
    let mut fragment_length = 0usize;
    if fragmented {
        fragment_start = msg_read_short(msg) as u16 as usize;
        fragment_length = msg_read_short(msg) as u16 as usize;
    }

    // discard out of order or duplicated packets
    if sequence <= chan.incoming_sequence {
        return false;
    }

    chan.dropped = sequence - (chan.incoming_sequence + 1);
    if chan.dropped > 0 {
        crate::common::com_dprintf(&format!(
            "{}: dropped {} packets at {}\n",
            crate::net::net_adr_to_string(&chan.remote_address),
            chan.dropped,
            sequence
        ));
    }

    if fragmented {
        // make sure we add the fragments in correct order
        if chan.fragment_sequence != sequence {
            chan.fragment_sequence = sequence;
            chan.fragment_buffer.clear();
        }

        if fragment_start != chan.fragment_buffer.len() {
            crate::common::com_dprintf(&format!(
                "{}: dropped a message fragment\n",
                crate::net::net_adr_to_string(&chan.remote_address)
            ));
            return false;
        }

        if msg.readcount as usize + fragment_length > msg.cursize as usize
            || chan.fragment_buffer.len() + fragment_length > MAX_MSGLEN
        {
            crate::common::com_dprintf(&format!(
                "{}: illegal fragment length\n",
                crate::net::net_adr_to_string(&chan.remote_address)
            ));
            return false;
        }

        let start = msg.readcount as usize;
        chan.fragment_buffer
            .extend_from_slice(&msg.data[start..start + fragment_length]);

        // a fragment of exactly FRAGMENT_SIZE means more are coming
        if fragment_length == FRAGMENT_SIZE {
            return false;
        }

        if chan.fragment_buffer.len() + 4 > msg.maxsize as usize {
            crate::common::com_dprintf(&format!(
                "{}: fragment overflows message buffer\n",
                crate::net::net_adr_to_string(&chan.remote_address)
            ));
            chan.fragment_buffer.clear();
            return false;
        }

        // rebuild the message as if it had arrived unfragmented
        let assembled = std::mem::take(&mut chan.fragment_buffer);
        msg.clear();
        msg.data[..4].copy_from_slice(&sequence.to_le_bytes());
        msg.data[4..4 + assembled.len()].copy_from_slice(&assembled);
        msg.cursize = 4 + assembled.len() as i32;
        msg.readcount = 4;
    }

    chan.incoming_sequence = sequence;
    chan.last_received = curtime;
    true
}

// ============================================================
// Out of band packets
// ============================================================

/// Build an out-of-band packet (sequence = -1) and return its bytes.
pub fn netchan_out_of_band_data(data: &[u8]) -> Vec<u8> {
    let mut send = SizeBuf::new((data.len() + 8) as i32);
    msg_write_long(&mut send, -1); // -1 sequence means out of band
    send.write(data);
    let cursize = send.cursize as usize;
    send.data[..cursize].to_vec()
}

/// Build and send an out-of-band text packet.
pub fn netchan_out_of_band_print(sock: NetSrc, adr: &NetAdr, message: &str) {
    let packet = netchan_out_of_band_data(message.as_bytes());
    crate::net::net_send_packet(sock, &packet, adr);
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_server_chan() -> NetChan {
        let mut chan = NetChan::new();
        netchan_setup(NetSrc::Server, &mut chan, NetAdr::ip4([10, 0, 0, 2], 29071), 777);
        chan
    }

    /// Build a client->server packet the way netchan_transmit would.
    fn client_packet(sequence: u32, qport: i32, payload: &[u8]) -> SizeBuf {
        let mut msg = SizeBuf::new(MAX_MSGLEN as i32);
        msg_write_long(&mut msg, sequence as i32);
        msg_write_short(&mut msg, qport);
        msg.write(payload);
        msg
    }

    fn client_fragment(sequence: u32, qport: i32, start: usize, payload: &[u8]) -> SizeBuf {
        let mut msg = SizeBuf::new(MAX_MSGLEN as i32);
        msg_write_long(&mut msg, (sequence | FRAGMENT_BIT) as i32);
        msg_write_short(&mut msg, qport);
        msg_write_short(&mut msg, start as i32);
        msg_write_short(&mut msg, payload.len() as i32);
        msg.write(payload);
        msg
    }

    #[test]
    fn test_out_of_band_framing() {
        let packet = netchan_out_of_band_data(b"getchallenge");
        assert_eq!(&packet[..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&packet[4..], b"getchallenge");
    }

    #[test]
    fn test_transmit_advances_sequence() {
        let mut chan = make_server_chan();
        netchan_transmit(&mut chan, b"snapshot", 100);
        assert_eq!(chan.outgoing_sequence, 2);
        assert!(!chan.unsent_fragments);
    }

    #[test]
    fn test_transmit_large_message_fragments() {
        let mut chan = make_server_chan();
        let big = vec![7u8; FRAGMENT_SIZE * 2 + 100];
        netchan_transmit(&mut chan, &big, 100);
        // first fragment went out, more remain
        assert!(chan.unsent_fragments);
        assert_eq!(chan.unsent_fragment_start, FRAGMENT_SIZE);
        // sequence holds until the whole message is out
        assert_eq!(chan.outgoing_sequence, 1);

        netchan_transmit_next_fragment(&mut chan, 101);
        netchan_transmit_next_fragment(&mut chan, 102);
        assert!(!chan.unsent_fragments);
        assert_eq!(chan.outgoing_sequence, 2);
    }

    #[test]
    fn test_process_in_order() {
        let mut chan = make_server_chan();
        let mut msg = client_packet(1, 777, b"hello");
        assert!(netchan_process(&mut chan, &mut msg, 50));
        assert_eq!(chan.incoming_sequence, 1);
        // read position sits just past the header
        assert_eq!(msg.readcount, 6);
    }

    #[test]
    fn test_process_rejects_stale_sequence() {
        let mut chan = make_server_chan();
        let mut msg = client_packet(5, 777, b"a");
        assert!(netchan_process(&mut chan, &mut msg, 50));

        let mut old = client_packet(5, 777, b"b");
        assert!(!netchan_process(&mut chan, &mut old, 51));
        let mut older = client_packet(3, 777, b"c");
        assert!(!netchan_process(&mut chan, &mut older, 52));
    }

    #[test]
    fn test_process_counts_drops() {
        let mut chan = make_server_chan();
        let mut msg = client_packet(1, 777, b"a");
        assert!(netchan_process(&mut chan, &mut msg, 50));
        let mut msg = client_packet(4, 777, b"b");
        assert!(netchan_process(&mut chan, &mut msg, 51));
        assert_eq!(chan.dropped, 2);
    }

    #[test]
    fn test_fragment_reassembly() {
        let mut chan = make_server_chan();

        let mut payload = vec![0u8; FRAGMENT_SIZE + 300];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }

        let mut first = client_fragment(1, 777, 0, &payload[..FRAGMENT_SIZE]);
        assert!(!netchan_process(&mut chan, &mut first, 50));

        let mut second = client_fragment(1, 777, FRAGMENT_SIZE, &payload[FRAGMENT_SIZE..]);
        assert!(netchan_process(&mut chan, &mut second, 51));

        assert_eq!(chan.incoming_sequence, 1);
        assert_eq!(second.readcount, 4);
        assert_eq!(second.cursize as usize, 4 + payload.len());
        assert_eq!(&second.data[4..4 + payload.len()], &payload[..]);
    }

    #[test]
    fn test_fragment_out_of_order_dropped() {
        let mut chan = make_server_chan();
        // fragment starting at a nonzero offset with no predecessor
        let mut bad = client_fragment(1, 777, 64, b"tail");
        assert!(!netchan_process(&mut chan, &mut bad, 50));
        assert_eq!(chan.incoming_sequence, 0);
    }
}
