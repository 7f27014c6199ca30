// net_chan.rs — sequenced packet channel with one in-flight reliable message
//
// Packet header:
//   31 bits  sequence
//    1 bit   this packet carries a reliable payload
//   31 bits  acknowledge sequence
//    1 bit   acknowledge receipt of even/odd reliable message
//   16 bits  qport (client to server only)
//
// The channel only builds and parses packets; moving the bytes is the
// caller's job.

use crate::common::{msg_begin_reading, msg_read_long, msg_read_short, msg_write_long, msg_write_short};
use crate::error::NetchanError;
use crate::qcommon::{SizeBuf, MAX_MSGLEN, PACKET_HEADER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetSrc {
    Client,
    Server,
}

#[derive(Debug, Clone)]
pub struct NetChan {
    pub sock: NetSrc,
    pub qport: i32,

    pub last_received: i32, // for timeouts
    pub last_sent: i32,     // for retransmits

    pub dropped: i32, // between last packet and previous

    // sequencing variables
    pub incoming_sequence: i32,
    pub incoming_acknowledged: i32,
    pub incoming_reliable_acknowledged: i32, // single bit
    pub incoming_reliable_sequence: i32,     // single bit, maintained local

    pub outgoing_sequence: i32,
    pub reliable_sequence: i32,      // single bit
    pub last_reliable_sequence: i32, // sequence number of last send

    /// Reliable data waiting to go out.
    pub message: SizeBuf,

    reliable_buf: Vec<u8>, // unacked reliable message
}

impl NetChan {
    pub fn new(sock: NetSrc, qport: i32, curtime: i32) -> Self {
        let mut message = SizeBuf::new(MAX_MSGLEN - 16);
        message.allow_overflow = true;
        Self {
            sock,
            qport,
            last_received: curtime,
            last_sent: 0,
            dropped: 0,
            incoming_sequence: 0,
            incoming_acknowledged: 0,
            incoming_reliable_acknowledged: 0,
            incoming_reliable_sequence: 0,
            outgoing_sequence: 1,
            reliable_sequence: 0,
            last_reliable_sequence: 0,
            message,
            reliable_buf: Vec::new(),
        }
    }

    /// Resets the channel for a new connection.
    pub fn setup(&mut self, sock: NetSrc, qport: i32, curtime: i32) {
        *self = Self::new(sock, qport, curtime);
    }

    fn need_reliable(&self) -> bool {
        // the other side dropped the last reliable message
        if self.incoming_acknowledged > self.last_reliable_sequence
            && self.incoming_reliable_acknowledged != self.reliable_sequence
        {
            return true;
        }
        // the reliable transmit buffer is empty, copy the current message out
        self.reliable_buf.is_empty() && self.message.cursize > 0
    }

    /// Builds the next packet: header, then the pending or resent reliable
    /// message, then `data` if it fits.
    pub fn transmit(&mut self, data: &[u8], curtime: i32) -> Vec<u8> {
        if self.message.overflowed {
            tracing::warn!("Netchan_Transmit: outgoing message overflow");
            self.message.clear();
        }

        let send_reliable = self.need_reliable();

        if self.reliable_buf.is_empty() && self.message.cursize > 0 {
            self.reliable_buf = self.message.as_slice().to_vec();
            self.message.clear();
            self.reliable_sequence ^= 1;
        }

        let mut send = SizeBuf::new(MAX_MSGLEN);

        let w1 = (self.outgoing_sequence as u32 & !(1 << 31)) | ((send_reliable as u32) << 31);
        let w2 = (self.incoming_sequence as u32 & !(1 << 31))
            | ((self.incoming_reliable_sequence as u32) << 31);

        self.outgoing_sequence += 1;
        self.last_sent = curtime;

        msg_write_long(&mut send, w1 as i32);
        msg_write_long(&mut send, w2 as i32);

        // send the qport if we are a client
        if self.sock == NetSrc::Client {
            msg_write_short(&mut send, self.qport);
        }

        if send_reliable {
            send.write(&self.reliable_buf);
            self.last_reliable_sequence = self.outgoing_sequence;
        }

        if send.maxsize - send.cursize >= data.len() {
            send.write(data);
        } else {
            tracing::debug!(len = data.len(), "Netchan_Transmit: dumped unreliable");
        }

        send.as_slice().to_vec()
    }

    /// Validates the header of a received packet and updates sequencing.
    /// On success `msg.readcount` points at the payload.
    pub fn process(&mut self, msg: &mut SizeBuf, curtime: i32) -> Result<(), NetchanError> {
        let header = if self.sock == NetSrc::Server {
            PACKET_HEADER + 2
        } else {
            PACKET_HEADER
        };
        if msg.cursize < header {
            return Err(NetchanError::Runt(msg.cursize));
        }

        msg_begin_reading(msg);
        let sequence = msg_read_long(msg) as u32;
        let sequence_ack = msg_read_long(msg) as u32;

        // read the qport if we are a server
        if self.sock == NetSrc::Server {
            msg_read_short(msg);
        }

        let reliable_message = (sequence >> 31) as i32;
        let reliable_ack = (sequence_ack >> 31) as i32;
        let sequence = (sequence & !(1 << 31)) as i32;
        let sequence_ack = (sequence_ack & !(1 << 31)) as i32;

        // discard stale or duplicated packets
        if sequence < self.incoming_sequence {
            return Err(NetchanError::OutOfOrder { sequence, incoming: self.incoming_sequence });
        }
        if sequence == self.incoming_sequence {
            return Err(NetchanError::Duplicate { sequence, incoming: self.incoming_sequence });
        }

        // dropped packets don't keep the message from being used
        self.dropped = sequence - (self.incoming_sequence + 1);
        if self.dropped > 0 {
            tracing::debug!(dropped = self.dropped, sequence, "Netchan_Process: dropped packets");
        }

        // the current outgoing reliable message has been acknowledged
        if reliable_ack == self.reliable_sequence {
            self.reliable_buf.clear();
        }

        self.incoming_sequence = sequence;
        self.incoming_acknowledged = sequence_ack;
        self.incoming_reliable_acknowledged = reliable_ack;
        if reliable_message != 0 {
            self.incoming_reliable_sequence ^= 1;
        }

        self.last_received = curtime;
        Ok(())
    }
}
