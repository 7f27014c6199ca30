// movecmd.rs — the clc_move unit: checksum, last frame and three delta commands

use std::ops::Range;

use crate::common::*;
use crate::error::MoveError;
use crate::q_shared::UserCmd;
use crate::qcommon::{SizeBuf, CLC_MOVE};

/// A decoded `clc_move`. The three commands are the two before the newest,
/// so one or two lost packets are recovered without resending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveUnit {
    pub checksum: u8,
    pub lastframe: i32,
    pub oldest: UserCmd,
    pub oldcmd: UserCmd,
    pub newcmd: UserCmd,
    /// Bytes of the message the checksum covers.
    pub block: (usize, usize),
}

impl MoveUnit {
    fn block(&self) -> Range<usize> {
        self.block.0..self.block.1
    }

    /// Checks the command block against the checksum the sender computed
    /// for packet `sequence`.
    pub fn verify(&self, msg: &SizeBuf, sequence: i32) -> Result<(), MoveError> {
        let computed = com_block_sequence_crc_byte(&msg.data[self.block()], sequence);
        if computed != self.checksum {
            return Err(MoveError::ChecksumMismatch {
                sequence,
                computed,
                received: self.checksum,
            });
        }
        Ok(())
    }
}

/// Appends a `clc_move` for `cmds = [seq-2, seq-1, seq]` to `buf` and
/// fills in the checksum for packet `sequence`.
pub fn msg_write_move(buf: &mut SizeBuf, sequence: i32, lastframe: i32, cmds: [&UserCmd; 3]) {
    msg_write_byte(buf, CLC_MOVE);

    // save the position for a checksum byte
    let checksum_index = buf.cursize;
    msg_write_byte(buf, 0);

    // let the server know what the last frame we got was, so the next
    // message can be delta compressed
    msg_write_long(buf, lastframe);

    let null = UserCmd::default();
    msg_write_delta_usercmd(buf, &null, cmds[0]);
    msg_write_delta_usercmd(buf, cmds[0], cmds[1]);
    msg_write_delta_usercmd(buf, cmds[1], cmds[2]);

    if buf.overflowed {
        return;
    }

    // calculate a checksum over the move commands
    let crc = com_block_sequence_crc_byte(&buf.data[checksum_index + 1..buf.cursize], sequence);
    buf.data[checksum_index] = crc;
}

/// Reads a `clc_move` body; the op byte has already been consumed.
pub fn msg_read_move(msg: &mut SizeBuf) -> Result<MoveUnit, MoveError> {
    let checksum = msg_read_byte(msg) as u8;
    let start = msg.readcount;
    let lastframe = msg_read_long(msg);

    let null = UserCmd::default();
    let oldest = msg_read_delta_usercmd(msg, &null);
    let oldcmd = msg_read_delta_usercmd(msg, &oldest);
    let newcmd = msg_read_delta_usercmd(msg, &oldcmd);

    if msg.is_bad_read() {
        return Err(MoveError::BadRead);
    }

    Ok(MoveUnit {
        checksum,
        lastframe,
        oldest,
        oldcmd,
        newcmd,
        block: (start, msg.readcount),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qcommon::MAX_MSGLEN;

    fn cmds() -> [UserCmd; 3] {
        let a = UserCmd { msec: 16, forwardmove: 400, angles: [0, 1000, 0], ..Default::default() };
        let b = UserCmd { msec: 17, buttons: 1, ..a };
        let c = UserCmd { msec: 15, sidemove: -200, impulse: 7, ..b };
        [a, b, c]
    }

    fn encoded(sequence: i32, lastframe: i32) -> SizeBuf {
        let c = cmds();
        let mut buf = SizeBuf::new(MAX_MSGLEN);
        msg_write_move(&mut buf, sequence, lastframe, [&c[0], &c[1], &c[2]]);
        buf
    }

    fn decode(buf: &SizeBuf) -> (SizeBuf, Result<MoveUnit, MoveError>) {
        let mut msg = SizeBuf::from_bytes(buf.as_slice());
        assert_eq!(msg_read_byte(&mut msg), CLC_MOVE);
        let unit = msg_read_move(&mut msg);
        (msg, unit)
    }

    #[test]
    fn test_move_unit_layout() {
        let buf = encoded(3, 41);
        assert_eq!(buf.data[0], CLC_MOVE as u8);
        assert_eq!(&buf.data[2..6], &41i32.to_le_bytes());

        let (msg, unit) = decode(&buf);
        let unit = unit.unwrap();
        let c = cmds();
        assert_eq!(unit.lastframe, 41);
        assert_eq!(unit.oldest, c[0]);
        assert_eq!(unit.oldcmd, c[1]);
        assert_eq!(unit.newcmd, c[2]);
        assert_eq!(unit.block, (2, buf.cursize));
        assert_eq!(msg.readcount, buf.cursize);
        unit.verify(&msg, 3).unwrap();
    }

    #[test]
    fn test_checksum_is_keyed_by_sequence() {
        let buf = encoded(100, -1);
        let (msg, unit) = decode(&buf);
        let unit = unit.unwrap();
        assert!(unit.verify(&msg, 100).is_ok());
        assert!(matches!(
            unit.verify(&msg, 101),
            Err(MoveError::ChecksumMismatch { sequence: 101, .. })
        ));
    }

    #[test]
    fn test_tampered_command_fails_checksum() {
        let mut buf = encoded(7, 2);
        // flip a bit in the last lightlevel byte
        let last = buf.cursize - 1;
        buf.data[last] ^= 0x10;
        let (msg, unit) = decode(&buf);
        let err = unit.unwrap().verify(&msg, 7).unwrap_err();
        assert!(matches!(err, MoveError::ChecksumMismatch { sequence: 7, .. }));
    }

    #[test]
    fn test_truncated_move_is_bad_read() {
        let buf = encoded(7, 2);
        let mut msg = SizeBuf::from_bytes(&buf.as_slice()[..10]);
        msg_read_byte(&mut msg);
        assert_eq!(msg_read_move(&mut msg), Err(MoveError::BadRead));
    }
}
