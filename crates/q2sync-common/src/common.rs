// common.rs — logging, message buffer I/O and the sequenced block checksum

use crate::crc::crc_block;
use crate::q_shared::{EntityState, UserCmd, Vec3, MAX_EDICTS};
use crate::qcommon::*;

// ============================================================
// Com_Printf / Com_DPrintf
// ============================================================

/// General-purpose print. Routed through `tracing` at info level.
pub fn com_printf(msg: &str) {
    tracing::info!(target: "q2sync", "{}", msg.trim_end());
}

/// Developer print. Routed through `tracing` at debug level, so it only
/// shows when the subscriber enables debug output.
pub fn com_dprintf(msg: &str) {
    tracing::debug!(target: "q2sync", "{}", msg.trim_end());
}

// ============================================================
// SizeBuf operations
// ============================================================

impl SizeBuf {
    /// Reserves `length` bytes and returns the offset of the reserved space.
    ///
    /// A buffer that does not allow overflow refuses the write and flags
    /// itself as overflowed. One that does is cleared first, the same way
    /// reliable buffers drop their contents when they fill up.
    pub fn get_space(&mut self, length: usize) -> Option<usize> {
        if self.cursize + length > self.maxsize {
            if !self.allow_overflow || length > self.maxsize {
                tracing::warn!(
                    cursize = self.cursize,
                    length,
                    maxsize = self.maxsize,
                    "SZ_GetSpace: overflow"
                );
                self.overflowed = true;
                return None;
            }
            com_printf("SZ_GetSpace: overflow\n");
            self.clear();
            self.overflowed = true;
        }

        let start = self.cursize;
        self.cursize += length;
        Some(start)
    }

    pub fn write(&mut self, src: &[u8]) {
        if let Some(start) = self.get_space(src.len()) {
            self.data[start..start + src.len()].copy_from_slice(src);
        }
    }

    /// Appends a NUL terminated string, overwriting a trailing NUL so that
    /// consecutive prints concatenate.
    pub fn print(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let merge = self.cursize > 0 && self.data[self.cursize - 1] == 0;
        let need = if merge { bytes.len() } else { bytes.len() + 1 };

        if let Some(start) = self.get_space(need) {
            let dest = if merge { start - 1 } else { start };
            self.data[dest..dest + bytes.len()].copy_from_slice(bytes);
            self.data[dest + bytes.len()] = 0;
        }
    }
}

// ============================================================
// MSG write functions
// ============================================================

pub fn msg_write_char(sb: &mut SizeBuf, c: i32) {
    sb.write(&[c as i8 as u8]);
}

pub fn msg_write_byte(sb: &mut SizeBuf, c: i32) {
    sb.write(&[c as u8]);
}

pub fn msg_write_short(sb: &mut SizeBuf, c: i32) {
    sb.write(&(c as i16).to_le_bytes());
}

pub fn msg_write_long(sb: &mut SizeBuf, c: i32) {
    sb.write(&c.to_le_bytes());
}

/// Strings go out one byte per char; chars past U+00FF become `?`.
pub fn msg_write_string(sb: &mut SizeBuf, s: &str) {
    let bytes: Vec<u8> = s
        .chars()
        .map(|c| u8::try_from(c).unwrap_or(b'?'))
        .collect();
    sb.write(&bytes);
    sb.write(&[0]);
}

pub fn msg_write_coord(sb: &mut SizeBuf, f: f32) {
    msg_write_short(sb, (f * 8.0) as i32);
}

pub fn msg_write_pos(sb: &mut SizeBuf, pos: &Vec3) {
    for v in pos {
        msg_write_coord(sb, *v);
    }
}

pub fn msg_write_angle(sb: &mut SizeBuf, f: f32) {
    msg_write_byte(sb, ((f * 256.0 / 360.0) as i32) & 255);
}

/// Writes `cmd` as a delta against `from`: a bit mask of the changed
/// fields, the changed fields, then msec and lightlevel unconditionally.
pub fn msg_write_delta_usercmd(buf: &mut SizeBuf, from: &UserCmd, cmd: &UserCmd) {
    let shorts: [(i32, i16, i16); 6] = [
        (CM_ANGLE1, from.angles[0], cmd.angles[0]),
        (CM_ANGLE2, from.angles[1], cmd.angles[1]),
        (CM_ANGLE3, from.angles[2], cmd.angles[2]),
        (CM_FORWARD, from.forwardmove, cmd.forwardmove),
        (CM_SIDE, from.sidemove, cmd.sidemove),
        (CM_UP, from.upmove, cmd.upmove),
    ];

    let mut bits = 0;
    for (flag, old, new) in shorts {
        if old != new {
            bits |= flag;
        }
    }
    if cmd.buttons != from.buttons {
        bits |= CM_BUTTONS;
    }
    if cmd.impulse != from.impulse {
        bits |= CM_IMPULSE;
    }

    msg_write_byte(buf, bits);

    for (flag, _, new) in shorts {
        if bits & flag != 0 {
            msg_write_short(buf, new as i32);
        }
    }
    if bits & CM_BUTTONS != 0 {
        msg_write_byte(buf, cmd.buttons as i32);
    }
    if bits & CM_IMPULSE != 0 {
        msg_write_byte(buf, cmd.impulse as i32);
    }

    msg_write_byte(buf, cmd.msec as i32);
    msg_write_byte(buf, cmd.lightlevel as i32);
}

/// Picks the 8 bit, 16 bit or combined (32 bit) flag for a changed field.
fn width_bits(value: u32, limit16: u32, flag8: i32, flag16: i32) -> i32 {
    if value < 256 {
        flag8
    } else if value < limit16 {
        flag16
    } else {
        flag8 | flag16
    }
}

fn write_width(msg: &mut SizeBuf, bits: i32, flag8: i32, flag16: i32, value: i32) {
    match (bits & flag8 != 0, bits & flag16 != 0) {
        (true, true) => msg_write_long(msg, value),
        (true, false) => msg_write_byte(msg, value),
        (false, true) => msg_write_short(msg, value),
        (false, false) => {}
    }
}

/// Writes the parts of `to` that differ from `from`. With `force` set, a
/// header is written even when nothing changed. Used for baselines, which
/// are always deltas against the null state.
pub fn msg_write_delta_entity(
    from: &EntityState,
    to: &EntityState,
    msg: &mut SizeBuf,
    force: bool,
    newentity: bool,
) {
    if to.number <= 0 || to.number as usize >= MAX_EDICTS {
        tracing::warn!(number = to.number, "MSG_WriteDeltaEntity: bad entity number");
        return;
    }

    let mut bits: i32 = 0;

    if to.number >= 256 {
        bits |= U_NUMBER16;
    }

    for (i, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if to.origin[i] != from.origin[i] {
            bits |= flag;
        }
    }
    for (i, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if to.angles[i] != from.angles[i] {
            bits |= flag;
        }
    }

    if to.skinnum != from.skinnum {
        bits |= width_bits(to.skinnum as u32, 0x10000, U_SKIN8, U_SKIN16);
    }
    if to.frame != from.frame {
        bits |= if to.frame < 256 { U_FRAME8 } else { U_FRAME16 };
    }
    if to.effects != from.effects {
        bits |= width_bits(to.effects, 0x8000, U_EFFECTS8, U_EFFECTS16);
    }
    if to.renderfx != from.renderfx {
        bits |= width_bits(to.renderfx as u32, 0x8000, U_RENDERFX8, U_RENDERFX16);
    }

    if to.solid != from.solid {
        bits |= U_SOLID;
    }
    // events are not delta compressed, just 0 compressed
    if to.event != 0 {
        bits |= U_EVENT;
    }

    let models = [
        (U_MODEL, from.modelindex, to.modelindex),
        (U_MODEL2, from.modelindex2, to.modelindex2),
        (U_MODEL3, from.modelindex3, to.modelindex3),
        (U_MODEL4, from.modelindex4, to.modelindex4),
    ];
    for (flag, old, new) in models {
        if old != new {
            bits |= flag;
        }
    }

    if to.sound != from.sound {
        bits |= U_SOUND;
    }
    if newentity {
        bits |= U_OLDORIGIN;
    }

    if bits == 0 && !force {
        return; // nothing to send!
    }

    let extra_bytes = if bits as u32 & 0xff00_0000 != 0 {
        bits |= U_MOREBITS3 | U_MOREBITS2 | U_MOREBITS1;
        3
    } else if bits & 0x00ff_0000 != 0 {
        bits |= U_MOREBITS2 | U_MOREBITS1;
        2
    } else if bits & 0x0000_ff00 != 0 {
        bits |= U_MOREBITS1;
        1
    } else {
        0
    };

    for byte in 0..=extra_bytes {
        msg_write_byte(msg, (bits >> (8 * byte)) & 255);
    }

    if bits & U_NUMBER16 != 0 {
        msg_write_short(msg, to.number);
    } else {
        msg_write_byte(msg, to.number);
    }

    for (flag, _, new) in models {
        if bits & flag != 0 {
            msg_write_byte(msg, new);
        }
    }

    if bits & U_FRAME8 != 0 {
        msg_write_byte(msg, to.frame);
    }
    if bits & U_FRAME16 != 0 {
        msg_write_short(msg, to.frame);
    }

    write_width(msg, bits, U_SKIN8, U_SKIN16, to.skinnum);
    write_width(msg, bits, U_EFFECTS8, U_EFFECTS16, to.effects as i32);
    write_width(msg, bits, U_RENDERFX8, U_RENDERFX16, to.renderfx);

    for (i, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if bits & flag != 0 {
            msg_write_coord(msg, to.origin[i]);
        }
    }
    for (i, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            msg_write_angle(msg, to.angles[i]);
        }
    }

    if bits & U_OLDORIGIN != 0 {
        msg_write_pos(msg, &to.old_origin);
    }
    if bits & U_SOUND != 0 {
        msg_write_byte(msg, to.sound);
    }
    if bits & U_EVENT != 0 {
        msg_write_byte(msg, to.event);
    }
    if bits & U_SOLID != 0 {
        msg_write_short(msg, to.solid);
    }
}

// ============================================================
// MSG read functions
//
// Reads past the end return -1 (or an empty value) but still advance
// `readcount`, so a caller can check `readcount > cursize` afterwards.
// ============================================================

pub fn msg_begin_reading(msg: &mut SizeBuf) {
    msg.readcount = 0;
}

fn read_raw<const N: usize>(msg: &mut SizeBuf) -> Option<[u8; N]> {
    let rc = msg.readcount;
    msg.readcount += N;
    if rc + N > msg.cursize {
        return None;
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&msg.data[rc..rc + N]);
    Some(out)
}

pub fn msg_read_char(msg: &mut SizeBuf) -> i32 {
    read_raw::<1>(msg).map_or(-1, |b| b[0] as i8 as i32)
}

pub fn msg_read_byte(msg: &mut SizeBuf) -> i32 {
    read_raw::<1>(msg).map_or(-1, |b| b[0] as i32)
}

pub fn msg_read_short(msg: &mut SizeBuf) -> i32 {
    read_raw::<2>(msg).map_or(-1, |b| i16::from_le_bytes(b) as i32)
}

pub fn msg_read_long(msg: &mut SizeBuf) -> i32 {
    read_raw::<4>(msg).map_or(-1, i32::from_le_bytes)
}

pub fn msg_read_string(msg: &mut SizeBuf) -> String {
    let mut bytes = Vec::new();
    loop {
        let c = msg_read_byte(msg);
        if c == -1 || c == 0 {
            break;
        }
        bytes.push(c as u8);
        if bytes.len() >= 2047 {
            break;
        }
    }
    // every wire byte maps to exactly one char, high bits intact
    bytes.into_iter().map(char::from).collect()
}

pub fn msg_read_coord(msg: &mut SizeBuf) -> f32 {
    msg_read_short(msg) as f32 * (1.0 / 8.0)
}

pub fn msg_read_pos(msg: &mut SizeBuf) -> Vec3 {
    [msg_read_coord(msg), msg_read_coord(msg), msg_read_coord(msg)]
}

pub fn msg_read_angle(msg: &mut SizeBuf) -> f32 {
    msg_read_char(msg) as f32 * (360.0 / 256.0)
}

pub fn msg_read_delta_usercmd(msg: &mut SizeBuf, from: &UserCmd) -> UserCmd {
    let mut cmd = *from;
    let bits = msg_read_byte(msg);

    if bits & CM_ANGLE1 != 0 {
        cmd.angles[0] = msg_read_short(msg) as i16;
    }
    if bits & CM_ANGLE2 != 0 {
        cmd.angles[1] = msg_read_short(msg) as i16;
    }
    if bits & CM_ANGLE3 != 0 {
        cmd.angles[2] = msg_read_short(msg) as i16;
    }
    if bits & CM_FORWARD != 0 {
        cmd.forwardmove = msg_read_short(msg) as i16;
    }
    if bits & CM_SIDE != 0 {
        cmd.sidemove = msg_read_short(msg) as i16;
    }
    if bits & CM_UP != 0 {
        cmd.upmove = msg_read_short(msg) as i16;
    }
    if bits & CM_BUTTONS != 0 {
        cmd.buttons = msg_read_byte(msg) as u8;
    }
    if bits & CM_IMPULSE != 0 {
        cmd.impulse = msg_read_byte(msg) as u8;
    }

    // read time to run command
    cmd.msec = msg_read_byte(msg) as u8;
    // read the light level
    cmd.lightlevel = msg_read_byte(msg) as u8;

    cmd
}

/// Reads the variable length bit header of an entity delta and returns
/// `(number, bits)`.
pub fn msg_read_entity_bits(msg: &mut SizeBuf) -> (i32, i32) {
    let mut total = msg_read_byte(msg);
    for (more, shift) in [(U_MOREBITS1, 8), (U_MOREBITS2, 16), (U_MOREBITS3, 24)] {
        if total & more != 0 {
            total |= msg_read_byte(msg) << shift;
        }
    }

    let number = if total & U_NUMBER16 != 0 {
        msg_read_short(msg)
    } else {
        msg_read_byte(msg)
    };
    (number, total)
}

fn read_width(msg: &mut SizeBuf, bits: i32, flag8: i32, flag16: i32) -> Option<i32> {
    match (bits & flag8 != 0, bits & flag16 != 0) {
        (true, true) => Some(msg_read_long(msg)),
        (true, false) => Some(msg_read_byte(msg)),
        (false, true) => Some(msg_read_short(msg)),
        (false, false) => None,
    }
}

/// Applies an entity delta read from `msg` on top of `from`.
pub fn msg_read_delta_entity(
    msg: &mut SizeBuf,
    from: &EntityState,
    number: i32,
    bits: i32,
) -> EntityState {
    let mut to = from.clone();
    to.old_origin = from.origin;
    to.number = number;

    if bits & U_MODEL != 0 {
        to.modelindex = msg_read_byte(msg);
    }
    if bits & U_MODEL2 != 0 {
        to.modelindex2 = msg_read_byte(msg);
    }
    if bits & U_MODEL3 != 0 {
        to.modelindex3 = msg_read_byte(msg);
    }
    if bits & U_MODEL4 != 0 {
        to.modelindex4 = msg_read_byte(msg);
    }

    if bits & U_FRAME8 != 0 {
        to.frame = msg_read_byte(msg);
    }
    if bits & U_FRAME16 != 0 {
        to.frame = msg_read_short(msg);
    }

    if let Some(v) = read_width(msg, bits, U_SKIN8, U_SKIN16) {
        to.skinnum = v;
    }
    if let Some(v) = read_width(msg, bits, U_EFFECTS8, U_EFFECTS16) {
        to.effects = v as u32;
    }
    if let Some(v) = read_width(msg, bits, U_RENDERFX8, U_RENDERFX16) {
        to.renderfx = v;
    }

    for (i, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if bits & flag != 0 {
            to.origin[i] = msg_read_coord(msg);
        }
    }
    for (i, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            to.angles[i] = msg_read_angle(msg);
        }
    }

    if bits & U_OLDORIGIN != 0 {
        to.old_origin = msg_read_pos(msg);
    }
    if bits & U_SOUND != 0 {
        to.sound = msg_read_byte(msg);
    }
    to.event = if bits & U_EVENT != 0 { msg_read_byte(msg) } else { 0 };
    if bits & U_SOLID != 0 {
        to.solid = msg_read_short(msg);
    }

    to
}

// ============================================================
// Sequenced block checksum
// ============================================================

#[rustfmt::skip]
static CHKTBL: [u8; 1024] = [
    0x84, 0x47, 0x51, 0xc1, 0x93, 0x22, 0x21, 0x24, 0x2f, 0x66, 0x60, 0x4d, 0xb0, 0x7c, 0xda,
    0x88, 0x54, 0x15, 0x2b, 0xc6, 0x6c, 0x89, 0xc5, 0x9d, 0x48, 0xee, 0xe6, 0x8a, 0xb5, 0xf4,
    0xcb, 0xfb, 0xf1, 0x0c, 0x2e, 0xa0, 0xd7, 0xc9, 0x1f, 0xd6, 0x06, 0x9a, 0x09, 0x41, 0x54,
    0x67, 0x46, 0xc7, 0x74, 0xe3, 0xc8, 0xb6, 0x5d, 0xa6, 0x36, 0xc4, 0xab, 0x2c, 0x7e, 0x85,
    0xa8, 0xa4, 0xa6, 0x4d, 0x96, 0x19, 0x19, 0x9a, 0xcc, 0xd8, 0xac, 0x39, 0x5e, 0x3c, 0xf2,
    0xf5, 0x5a, 0x72, 0xe5, 0xa9, 0xd1, 0xb3, 0x23, 0x82, 0x6f, 0x29, 0xcb, 0xd1, 0xcc, 0x71,
    0xfb, 0xea, 0x92, 0xeb, 0x1c, 0xca, 0x4c, 0x70, 0xfe, 0x4d, 0xc9, 0x67, 0x43, 0x47, 0x94,
    0xb9, 0x47, 0xbc, 0x3f, 0x01, 0xab, 0x7b, 0xa6, 0xe2, 0x76, 0xef, 0x5a, 0x7a, 0x29, 0x0b,
    0x51, 0x54, 0x67, 0xd8, 0x1c, 0x14, 0x3e, 0x29, 0xec, 0xe9, 0x2d, 0x48, 0x67, 0xff, 0xed,
    0x54, 0x4f, 0x48, 0xc0, 0xaa, 0x61, 0xf7, 0x78, 0x12, 0x03, 0x7a, 0x9e, 0x8b, 0xcf, 0x83,
    0x7b, 0xae, 0xca, 0x7b, 0xd9, 0xe9, 0x53, 0x2a, 0xeb, 0xd2, 0xd8, 0xcd, 0xa3, 0x10, 0x25,
    0x78, 0x5a, 0xb5, 0x23, 0x06, 0x93, 0xb7, 0x84, 0xd2, 0xbd, 0x96, 0x75, 0xa5, 0x5e, 0xcf,
    0x4e, 0xe9, 0x50, 0xa1, 0xe6, 0x9d, 0xb1, 0xe3, 0x85, 0x66, 0x28, 0x4e, 0x43, 0xdc, 0x6e,
    0xbb, 0x33, 0x9e, 0xf3, 0x0d, 0x00, 0xc1, 0xcf, 0x67, 0x34, 0x06, 0x7c, 0x71, 0xe3, 0x63,
    0xb7, 0xb7, 0xdf, 0x92, 0xc4, 0xc2, 0x25, 0x5c, 0xff, 0xc3, 0x6e, 0xfc, 0xaa, 0x1e, 0x2a,
    0x48, 0x11, 0x1c, 0x36, 0x68, 0x78, 0x86, 0x79, 0x30, 0xc3, 0xd6, 0xde, 0xbc, 0x3a, 0x2a,
    0x6d, 0x1e, 0x46, 0xdd, 0xe0, 0x80, 0x1e, 0x44, 0x3b, 0x6f, 0xaf, 0x31, 0xda, 0xa2, 0xbd,
    0x77, 0x06, 0x56, 0xc0, 0xb7, 0x92, 0x4b, 0x37, 0xc0, 0xfc, 0xc2, 0xd5, 0xfb, 0xa8, 0xda,
    0xf5, 0x57, 0xa8, 0x18, 0xc0, 0xdf, 0xe7, 0xaa, 0x2a, 0xe0, 0x7c, 0x6f, 0x77, 0xb1, 0x26,
    0xba, 0xf9, 0x2e, 0x1d, 0x16, 0xcb, 0xb8, 0xa2, 0x44, 0xd5, 0x2f, 0x1a, 0x79, 0x74, 0x87,
    0x4b, 0x00, 0xc9, 0x4a, 0x3a, 0x65, 0x8f, 0xe6, 0x5d, 0xe5, 0x0a, 0x77, 0xd8, 0x1a, 0x14,
    0x41, 0x75, 0xb1, 0xe2, 0x50, 0x2c, 0x93, 0x38, 0x2b, 0x6d, 0xf3, 0xf6, 0xdb, 0x1f, 0xcd,
    0xff, 0x14, 0x70, 0xe7, 0x16, 0xe8, 0x3d, 0xf0, 0xe3, 0xbc, 0x5e, 0xb6, 0x3f, 0xcc, 0x81,
    0x24, 0x67, 0xf3, 0x97, 0x3b, 0xfe, 0x3a, 0x96, 0x85, 0xdf, 0xe4, 0x6e, 0x3c, 0x85, 0x05,
    0x0e, 0xa3, 0x2b, 0x07, 0xc8, 0xbf, 0xe5, 0x13, 0x82, 0x62, 0x08, 0x61, 0x69, 0x4b, 0x47,
    0x62, 0x73, 0x44, 0x64, 0x8e, 0xe2, 0x91, 0xa6, 0x9a, 0xb7, 0xe9, 0x04, 0xb6, 0x54, 0x0c,
    0xc5, 0xa9, 0x47, 0xa6, 0xc9, 0x08, 0xfe, 0x4e, 0xa6, 0xcc, 0x8a, 0x5b, 0x90, 0x6f, 0x2b,
    0x3f, 0xb6, 0x0a, 0x96, 0xc0, 0x78, 0x58, 0x3c, 0x76, 0x6d, 0x94, 0x1a, 0xe4, 0x4e, 0xb8,
    0x38, 0xbb, 0xf5, 0xeb, 0x29, 0xd8, 0xb0, 0xf3, 0x15, 0x1e, 0x99, 0x96, 0x3c, 0x5d, 0x63,
    0xd5, 0xb1, 0xad, 0x52, 0xb8, 0x55, 0x70, 0x75, 0x3e, 0x1a, 0xd5, 0xda, 0xf6, 0x7a, 0x48,
    0x7d, 0x44, 0x41, 0xf9, 0x11, 0xce, 0xd7, 0xca, 0xa5, 0x3d, 0x7a, 0x79, 0x7e, 0x7d, 0x25,
    0x1b, 0x77, 0xbc, 0xf7, 0xc7, 0x0f, 0x84, 0x95, 0x10, 0x92, 0x67, 0x15, 0x11, 0x5a, 0x5e,
    0x41, 0x66, 0x0f, 0x38, 0x03, 0xb2, 0xf1, 0x5d, 0xf8, 0xab, 0xc0, 0x02, 0x76, 0x84, 0x28,
    0xf4, 0x9d, 0x56, 0x46, 0x60, 0x20, 0xdb, 0x68, 0xa7, 0xbb, 0xee, 0xac, 0x15, 0x01, 0x2f,
    0x20, 0x09, 0xdb, 0xc0, 0x16, 0xa1, 0x89, 0xf9, 0x94, 0x59, 0x00, 0xc1, 0x76, 0xbf, 0xc1,
    0x4d, 0x5d, 0x2d, 0xa9, 0x85, 0x2c, 0xd6, 0xd3, 0x14, 0xcc, 0x02, 0xc3, 0xc2, 0xfa, 0x6b,
    0xb7, 0xa6, 0xef, 0xdd, 0x12, 0x26, 0xa4, 0x63, 0xe3, 0x62, 0xbd, 0x56, 0x8a, 0x52, 0x2b,
    0xb9, 0xdf, 0x09, 0xbc, 0x0e, 0x97, 0xa9, 0xb0, 0x82, 0x46, 0x08, 0xd5, 0x1a, 0x8e, 0x1b,
    0xa7, 0x90, 0x98, 0xb9, 0xbb, 0x3c, 0x17, 0x9a, 0xf2, 0x82, 0xba, 0x64, 0x0a, 0x7f, 0xca,
    0x5a, 0x8c, 0x7c, 0xd3, 0x79, 0x09, 0x5b, 0x26, 0xbb, 0xbd, 0x25, 0xdf, 0x3d, 0x6f, 0x9a,
    0x8f, 0xee, 0x21, 0x66, 0xb0, 0x8d, 0x84, 0x4c, 0x91, 0x45, 0xd4, 0x77, 0x4f, 0xb3, 0x8c,
    0xbc, 0xa8, 0x99, 0xaa, 0x19, 0x53, 0x7c, 0x02, 0x87, 0xbb, 0x0b, 0x7c, 0x1a, 0x2d, 0xdf,
    0x48, 0x44, 0x06, 0xd6, 0x7d, 0x0c, 0x2d, 0x35, 0x76, 0xae, 0xc4, 0x5f, 0x71, 0x85, 0x97,
    0xc4, 0x3d, 0xef, 0x52, 0xbe, 0x00, 0xe4, 0xcd, 0x49, 0xd1, 0xd1, 0x1c, 0x3c, 0xd0, 0x1c,
    0x42, 0xaf, 0xd4, 0xbd, 0x58, 0x34, 0x07, 0x32, 0xee, 0xb9, 0xb5, 0xea, 0xff, 0xd7, 0x8c,
    0x0d, 0x2e, 0x2f, 0xaf, 0x87, 0xbb, 0xe6, 0x52, 0x71, 0x22, 0xf5, 0x25, 0x17, 0xa1, 0x82,
    0x04, 0xc2, 0x4a, 0xbd, 0x57, 0xc6, 0xab, 0xc8, 0x35, 0x0c, 0x3c, 0xd9, 0xc2, 0x43, 0xdb,
    0x27, 0x92, 0xcf, 0xb8, 0x25, 0x60, 0xfa, 0x21, 0x3b, 0x04, 0x52, 0xc8, 0x96, 0xba, 0x74,
    0xe3, 0x67, 0x3e, 0x8e, 0x8d, 0x61, 0x90, 0x92, 0x59, 0xb6, 0x1a, 0x1c, 0x5e, 0x21, 0xc1,
    0x65, 0xe5, 0xa6, 0x34, 0x05, 0x6f, 0xc5, 0x60, 0xb1, 0x83, 0xc1, 0xd5, 0xd5, 0xed, 0xd9,
    0xc7, 0x11, 0x7b, 0x49, 0x7a, 0xf9, 0xf9, 0x84, 0x47, 0x9b, 0xe2, 0xa5, 0x82, 0xe0, 0xc2,
    0x88, 0xd0, 0xb2, 0x58, 0x88, 0x7f, 0x45, 0x09, 0x67, 0x74, 0x61, 0xbf, 0xe6, 0x40, 0xe2,
    0x9d, 0xc2, 0x47, 0x05, 0x89, 0xed, 0xcb, 0xbb, 0xb7, 0x27, 0xe7, 0xdc, 0x7a, 0xfd, 0xbf,
    0xa8, 0xd0, 0xaa, 0x10, 0x39, 0x3c, 0x20, 0xf0, 0xd3, 0x6e, 0xb1, 0x72, 0xf8, 0xe6, 0x0f,
    0xef, 0x37, 0xe5, 0x09, 0x33, 0x5a, 0x83, 0x43, 0x80, 0x4f, 0x65, 0x2f, 0x7c, 0x8c, 0x6a,
    0xa0, 0x82, 0x0c, 0xd4, 0xd4, 0xfa, 0x81, 0x60, 0x3d, 0xdf, 0x06, 0xf1, 0x5f, 0x08, 0x0d,
    0x6d, 0x43, 0xf2, 0xe3, 0x11, 0x7d, 0x80, 0x32, 0xc5, 0xfb, 0xc5, 0xd9, 0x27, 0xec, 0xc6,
    0x4e, 0x65, 0x27, 0x76, 0x87, 0xa6, 0xee, 0xee, 0xd7, 0x8b, 0xd1, 0xa0, 0x5c, 0xb0, 0x42,
    0x13, 0x0e, 0x95, 0x4a, 0xf2, 0x06, 0xc6, 0x43, 0x33, 0xf4, 0xc7, 0xf8, 0xe7, 0x1f, 0xdd,
    0xe4, 0x46, 0x4a, 0x70, 0x39, 0x6c, 0xd0, 0xed, 0xca, 0xbe, 0x60, 0x3b, 0xd1, 0x7b, 0x57,
    0x48, 0xe5, 0x3a, 0x79, 0xc1, 0x69, 0x33, 0x53, 0x1b, 0x80, 0xb8, 0x91, 0x7d, 0xb4, 0xf6,
    0x17, 0x1a, 0x1d, 0x5a, 0x32, 0xd6, 0xcc, 0x71, 0x29, 0x3f, 0x28, 0xbb, 0xf3, 0x5e, 0x71,
    0xb8, 0x43, 0xaf, 0xf8, 0xb9, 0x64, 0xef, 0xc4, 0xa5, 0x6c, 0x08, 0x53, 0xc7, 0x00, 0x10,
    0x39, 0x4f, 0xdd, 0xe4, 0xb6, 0x19, 0x27, 0xfb, 0xb8, 0xf5, 0x32, 0x73, 0xe5, 0xcb, 0x32,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// Checksum byte of `base` keyed by a packet sequence number. At most the
/// first 60 bytes of `base` take part; four bytes of a fixed table selected
/// by the sequence are mixed in so a replayed block fails on a different
/// sequence.
pub fn com_block_sequence_crc_byte(base: &[u8], sequence: i32) -> u8 {
    let p_idx = (sequence as u32 as usize) % (CHKTBL.len() - 4);
    let key = &CHKTBL[p_idx..p_idx + 4];

    let length = base.len().min(60);
    let mut chkb = [0u8; 64];
    chkb[..length].copy_from_slice(&base[..length]);
    chkb[length..length + 4].copy_from_slice(key);

    let block = &chkb[..length + 4];
    let crc = crc_block(block) as u32;
    let sum = block.iter().fold(0u32, |x, b| x.wrapping_add(*b as u32));

    ((crc ^ sum) & 0xff) as u8
}
