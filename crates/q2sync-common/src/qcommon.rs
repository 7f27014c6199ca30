// qcommon.rs — protocol definitions common between client and server

// ============================================================
// SizeBuf — fixed capacity message buffer
// ============================================================

/// Bounded byte buffer used for every network message. Writers append at
/// `cursize`; readers consume from `readcount`. A read past `cursize`
/// still advances `readcount`, which is how callers detect a bad read.
#[derive(Debug, Clone)]
pub struct SizeBuf {
    pub allow_overflow: bool, // if false, do not write past maxsize
    pub overflowed: bool,     // set to true if the buffer size failed
    pub data: Vec<u8>,
    pub maxsize: usize,
    pub cursize: usize,
    pub readcount: usize,
}

impl SizeBuf {
    pub fn new(maxsize: usize) -> Self {
        Self {
            allow_overflow: false,
            overflowed: false,
            data: vec![0u8; maxsize],
            maxsize,
            cursize: 0,
            readcount: 0,
        }
    }

    /// Wraps received bytes for reading.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut sb = Self::new(bytes.len().max(1));
        sb.data[..bytes.len()].copy_from_slice(bytes);
        sb.cursize = bytes.len();
        sb
    }

    pub fn clear(&mut self) {
        self.cursize = 0;
        self.overflowed = false;
    }

    /// The written portion of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.cursize]
    }

    /// True once a read has gone past the end of the data.
    pub fn is_bad_read(&self) -> bool {
        self.readcount > self.cursize
    }
}

// ============================================================
// Protocol
// ============================================================

pub const PROTOCOL_VERSION: i32 = 34;

pub const PORT_SERVER: u16 = 27910;

/// Max length of a message, which may be fragmented into multiple packets.
pub const MAX_MSGLEN: usize = 1400;

/// Netchan header: sequence + acknowledge.
pub const PACKET_HEADER: usize = 8;

/// Snapshots the server keeps per client for delta compression.
pub const UPDATE_BACKUP: i32 = 16;
pub const UPDATE_MASK: i32 = UPDATE_BACKUP - 1;

pub const LATENCY_COUNTS: usize = 16;

// ============================================================
// Client-to-server ops
// ============================================================

pub const CLC_BAD: i32 = 0;
pub const CLC_NOP: i32 = 1;
pub const CLC_MOVE: i32 = 2; // [[usercmd_t]
pub const CLC_USERINFO: i32 = 3; // [[userinfo string]
pub const CLC_STRINGCMD: i32 = 4; // [string] message

// ============================================================
// Server-to-client ops
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SvcOps {
    Bad = 0,
    MuzzleFlash,
    MuzzleFlash2,
    TempEntity,
    Layout,
    Inventory,
    Nop,
    Disconnect,
    Reconnect,
    Sound,
    Print,
    StuffText,
    ServerData,
    ConfigString,
    SpawnBaseline,
    CenterPrint,
    Download,
    PlayerInfo,
    PacketEntities,
    DeltaPacketEntities,
    Frame,
}

impl SvcOps {
    #[inline]
    pub fn byte(self) -> i32 {
        self as i32
    }
}

// ============================================================
// User command communication flags
// ============================================================

pub const CM_ANGLE1: i32 = 1 << 0;
pub const CM_ANGLE2: i32 = 1 << 1;
pub const CM_ANGLE3: i32 = 1 << 2;
pub const CM_FORWARD: i32 = 1 << 3;
pub const CM_SIDE: i32 = 1 << 4;
pub const CM_UP: i32 = 1 << 5;
pub const CM_BUTTONS: i32 = 1 << 6;
pub const CM_IMPULSE: i32 = 1 << 7;

// ============================================================
// Entity state communication flags
// ============================================================

// try to pack the common update flags into the first byte
pub const U_ORIGIN1: i32 = 1 << 0;
pub const U_ORIGIN2: i32 = 1 << 1;
pub const U_ANGLE2: i32 = 1 << 2;
pub const U_ANGLE3: i32 = 1 << 3;
pub const U_FRAME8: i32 = 1 << 4; // frame is a byte
pub const U_EVENT: i32 = 1 << 5;
pub const U_REMOVE: i32 = 1 << 6; // REMOVE this entity, don't add it
pub const U_MOREBITS1: i32 = 1 << 7; // read one additional byte

// second byte
pub const U_NUMBER16: i32 = 1 << 8; // NUMBER8 is implicit if not set
pub const U_ORIGIN3: i32 = 1 << 9;
pub const U_ANGLE1: i32 = 1 << 10;
pub const U_MODEL: i32 = 1 << 11;
pub const U_RENDERFX8: i32 = 1 << 12; // fullbright, etc
pub const U_EFFECTS8: i32 = 1 << 14; // autorotate, trails, etc
pub const U_MOREBITS2: i32 = 1 << 15; // read one additional byte

// third byte
pub const U_SKIN8: i32 = 1 << 16;
pub const U_FRAME16: i32 = 1 << 17; // frame is a short
pub const U_RENDERFX16: i32 = 1 << 18; // 8 + 16 = 32
pub const U_EFFECTS16: i32 = 1 << 19; // 8 + 16 = 32
pub const U_MODEL2: i32 = 1 << 20; // weapons, flags, etc
pub const U_MODEL3: i32 = 1 << 21;
pub const U_MODEL4: i32 = 1 << 22;
pub const U_MOREBITS3: i32 = 1 << 23; // read one additional byte

// fourth byte
pub const U_OLDORIGIN: i32 = 1 << 24;
pub const U_SKIN16: i32 = 1 << 25;
pub const U_SOUND: i32 = 1 << 26;
pub const U_SOLID: i32 = 1 << 27;
