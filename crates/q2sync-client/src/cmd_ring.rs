// cmd_ring.rs — circular history of sent commands and the origins predicted for them

use q2sync_common::q_shared::UserCmd;

/// Commands remembered for prediction and resend.
pub const CMD_BACKUP: usize = 64;

/// Slot for sequence `s` is `s & (N - 1)`. A later sequence with the same
/// residue overwrites the older entry; callers that care about staleness
/// compare sequence distances against `N` first.
#[derive(Debug, Clone)]
pub struct CmdRing<const N: usize = CMD_BACKUP> {
    cmds: [UserCmd; N],
    cmd_time: [i32; N],               // time sent, for calculating pings
    predicted_origins: [[i16; 3]; N], // for comparing against the server
}

impl<const N: usize> CmdRing<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "command ring size must be a power of two");
        N - 1
    };

    pub fn new() -> Self {
        let _ = Self::MASK;
        Self {
            cmds: [UserCmd::default(); N],
            cmd_time: [0; N],
            predicted_origins: [[0; 3]; N],
        }
    }

    #[inline]
    pub fn slot(sequence: i32) -> usize {
        (sequence as u32 as usize) & Self::MASK
    }

    pub fn push(&mut self, sequence: i32, cmd: UserCmd, time: i32) {
        let i = Self::slot(sequence);
        self.cmds[i] = cmd;
        self.cmd_time[i] = time;
    }

    pub fn command(&self, sequence: i32) -> &UserCmd {
        &self.cmds[Self::slot(sequence)]
    }

    pub fn time(&self, sequence: i32) -> i32 {
        self.cmd_time[Self::slot(sequence)]
    }

    pub fn record_prediction(&mut self, sequence: i32, origin: [i16; 3]) {
        self.predicted_origins[Self::slot(sequence)] = origin;
    }

    pub fn read_prediction(&self, sequence: i32) -> [i16; 3] {
        self.predicted_origins[Self::slot(sequence)]
    }

    /// Forgets everything, used on level change.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl<const N: usize> Default for CmdRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cmd(msec: u8) -> UserCmd {
        UserCmd { msec, ..Default::default() }
    }

    #[test]
    fn test_slot_masks_sequence() {
        assert_eq!(CmdRing::<64>::slot(0), 0);
        assert_eq!(CmdRing::<64>::slot(63), 63);
        assert_eq!(CmdRing::<64>::slot(64), 0);
        assert_eq!(CmdRing::<64>::slot(130), 2);
        assert_eq!(CmdRing::<64>::slot(-1), 63);
    }

    #[test]
    fn test_wraparound_overwrites() {
        let mut ring: CmdRing = CmdRing::new();
        ring.push(130, cmd(10), 1000);
        ring.push(194, cmd(20), 2000);
        assert_eq!(ring.command(130).msec, 20);
        assert_eq!(ring.time(130), 2000);
        assert_eq!(ring.command(194), ring.command(2));
    }

    #[test]
    fn test_prediction_slots_follow_commands() {
        let mut ring: CmdRing = CmdRing::new();
        ring.record_prediction(5, [8, 16, 24]);
        assert_eq!(ring.read_prediction(5), [8, 16, 24]);
        assert_eq!(ring.read_prediction(5 + CMD_BACKUP as i32), [8, 16, 24]);
        assert_eq!(ring.read_prediction(6), [0, 0, 0]);

        ring.clear();
        assert_eq!(ring.read_prediction(5), [0, 0, 0]);
    }

    #[test]
    fn test_smaller_ring() {
        let mut ring = CmdRing::<4>::new();
        for seq in 0..6 {
            ring.push(seq, cmd(seq as u8), seq);
        }
        assert_eq!(ring.command(1).msec, 5);
        assert_eq!(ring.command(3).msec, 3);
    }

    proptest! {
        #[test]
        fn test_sequences_one_backup_apart_share_a_slot(seq in 0i32..1_000_000, k in 1i32..100) {
            let later = seq + k * CMD_BACKUP as i32;
            prop_assert_eq!(CmdRing::<CMD_BACKUP>::slot(seq), CmdRing::<CMD_BACKUP>::slot(later));

            let mut ring: CmdRing = CmdRing::new();
            ring.push(seq, cmd(1), 0);
            ring.push(later, cmd(2), 0);
            prop_assert_eq!(ring.command(seq).msec, 2);
        }

        #[test]
        fn test_window_of_backup_never_collides(seq in 0i32..1_000_000) {
            let mut ring: CmdRing = CmdRing::new();
            for i in 0..CMD_BACKUP as i32 {
                ring.record_prediction(seq + i, [i as i16, 0, 0]);
            }
            for i in 0..CMD_BACKUP as i32 {
                prop_assert_eq!(ring.read_prediction(seq + i)[0], i as i16);
            }
        }
    }
}
