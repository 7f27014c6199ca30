#![allow(dead_code)]
#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::collapsible_if,
         clippy::collapsible_else_if, clippy::field_reassign_with_default,
         clippy::manual_range_contains, clippy::comparison_chain, clippy::float_cmp,
         clippy::needless_range_loop, clippy::new_without_default)]

pub mod q_shared;
pub mod qcommon;
pub mod crc;
pub mod cvar;
pub mod common;
pub mod error;
pub mod net_chan;
pub mod files;
pub mod cmodel;
pub mod pmove;
pub mod movecmd;
pub mod cmd;
