#![allow(dead_code)]
#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::collapsible_if,
         clippy::field_reassign_with_default, clippy::manual_range_contains,
         clippy::needless_range_loop)]

// Server side of movement sync: client slots, handshake, command execution

pub mod server;
pub mod sv_game;
pub mod sv_user;
