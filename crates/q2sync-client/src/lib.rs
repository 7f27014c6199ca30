#![allow(dead_code)]
#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::collapsible_if,
         clippy::field_reassign_with_default, clippy::float_cmp, clippy::needless_range_loop,
         clippy::new_without_default)]
// Client side of movement sync: command history, prediction, outbound moves
pub mod client;
pub mod cmd_ring;
pub mod cl_pred;
pub mod cl_input;
