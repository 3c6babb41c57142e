//! Helper functions to deal with the terminal process and serial ports.

mod ports;
mod process;

pub(crate) use ports::port_present;
pub(crate) use process::{signal_group, GroupSignal, TerminalProcess};
