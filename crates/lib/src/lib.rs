//! Task Hub core library: session gate and real-time hub channel
//! shared by the CLI and embedding hosts.

pub mod channel;
pub mod config;
pub mod gate;
pub mod init;
pub mod session;
