//! Parley core library: messaging channels, webhook dispatch, the message pipeline, and the
//! gateway server used by the CLI.

pub mod channels;
pub mod config;
pub mod dedup;
pub mod gateway;
pub mod init;
pub mod pipeline;
pub mod router;
pub mod session;

#[cfg(test)]
mod testing;
