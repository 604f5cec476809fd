//! Custom TCP transport: frame codec, session multiplexer, handshake.

pub mod mux;

pub use mux::{MuxError, TcpMultiplexer, DEFAULT_IDLE_TIMEOUT};
