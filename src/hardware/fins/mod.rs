//! FINS protocol client over UDP.
//!
//! - [`frame`]: pure command construction and reply decoding
//! - [`transport`]: the one-request/one-reply datagram seam
//! - [`client`]: typed word and bit operations on top of a transport

pub mod client;
pub mod frame;
pub mod transport;

pub use client::FinsClient;
pub use frame::{Address, FinsHeader};
pub use transport::{Transport, UdpTransport};
