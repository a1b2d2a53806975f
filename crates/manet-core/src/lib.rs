//! # manet-core
//!
//! Core types and primitives for the manet ad-hoc network simulator.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: identifiers, coordinates, routing tables, the packet record and
//! its wire codec.

pub mod error;
pub mod packet;
pub mod types;
pub mod wire;

pub use error::{ManetError, Result};
pub use packet::{Envelope, Packet};
pub use types::*;
pub use wire::{CodecError, PacketCodec};
