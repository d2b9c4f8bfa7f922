//! Protocol implementations.

pub mod command;
pub mod framer;
pub mod response;

// Re-export common types
pub use command::{BOOTLOADER_MAGIC, Bl702Commands, CommandFrame, CommandSet, Opcode};
pub use framer::{Fragments, LAST_PACKET, MAX_PACKET_PAYLOAD, MORE_FOLLOWS, Packet, fragment};
pub use response::{ACK_MARKER, ResponseAwaiter, ResponseKind};
