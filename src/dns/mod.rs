//! Wire-level DNS: record types and the RFC 1035 message codec.

pub mod packet;
pub mod types;
