// ABOUTME: Phoenix replica access over the Query Server's Avatica JSON protocol
// ABOUTME: Reader for the replica projection and transactional upsert sessions for the target

//! The Query Server must run with JSON serialization
//! (`phoenix.queryserver.serialization=JSON`).

pub mod client;
pub mod models;
pub mod reader;
pub mod session;

pub use client::{AvaticaClient, AvaticaConnection};
pub use reader::{decode_positional_row, PhoenixReader};
pub use session::{PhoenixSession, PhoenixTarget};
