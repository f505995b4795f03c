pub mod client;
pub mod cmd;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod frame;
pub mod logging;
pub mod reply;
pub mod server;

pub use db::{Collection, Db, Item, ItemId, Snapshot};
pub use error::ProtocolError;
pub use reply::Reply;

/// Transport-level error. Protocol errors never travel through this type,
/// they are turned into a `Reply` before anything is written back.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub const DEFAULT_PORT: u16 = 8124;
