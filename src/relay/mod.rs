pub mod connection;
pub mod dedup;
pub mod event;
pub mod filter;
pub mod message;
pub mod nip19;
pub mod pool;
pub mod query;

pub use event::NostrEvent;
pub use filter::Filter;
pub use message::{ClientMessage, RelayMessage};
pub use pool::{PoolHealth, RelayFrame, RelayPool, RelayPoolConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed relay frame: {0}")]
    Protocol(String),

    #[error("relay query timed out")]
    Timeout,

    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
}
