pub mod availability;
pub mod clock;
pub mod config;
pub mod engine;
pub mod hold;
pub mod limits;
pub mod lock;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod reaper;
pub mod server;
pub mod wal;
