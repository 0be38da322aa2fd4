pub use error::{Error, Result};

pub mod address;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dialer;
pub mod error;
pub mod handler;
pub mod hello;
pub mod logger;
pub mod manager;
pub mod pipe;
pub mod quota;
pub mod server;
pub mod socks5;
