// lib.rs
#![warn(clippy::large_futures)]

pub use std::{net, pin::Pin, sync::Arc};

pub use askama::Template;
pub use log::*;
pub use serde::{Deserialize, Serialize};
pub use tokio::time::{sleep, timeout, Duration, Instant};

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SOURCE_TIMESTAMP: &str = match option_env!("SOURCE_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

mod error;
pub use error::*;

mod pzem;
pub use pzem::*;

mod reading;
pub use reading::*;

mod exchange;
pub use exchange::*;

mod config;
pub use config::*;

mod link;
pub use link::*;

mod arbiter;
pub use arbiter::*;

mod measure;
pub use measure::*;

mod ftp;
pub use ftp::*;

mod firmware;
pub use firmware::*;

mod provision;
pub use provision::*;

mod state;
pub use state::*;

mod apiserver;
pub use apiserver::*;

mod orchestrator;
pub use orchestrator::*;

mod emulator;
pub use emulator::*;

pub mod platform;

// EOF
