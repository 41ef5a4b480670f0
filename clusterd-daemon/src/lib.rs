//! clusterd daemon: status dispatcher on a Unix socket plus the filesystem
//! watcher that feeds it.

pub mod client;
pub mod config;
pub mod dispatcher;
mod error;
pub mod paths;
mod pidfile;
pub mod protocol;
mod runtime;
pub mod watcher;

pub use client::send_command;
pub use config::DaemonConfig;
pub use dispatcher::Dispatcher;
pub use error::DaemonError;
pub use protocol::{Command, Response};
pub use runtime::{init_tracing, run, start_blocking};
