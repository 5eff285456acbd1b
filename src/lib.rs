//! kagemori-nginx - supervises an nginx instance fronting auth-gated virtual hosts
//!
//! This library:
//! - Provisions the nginx prefix directory (logs and request buffering dirs)
//! - Models the nginx configuration as a typed tree and writes it through on every change
//! - Generates server blocks that authorize each request via an internal auth subrequest
//!   before proxying it, WebSocket upgrades included
//! - Starts, stops and reloads nginx based on its PID file

pub mod conf;
pub mod config;
pub mod error;
pub mod instance;
pub mod model;
pub mod parser;
pub mod process;
pub mod provision;
pub mod vhost;
pub mod writer;

pub use error::{Error, ErrorKind, Result};
pub use instance::ProxyInstance;
pub use model::{ConfigModel, HostOptions};
pub use process::{NginxController, NginxState};
pub use vhost::VirtualHost;
