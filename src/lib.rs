// Library exports for the pin-autoconfirm crate
// This allows tests and the binary to use the modules

pub mod config;
pub mod confirmer;
pub mod email;
pub mod error;
pub mod extractor;
pub mod imap_client;
pub mod poller;
pub mod server;
pub mod status;

pub use error::{Error, Result};
