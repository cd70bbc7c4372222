pub mod cli;
pub mod config;
pub mod logging;
pub mod progression;
pub mod protocol;
pub mod server;
