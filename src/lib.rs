pub mod cli;
pub mod config;
pub mod daemon;
pub mod endpoint;
pub mod health;
pub mod lock;
pub mod logging;
pub mod paths;
pub mod process;
pub mod shutdown;
pub mod supervisor;
