pub mod app;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod health;
pub mod logscan;
pub mod procs;
pub mod quota;
pub mod report;
pub mod sessions;
pub mod snapshot;
pub mod text;
pub mod util;
