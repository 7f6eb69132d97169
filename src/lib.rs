pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod graph;
pub mod init;
pub mod settings;
pub mod ui;
