//! CLI 命令实现

pub mod config;
pub mod data;
pub mod output;
pub mod script;
