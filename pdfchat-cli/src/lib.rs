//! `pdfchat` front end: CLI subcommands, an interactive chat loop and a JSON
//! HTTP API over the `pdfchat-rag` pipeline.

pub mod cli;
pub mod server;
pub mod setup;

pub use cli::{Cli, Command, run};
pub use server::{AppState, ServerConfig, app_router, run_server};
