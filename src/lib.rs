// src/lib.rs

pub mod wire;
pub mod error;
pub mod config;
pub mod logging;
pub mod endpoint;
pub mod params;
pub mod decoder;
pub mod retry;
pub mod orchestrator;
pub mod chain;
pub mod client;
pub mod storage;
pub mod metadata;
pub mod project;
pub mod mock_service;

pub use client::{Client, PromptSet, TransformOutput, UserInfo};
pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind, Result};
pub use project::{Project, Session};
