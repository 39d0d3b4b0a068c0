//! S3 Content Gateway Library
//!
//! Maps a small file/folder metadata REST API onto an S3 bucket. Requests are
//! signed with SigV4 by hand and sent over a pooled HTTP client.
//!
//! # Features
//!
//! - **Content ids**: base64url object keys, no server-side index
//! - **Resumable uploads**: stateless multipart tokens with per-segment SHA-256
//! - **Request pipeline**: guard, usage limiter, token and registration stages
//! - **Registrations**: per-token S3 credentials in a file datastore
//!
//! # Example
//!
//! ```no_run
//! use s3_content_gateway::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut server = Server::from_config(&config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod registration;
pub mod router;
pub mod s3;
pub mod server;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use error::GatewayError;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
