//! Mandrake HTTP Client
//!
//! A small, type-safe client for the Mandrake server's job API.
//!
//! # Example
//!
//! ```no_run
//! use mandrake_client::MandrakeClient;
//! use mandrake_core::dto::job::DeliverCommand;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mandrake_client::ClientError> {
//!     let client = MandrakeClient::new("http://localhost:5000");
//!
//!     let job = client.create_job().await?;
//!     let argv = vec!["make".to_string(), "test".to_string()];
//!     client.deliver_command(job.id, &DeliverCommand::run(&argv)).await?;
//!
//!     println!("Submitted job: {}", job.id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
pub mod retry;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use mandrake_core::domain::job::Job;
use mandrake_core::dto::job::DeliverCommand;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// Default per-request deadline for [`MandrakeClient::with_timeout`]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Job operations a remote client needs
///
/// Implemented by [`MandrakeClient`]; the seam lets callers drive their
/// control loop against a scripted implementation.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn create_job(&self) -> Result<Job>;
    async fn get_job(&self, id: Uuid) -> Result<Job>;
    async fn deliver_command(&self, id: Uuid, cmd: &DeliverCommand) -> Result<Job>;
}

/// HTTP client for the Mandrake server API
#[derive(Debug, Clone)]
pub struct MandrakeClient {
    /// Base URL of the server (e.g., "http://localhost:5000")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl MandrakeClient {
    /// Create a new client
    ///
    /// # Example
    /// ```
    /// use mandrake_client::MandrakeClient;
    ///
    /// let client = MandrakeClient::new("http://localhost:5000");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client whose requests fail with a timeout error after `timeout`
    ///
    /// A stalled server then surfaces as a transient error instead of
    /// hanging the caller.
    ///
    /// # Example
    /// ```
    /// use mandrake_client::{MandrakeClient, DEFAULT_REQUEST_TIMEOUT};
    ///
    /// let client = MandrakeClient::with_timeout("http://localhost:5000", DEFAULT_REQUEST_TIMEOUT)?;
    /// # Ok::<(), mandrake_client::ClientError>(())
    /// ```
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a client with a configured reqwest Client (timeouts, proxies, TLS)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(
                status.as_u16(),
                error::error_message(&error_text),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[async_trait]
impl JobApi for MandrakeClient {
    async fn create_job(&self) -> Result<Job> {
        MandrakeClient::create_job(self).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Job> {
        MandrakeClient::get_job(self, id).await
    }

    async fn deliver_command(&self, id: Uuid, cmd: &DeliverCommand) -> Result<Job> {
        MandrakeClient::deliver_command(self, id, cmd).await
    }
}
