//! Job-related API endpoints

use crate::MandrakeClient;
use crate::error::Result;
use mandrake_core::domain::job::Job;
use mandrake_core::dto::job::{DeliverCommand, HealthReport, JobMap};
use uuid::Uuid;

impl MandrakeClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Create a new job; it starts out `WAITING` for its context
    pub async fn create_job(&self) -> Result<Job> {
        let url = format!("{}/jobs", self.base_url);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List all jobs keyed by ID
    pub async fn list_jobs(&self) -> Result<JobMap> {
        let url = format!("{}/jobs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Deliver a command to a job
    ///
    /// Delivering `CONTEXT_DELIVERED` schedules the build/run pipeline; the
    /// returned job is already `SUBMITTED_TO_POOL`.
    ///
    /// # Example
    /// ```no_run
    /// # use mandrake_client::MandrakeClient;
    /// # use mandrake_core::dto::job::DeliverCommand;
    /// # use uuid::Uuid;
    /// # async fn example(id: Uuid) -> mandrake_client::Result<()> {
    /// let client = MandrakeClient::new("http://localhost:5000");
    /// let argv = vec!["ls".to_string(), "-la".to_string()];
    /// client.deliver_command(id, &DeliverCommand::run(&argv)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn deliver_command(&self, job_id: Uuid, cmd: &DeliverCommand) -> Result<Job> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let response = self.client.patch(&url).json(cmd).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Health
    // =============================================================================

    /// Server health and pool occupancy
    pub async fn health(&self) -> Result<HealthReport> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
