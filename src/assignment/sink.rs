use anyhow::Result;
use async_trait::async_trait;

use crate::assignment::AssignmentSubmission;
use crate::catalog::http::Endpoint;
use crate::output::json::render_json_line;

/// Write side of the planning platform.
#[async_trait]
pub trait AssignmentSink: Send + Sync {
    async fn submit(&self, submission: &AssignmentSubmission) -> Result<()>;
}

pub struct StdoutSink;

#[async_trait]
impl AssignmentSink for StdoutSink {
    async fn submit(&self, submission: &AssignmentSubmission) -> Result<()> {
        println!("{}", render_json_line(submission)?);
        Ok(())
    }
}

pub struct HttpSink {
    endpoint: Endpoint,
    path: String,
}

impl HttpSink {
    pub fn new(endpoint: Endpoint, path: impl Into<String>) -> Self {
        Self {
            endpoint,
            path: path.into(),
        }
    }
}

#[async_trait]
impl AssignmentSink for HttpSink {
    async fn submit(&self, submission: &AssignmentSubmission) -> Result<()> {
        self.endpoint.post_json(&self.path, submission).await
    }
}
