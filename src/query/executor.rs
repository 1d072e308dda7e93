//! Query execution pipeline.
//!
//! Validate, rewrite, execute, classify, wrap. Every call returns an
//! [`Envelope`]; nothing in here panics or returns an error to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::classify::{classify, Classification};
use super::envelope::{Envelope, QueryData, SuccessBody};
use crate::db::{ExecutionError, ExecutionRequest, QueryBackend, RawResultSet};
use crate::safety::{rewrite_limit, validate, LimitRewrite, ValidationError, ValidationPolicy};

/// Default server-side statement timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs generator-produced SQL for one tenant.
///
/// Cheap to clone and safe to share across conversations; holds no per-query
/// state.
#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn QueryBackend>,
    policy: Arc<ValidationPolicy>,
    timeout: Duration,
    tenant_id: Option<String>,
    project_id: Option<String>,
}

impl QueryExecutor {
    /// Creates a new query executor.
    pub fn new(backend: Arc<dyn QueryBackend>, policy: Arc<ValidationPolicy>) -> Self {
        Self {
            backend,
            policy,
            timeout: DEFAULT_TIMEOUT,
            tenant_id: None,
            project_id: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tags success envelopes with the caller's tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Tags success envelopes with the caller's project.
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Validates and rewrites `sql` without touching the backend.
    pub fn prepare(&self, sql: &str) -> Result<LimitRewrite, ValidationError> {
        let parsed = validate(sql, &self.policy)?;
        Ok(rewrite_limit(parsed, self.policy.max_row_limit()))
    }

    /// Runs `sql` end to end and wraps the outcome.
    pub async fn execute(&self, sql: &str) -> Envelope {
        let start = Instant::now();

        let rewrite = match self.prepare(sql) {
            Ok(rewrite) => rewrite,
            Err(rejection) => return Envelope::from(rejection),
        };

        let executed_sql = rewrite.executed_sql();
        debug!(sql = %executed_sql, action = ?rewrite.action, "executing rewritten statement");

        let request = ExecutionRequest::new(
            executed_sql.clone(),
            self.policy.primary_schema(),
            self.timeout,
        );

        match self.run_detached(request).await {
            Ok(result) => {
                let timing_ms = start.elapsed().as_millis() as u64;
                self.success(result, &rewrite, executed_sql, timing_ms)
            }
            Err(e) => {
                let classification: Classification = classify(&e);
                info!(
                    backend = self.backend.name(),
                    kind = %classification.kind,
                    "query failed"
                );
                Envelope::from(classification)
            }
        }
    }

    /// Runs the backend call on its own task.
    ///
    /// If the awaiting future is dropped the statement keeps running until it
    /// finishes or hits the server-side timeout.
    async fn run_detached(
        &self,
        request: ExecutionRequest,
    ) -> Result<RawResultSet, ExecutionError> {
        let backend = Arc::clone(&self.backend);
        let handle = tokio::spawn(async move { backend.execute(&request).await });

        match handle.await {
            Ok(result) => result.map_err(ExecutionError::from),
            Err(join_error) => Err(ExecutionError::Unexpected(join_error.to_string())),
        }
    }

    fn success(
        &self,
        result: RawResultSet,
        rewrite: &LimitRewrite,
        sql_executed: String,
        timing_ms: u64,
    ) -> Envelope {
        let max_row_limit = self.policy.max_row_limit();
        let row_count = result.row_count();
        let truncated = row_count as u64 >= max_row_limit;

        let mut warnings: Vec<String> = rewrite.action.warning(max_row_limit).into_iter().collect();
        if truncated {
            warnings.push(format!(
                "Result reached the {} row limit; more rows may exist. \
                 Add filters or aggregate to see everything.",
                max_row_limit
            ));
        }

        info!(
            rows = row_count,
            truncated,
            timing_ms,
            "query succeeded"
        );

        Envelope::Success(SuccessBody {
            data: QueryData {
                columns: result.columns,
                rows: result.rows,
                row_count,
                truncated,
                sql_executed,
                tables_accessed: rewrite.statement.tables_referenced().clone(),
            },
            schema: self.policy.primary_schema().to_string(),
            tenant_id: self.tenant_id.clone(),
            project_id: self.project_id.clone(),
            warnings,
            timing_ms,
        })
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("tenant_id", &self.tenant_id)
            .field("project_id", &self.project_id)
            .finish()
    }
}
