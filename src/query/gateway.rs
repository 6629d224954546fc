//! Query gateway.
//!
//! Classifies a raw query, gates writes behind explicit confirmation, runs
//! the query through the right engine client and normalizes the native
//! result into the common shape.
//!
//! Destructive execution is strictly two-phase: a write submitted with
//! `confirmed = false` yields a needs-confirmation outcome and has no side
//! effect, no matter how often it is resubmitted. Errors from the engine
//! propagate verbatim; a connection-loss error additionally flips the live
//! entry to the error state so the operator reconnects explicitly.

use crate::db::adapter::NativeResult;
use crate::db::manager::ConnectionManager;
use crate::error::CoreResult;
use crate::models::{QueryOutcome, QueryRequest, RowSet};
use crate::query::classify;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct QueryGateway {
    manager: Arc<ConnectionManager>,
}

impl QueryGateway {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Execute a query request; see the module docs for the protocol.
    pub async fn execute(&self, request: &QueryRequest) -> CoreResult<QueryOutcome> {
        // The engine kind comes from the live entry or the saved config, so
        // classification works (and gates writes) even before connecting.
        let engine = self.manager.engine_kind(&request.connection_id).await?;

        if let Some(operation) = classify::write_operation(engine, &request.query) {
            if !request.confirmed {
                debug!(
                    connection_id = %request.connection_id,
                    operation = %operation,
                    "Write requires confirmation"
                );
                return Ok(QueryOutcome::NeedsConfirmation {
                    query: request.query.clone(),
                    reason: format!(
                        "{} is a write operation and requires confirmation",
                        operation
                    ),
                });
            }
        }

        let client = self.manager.adapter(&request.connection_id).await?;

        // Fall back to the connection's default database.
        let database = match &request.database {
            Some(database) => Some(database.clone()),
            None => self
                .manager
                .get_config(&request.connection_id)
                .and_then(|c| c.database),
        };

        match client.run(database.as_deref(), &request.query).await {
            Ok(NativeResult::Affected(affected)) => Ok(QueryOutcome::Mutation { affected }),
            Ok(native @ NativeResult::Rows { .. }) => Ok(QueryOutcome::Rows(
                native.into_row_set().unwrap_or_else(RowSet::default),
            )),
            Err(e) => {
                if e.is_connection_loss() {
                    warn!(
                        connection_id = %request.connection_id,
                        error = %e,
                        "Connection lost during query"
                    );
                    self.manager.mark_error(&request.connection_id).await;
                }
                Err(e)
            }
        }
    }
}
