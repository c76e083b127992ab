//! Best-effort copy of a converted lead's interaction log onto its client.
//!
//! Runs after the conversion commit and never affects it. Each attempt copies
//! the whole history and flips `history_transferred` on the conversion record
//! in one batch, so a retry can never duplicate entries.

use chrono::Utc;
use failsafe::futures::CircuitBreaker;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::circuit_breaker::{create_history_circuit_breaker, HistoryCircuitBreaker};
use crate::config::Config;
use crate::errors::ConversionError;
use crate::models::{collections, Actor, Interaction, LeadConversionRecord};
use crate::store::{query_typed, DocumentStore, Filter, Precondition, StoreError, WriteBatch};

#[derive(Clone)]
pub struct HistoryTransfer {
    store: Arc<dyn DocumentStore>,
    breaker: HistoryCircuitBreaker,
    max_attempts: u32,
    backoff: Duration,
}

/// Counts reported by [`HistoryTransfer::retry_pending`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetrySummary {
    pub pending: usize,
    pub transferred: usize,
    pub failed: usize,
}

impl HistoryTransfer {
    pub fn new(store: Arc<dyn DocumentStore>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            store,
            breaker: create_history_circuit_breaker(),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self::new(
            store,
            config.history_transfer_max_attempts,
            config.history_transfer_backoff(),
        )
    }

    /// Copy the lead's interactions to the client, retrying with backoff.
    ///
    /// Returns how many interactions were copied (0 if there were none or an
    /// earlier run already transferred them).
    pub async fn transfer(
        &self,
        lead_id: Uuid,
        client_id: Uuid,
        actor: Actor,
    ) -> Result<usize, ConversionError> {
        let mut delay = self.backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self
                .breaker
                .call(self.copy_once(lead_id, client_id, actor))
                .await
            {
                Ok(copied) => {
                    tracing::info!(
                        "✓ Transferred {} interaction(s) from lead {} to client {}",
                        copied,
                        lead_id,
                        client_id
                    );
                    return Ok(copied);
                }
                Err(failsafe::Error::Rejected) => {
                    tracing::warn!(
                        "History transfer for lead {} rejected: circuit breaker open",
                        lead_id
                    );
                    return Err(ConversionError::HistoryTransfer(
                        "history store circuit breaker is open".to_string(),
                    ));
                }
                Err(failsafe::Error::Inner(e)) => {
                    tracing::warn!(
                        "History transfer attempt {}/{} for lead {} failed: {}",
                        attempt,
                        self.max_attempts,
                        lead_id,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        Err(ConversionError::HistoryTransfer(last_error))
    }

    async fn copy_once(
        &self,
        lead_id: Uuid,
        client_id: Uuid,
        actor: Actor,
    ) -> Result<usize, StoreError> {
        let filter = Filter::And(vec![
            Filter::eq("tenant_id", actor.tenant_id.to_string()),
            Filter::eq("lead_id", lead_id.to_string()),
        ]);
        let originals: Vec<Interaction> =
            query_typed(self.store.as_ref(), collections::INTERACTIONS, &filter).await?;

        let mut batch = WriteBatch::new();
        for original in &originals {
            let copy = Interaction {
                id: Uuid::new_v4(),
                tenant_id: original.tenant_id,
                lead_id: None,
                client_id: Some(client_id),
                kind: original.kind,
                summary: original.summary.clone(),
                occurred_at: original.occurred_at,
                created_by: actor.actor_id,
                copied_from: Some(original.id),
            };
            batch.create(collections::INTERACTIONS, copy.id, &copy)?;
        }
        batch.update(
            collections::LEAD_CONVERSIONS,
            lead_id,
            json!({ "history_transferred": true, "history_transferred_at": Utc::now() }),
            Some(Precondition::field_not_equals("history_transferred", true)),
        );

        match self.store.commit(batch).await {
            Ok(()) => Ok(originals.len()),
            Err(StoreError::PreconditionFailed(_)) => {
                tracing::debug!("History for lead {} was already transferred", lead_id);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-run transfers for conversions whose history never made it across.
    pub async fn retry_pending(&self, tenant_id: Option<Uuid>) -> Result<RetrySummary, StoreError> {
        let mut filters = vec![Filter::eq("history_transferred", false)];
        if let Some(tenant) = tenant_id {
            filters.push(Filter::eq("tenant_id", tenant.to_string()));
        }

        let pending: Vec<LeadConversionRecord> = query_typed(
            self.store.as_ref(),
            collections::LEAD_CONVERSIONS,
            &Filter::And(filters),
        )
        .await?;

        let mut summary = RetrySummary {
            pending: pending.len(),
            ..RetrySummary::default()
        };

        for record in pending {
            let actor = Actor {
                tenant_id: record.tenant_id,
                actor_id: record.converted_by,
            };
            match self.transfer(record.id, record.client_id, actor).await {
                Ok(_) => summary.transferred += 1,
                Err(e) => {
                    tracing::error!("Retry of history transfer for lead {} failed: {}", record.id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
