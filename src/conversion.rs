//! Atomic lead conversion.
//!
//! One conversion is one batch: the lead is closed, the client and its primary
//! contact are created (or an existing client is linked), the opportunity is
//! opened and a conversion record keyed by the lead id is written. Either all
//! of it lands or none of it does.
//!
//! The lead update is guarded by a `status != converted` precondition and the
//! conversion record id is the lead id, so two racing conversions of the same
//! lead cannot both commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::decision::{ClientDraft, ConversionDecision, OpportunityDraft};
use crate::errors::{ConversionError, ValidationErrors};
use crate::history::HistoryTransfer;
use crate::models::{
    collections, Actor, Client, Contact, ConversionResult, Lead, LeadConversionRecord,
    LeadStatus, Opportunity,
};
use crate::store::{get_typed, DocumentStore, Precondition, StoreError, WriteBatch};

/// Everything the operator decided in the wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionInput {
    pub lead_id: Uuid,
    pub decision: ConversionDecision,
    #[serde(default)]
    pub client_draft: Option<ClientDraft>,
    pub opportunity_draft: OpportunityDraft,
}

impl ConversionInput {
    /// Check decision/draft consistency and both drafts' schemas.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match (&self.decision, &self.client_draft) {
            (ConversionDecision::CreateNew, None) => {
                errors.push("client_draft", "is required when creating a new client");
            }
            (ConversionDecision::CreateNew, Some(draft)) => {
                if let Err(e) = draft.validate() {
                    for field in e.fields {
                        errors.push(format!("client_draft.{}", field.field), field.message);
                    }
                }
            }
            (ConversionDecision::LinkExisting { .. }, _) => {}
        }

        if let Err(e) = self.opportunity_draft.validate() {
            for field in e.fields {
                errors.push(format!("opportunity_draft.{}", field.field), field.message);
            }
        }

        errors.into_result()
    }
}

/// Executes conversions against a document store.
pub struct ConversionCoordinator {
    store: Arc<dyn DocumentStore>,
    history: HistoryTransfer,
    history_timeout: Duration,
}

impl ConversionCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        history: HistoryTransfer,
        history_timeout: Duration,
    ) -> Self {
        Self {
            store,
            history,
            history_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        let history = HistoryTransfer::from_config(store.clone(), config);
        Self::new(store, history, config.history_transfer_timeout())
    }

    /// Convert a lead into a client (new or linked) plus an open opportunity.
    pub async fn convert_lead(
        &self,
        input: ConversionInput,
        actor: Actor,
    ) -> Result<ConversionResult, ConversionError> {
        input.validate()?;
        let lead_id = input.lead_id;

        tracing::info!(
            "Starting conversion of lead {} (decision: {:?})",
            lead_id,
            input.decision
        );

        // Step 1: Load the lead and reject converted ones early
        let lead = self.load_lead(lead_id, actor).await?;
        if lead.is_converted() {
            tracing::warn!("Lead {} is already converted", lead_id);
            return Err(ConversionError::AlreadyConverted { lead_id });
        }

        // Step 2: Resolve the client
        let (client_id, is_new_client) = match input.decision {
            ConversionDecision::CreateNew => (Uuid::new_v4(), true),
            ConversionDecision::LinkExisting { existing_client_id } => {
                self.ensure_client_exists(existing_client_id, actor).await?;
                (existing_client_id, false)
            }
        };
        let opportunity_id = Uuid::new_v4();
        let now = Utc::now();

        // Step 3: Stage every write in one batch
        let batch = build_conversion_batch(
            &lead,
            &input,
            ConversionIds {
                client_id,
                opportunity_id,
                is_new_client,
            },
            actor,
            now,
        )
        .map_err(|e| ConversionError::TransactionCommit(e.to_string()))?;

        // Step 4: Commit all-or-nothing
        tracing::info!(
            "Committing conversion batch for lead {} ({} writes)",
            lead_id,
            batch.len()
        );
        match self.store.commit(batch).await {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed(_)) => {
                tracing::warn!("Lead {} was converted concurrently", lead_id);
                return Err(ConversionError::AlreadyConverted { lead_id });
            }
            Err(StoreError::AlreadyExists(what))
                if what.starts_with(collections::LEAD_CONVERSIONS) =>
            {
                tracing::warn!("Conversion record for lead {} already exists", lead_id);
                return Err(ConversionError::AlreadyConverted { lead_id });
            }
            Err(e) => {
                tracing::error!("Conversion commit for lead {} failed: {}", lead_id, e);
                return Err(ConversionError::TransactionCommit(e.to_string()));
            }
        }
        tracing::info!(
            "✓ Lead {} converted (client: {}, opportunity: {}, new client: {})",
            lead_id,
            client_id,
            opportunity_id,
            is_new_client
        );

        // Step 5: Best-effort history transfer
        let history_transferred = self.transfer_history(lead_id, client_id, actor).await;

        let message = match (is_new_client, history_transferred) {
            (true, true) => "Lead converted: new client created and opportunity opened",
            (false, true) => "Lead converted: linked to existing client and opportunity opened",
            (true, false) => {
                "Lead converted: new client created and opportunity opened; interaction history was not transferred"
            }
            (false, false) => {
                "Lead converted: linked to existing client and opportunity opened; interaction history was not transferred"
            }
        };

        Ok(ConversionResult {
            success: true,
            lead_id,
            client_id,
            opportunity_id,
            is_new_client,
            history_transferred,
            message: message.to_string(),
            timestamp: now,
        })
    }

    async fn load_lead(&self, lead_id: Uuid, actor: Actor) -> Result<Lead, ConversionError> {
        let lead: Option<Lead> = get_typed(self.store.as_ref(), collections::LEADS, lead_id)
            .await
            .map_err(|e| {
                ConversionError::TransactionCommit(format!("failed to load lead {}: {}", lead_id, e))
            })?;

        lead.filter(|l| l.tenant_id == actor.tenant_id)
            .ok_or_else(|| ConversionError::NotFound(format!("lead {}", lead_id)))
    }

    async fn ensure_client_exists(&self, client_id: Uuid, actor: Actor) -> Result<(), ConversionError> {
        let client: Option<Client> = get_typed(self.store.as_ref(), collections::CLIENTS, client_id)
            .await
            .map_err(|e| {
                ConversionError::TransactionCommit(format!(
                    "failed to load client {}: {}",
                    client_id, e
                ))
            })?;

        match client {
            Some(c) if c.tenant_id == actor.tenant_id => Ok(()),
            _ => Err(ConversionError::NotFound(format!("client {}", client_id))),
        }
    }

    /// Run the history job, waiting at most `history_timeout` for it.
    ///
    /// On timeout the job keeps running detached and the result reports false.
    async fn transfer_history(&self, lead_id: Uuid, client_id: Uuid, actor: Actor) -> bool {
        let history = self.history.clone();
        let job = tokio::spawn(async move { history.transfer(lead_id, client_id, actor).await });

        match tokio::time::timeout(self.history_timeout, job).await {
            Ok(Ok(Ok(_))) => true,
            Ok(Ok(Err(e))) => {
                tracing::warn!("Conversion of lead {} kept without history: {}", lead_id, e);
                false
            }
            Ok(Err(e)) => {
                tracing::error!("History transfer task for lead {} panicked: {}", lead_id, e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "History transfer for lead {} still running after {:?}; continuing in background",
                    lead_id,
                    self.history_timeout
                );
                false
            }
        }
    }
}

struct ConversionIds {
    client_id: Uuid,
    opportunity_id: Uuid,
    is_new_client: bool,
}

fn build_conversion_batch(
    lead: &Lead,
    input: &ConversionInput,
    ids: ConversionIds,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<WriteBatch, StoreError> {
    let mut batch = WriteBatch::new();
    let owner_id = lead.owner_id.unwrap_or(actor.actor_id);

    if ids.is_new_client {
        let draft = input
            .client_draft
            .as_ref()
            .map(ClientDraft::normalized)
            .ok_or_else(|| StoreError::Serialization("client draft missing".to_string()))?;

        let client = Client {
            id: ids.client_id,
            tenant_id: actor.tenant_id,
            client_type: draft.client_type,
            legal_name: draft.legal_name.clone(),
            trade_name: draft.trade_name.clone(),
            document_id: draft.document_id.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            address: draft.address.clone(),
            tags: draft.tags.clone(),
            owner_id,
            source: format!("lead-conversion:{}", lead.id),
            created_by: actor.actor_id,
            created_at: now,
        };
        batch.create(collections::CLIENTS, client.id, &client)?;

        let contact = Contact {
            id: Uuid::new_v4(),
            tenant_id: actor.tenant_id,
            client_id: ids.client_id,
            full_name: draft.primary_contact_name(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            role: draft.contact_role.clone(),
            is_primary: true,
            source: format!("lead-conversion:{}", lead.id),
            created_by: actor.actor_id,
            created_at: now,
        };
        batch.create(collections::CONTACTS, contact.id, &contact)?;
    }

    let draft = input.opportunity_draft.normalized();
    let opportunity = Opportunity {
        id: ids.opportunity_id,
        tenant_id: actor.tenant_id,
        client_id: ids.client_id,
        name: draft.name,
        estimated_value: draft.estimated_value,
        currency: draft.currency,
        stage: draft.stage,
        status: draft.status,
        probability: draft.probability,
        priority: draft.priority,
        expected_close_date: draft.expected_close_date,
        notes: draft.notes,
        source: lead.id.to_string(),
        owner_id,
        created_by: actor.actor_id,
        created_at: now,
    };
    batch.create(collections::OPPORTUNITIES, opportunity.id, &opportunity)?;

    batch.update(
        collections::LEADS,
        lead.id,
        json!({
            "status": LeadStatus::Converted,
            "converted_at": now,
            "converted_to_client_id": ids.client_id,
            "converted_to_opportunity_id": ids.opportunity_id,
        }),
        Some(Precondition::field_not_equals(
            "status",
            LeadStatus::Converted.as_str(),
        )),
    );

    let record = LeadConversionRecord {
        id: lead.id,
        tenant_id: actor.tenant_id,
        client_id: ids.client_id,
        opportunity_id: ids.opportunity_id,
        is_new_client: ids.is_new_client,
        converted_by: actor.actor_id,
        converted_at: now,
        history_transferred: false,
    };
    batch.create(collections::LEAD_CONVERSIONS, record.id, &record)?;

    Ok(batch)
}
