/// End-to-end conversion tests against the in-process store.
/// Covers idempotency, atomicity, link-existing and the history transfer.
mod common;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use lead_conversion_api::conversion::ConversionInput;
use lead_conversion_api::decision::ConversionDecision;
use lead_conversion_api::errors::ConversionError;
use lead_conversion_api::history::HistoryTransfer;
use lead_conversion_api::models::{
    collections, Client, Contact, Interaction, LeadConversionRecord, LeadStatus, Opportunity,
};
use lead_conversion_api::store::{get_typed, query_typed, Filter, MemoryStore};

use common::*;

fn create_new(lead_id: Uuid) -> ConversionInput {
    ConversionInput {
        lead_id,
        decision: ConversionDecision::CreateNew,
        client_draft: Some(client_draft()),
        opportunity_draft: opportunity_draft(),
    }
}

fn link_existing(lead_id: Uuid, client_id: Uuid) -> ConversionInput {
    ConversionInput {
        lead_id,
        decision: ConversionDecision::LinkExisting {
            existing_client_id: client_id,
        },
        client_draft: None,
        opportunity_draft: opportunity_draft(),
    }
}

async fn assert_nothing_written(store: &MemoryStore) {
    assert_eq!(store.count(collections::CLIENTS).await, 0);
    assert_eq!(store.count(collections::CONTACTS).await, 0);
    assert_eq!(store.count(collections::OPPORTUNITIES).await, 0);
    assert_eq!(store.count(collections::LEAD_CONVERSIONS).await, 0);
}

#[tokio::test]
async fn create_new_converts_lead_client_contact_and_opportunity() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;

    let result = coordinator(&store)
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.is_new_client);
    assert!(result.history_transferred);
    assert_eq!(result.lead_id, lead.id);

    let converted = load_lead(&store, lead.id).await;
    assert_eq!(converted.status, LeadStatus::Converted);
    assert_eq!(converted.converted_to_client_id, Some(result.client_id));
    assert_eq!(
        converted.converted_to_opportunity_id,
        Some(result.opportunity_id)
    );
    assert!(converted.converted_at.is_some());

    let client: Client = get_typed(store.as_ref(), collections::CLIENTS, result.client_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.email, "contato@acme.com.br");
    assert_eq!(client.phone, "11987654321");
    assert_eq!(client.source, format!("lead-conversion:{}", lead.id));
    assert_eq!(client.tenant_id, actor.tenant_id);

    let contacts: Vec<Contact> = query_typed(
        store.as_ref(),
        collections::CONTACTS,
        &Filter::eq("client_id", result.client_id.to_string()),
    )
    .await
    .unwrap();
    assert_eq!(contacts.len(), 1);
    assert!(contacts[0].is_primary);
    assert_eq!(contacts[0].full_name, "Joana Prado");

    let opportunity: Opportunity =
        get_typed(store.as_ref(), collections::OPPORTUNITIES, result.opportunity_id)
            .await
            .unwrap()
            .unwrap();
    assert_eq!(opportunity.client_id, result.client_id);
    assert_eq!(opportunity.source, lead.id.to_string());

    let record: LeadConversionRecord =
        get_typed(store.as_ref(), collections::LEAD_CONVERSIONS, lead.id)
            .await
            .unwrap()
            .unwrap();
    assert!(record.is_new_client);
    assert!(record.history_transferred);
}

#[tokio::test]
async fn converting_twice_fails_and_leaves_first_result_intact() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    let coordinator = coordinator(&store);

    coordinator
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap();
    let err = coordinator
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap_err();

    assert!(matches!(err, ConversionError::AlreadyConverted { lead_id } if lead_id == lead.id));
    assert!(err.closes_wizard());
    assert_eq!(store.count(collections::CLIENTS).await, 1);
    assert_eq!(store.count(collections::OPPORTUNITIES).await, 1);
    assert_eq!(store.count(collections::CONTACTS).await, 1);
}

#[tokio::test]
async fn concurrent_conversions_commit_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    let coordinator = coordinator(&store);

    let (a, b) = tokio::join!(
        coordinator.convert_lead(create_new(lead.id), actor),
        coordinator.convert_lead(create_new(lead.id), actor),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = if a.is_err() { a } else { b };
    assert!(matches!(
        failure,
        Err(ConversionError::AlreadyConverted { .. })
    ));
    assert_eq!(store.count(collections::OPPORTUNITIES).await, 1);
}

#[tokio::test]
async fn existing_conversion_record_blocks_a_second_commit() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;

    // A record keyed by the lead id already exists while the lead still looks open
    let mut batch = lead_conversion_api::store::WriteBatch::new();
    batch
        .create(
            collections::LEAD_CONVERSIONS,
            lead.id,
            &serde_json::json!({ "id": lead.id, "history_transferred": true }),
        )
        .unwrap();
    lead_conversion_api::store::DocumentStore::commit(store.as_ref(), batch)
        .await
        .unwrap();

    let err = coordinator(&store)
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap_err();

    assert!(matches!(err, ConversionError::AlreadyConverted { .. }));
    assert_eq!(load_lead(&store, lead.id).await.status, LeadStatus::Qualifying);
    assert_eq!(store.count(collections::CLIENTS).await, 0);
}

#[tokio::test]
async fn link_existing_uses_the_given_client() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let existing = seed_client(&store, actor, "Acme Ltda", "contato@acme.com.br", "1133334444").await;
    let lead = seed_lead(&store, actor, "Joana Prado", "contato@acme.com.br", "11987654321").await;

    let result = coordinator(&store)
        .convert_lead(link_existing(lead.id, existing.id), actor)
        .await
        .unwrap();

    assert!(!result.is_new_client);
    assert_eq!(result.client_id, existing.id);
    assert_eq!(store.count(collections::CLIENTS).await, 1);
    assert_eq!(store.count(collections::CONTACTS).await, 0);

    let opportunity: Opportunity =
        get_typed(store.as_ref(), collections::OPPORTUNITIES, result.opportunity_id)
            .await
            .unwrap()
            .unwrap();
    assert_eq!(opportunity.client_id, existing.id);
    assert_eq!(
        load_lead(&store, lead.id).await.converted_to_client_id,
        Some(existing.id)
    );
}

#[tokio::test]
async fn link_to_unknown_or_foreign_client_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let other_tenant = common::actor();
    let foreign = seed_client(&store, other_tenant, "Other Ltda", "x@other.com", "1122223333").await;
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    let coordinator = coordinator(&store);

    for client_id in [Uuid::new_v4(), foreign.id] {
        let err = coordinator
            .convert_lead(link_existing(lead.id, client_id), actor)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::NotFound(_)));
    }
    assert_eq!(load_lead(&store, lead.id).await.status, LeadStatus::Qualifying);
    assert_eq!(store.count(collections::OPPORTUNITIES).await, 0);
}

#[tokio::test]
async fn missing_or_foreign_lead_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let coordinator = coordinator(&store);

    let err = coordinator
        .convert_lead(create_new(Uuid::new_v4()), actor)
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::NotFound(_)));

    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    let err = coordinator
        .convert_lead(create_new(lead.id), common::actor())
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::NotFound(_)));
    assert_nothing_written(&store).await;
}

#[tokio::test]
async fn failed_commit_writes_nothing_and_can_be_retried() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    let coordinator = coordinator(&store);

    // Fail after client, contact and opportunity were staged
    store.fail_commit_after(3).await;
    let err = coordinator
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap_err();

    assert!(matches!(err, ConversionError::TransactionCommit(_)));
    assert!(err.is_retryable());
    assert_nothing_written(&store).await;
    let untouched = load_lead(&store, lead.id).await;
    assert_eq!(untouched.status, LeadStatus::Qualifying);
    assert_eq!(untouched.converted_to_client_id, None);

    let result = coordinator
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(store.count(collections::CLIENTS).await, 1);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_read() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;

    let mut input = create_new(lead.id);
    input.client_draft = None;
    input.opportunity_draft.probability = 120;

    match coordinator(&store).convert_lead(input, actor).await {
        Err(ConversionError::Validation(errors)) => {
            assert!(errors.has("client_draft"));
            assert!(errors.has("opportunity_draft.probability"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_nothing_written(&store).await;
}

#[tokio::test]
async fn history_is_copied_to_the_new_client() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    let first = seed_interaction(&store, actor, lead.id).await;
    seed_interaction(&store, actor, lead.id).await;

    let result = coordinator(&store)
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap();
    assert!(result.history_transferred);

    let copies: Vec<Interaction> = query_typed(
        store.as_ref(),
        collections::INTERACTIONS,
        &Filter::eq("client_id", result.client_id.to_string()),
    )
    .await
    .unwrap();
    assert_eq!(copies.len(), 2);
    assert!(copies.iter().any(|c| c.copied_from == Some(first.id)));
    assert!(copies.iter().all(|c| c.lead_id.is_none()));
    // Originals stay on the lead
    assert_eq!(store.count(collections::INTERACTIONS).await, 4);
}

#[tokio::test]
async fn history_failure_keeps_the_conversion_and_can_be_retried() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    seed_interaction(&store, actor, lead.id).await;

    store
        .fail_commits_touching(Some(collections::INTERACTIONS))
        .await;
    let result = coordinator(&store)
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap();

    assert!(result.success);
    assert!(!result.history_transferred);
    assert!(result.message.contains("not transferred"));
    assert_eq!(load_lead(&store, lead.id).await.status, LeadStatus::Converted);
    assert_eq!(store.count(collections::INTERACTIONS).await, 1);

    store.fail_commits_touching(None).await;
    let history = HistoryTransfer::new(as_dyn(&store), 1, Duration::from_millis(1));
    let summary = history.retry_pending(Some(actor.tenant_id)).await.unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.transferred, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(store.count(collections::INTERACTIONS).await, 2);

    // A second run finds nothing left to do
    let summary = history.retry_pending(Some(actor.tenant_id)).await.unwrap();
    assert_eq!(summary.pending, 0);
}

#[tokio::test]
async fn history_transfer_never_duplicates_entries() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor();
    let lead = seed_lead(&store, actor, "Joana Prado", "joana@acme.com.br", "11987654321").await;
    seed_interaction(&store, actor, lead.id).await;

    let result = coordinator(&store)
        .convert_lead(create_new(lead.id), actor)
        .await
        .unwrap();
    assert!(result.history_transferred);

    let history = HistoryTransfer::new(as_dyn(&store), 1, Duration::from_millis(1));
    let copied = history
        .transfer(lead.id, result.client_id, actor)
        .await
        .unwrap();
    assert_eq!(copied, 0);
    assert_eq!(store.count(collections::INTERACTIONS).await, 2);
}
