//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use lead_conversion_api::conversion::ConversionCoordinator;
use lead_conversion_api::decision::{ClientDraft, OpportunityDraft};
use lead_conversion_api::history::HistoryTransfer;
use lead_conversion_api::models::{
    collections, Actor, Address, Client, ClientType, Interaction, InteractionKind, Lead,
    LeadStatus, OpportunityStage, OpportunityStatus, Priority,
};
use lead_conversion_api::store::{get_typed, DocumentStore, MemoryStore, WriteBatch};

pub fn actor() -> Actor {
    Actor {
        tenant_id: Uuid::new_v4(),
        actor_id: Uuid::new_v4(),
    }
}

pub fn as_dyn(store: &Arc<MemoryStore>) -> Arc<dyn DocumentStore> {
    store.clone()
}

pub async fn seed_lead(
    store: &MemoryStore,
    actor: Actor,
    full_name: &str,
    email: &str,
    phone: &str,
) -> Lead {
    let lead = Lead {
        id: Uuid::new_v4(),
        tenant_id: actor.tenant_id,
        full_name: Some(full_name.to_string()),
        entity_name: None,
        email: Some(email.to_string()),
        phone: Some(phone.to_string()),
        status: LeadStatus::Qualifying,
        source: Some("website".to_string()),
        notes: None,
        owner_id: Some(actor.actor_id),
        converted_to_client_id: None,
        converted_to_opportunity_id: None,
        converted_at: None,
        created_at: Utc::now(),
    };
    let mut batch = WriteBatch::new();
    batch.create(collections::LEADS, lead.id, &lead).unwrap();
    store.commit(batch).await.unwrap();
    lead
}

pub async fn seed_client(
    store: &MemoryStore,
    actor: Actor,
    legal_name: &str,
    email: &str,
    phone: &str,
) -> Client {
    let client = Client {
        id: Uuid::new_v4(),
        tenant_id: actor.tenant_id,
        client_type: ClientType::Company,
        legal_name: legal_name.to_string(),
        trade_name: None,
        document_id: "12.345.678/0001-90".to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
        address: Address {
            street: "Rua das Flores".to_string(),
            city: "São Paulo".to_string(),
            country: "BR".to_string(),
            ..Address::default()
        },
        tags: vec![],
        owner_id: actor.actor_id,
        source: "manual".to_string(),
        created_by: actor.actor_id,
        created_at: Utc::now(),
    };
    let mut batch = WriteBatch::new();
    batch.create(collections::CLIENTS, client.id, &client).unwrap();
    store.commit(batch).await.unwrap();
    client
}

pub async fn seed_interaction(store: &MemoryStore, actor: Actor, lead_id: Uuid) -> Interaction {
    let interaction = Interaction {
        id: Uuid::new_v4(),
        tenant_id: actor.tenant_id,
        lead_id: Some(lead_id),
        client_id: None,
        kind: InteractionKind::Call,
        summary: "Intro call".to_string(),
        occurred_at: Utc::now(),
        created_by: actor.actor_id,
        copied_from: None,
    };
    let mut batch = WriteBatch::new();
    batch
        .create(collections::INTERACTIONS, interaction.id, &interaction)
        .unwrap();
    store.commit(batch).await.unwrap();
    interaction
}

pub async fn load_lead(store: &MemoryStore, lead_id: Uuid) -> Lead {
    get_typed(store, collections::LEADS, lead_id)
        .await
        .unwrap()
        .expect("lead exists")
}

pub fn client_draft() -> ClientDraft {
    ClientDraft {
        client_type: ClientType::Company,
        legal_name: "Acme Comércio Ltda".to_string(),
        trade_name: Some("Acme".to_string()),
        document_id: "12.345.678/0001-90".to_string(),
        email: "Contato@Acme.com.br".to_string(),
        phone: "(11) 98765-4321".to_string(),
        address: Address {
            street: "Av. Paulista".to_string(),
            number: Some("1000".to_string()),
            city: "São Paulo".to_string(),
            state: Some("SP".to_string()),
            country: "BR".to_string(),
            ..Address::default()
        },
        tags: vec!["inbound".to_string()],
        contact_name: Some("Joana Prado".to_string()),
        contact_role: Some("Purchasing".to_string()),
    }
}

pub fn opportunity_draft() -> OpportunityDraft {
    OpportunityDraft {
        name: "Acme - Annual plan".to_string(),
        client_id: None,
        estimated_value: BigDecimal::from(12_000),
        currency: "BRL".to_string(),
        stage: OpportunityStage::Qualification,
        status: OpportunityStatus::Open,
        probability: 30,
        priority: Priority::High,
        expected_close_date: None,
        notes: None,
    }
}

/// Coordinator with fast history retries.
pub fn coordinator(store: &Arc<MemoryStore>) -> ConversionCoordinator {
    let history = HistoryTransfer::new(as_dyn(store), 2, Duration::from_millis(1));
    ConversionCoordinator::new(as_dyn(store), history, Duration::from_secs(5))
}
