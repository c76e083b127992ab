use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collection names used in the document store.
pub mod collections {
    pub const LEADS: &str = "leads";
    pub const CLIENTS: &str = "clients";
    pub const CONTACTS: &str = "contacts";
    pub const OPPORTUNITIES: &str = "opportunities";
    pub const INTERACTIONS: &str = "interactions";
    pub const LEAD_CONVERSIONS: &str = "lead_conversions";
}

/// The operator performing an action, scoped to one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

// ============ Durable Entities ============

/// Lifecycle of a lead. `Converted` is terminal for the conversion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualifying,
    Disqualified,
    Converted,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualifying => "qualifying",
            Self::Disqualified => "disqualified",
            Self::Converted => "converted",
        }
    }
}

/// An unqualified prospect, the input of the conversion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Unique identifier for the lead.
    pub id: Uuid,
    /// Tenant owning the lead.
    pub tenant_id: Uuid,
    /// Name of the person behind the lead.
    pub full_name: Option<String>,
    /// Company or organisation the lead speaks for.
    pub entity_name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Current status.
    pub status: LeadStatus,
    /// Where the lead came from (campaign, form, referral).
    pub source: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// User responsible for the lead.
    pub owner_id: Option<Uuid>,
    /// Client created or linked by the conversion.
    #[serde(default)]
    pub converted_to_client_id: Option<Uuid>,
    /// Opportunity opened by the conversion.
    #[serde(default)]
    pub converted_to_opportunity_id: Option<Uuid>,
    /// When the conversion committed.
    #[serde(default)]
    pub converted_at: Option<DateTime<Utc>>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn is_converted(&self) -> bool {
        self.status == LeadStatus::Converted
    }

    /// Best display name: the person, then the organisation, then the email.
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .or(self.entity_name.as_deref())
            .or(self.email.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Whether a client is a person or an organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Person,
    Company,
}

/// Postal address of a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

/// A durable customer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_type: ClientType,
    /// Legal or full name.
    pub legal_name: String,
    /// Trade name (companies).
    pub trade_name: Option<String>,
    /// Tax or national document number.
    pub document_id: String,
    pub email: String,
    pub phone: String,
    pub address: Address,
    #[serde(default)]
    pub tags: Vec<String>,
    pub owner_id: Uuid,
    /// Provenance, e.g. `lead-conversion:<leadId>`.
    pub source: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A person scoped to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub role: Option<String>,
    pub is_primary: bool,
    pub source: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Sales pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStage {
    Prospecting,
    Qualification,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl OpportunityStage {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedWon | Self::ClosedLost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Open,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// A potential deal with a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub estimated_value: BigDecimal,
    /// ISO 4217 code.
    pub currency: String,
    pub stage: OpportunityStage,
    pub status: OpportunityStatus,
    /// Win probability in percent.
    pub probability: u8,
    pub priority: Priority,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
    /// Id of the originating lead.
    pub source: String,
    pub owner_id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Call,
    Email,
    Meeting,
    Message,
    Note,
}

/// One entry of a lead's or client's interaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[serde(default)]
    pub lead_id: Option<Uuid>,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub kind: InteractionKind,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
    pub created_by: Uuid,
    /// Original interaction this entry was copied from.
    #[serde(default)]
    pub copied_from: Option<Uuid>,
}

/// Audit record of a committed conversion, keyed by the lead id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadConversionRecord {
    /// Same as the lead id; unique per lead.
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub opportunity_id: Uuid,
    pub is_new_client: bool,
    pub converted_by: Uuid,
    pub converted_at: DateTime<Utc>,
    pub history_transferred: bool,
}

// ============ Pipeline Projections ============

/// Read-only view of an existing client offered as a possible duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: Uuid,
    pub client_type: ClientType,
    pub legal_name: String,
    pub trade_name: Option<String>,
    pub document_id: String,
    pub email: String,
    pub phone: String,
}

impl From<&Client> for ClientSummary {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id,
            client_type: client.client_type,
            legal_name: client.legal_name.clone(),
            trade_name: client.trade_name.clone(),
            document_id: client.document_id.clone(),
            email: client.email.clone(),
            phone: client.phone.clone(),
        }
    }
}

/// An existing client judged possibly identical to the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub client: ClientSummary,
    /// 0 to 100.
    pub match_score: u8,
    /// Reasons joined with `", "`.
    pub match_reason: String,
}

/// Outcome of a completed conversion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub success: bool,
    pub lead_id: Uuid,
    pub client_id: Uuid,
    pub opportunity_id: Uuid,
    pub is_new_client: bool,
    pub history_transferred: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
