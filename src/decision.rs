//! Validated data shapes captured by each wizard step.
//!
//! Drafts are plain serde structs; `validate` reports every field problem at
//! once so the step form can show them inline, and `normalized` returns the
//! cleaned-up copy that is actually persisted.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::errors::ValidationErrors;
use crate::models::{
    Address, ClientType, Lead, OpportunityStage, OpportunityStatus, Priority,
};

const MAX_NAME_LEN: usize = 200;
const MAX_TAG_LEN: usize = 40;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("currency regex is valid"));

/// Check an email address against a simplified RFC 5322 pattern.
pub fn is_valid_email(email: &str) -> bool {
    email.len() >= 5 && EMAIL_RE.is_match(email)
}

/// Strip formatting characters from a phone number, keeping a leading `+`.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if trimmed.starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}

/// Whether a phone number has a plausible digit count and no stray characters.
pub fn is_valid_phone(raw: &str) -> bool {
    let allowed = raw
        .chars()
        .all(|c| c.is_ascii_digit() || " +-().".contains(c));
    let digits = raw.chars().filter(|c| c.is_ascii_digit()).count();
    allowed && (7..=15).contains(&digits)
}

fn trimmed_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// What to do with the lead's underlying entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ConversionDecision {
    /// Create a brand-new client from a [`ClientDraft`].
    CreateNew,
    /// Attach the opportunity to a client that already exists.
    LinkExisting { existing_client_id: Uuid },
}

impl ConversionDecision {
    pub fn requires_client_draft(&self) -> bool {
        matches!(self, ConversionDecision::CreateNew)
    }

    pub fn existing_client_id(&self) -> Option<Uuid> {
        match self {
            ConversionDecision::CreateNew => None,
            ConversionDecision::LinkExisting { existing_client_id } => Some(*existing_client_id),
        }
    }
}

/// Fields required to create a new client (and its primary contact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDraft {
    pub client_type: ClientType,
    pub legal_name: String,
    #[serde(default)]
    pub trade_name: Option<String>,
    pub document_id: String,
    pub email: String,
    pub phone: String,
    pub address: Address,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Name of the primary contact; defaults to the legal name.
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_role: Option<String>,
}

impl ClientDraft {
    /// Seed the client form from what the lead already knows.
    pub fn from_lead(lead: &Lead) -> Self {
        let client_type = if lead.entity_name.is_some() {
            ClientType::Company
        } else {
            ClientType::Person
        };
        let legal_name = lead
            .entity_name
            .clone()
            .or_else(|| lead.full_name.clone())
            .unwrap_or_default();

        Self {
            client_type,
            legal_name,
            trade_name: None,
            document_id: String::new(),
            email: lead.email.clone().unwrap_or_default(),
            phone: lead.phone.clone().unwrap_or_default(),
            address: Address::default(),
            tags: Vec::new(),
            contact_name: lead.full_name.clone(),
            contact_role: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let legal_name = self.legal_name.trim();
        if legal_name.is_empty() {
            errors.push("legal_name", "is required");
        } else if legal_name.chars().count() > MAX_NAME_LEN {
            errors.push("legal_name", "must be at most 200 characters");
        }

        let document: String = self
            .document_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if self.document_id.trim().is_empty() {
            errors.push("document_id", "is required");
        } else if !(5..=20).contains(&document.len()) {
            errors.push("document_id", "must contain 5 to 20 letters or digits");
        }

        if !is_valid_email(self.email.trim()) {
            errors.push("email", "is not a valid email address");
        }
        if !is_valid_phone(&self.phone) {
            errors.push("phone", "must contain 7 to 15 digits");
        }

        if self.address.street.trim().is_empty() {
            errors.push("address.street", "is required");
        }
        if self.address.city.trim().is_empty() {
            errors.push("address.city", "is required");
        }
        if self.address.country.trim().is_empty() {
            errors.push("address.country", "is required");
        }

        for (idx, tag) in self.tags.iter().enumerate() {
            let tag = tag.trim();
            if tag.is_empty() {
                errors.push(format!("tags[{}]", idx), "must not be empty");
            } else if tag.chars().count() > MAX_TAG_LEN {
                errors.push(format!("tags[{}]", idx), "must be at most 40 characters");
            }
        }

        if let Some(name) = &self.contact_name {
            if name.trim().chars().count() > MAX_NAME_LEN {
                errors.push("contact_name", "must be at most 200 characters");
            }
        }

        errors.into_result()
    }

    /// Trimmed copy with a lower-cased email, normalized phone and unique tags.
    pub fn normalized(&self) -> Self {
        let mut seen = HashSet::new();
        let tags = self
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .collect();

        Self {
            client_type: self.client_type,
            legal_name: self.legal_name.trim().to_string(),
            trade_name: trimmed_opt(&self.trade_name),
            document_id: self.document_id.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            phone: normalize_phone(&self.phone),
            address: Address {
                street: self.address.street.trim().to_string(),
                number: trimmed_opt(&self.address.number),
                complement: trimmed_opt(&self.address.complement),
                city: self.address.city.trim().to_string(),
                state: trimmed_opt(&self.address.state),
                postal_code: trimmed_opt(&self.address.postal_code),
                country: self.address.country.trim().to_string(),
            },
            tags,
            contact_name: trimmed_opt(&self.contact_name),
            contact_role: trimmed_opt(&self.contact_role),
        }
    }

    /// Name used for the primary contact.
    pub fn primary_contact_name(&self) -> String {
        trimmed_opt(&self.contact_name).unwrap_or_else(|| self.legal_name.trim().to_string())
    }
}

/// Fields required to open the opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityDraft {
    pub name: String,
    /// Placeholder; the coordinator always sets the resolved client id.
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub estimated_value: BigDecimal,
    pub currency: String,
    pub stage: OpportunityStage,
    pub status: OpportunityStatus,
    pub probability: u8,
    pub priority: Priority,
    #[serde(default)]
    pub expected_close_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl OpportunityDraft {
    pub fn from_lead(lead: &Lead, currency: &str) -> Self {
        let name = match lead.display_name() {
            Some(name) => format!("{} - New business", name.trim()),
            None => "New business".to_string(),
        };

        Self {
            name,
            client_id: None,
            estimated_value: BigDecimal::from(0),
            currency: currency.to_string(),
            stage: OpportunityStage::Prospecting,
            status: OpportunityStatus::Open,
            probability: 10,
            priority: Priority::Medium,
            expected_close_date: None,
            notes: lead.notes.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = self.name.trim();
        if name.is_empty() {
            errors.push("name", "is required");
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push("name", "must be at most 200 characters");
        }

        if self.estimated_value < BigDecimal::from(0) {
            errors.push("estimated_value", "must not be negative");
        }
        if !CURRENCY_RE.is_match(self.currency.trim()) {
            errors.push("currency", "must be a 3-letter ISO 4217 code");
        }
        if self.status != OpportunityStatus::Open {
            errors.push("status", "a new opportunity must be open");
        }
        if self.stage.is_closed() {
            errors.push("stage", "a new opportunity cannot start closed");
        }
        if self.probability > 100 {
            errors.push("probability", "must be between 0 and 100");
        }

        errors.into_result()
    }

    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            currency: self.currency.trim().to_string(),
            notes: trimmed_opt(&self.notes),
            ..self.clone()
        }
    }
}
