use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::decision::normalize_phone;
use crate::errors::ConversionError;
use crate::models::{collections, Client, ClientSummary, DuplicateCandidate, Lead};
use crate::similarity::similarity;
use crate::store::{query_typed, DocumentStore, Filter};

/// Points awarded for an exact email or phone match.
const EXACT_MATCH_POINTS: u8 = 50;
/// Name similarity above this percentage counts as a match.
const NAME_SIMILARITY_THRESHOLD: u8 = 80;
/// Minimum score of a candidate whose name is similar.
const NAME_MATCH_FLOOR: u8 = 70;

/// Contact data to look for among the tenant's existing clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateSearch {
    pub tenant_id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
}

impl DuplicateSearch {
    pub fn from_lead(lead: &Lead) -> Self {
        Self {
            tenant_id: lead.tenant_id,
            email: lead.email.clone(),
            phone: lead.phone.clone(),
            full_name: lead.full_name.clone(),
            entity_name: lead.entity_name.clone(),
        }
    }

    fn email_key(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }

    fn phone_key(&self) -> Option<String> {
        self.phone
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty())
    }

    /// Stored values that count as an exact match: the value as typed and its
    /// normalised form, since clients created elsewhere keep their own format.
    fn lookup_values(raw: Option<&str>, key: Option<&str>) -> Vec<String> {
        let mut values: Vec<String> = Vec::new();
        for value in [raw.map(str::trim), key].into_iter().flatten() {
            if !value.is_empty() && !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        }
        values
    }

    fn names(&self) -> Vec<&str> {
        [self.full_name.as_deref(), self.entity_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|n| !n.trim().is_empty())
            .collect()
    }
}

/// Finds existing clients that probably are the lead's underlying entity.
pub struct DuplicateDetectionEngine {
    store: Arc<dyn DocumentStore>,
}

impl DuplicateDetectionEngine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Ranked candidates, best match first.
    ///
    /// An empty list means the search ran and found nothing; a failed lookup
    /// is reported as `ConversionError::DuplicateSearch` instead.
    pub async fn find_duplicates(
        &self,
        search: &DuplicateSearch,
    ) -> Result<Vec<DuplicateCandidate>, ConversionError> {
        let email = search.email_key();
        let phone = search.phone_key();

        let mut contact_filters = Vec::new();
        for value in DuplicateSearch::lookup_values(search.email.as_deref(), email.as_deref()) {
            contact_filters.push(Filter::eq("email", value));
        }
        for value in DuplicateSearch::lookup_values(search.phone.as_deref(), phone.as_deref()) {
            contact_filters.push(Filter::eq("phone", value));
        }
        if contact_filters.is_empty() {
            tracing::debug!("Duplicate search skipped: no email or phone supplied");
            return Ok(Vec::new());
        }

        let filter = Filter::And(vec![
            Filter::eq("tenant_id", search.tenant_id.to_string()),
            Filter::Or(contact_filters),
        ]);

        let clients: Vec<Client> = query_typed(self.store.as_ref(), collections::CLIENTS, &filter)
            .await
            .map_err(|e| {
                tracing::error!("Duplicate lookup failed: {}", e);
                ConversionError::DuplicateSearch(e.to_string())
            })?;

        let names = search.names();
        let mut candidates: Vec<DuplicateCandidate> = clients
            .iter()
            .map(|client| score_candidate(client, email.as_deref(), phone.as_deref(), &names))
            .collect();

        candidates.sort_by(|a, b| b.match_score.cmp(&a.match_score));

        tracing::info!(
            "Duplicate search found {} candidate(s) for tenant {}",
            candidates.len(),
            search.tenant_id
        );
        Ok(candidates)
    }
}

fn score_candidate(
    client: &Client,
    email: Option<&str>,
    phone: Option<&str>,
    names: &[&str],
) -> DuplicateCandidate {
    let mut score: u8 = 0;
    let mut reasons = Vec::new();

    if email.is_some_and(|e| client.email.trim().eq_ignore_ascii_case(e)) {
        score += EXACT_MATCH_POINTS;
        reasons.push("Email matches exactly".to_string());
    }
    if phone.is_some_and(|p| normalize_phone(&client.phone) == p) {
        score += EXACT_MATCH_POINTS;
        reasons.push("Phone matches exactly".to_string());
    }

    let stored_names = [Some(client.legal_name.as_str()), client.trade_name.as_deref()];
    let best_name = names
        .iter()
        .flat_map(|name| {
            stored_names
                .iter()
                .flatten()
                .map(move |stored| similarity(name, stored))
        })
        .max();

    if let Some(name_score) = best_name.filter(|s| *s > NAME_SIMILARITY_THRESHOLD) {
        score = score.max(NAME_MATCH_FLOOR);
        reasons.push(format!("Name similar ({}%)", name_score));
    }

    DuplicateCandidate {
        client: ClientSummary::from(client),
        match_score: score.min(100),
        match_reason: reasons.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, ClientType};
    use chrono::Utc;

    fn client(email: &str, phone: &str, name: &str) -> Client {
        Client {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            client_type: ClientType::Person,
            legal_name: name.into(),
            trade_name: None,
            document_id: "12345678901".into(),
            email: email.into(),
            phone: phone.into(),
            address: Address::default(),
            tags: vec![],
            owner_id: Uuid::new_v4(),
            source: "manual".into(),
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lookup_values_keep_typed_and_normalised_forms() {
        let search = DuplicateSearch {
            email: Some(" Contato@Acme.com.br ".into()),
            phone: Some("(11) 3333-4444".into()),
            ..DuplicateSearch::default()
        };
        assert_eq!(
            DuplicateSearch::lookup_values(search.email.as_deref(), search.email_key().as_deref()),
            vec!["Contato@Acme.com.br", "contato@acme.com.br"]
        );
        assert_eq!(
            DuplicateSearch::lookup_values(search.phone.as_deref(), search.phone_key().as_deref()),
            vec!["(11) 3333-4444", "1133334444"]
        );
        assert_eq!(
            DuplicateSearch::lookup_values(Some("a@x.com"), Some("a@x.com")),
            vec!["a@x.com"]
        );
    }

    #[test]
    fn formatted_stored_contact_still_scores() {
        let c = client("Contato@Acme.com.br", "(11) 3333-4444", "Acme");
        let candidate = score_candidate(&c, Some("contato@acme.com.br"), Some("1133334444"), &[]);
        assert_eq!(candidate.match_score, 100);
    }

    #[test]
    fn email_and_phone_each_score_fifty() {
        let c = client("a@x.com", "5551234", "Someone Else");

        let both = score_candidate(&c, Some("a@x.com"), Some("5551234"), &[]);
        assert_eq!(both.match_score, 100);
        assert_eq!(both.match_reason, "Email matches exactly, Phone matches exactly");

        let email_only = score_candidate(&c, Some("a@x.com"), None, &[]);
        assert_eq!(email_only.match_score, 50);
    }

    #[test]
    fn similar_name_lifts_score_to_floor() {
        let c = client("a@x.com", "0000000", "Maria Lima");
        let candidate = score_candidate(&c, Some("a@x.com"), None, &["Maria Lma"]);
        assert_eq!(candidate.match_score, 70);
        assert!(candidate.match_reason.contains("Name similar (90%)"));
    }

    #[test]
    fn name_at_threshold_does_not_count() {
        // 4 of 5 characters equal: exactly 80%.
        let c = client("a@x.com", "0000000", "abcde");
        let candidate = score_candidate(&c, Some("a@x.com"), None, &["abcdx"]);
        assert_eq!(candidate.match_score, 50);
        assert!(!candidate.match_reason.contains("Name"));
    }

    #[test]
    fn name_never_lowers_an_exact_match_score() {
        let c = client("a@x.com", "5551234", "Maria Lima");
        let candidate = score_candidate(&c, Some("a@x.com"), Some("5551234"), &["Maria Lima"]);
        assert_eq!(candidate.match_score, 100);
        assert!(candidate.match_reason.ends_with("Name similar (100%)"));
    }
}
