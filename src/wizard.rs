//! Step-by-step conversion wizard.
//!
//! One [`ConversionWizard`] value holds the current step, the busy flag and
//! every captured draft, so navigation, busy-guarding and reset all go through
//! the same methods.
//!
//! Steps run in a fixed order:
//!
//! ```text
//! DuplicateCheck -> ClientCreation -> OpportunityCreation -> Summary
//!        \________ link-existing ________/
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::conversion::{ConversionCoordinator, ConversionInput};
use crate::decision::{ClientDraft, ConversionDecision, OpportunityDraft};
use crate::duplicates::{DuplicateDetectionEngine, DuplicateSearch};
use crate::errors::{ConversionError, ValidationErrors};
use crate::models::{Actor, ConversionResult, DuplicateCandidate, Lead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    DuplicateCheck,
    ClientCreation,
    OpportunityCreation,
    Summary,
}

impl WizardStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateCheck => "duplicate_check",
            Self::ClientCreation => "client_creation",
            Self::OpportunityCreation => "opportunity_creation",
            Self::Summary => "summary",
        }
    }
}

/// What the summary step currently shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SummaryOutcome {
    PendingConfirmation,
    Succeeded { result: ConversionResult },
    /// `retryable` is true when the same inputs may be submitted again.
    Failed { message: String, retryable: bool },
}

/// Result of the duplicate lookup. `Unknown` is not the same as "none found".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DuplicateCheckState {
    NotRun,
    Found { candidates: Vec<DuplicateCandidate> },
    Unknown { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardError {
    /// The submitted draft failed validation; the step does not advance.
    Validation(ValidationErrors),
    InvalidTransition {
        from: WizardStep,
        action: &'static str,
    },
    /// A conversion is in flight for this wizard.
    Busy,
    MissingDecision,
    MissingClientDraft,
    MissingOpportunityDraft,
    /// The wizard can only be reset.
    Closed(String),
}

impl fmt::Display for WizardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WizardError::Validation(e) => write!(f, "Validation failed: {}", e),
            WizardError::InvalidTransition { from, action } => {
                write!(f, "Cannot {} from step {}", action, from.as_str())
            }
            WizardError::Busy => write!(f, "A conversion is already running for this wizard"),
            WizardError::MissingDecision => write!(f, "Choose create-new or link-existing first"),
            WizardError::MissingClientDraft => write!(f, "Client details are required"),
            WizardError::MissingOpportunityDraft => write!(f, "Opportunity details are required"),
            WizardError::Closed(msg) => write!(f, "Wizard is closed: {}", msg),
        }
    }
}

impl std::error::Error for WizardError {}

impl From<ValidationErrors> for WizardError {
    fn from(err: ValidationErrors) -> Self {
        WizardError::Validation(err)
    }
}

/// Serializable view of a wizard for the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardSnapshot {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub step: WizardStep,
    pub busy: bool,
    pub duplicates: DuplicateCheckState,
    pub decision: Option<ConversionDecision>,
    pub client_draft: Option<ClientDraft>,
    pub opportunity_draft: Option<OpportunityDraft>,
    /// Form defaults derived from the lead.
    pub client_prefill: ClientDraft,
    pub opportunity_prefill: OpportunityDraft,
    pub outcome: Option<SummaryOutcome>,
    pub closed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversionWizard {
    id: Uuid,
    lead: Lead,
    step: WizardStep,
    busy: bool,
    duplicates: DuplicateCheckState,
    decision: Option<ConversionDecision>,
    client_draft: Option<ClientDraft>,
    opportunity_draft: Option<OpportunityDraft>,
    client_prefill: ClientDraft,
    opportunity_prefill: OpportunityDraft,
    outcome: Option<SummaryOutcome>,
    closed: Option<String>,
}

impl ConversionWizard {
    pub fn new(lead: Lead, default_currency: &str) -> Self {
        let client_prefill = ClientDraft::from_lead(&lead);
        let opportunity_prefill = OpportunityDraft::from_lead(&lead, default_currency);
        Self {
            id: Uuid::new_v4(),
            lead,
            step: WizardStep::DuplicateCheck,
            busy: false,
            duplicates: DuplicateCheckState::NotRun,
            decision: None,
            client_draft: None,
            opportunity_draft: None,
            client_prefill,
            opportunity_prefill,
            outcome: None,
            closed: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lead_id(&self) -> Uuid {
        self.lead.id
    }

    pub fn tenant_id(&self) -> Uuid {
        self.lead.tenant_id
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn decision(&self) -> Option<ConversionDecision> {
        self.decision
    }

    pub fn duplicates(&self) -> &DuplicateCheckState {
        &self.duplicates
    }

    pub fn outcome(&self) -> Option<&SummaryOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    fn ensure_open(&self) -> Result<(), WizardError> {
        if self.busy {
            return Err(WizardError::Busy);
        }
        if let Some(reason) = &self.closed {
            return Err(WizardError::Closed(reason.clone()));
        }
        Ok(())
    }

    fn ensure_step(&self, expected: WizardStep, action: &'static str) -> Result<(), WizardError> {
        if self.step != expected {
            return Err(WizardError::InvalidTransition {
                from: self.step,
                action,
            });
        }
        Ok(())
    }

    /// Search for existing clients matching the lead.
    pub async fn run_duplicate_check(
        &mut self,
        engine: &DuplicateDetectionEngine,
    ) -> Result<&DuplicateCheckState, WizardError> {
        self.ensure_open()?;
        self.ensure_step(WizardStep::DuplicateCheck, "search for duplicates")?;

        let result = engine
            .find_duplicates(&DuplicateSearch::from_lead(&self.lead))
            .await;
        self.record_duplicates(result);
        Ok(&self.duplicates)
    }

    /// Store a duplicate search outcome. A failed search leaves duplicates
    /// unknown and still lets the operator choose create-new.
    pub fn record_duplicates(&mut self, result: Result<Vec<DuplicateCandidate>, ConversionError>) {
        self.duplicates = match result {
            Ok(candidates) => DuplicateCheckState::Found { candidates },
            Err(e) => {
                tracing::warn!("Duplicates unknown for lead {}: {}", self.lead.id, e);
                DuplicateCheckState::Unknown {
                    message: e.to_string(),
                }
            }
        };
    }

    /// Record the operator's decision and advance.
    ///
    /// Link-existing goes straight to opportunity creation.
    pub fn choose(&mut self, decision: ConversionDecision) -> Result<WizardStep, WizardError> {
        self.ensure_open()?;
        self.ensure_step(WizardStep::DuplicateCheck, "choose a decision")?;

        self.decision = Some(decision);
        self.step = match decision {
            ConversionDecision::CreateNew => WizardStep::ClientCreation,
            ConversionDecision::LinkExisting { .. } => WizardStep::OpportunityCreation,
        };
        tracing::debug!("Wizard {} decision {:?} -> {:?}", self.id, decision, self.step);
        Ok(self.step)
    }

    pub fn submit_client_draft(&mut self, draft: ClientDraft) -> Result<WizardStep, WizardError> {
        self.ensure_open()?;
        self.ensure_step(WizardStep::ClientCreation, "submit client details")?;

        draft.validate()?;
        self.client_draft = Some(draft);
        self.step = WizardStep::OpportunityCreation;
        Ok(self.step)
    }

    pub fn submit_opportunity_draft(
        &mut self,
        draft: OpportunityDraft,
    ) -> Result<WizardStep, WizardError> {
        self.ensure_open()?;
        self.ensure_step(WizardStep::OpportunityCreation, "submit opportunity details")?;

        draft.validate()?;
        self.opportunity_draft = Some(draft);
        self.enter_summary();
        Ok(self.step)
    }

    /// Advance using data already captured for the current step.
    pub fn next(&mut self) -> Result<WizardStep, WizardError> {
        self.ensure_open()?;
        match self.step {
            WizardStep::DuplicateCheck => {
                let decision = self.decision.ok_or(WizardError::MissingDecision)?;
                self.choose(decision)
            }
            WizardStep::ClientCreation => {
                let draft = self
                    .client_draft
                    .clone()
                    .ok_or(WizardError::MissingClientDraft)?;
                self.submit_client_draft(draft)
            }
            WizardStep::OpportunityCreation => {
                let draft = self
                    .opportunity_draft
                    .clone()
                    .ok_or(WizardError::MissingOpportunityDraft)?;
                self.submit_opportunity_draft(draft)
            }
            WizardStep::Summary => Err(WizardError::InvalidTransition {
                from: WizardStep::Summary,
                action: "advance",
            }),
        }
    }

    /// Step back. Captured drafts are kept.
    pub fn previous(&mut self) -> Result<WizardStep, WizardError> {
        self.ensure_open()?;
        self.step = match self.step {
            WizardStep::DuplicateCheck => {
                return Err(WizardError::InvalidTransition {
                    from: WizardStep::DuplicateCheck,
                    action: "go back",
                })
            }
            WizardStep::ClientCreation => WizardStep::DuplicateCheck,
            WizardStep::OpportunityCreation => match self.decision {
                Some(ConversionDecision::CreateNew) => WizardStep::ClientCreation,
                _ => WizardStep::DuplicateCheck,
            },
            WizardStep::Summary => {
                self.outcome = None;
                WizardStep::OpportunityCreation
            }
        };
        Ok(self.step)
    }

    fn enter_summary(&mut self) {
        self.step = WizardStep::Summary;
        self.outcome = Some(SummaryOutcome::PendingConfirmation);
    }

    /// Check that everything needed is captured and set the busy flag.
    ///
    /// The returned input is handed to the coordinator; the caller must report
    /// back through [`complete_execute`](Self::complete_execute).
    pub fn begin_execute(&mut self) -> Result<ConversionInput, WizardError> {
        self.ensure_open()?;
        self.ensure_step(WizardStep::Summary, "execute")?;

        let decision = self.decision.ok_or(WizardError::MissingDecision)?;
        let client_draft = match decision {
            ConversionDecision::CreateNew => Some(
                self.client_draft
                    .clone()
                    .ok_or(WizardError::MissingClientDraft)?,
            ),
            ConversionDecision::LinkExisting { .. } => None,
        };
        let opportunity_draft = self
            .opportunity_draft
            .clone()
            .ok_or(WizardError::MissingOpportunityDraft)?;

        self.busy = true;
        Ok(ConversionInput {
            lead_id: self.lead.id,
            decision,
            client_draft,
            opportunity_draft,
        })
    }

    /// Store the conversion outcome and clear the busy flag.
    pub fn complete_execute(
        &mut self,
        result: Result<ConversionResult, ConversionError>,
    ) -> &SummaryOutcome {
        self.busy = false;
        let outcome = match result {
            Ok(result) => {
                self.closed = Some("lead converted".to_string());
                SummaryOutcome::Succeeded { result }
            }
            Err(e) => {
                let message = e.to_string();
                if e.closes_wizard() {
                    self.closed = Some(message.clone());
                }
                SummaryOutcome::Failed {
                    message,
                    retryable: e.is_retryable(),
                }
            }
        };
        self.outcome.insert(outcome)
    }

    /// Run the conversion for this wizard. Failed attempts may be retried.
    pub async fn execute(
        &mut self,
        coordinator: &ConversionCoordinator,
        actor: Actor,
    ) -> Result<&SummaryOutcome, WizardError> {
        let input = self.begin_execute()?;
        let result = coordinator.convert_lead(input, actor).await;
        Ok(self.complete_execute(result))
    }

    /// Back to the first step with every decision, draft and result dropped.
    pub fn reset(&mut self) -> Result<(), WizardError> {
        if self.busy {
            return Err(WizardError::Busy);
        }
        self.step = WizardStep::DuplicateCheck;
        self.duplicates = DuplicateCheckState::NotRun;
        self.decision = None;
        self.client_draft = None;
        self.opportunity_draft = None;
        self.outcome = None;
        self.closed = None;
        Ok(())
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        WizardSnapshot {
            id: self.id,
            lead_id: self.lead.id,
            step: self.step,
            busy: self.busy,
            duplicates: self.duplicates.clone(),
            decision: self.decision,
            client_draft: self.client_draft.clone(),
            opportunity_draft: self.opportunity_draft.clone(),
            client_prefill: self.client_prefill.clone(),
            opportunity_prefill: self.opportunity_prefill.clone(),
            outcome: self.outcome.clone(),
            closed: self.closed.clone(),
        }
    }
}
