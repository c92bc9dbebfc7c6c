use std::sync::Arc;

use chrono::Utc;
use medmcp_bus::{EventBus, Subscription, SubscriptionId, Topic};
use medmcp_provider::{AiClient, AiCompletion, AiError, LlmMessage, ProviderStatus};
use medmcp_schema::{
    BusMessage, PatientContext, ProviderTag, Recommendation, Session, SessionId, SessionSummary,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::{McpConfig, OrchestratorConfig};
use crate::enhancement;
use crate::error::{McpError, McpResult};
use crate::fallback::{self, DegradeCause, CANNED_CONFIDENCE};
use crate::operation::Operation;
use crate::parser::{self, ParseOutcome, MANUAL_REVIEW_NOTE};
use crate::prompts;
use crate::session_lock::SessionLockManager;
use crate::store::SessionStore;

/// Result of an AI-backed operation. AI trouble never turns into an error
/// here; it shows up as `success == false` and a capped confidence.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub recommendation: Recommendation,
    pub session_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub provider: ProviderStatus,
    pub model: String,
    pub default_provider: ProviderTag,
    pub sessions: usize,
    pub active_sessions: usize,
}

enum CallOutcome {
    Completed(AiCompletion),
    TimedOut,
    Failed(AiError),
}

struct Resolved {
    content: Value,
    confidence: f64,
    degraded: Option<DegradeCause>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    ai: Arc<AiClient>,
    store: SessionStore,
    bus: Arc<EventBus>,
    locks: SessionLockManager,
}

impl Orchestrator {
    pub fn new(config: &McpConfig, ai: Arc<AiClient>, bus: Arc<EventBus>) -> Self {
        Self {
            config: config.orchestrator.clone(),
            ai,
            store: SessionStore::new(&config.sessions),
            bus,
            locks: SessionLockManager::with_global_limit(config.orchestrator.max_concurrent_calls),
        }
    }

    /// Wires a provider client and a fresh bus from configuration.
    pub fn from_config(config: &McpConfig) -> Self {
        let ai = Arc::new(AiClient::from_config(&config.provider));
        let bus = Arc::new(EventBus::new(config.orchestrator.event_capacity));
        Self::new(config, ai, bus)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn default_provider(&self) -> ProviderTag {
        self.config.default_provider
    }

    pub async fn create_session(
        &self,
        patient: PatientContext,
        provider: ProviderTag,
    ) -> McpResult<SessionId> {
        let mut session = Session::new(patient, provider);
        let id = session.id;
        let _guard = self.locks.acquire(id).await;

        let messages = prompts::initial_assessment(&session.patient);
        // Timeouts and a missing provider degrade; any other failure aborts.
        let call = match self.call_with_timeout(provider, messages).await {
            CallOutcome::Failed(err) if !matches!(err, AiError::Disconnected) => {
                tracing::warn!(session_id = %id, error = %err, "session creation failed");
                self.locks.forget(id).await;
                return Err(McpError::CreateSession(err));
            }
            other => other,
        };

        let resolved = self.resolve(Operation::CreateSession, call);
        let degraded = resolved.degraded.clone();
        let recommendation =
            self.build_recommendation(Operation::CreateSession, provider, resolved, Vec::new());
        session.push_recommendation(recommendation);

        let patient_name = session.patient.name.clone();
        let evicted = self.store.insert(session).await;
        for old in evicted {
            self.locks.forget(old).await;
        }

        tracing::info!(session_id = %id, provider = provider.as_str(), "session created");
        self.publish(BusMessage::SessionCreated {
            session_id: id,
            patient_name,
            provider,
            at: Utc::now(),
        })
        .await;
        if let Some(cause) = degraded {
            self.publish_degraded(id, Operation::CreateSession, &cause).await;
        }
        Ok(id)
    }

    pub async fn add_symptoms(
        &self,
        id: SessionId,
        symptoms: Vec<String>,
    ) -> McpResult<OperationOutcome> {
        let symptoms = clean_list(symptoms);
        if symptoms.is_empty() {
            return Err(McpError::InvalidInput("at least one symptom is required".into()));
        }

        let _guard = self.locks.acquire(id).await;
        let snapshot = self
            .mutate_active(id, |s| {
                s.symptoms.extend(symptoms);
                s.clone()
            })
            .await?;

        let messages = prompts::symptom_analysis(&snapshot);
        self.run(&snapshot, Operation::AddSymptoms, messages, |_| Vec::new())
            .await
    }

    pub async fn set_diagnosis(
        &self,
        id: SessionId,
        diagnosis: impl Into<String>,
    ) -> McpResult<OperationOutcome> {
        let diagnosis = diagnosis.into().trim().to_string();
        if diagnosis.is_empty() {
            return Err(McpError::InvalidInput("diagnosis must not be empty".into()));
        }

        let _guard = self.locks.acquire(id).await;
        let snapshot = self
            .mutate_active(id, |s| {
                s.diagnosis = Some(diagnosis.clone());
                s.clone()
            })
            .await?;

        let messages = prompts::diagnosis_validation(&snapshot, &diagnosis);
        self.run(&snapshot, Operation::SetDiagnosis, messages, |_| Vec::new())
            .await
    }

    pub async fn generate_prescription(&self, id: SessionId) -> McpResult<OperationOutcome> {
        let _guard = self.locks.acquire(id).await;
        let snapshot = self.mutate_active(id, |s| s.clone()).await?;
        if !snapshot.has_diagnosis() {
            return Err(McpError::MissingDiagnosis);
        }

        let messages = prompts::prescription(&snapshot);
        let patient = snapshot.patient.clone();
        self.run(&snapshot, Operation::GeneratePrescription, messages, |content| {
            enhancement::enhance_prescription(content, &patient)
        })
        .await
    }

    pub async fn check_drug_interactions(
        &self,
        id: SessionId,
        medications: Vec<String>,
    ) -> McpResult<OperationOutcome> {
        let medications = clean_list(medications);
        if medications.is_empty() {
            return Err(McpError::InvalidInput("at least one medication is required".into()));
        }

        let _guard = self.locks.acquire(id).await;
        let snapshot = self.mutate_active(id, |s| s.clone()).await?;

        let messages = prompts::drug_interactions(&snapshot, &medications);
        let mut checked = medications.clone();
        checked.extend(snapshot.patient.current_medications.iter().cloned());
        self.run(&snapshot, Operation::CheckInteractions, messages, |content| {
            let known = enhancement::pairwise_interactions(&checked);
            if let Some(obj) = content.as_object_mut() {
                obj.insert("known_interactions".into(), json!(known));
            }
            known
        })
        .await
    }

    pub async fn clinical_guidelines(
        &self,
        id: SessionId,
        condition: impl Into<String>,
    ) -> McpResult<OperationOutcome> {
        let condition = condition.into().trim().to_string();
        if condition.is_empty() {
            return Err(McpError::InvalidInput("condition must not be empty".into()));
        }

        let _guard = self.locks.acquire(id).await;
        let snapshot = self.mutate_active(id, |s| s.clone()).await?;

        let messages = prompts::clinical_guidelines(&snapshot, &condition);
        self.run(&snapshot, Operation::ClinicalGuidelines, messages, |_| Vec::new())
            .await
    }

    /// Freezes the session. The record stays readable until evicted.
    pub async fn close_session(&self, id: SessionId) -> McpResult<SessionSummary> {
        let _guard = self.locks.acquire(id).await;
        let summary = self
            .mutate_active(id, |s| {
                s.is_active = false;
                s.closed_at = Some(Utc::now());
                s.summary()
            })
            .await?;

        tracing::info!(
            session_id = %id,
            duration_seconds = summary.duration_seconds,
            recommendations = summary.recommendation_count,
            confidence = summary.confidence,
            "session closed"
        );
        self.publish(BusMessage::SessionClosed {
            summary: summary.clone(),
        })
        .await;
        Ok(summary)
    }

    pub async fn get_session(&self, id: SessionId) -> Option<Session> {
        self.store.get(id).await
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.store.list().await
    }

    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        self.bus.subscribe(topic).await
    }

    pub async fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(topic, id).await
    }

    /// Also sweeps idle-expired sessions and their locks.
    pub async fn status(&self) -> OrchestratorStatus {
        for id in self.store.purge_expired().await {
            self.locks.forget(id).await;
        }
        let sessions = self.store.list().await;
        OrchestratorStatus {
            provider: self.ai.status(),
            model: self.ai.model().to_string(),
            default_provider: self.config.default_provider,
            active_sessions: sessions.iter().filter(|s| s.is_active).count(),
            sessions: sessions.len(),
        }
    }

    /// Applies `f` to an active session and returns its result.
    async fn mutate_active<F, R>(&self, id: SessionId, f: F) -> McpResult<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let result = self
            .store
            .update(id, |s| {
                if s.is_active {
                    Ok(f(s))
                } else {
                    Err(McpError::SessionClosed(id))
                }
            })
            .await;
        match result {
            Some(inner) => inner,
            None => {
                self.locks.forget(id).await;
                Err(McpError::SessionNotFound(id))
            }
        }
    }

    /// Call, parse, record and announce one AI-backed step. `post` may
    /// annotate the content and returns extra warnings.
    async fn run<F>(
        &self,
        snapshot: &Session,
        operation: Operation,
        messages: Vec<LlmMessage>,
        post: F,
    ) -> McpResult<OperationOutcome>
    where
        F: FnOnce(&mut Value) -> Vec<String>,
    {
        let id = snapshot.id;
        let call = self.call_with_timeout(snapshot.provider, messages).await;
        let mut resolved = self.resolve(operation, call);
        let extra_warnings = post(&mut resolved.content);
        let degraded = resolved.degraded.clone();

        let recommendation =
            self.build_recommendation(operation, snapshot.provider, resolved, extra_warnings);
        let stored = recommendation.clone();
        let session_confidence = self
            .mutate_active(id, move |s| {
                s.push_recommendation(stored);
                s.confidence
            })
            .await?;

        if let Some(cause) = &degraded {
            self.publish_degraded(id, operation, cause).await;
        }
        if let Some(msg) = operation.event(id, recommendation.clone()) {
            self.publish(msg).await;
        }

        Ok(OperationOutcome {
            success: degraded.is_none(),
            recommendation,
            session_confidence,
        })
    }

    /// Spawns the call and races it against the configured timeout. Waiting
    /// for a call slot counts against the timeout. A call that loses the race
    /// keeps running and keeps its slot until it finishes; its result is
    /// dropped.
    async fn call_with_timeout(
        &self,
        provider: ProviderTag,
        messages: Vec<LlmMessage>,
    ) -> CallOutcome {
        if !self.ai.is_connected() {
            return CallOutcome::Failed(AiError::Disconnected);
        }

        tracing::debug!(
            provider = provider.as_str(),
            messages = messages.len(),
            "dispatching AI call"
        );
        let ai = Arc::clone(&self.ai);
        let locks = self.locks.clone();
        let call = async move {
            let slot = locks.acquire_call_slot().await;
            tokio::spawn(async move {
                let _slot = slot;
                ai.complete(provider, messages).await
            })
            .await
        };

        match tokio::time::timeout(self.config.ai_timeout(), call).await {
            Ok(Ok(Ok(completion))) => CallOutcome::Completed(completion),
            Ok(Ok(Err(err))) => CallOutcome::Failed(err),
            Ok(Err(join_err)) => CallOutcome::Failed(AiError::CallFailed(join_err.to_string())),
            Err(_) => CallOutcome::TimedOut,
        }
    }

    fn resolve(&self, operation: Operation, call: CallOutcome) -> Resolved {
        let cause = match call {
            CallOutcome::Completed(completion) => {
                tracing::debug!(
                    operation = operation.as_str(),
                    token_estimate = completion.token_estimate,
                    "AI reply received"
                );
                return match parser::parse_response(&completion.text, operation.expected_key()) {
                    ParseOutcome::Parsed { value, .. } => Resolved {
                        confidence: parser::normalize_confidence(
                            value.get("confidence"),
                            operation.default_confidence(),
                        ),
                        content: value,
                        degraded: None,
                    },
                    ParseOutcome::Fallback { value, reason } => Resolved {
                        confidence: parser::normalize_confidence(
                            value.get("confidence"),
                            parser::FALLBACK_CONFIDENCE,
                        ),
                        content: value,
                        degraded: Some(DegradeCause::Unparsed(reason.as_str())),
                    },
                };
            }
            CallOutcome::TimedOut => DegradeCause::Timeout,
            CallOutcome::Failed(AiError::Disconnected) => DegradeCause::Disconnected,
            CallOutcome::Failed(err) => DegradeCause::CallFailed(err.to_string()),
        };

        Resolved {
            content: fallback::canned_payload(operation, &cause),
            confidence: CANNED_CONFIDENCE,
            degraded: Some(cause),
        }
    }

    fn build_recommendation(
        &self,
        operation: Operation,
        provider: ProviderTag,
        resolved: Resolved,
        extra_warnings: Vec<String>,
    ) -> Recommendation {
        let Resolved {
            content,
            confidence,
            degraded,
        } = resolved;

        let mut warnings = parser::string_list(&content, "warnings");
        warnings.extend(extra_warnings);

        let confidence = if degraded.is_some() {
            if !warnings.iter().any(|w| w == MANUAL_REVIEW_NOTE) {
                warnings.push(MANUAL_REVIEW_NOTE.to_string());
            }
            confidence.min(self.config.low_confidence_threshold)
        } else {
            confidence
        };

        Recommendation {
            id: Uuid::new_v4(),
            kind: operation.kind(),
            reasoning: parser::string_field(&content, "reasoning"),
            content,
            confidence,
            timestamp: Utc::now(),
            provider,
            warnings,
            degraded: degraded.is_some(),
        }
    }

    async fn publish_degraded(&self, id: SessionId, operation: Operation, cause: &DegradeCause) {
        tracing::warn!(
            session_id = %id,
            operation = operation.as_str(),
            reason = %cause.reason(),
            "AI degraded to fallback"
        );
        self.publish(BusMessage::AiDegraded {
            session_id: id,
            operation: operation.as_str().to_string(),
            reason: cause.reason(),
        })
        .await;
    }

    async fn publish(&self, msg: BusMessage) {
        if let Err(err) = self.bus.publish(msg).await {
            tracing::warn!(error = %err, "failed to publish session event");
        }
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
