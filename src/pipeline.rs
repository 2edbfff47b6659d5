use crate::bitrix_types::{
    ActivityFields, ActivityUpdate, Communication, ExternalCallFinish, ExternalCallRegister,
};
use crate::dedup::Admission;
use crate::error::AppError;
use crate::phone::normalize_phone;
use crate::resolver::{resolve, CrmEntity, Resolution};
use crate::types::AppState;
use crate::uniq_types::CallEvent;

use serde::Serialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{info, warn};

/// Terminal status of one call event.  Every inbound event ends in exactly
/// one of these; the webhook response carries the kebab-case tag.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    Ok,
    MissingId,
    Duplicate,
    InvalidPayload,
    UserNotFound,
    UserNotMapped,
    RemoteNotFound,
    RemoteNumberNotFound,
    TelephonyRegisterFailed,
    TelephonyFinishFailed,
    NoContact,
    NoDeal,
    ActivityAddFailed,
    Error,
}

#[derive(Serialize, Debug)]
pub struct PipelineReport {
    pub status: CallOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PipelineReport {
    pub fn status(status: CallOutcome) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    pub fn failed(status: CallOutcome, err: AppError) -> Self {
        Self {
            status,
            detail: Some(err.into_detail()),
        }
    }
}

/// Drive one call event through dedup, agent and number resolution, the
/// two-phase telephony record, CRM entity resolution and the activity write.
/// Each gate returns early with its terminal status; nothing here panics or
/// leaks an error past the report.
pub async fn process_event(event: CallEvent, state: &AppState) -> PipelineReport {
    let call_id = match &event.id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => return PipelineReport::status(CallOutcome::MissingId),
    };

    // Must run before any remote call: a duplicate produces zero CRM writes.
    if state.dedup.admit(&call_id) == Admission::Duplicate {
        warn!(call_id = %call_id, "duplicate call event ignored");
        return PipelineReport::status(CallOutcome::Duplicate);
    }

    if event.subscribers.is_empty() {
        return PipelineReport::status(CallOutcome::InvalidPayload);
    }
    let Some(agent_leg) = event.agent_leg() else {
        warn!(call_id = %call_id, "no user subscriber in event");
        return PipelineReport::status(CallOutcome::UserNotFound);
    };
    let Some(agent) = state.agents.resolve(&agent_leg.number) else {
        warn!(call_id = %call_id, ramal = %agent_leg.number, "ramal not mapped to a Bitrix user");
        return PipelineReport::status(CallOutcome::UserNotMapped);
    };
    let Some(remote_leg) = event.remote_leg() else {
        warn!(call_id = %call_id, "no remote subscriber in event");
        return PipelineReport::status(CallOutcome::RemoteNotFound);
    };

    let numero = normalize_phone(&remote_leg.number, agent.ddd.as_deref());
    if numero.is_empty() {
        warn!(call_id = %call_id, "remote subscriber has no usable number");
        return PipelineReport::status(CallOutcome::RemoteNumberNotFound);
    }
    info!(call_id = %call_id, numero = %numero, "normalized remote number");

    let duration = event.effective_duration();

    // Two-phase telephony record.  Register is not idempotent on the remote
    // side: it runs exactly once per event, and a failure aborts the whole
    // pipeline before any resolution work.
    let register = ExternalCallRegister {
        user_id: agent.user_id,
        phone_number: numero.clone(),
        call_start_date: format_call_time(event.times.setup).unwrap_or_default(),
        call_duration: duration,
        call_id: call_id.clone(),
        r#type: 1,
        show: 0,
    };
    let registered = match state.crm.register_external_call(&register).await {
        Ok(registered) => registered,
        Err(e) => return PipelineReport::failed(CallOutcome::TelephonyRegisterFailed, e),
    };

    let record_url = format!("{}/{}", state.config.recordings_base, call_id);
    let finish = ExternalCallFinish {
        call_id: registered.call_id,
        user_id: agent.user_id,
        duration,
        status_code: 200,
        record_url: record_url.clone(),
        add_to_chat: 0,
    };
    if let Err(e) = state.crm.finish_external_call(&finish).await {
        return PipelineReport::failed(CallOutcome::TelephonyFinishFailed, e);
    }

    let entity = match resolve(
        state.crm.as_ref(),
        state.config.resolution_strategy,
        &numero,
        agent.user_id,
    )
    .await
    {
        Ok(Resolution::Entity(entity)) => entity,
        Ok(Resolution::NoContact) => return PipelineReport::status(CallOutcome::NoContact),
        Ok(Resolution::NoDeal) => return PipelineReport::status(CallOutcome::NoDeal),
        Err(e) => return PipelineReport::failed(CallOutcome::Error, e),
    };

    let colaborador = if agent_leg.display.is_empty() {
        "Desconhecido"
    } else {
        agent_leg.display.as_str()
    };
    let description = build_description(&entity, colaborador, duration, &record_url);

    match write_activity(
        state,
        &entity,
        colaborador,
        agent.user_id,
        &numero,
        &call_id,
        &event,
        description,
    )
    .await
    {
        Ok(activity_id) => {
            info!(call_id = %call_id, activity_id, "call recorded in CRM");
            PipelineReport::status(CallOutcome::Ok)
        }
        // The telephony record is already committed; no compensation.
        Err(e) => PipelineReport::failed(CallOutcome::ActivityAddFailed, e),
    }
}

/// Render a unix timestamp the way the Bitrix portal expects: ISO-8601 in
/// the portal's UTC-3 zone.  Zero/invalid timestamps mean "unknown".
fn format_call_time(ts: i64) -> Option<String> {
    if ts <= 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()?
        .to_offset(offset!(-3))
        .format(&Rfc3339)
        .ok()
}

pub fn human_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{seconds} segundos")
    } else {
        format!("{} minutos", seconds / 60)
    }
}

/// Outcome classification is purely duration-derived; fixed business rule.
pub fn outcome_label(seconds: u64) -> &'static str {
    match seconds {
        0 => "Não completada",
        1..=4 => "Caixa postal",
        _ => "Efetuada",
    }
}

fn build_description(
    entity: &CrmEntity,
    colaborador: &str,
    duration: u64,
    record_url: &str,
) -> String {
    let mut lines = vec!["Ligação registrada automaticamente via Uniq".to_string()];
    match entity {
        CrmEntity::Contact { name, .. } => lines.push(format!("Contato: {name}")),
        CrmEntity::Lead { id } => lines.push(format!("Lead: {id}")),
        CrmEntity::Deal {
            title,
            contact_name,
            ..
        } => {
            lines.push(format!("Contato: {contact_name}"));
            if !title.is_empty() {
                lines.push(format!("Negócio: {title}"));
            }
        }
    }
    lines.push(format!("Atendente: {colaborador}"));
    lines.push(format!("Duração: {}", human_duration(duration)));
    lines.push(format!("Status: {}", outcome_label(duration)));
    lines.push(format!("Gravação: {record_url}"));
    lines.join("<br>")
}

// Bitrix owner type ids: 1 = lead, 2 = deal, 3 = contact.
fn owner_of(entity: &CrmEntity) -> (u8, i64) {
    match entity {
        CrmEntity::Lead { id } => (1, *id),
        CrmEntity::Deal { id, .. } => (2, *id),
        CrmEntity::Contact { id, .. } => (3, *id),
    }
}

fn communication_target(entity: &CrmEntity) -> (u8, i64) {
    match entity {
        CrmEntity::Lead { id } => (1, *id),
        CrmEntity::Deal { contact_id, .. } => (3, *contact_id),
        CrmEntity::Contact { id, .. } => (3, *id),
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_activity(
    state: &AppState,
    entity: &CrmEntity,
    colaborador: &str,
    responsible_id: i64,
    numero: &str,
    call_id: &str,
    event: &CallEvent,
    description: String,
) -> Result<i64, AppError> {
    let (owner_type_id, owner_id) = owner_of(entity);
    let (entity_type_id, entity_id) = communication_target(entity);
    let fields = ActivityFields {
        owner_id,
        owner_type_id,
        type_id: 2,
        subject: format!("Ligação via Uniq de {colaborador} para {numero}"),
        communications: vec![Communication {
            value: numero.to_string(),
            r#type: "PHONE".to_string(),
            entity_type_id,
            entity_id,
        }],
        responsible_id,
        description,
        description_type: 3,
        completed: "Y".to_string(),
        direction: 2,
        start_time: format_call_time(event.times.setup),
        end_time: format_call_time(event.times.release),
        origin_id: Some(call_id.to_string()),
    };

    if state.config.enrich_activity {
        if let Some(existing_id) = find_auto_activity(state, call_id).await? {
            let update = ActivityUpdate {
                description: Some(fields.description.clone()),
                start_time: fields.start_time.clone(),
                end_time: fields.end_time.clone(),
            };
            state.crm.update_activity(existing_id, &update).await?;
            return Ok(existing_id);
        }
    }

    state.crm.add_activity(&fields).await
}

/// The portal's own telephony integration creates its activity with some
/// lag; poll for it a bounded number of times before giving up.
async fn find_auto_activity(state: &AppState, call_id: &str) -> Result<Option<i64>, AppError> {
    for attempt in 1..=state.config.lookup_attempts {
        let activities = state.crm.list_activities_by_origin(call_id).await?;
        if let Some(activity) = activities.first() {
            return Ok(Some(activity.id_num()?));
        }
        if attempt < state.config.lookup_attempts {
            sleep(Duration::from_millis(state.config.lookup_delay_ms)).await;
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentDirectory;
    use crate::bitrix::CrmApi;
    use crate::bitrix_types::{
        Activity, Contact, Deal, DuplicateMatches, MultiField, RegisteredCall,
    };
    use crate::config::Config;
    use crate::dedup::DedupGuard;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Scripted CRM double that records every remote call it receives.
    #[derive(Default)]
    struct RecordingCrm {
        contacts: Vec<Contact>,
        deals: Vec<Deal>,
        existing_activities: Vec<Activity>,
        register_fails: bool,
        calls: Mutex<Vec<&'static str>>,
        descriptions: Mutex<Vec<String>>,
    }

    impl RecordingCrm {
        fn count(&self, method: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|m| **m == method)
                .count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CrmApi for RecordingCrm {
        async fn find_contacts_by_phone(&self, _phone: &str) -> Result<Vec<Contact>, AppError> {
            self.calls.lock().unwrap().push("contact.list");
            Ok(self.contacts.clone())
        }

        async fn find_open_deals(
            &self,
            _contact_id: i64,
            _assigned_user_id: i64,
        ) -> Result<Vec<Deal>, AppError> {
            self.calls.lock().unwrap().push("deal.list");
            Ok(self.deals.clone())
        }

        async fn find_duplicates_by_phone(
            &self,
            _phone: &str,
        ) -> Result<DuplicateMatches, AppError> {
            self.calls.lock().unwrap().push("duplicate.findbycomm");
            Ok(DuplicateMatches::default())
        }

        async fn get_contact(&self, _contact_id: i64) -> Result<Option<Contact>, AppError> {
            self.calls.lock().unwrap().push("contact.get");
            Ok(None)
        }

        async fn register_external_call(
            &self,
            _register: &ExternalCallRegister,
        ) -> Result<RegisteredCall, AppError> {
            self.calls.lock().unwrap().push("externalcall.register");
            if self.register_fails {
                return Err(AppError::with_detail(
                    "telephony.externalcall.register",
                    "portal rejected the call",
                ));
            }
            Ok(RegisteredCall {
                call_id: "CA-900".to_string(),
            })
        }

        async fn finish_external_call(&self, _finish: &ExternalCallFinish) -> Result<(), AppError> {
            self.calls.lock().unwrap().push("externalcall.finish");
            Ok(())
        }

        async fn add_activity(&self, fields: &ActivityFields) -> Result<i64, AppError> {
            self.calls.lock().unwrap().push("activity.add");
            self.descriptions
                .lock()
                .unwrap()
                .push(fields.description.clone());
            Ok(1234)
        }

        async fn update_activity(
            &self,
            _activity_id: i64,
            fields: &ActivityUpdate,
        ) -> Result<(), AppError> {
            self.calls.lock().unwrap().push("activity.update");
            if let Some(description) = &fields.description {
                self.descriptions.lock().unwrap().push(description.clone());
            }
            Ok(())
        }

        async fn list_activities_by_origin(
            &self,
            _origin_id: &str,
        ) -> Result<Vec<Activity>, AppError> {
            self.calls.lock().unwrap().push("activity.list");
            Ok(self.existing_activities.clone())
        }
    }

    fn crm_with_contact_and_deal() -> RecordingCrm {
        RecordingCrm {
            contacts: vec![Contact {
                id: "7".to_string(),
                name: Some("Maria".to_string()),
                phone: Some(vec![MultiField {
                    value: "+5531988887777".to_string(),
                }]),
            }],
            deals: vec![Deal {
                id: "42".to_string(),
                title: Some("Proposta".to_string()),
                assigned_by_id: Some("36".to_string()),
            }],
            ..Default::default()
        }
    }

    fn test_state(crm: Arc<RecordingCrm>) -> AppState {
        AppState {
            config: Config::default(),
            agents: AgentDirectory::builtin(),
            dedup: DedupGuard::new(),
            crm,
        }
    }

    fn sample_event() -> CallEvent {
        serde_json::from_value(json!({
            "id": "abc123",
            "subscribers": [
                {"type": "user", "number": "1529", "display": "Ana"},
                {"type": "remote", "number": "031988887777"}
            ],
            "times": {"setup": 1000, "release": 1065},
            "duration": 65
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn full_pipeline_records_the_call_once() {
        let crm = Arc::new(crm_with_contact_and_deal());
        let state = test_state(crm.clone());

        let report = process_event(sample_event(), &state).await;
        assert_eq!(report.status, CallOutcome::Ok);
        assert_eq!(crm.count("externalcall.register"), 1);
        assert_eq!(crm.count("externalcall.finish"), 1);
        assert_eq!(crm.count("activity.add"), 1);

        let descriptions = crm.descriptions.lock().unwrap();
        let description = &descriptions[0];
        assert!(description.contains("Contato: Maria"));
        assert!(description.contains("Negócio: Proposta"));
        assert!(description.contains("Atendente: Ana"));
        assert!(description.contains("1 minutos"));
        assert!(description.contains("Efetuada"));
        assert!(description.contains("https://admin.uniq.app/recordings/details/abc123"));
    }

    #[tokio::test]
    async fn duplicate_delivery_writes_nothing_extra() {
        let crm = Arc::new(crm_with_contact_and_deal());
        let state = test_state(crm.clone());

        let first = process_event(sample_event(), &state).await;
        let second = process_event(sample_event(), &state).await;
        assert_eq!(first.status, CallOutcome::Ok);
        assert_eq!(second.status, CallOutcome::Duplicate);
        assert_eq!(crm.count("externalcall.register"), 1);
        assert_eq!(crm.count("activity.add"), 1);
    }

    #[tokio::test]
    async fn missing_id_makes_no_remote_calls() {
        let crm = Arc::new(crm_with_contact_and_deal());
        let state = test_state(crm.clone());

        let mut event = sample_event();
        event.id = None;
        let report = process_event(event, &state).await;
        assert_eq!(report.status, CallOutcome::MissingId);
        assert_eq!(crm.total_calls(), 0);
    }

    #[tokio::test]
    async fn unmapped_ramal_is_terminal_before_any_write() {
        let crm = Arc::new(crm_with_contact_and_deal());
        let state = test_state(crm.clone());

        let mut event = sample_event();
        event.subscribers[0].number = "9999".to_string();
        let report = process_event(event, &state).await;
        assert_eq!(report.status, CallOutcome::UserNotMapped);
        assert_eq!(crm.total_calls(), 0);
    }

    #[tokio::test]
    async fn register_failure_aborts_before_resolution() {
        let crm = Arc::new(RecordingCrm {
            register_fails: true,
            ..crm_with_contact_and_deal()
        });
        let state = test_state(crm.clone());

        let report = process_event(sample_event(), &state).await;
        assert_eq!(report.status, CallOutcome::TelephonyRegisterFailed);
        assert!(report.detail.unwrap().contains("portal rejected the call"));
        assert_eq!(crm.count("contact.list"), 0);
        assert_eq!(crm.count("activity.add"), 0);
    }

    #[tokio::test]
    async fn unmatched_number_ends_in_no_contact_after_telephony_record() {
        let crm = Arc::new(RecordingCrm::default());
        let state = test_state(crm.clone());

        let report = process_event(sample_event(), &state).await;
        assert_eq!(report.status, CallOutcome::NoContact);
        assert_eq!(crm.count("externalcall.register"), 1);
        assert_eq!(crm.count("externalcall.finish"), 1);
        assert_eq!(crm.count("activity.add"), 0);
    }

    #[tokio::test]
    async fn enrichment_updates_the_auto_created_activity() {
        let crm = Arc::new(RecordingCrm {
            existing_activities: vec![Activity {
                id: "777".to_string(),
                subject: None,
                origin_id: Some("abc123".to_string()),
            }],
            ..crm_with_contact_and_deal()
        });
        let mut state = test_state(crm.clone());
        state.config.enrich_activity = true;

        let report = process_event(sample_event(), &state).await;
        assert_eq!(report.status, CallOutcome::Ok);
        assert_eq!(crm.count("activity.list"), 1);
        assert_eq!(crm.count("activity.update"), 1);
        assert_eq!(crm.count("activity.add"), 0);
    }

    #[tokio::test]
    async fn enrichment_polls_then_creates_when_nothing_appears() {
        let crm = Arc::new(crm_with_contact_and_deal());
        let mut state = test_state(crm.clone());
        state.config.enrich_activity = true;
        state.config.lookup_attempts = 3;
        state.config.lookup_delay_ms = 0;

        let report = process_event(sample_event(), &state).await;
        assert_eq!(report.status, CallOutcome::Ok);
        assert_eq!(crm.count("activity.list"), 3);
        assert_eq!(crm.count("activity.add"), 1);
    }

    #[test]
    fn duration_is_rendered_in_seconds_then_whole_minutes() {
        assert_eq!(human_duration(0), "0 segundos");
        assert_eq!(human_duration(59), "59 segundos");
        assert_eq!(human_duration(60), "1 minutos");
        assert_eq!(human_duration(125), "2 minutos");
    }

    #[test]
    fn outcome_classification_thresholds_are_exact() {
        assert_eq!(outcome_label(0), "Não completada");
        assert_eq!(outcome_label(1), "Caixa postal");
        assert_eq!(outcome_label(3), "Caixa postal");
        assert_eq!(outcome_label(4), "Caixa postal");
        assert_eq!(outcome_label(5), "Efetuada");
        assert_eq!(outcome_label(65), "Efetuada");
    }

    #[test]
    fn outcome_tags_serialize_kebab_case() {
        let cases = [
            (CallOutcome::Ok, "ok"),
            (CallOutcome::MissingId, "missing-id"),
            (CallOutcome::Duplicate, "duplicate"),
            (CallOutcome::InvalidPayload, "invalid-payload"),
            (CallOutcome::UserNotFound, "user-not-found"),
            (CallOutcome::UserNotMapped, "user-not-mapped"),
            (CallOutcome::RemoteNotFound, "remote-not-found"),
            (CallOutcome::RemoteNumberNotFound, "remote-number-not-found"),
            (
                CallOutcome::TelephonyRegisterFailed,
                "telephony-register-failed",
            ),
            (CallOutcome::TelephonyFinishFailed, "telephony-finish-failed"),
            (CallOutcome::NoContact, "no-contact"),
            (CallOutcome::NoDeal, "no-deal"),
            (CallOutcome::ActivityAddFailed, "activity-add-failed"),
            (CallOutcome::Error, "error"),
        ];
        for (outcome, tag) in cases {
            assert_eq!(serde_json::to_value(outcome).unwrap(), tag);
        }
    }

    #[test]
    fn call_start_date_renders_in_portal_zone() {
        assert_eq!(
            format_call_time(1000).unwrap(),
            "1969-12-31T21:16:40-03:00"
        );
        assert!(format_call_time(0).is_none());
    }
}
