//! Phase 9: score, decide pass/fail, dedup-lookup, and write the winning
//! fields to the system-of-record and tracking record.
//!
//! `prepare_gate`/`flush_sf_writes` split the write-intent computation from
//! its execution so batch mode can collect intents across many entities
//! before issuing bulk writes; `run_gate` composes the two for the direct,
//! single-entity path.

use std::collections::HashMap;
use std::sync::Arc;

use entity_enrich_clients::traits::{SorClient, TrackingClient, TrackingProperty};
use entity_enrich_core::model::{Entity, FieldValue};
use entity_enrich_core::registry::FieldRegistry;
use entity_enrich_core::score::QualityScore;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountOp {
    Create,
    Update,
    None,
}

/// Write-intent computed by `prepare_gate`, executed later by `flush_sf_writes`.
#[derive(Debug, Clone)]
pub struct WriteIntent {
    pub account_op: AccountOp,
    pub account_id: Option<String>,
    pub account_fields: Map<String, Value>,
    pub contacts: Vec<Map<String, Value>>,
    pub tracking_record_id: String,
    pub dedup_match: bool,
    pub back_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GateDecision {
    pub score: QualityScore,
    pub passed: bool,
    pub missing_required: Vec<String>,
    pub manual_review: bool,
    pub intent: Option<WriteIntent>,
}

fn missing_required_fields(registry: &FieldRegistry, fields: &HashMap<String, FieldValue>) -> Vec<String> {
    registry
        .required_keys()
        .filter(|key| !fields.contains_key(*key))
        .map(str::to_string)
        .collect()
}

fn split_by_object(registry: &FieldRegistry, fields: &HashMap<String, FieldValue>) -> (Map<String, Value>, Map<String, Value>) {
    let mut account = Map::new();
    let mut contact = Map::new();
    for field in fields.values() {
        let Some(mapping) = registry.get(&field.field_key) else { continue };
        let value = Value::from(field.value.stringify());
        if mapping.sf_object.eq_ignore_ascii_case("contact") {
            contact.insert(mapping.sf_field.clone(), value);
        } else {
            account.insert(mapping.sf_field.clone(), value);
        }
    }
    (account, contact)
}

fn ensure_minimum_account_fields(account_fields: &mut Map<String, Value>, entity: &Entity) {
    account_fields.entry("Website".to_string()).or_insert_with(|| Value::String(entity.primary_url.clone()));
    if !account_fields.contains_key("Name") {
        let name = entity.display_name.clone().unwrap_or_else(|| entity.normalized_domain());
        account_fields.insert("Name".to_string(), Value::String(name));
    }
}

/// Compute score, pass/fail, and (if passed) the dedup-aware write intent.
/// Performs no writes — `flush_sf_writes` executes the intent later.
pub async fn prepare_gate(
    sor: &Arc<dyn SorClient>,
    entity: &Entity,
    registry: &FieldRegistry,
    fields: &HashMap<String, FieldValue>,
    score: QualityScore,
    threshold: f64,
    min_completeness_floor: Option<f64>,
) -> Result<GateDecision> {
    let completeness_ok = match min_completeness_floor {
        Some(floor) => score.completeness >= floor,
        None => true,
    };
    let passed = score.total >= threshold && completeness_ok;
    let missing_required = missing_required_fields(registry, fields);

    if !passed {
        return Ok(GateDecision {
            score,
            passed,
            missing_required,
            manual_review: true,
            intent: None,
        });
    }

    let (mut account_fields, contact_fields) = split_by_object(registry, fields);
    ensure_minimum_account_fields(&mut account_fields, entity);

    let (account_op, account_id, dedup_match) = if let Some(id) = &entity.sor_id {
        (AccountOp::Update, Some(id.clone()), false)
    } else {
        match sor.find_account_by_website(&entity.primary_url).await? {
            Some(id) => (AccountOp::Update, Some(id), true),
            None => (AccountOp::Create, None, false),
        }
    };

    let contacts = if contact_fields.is_empty() { Vec::new() } else { vec![contact_fields] };

    Ok(GateDecision {
        score,
        passed,
        missing_required,
        manual_review: false,
        intent: Some(WriteIntent {
            account_op,
            account_id,
            account_fields,
            contacts,
            tracking_record_id: entity.tracking_record_id.clone(),
            dedup_match,
            back_ref: None,
        }),
    })
}

/// Execute a batch of write intents: bulk account creates/updates, then
/// per-intent contact upserts by email, falling back to first/last name.
pub async fn flush_sf_writes(sor: &Arc<dyn SorClient>, intents: Vec<WriteIntent>) -> Result<Vec<WriteIntent>> {
    let (mut creates, mut updates): (Vec<(usize, Map<String, Value>)>, Vec<(usize, (String, Map<String, Value>))>) = (Vec::new(), Vec::new());
    for (i, intent) in intents.iter().enumerate() {
        match intent.account_op {
            AccountOp::Create => creates.push((i, intent.account_fields.clone())),
            AccountOp::Update => {
                if let Some(id) = &intent.account_id {
                    updates.push((i, (id.clone(), intent.account_fields.clone())));
                }
            }
            AccountOp::None => {}
        }
    }

    let mut intents = intents;

    if !creates.is_empty() {
        let records = creates.iter().map(|(_, fields)| fields.clone()).collect();
        let outcomes = sor.bulk_create_accounts(records).await?;
        for ((i, _), outcome) in creates.iter().zip(outcomes) {
            if outcome.success {
                intents[*i].back_ref = outcome.id;
            } else {
                warn!(tracking_record_id = %intents[*i].tracking_record_id, errors = ?outcome.errors, "bulk account create failed");
            }
        }
    }

    if !updates.is_empty() {
        let records = updates.iter().map(|(_, pair)| pair.clone()).collect();
        let outcomes = sor.bulk_update_accounts(records).await?;
        for ((i, (id, _)), outcome) in updates.iter().zip(outcomes) {
            if outcome.success {
                intents[*i].back_ref = Some(id.clone());
            } else {
                warn!(tracking_record_id = %intents[*i].tracking_record_id, errors = ?outcome.errors, "bulk account update failed");
            }
        }
    }

    for intent in &mut intents {
        let Some(account_id) = intent.back_ref.clone() else { continue };
        for contact in &intent.contacts {
            upsert_contact(sor, &account_id, contact.clone()).await?;
        }
    }

    Ok(intents)
}

async fn upsert_contact(sor: &Arc<dyn SorClient>, account_id: &str, fields: Map<String, Value>) -> Result<()> {
    let email = fields.get("Email").and_then(Value::as_str);
    let existing = sor.find_contacts_by_account_id(account_id).await?;

    let matched = existing.iter().find(|(_, existing_fields)| match email {
        Some(email) => existing_fields.get("Email").and_then(Value::as_str) == Some(email),
        None => {
            existing_fields.get("FirstName") == fields.get("FirstName") && existing_fields.get("LastName") == fields.get("LastName")
        }
    });

    match matched {
        Some((id, _)) => sor.update_contact(id, fields).await?,
        None => {
            sor.create_contact(account_id, fields).await?;
        }
    }
    Ok(())
}

/// Update the tracking record with the run's outcome, retrying once on failure.
pub async fn update_tracking(tracking: &Arc<dyn TrackingClient>, page_id: &str, decision: &GateDecision, fields_populated: usize, cost: f64, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
    let status = if decision.passed { "Enriched" } else { "Manual Review" };
    let props = vec![
        ("status".to_string(), TrackingProperty::Status(status.to_string())),
        ("score".to_string(), TrackingProperty::Number(decision.score.total)),
        ("fields_populated".to_string(), TrackingProperty::Number(fields_populated as f64)),
        ("cost".to_string(), TrackingProperty::Number(cost)),
        ("last_enriched".to_string(), TrackingProperty::Date(now)),
    ];

    if tracking.update_page(page_id, props.clone()).await.is_ok() {
        return Ok(());
    }
    warn!(page_id, "tracking update failed, retrying once");
    match tracking.update_page(page_id, props).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(page_id, error = %e, "tracking update failed twice, logging inconsistency");
            Err(Error::Client(e))
        }
    }
}

/// Direct, single-entity path: prepare, flush immediately, update tracking.
#[allow(clippy::too_many_arguments)]
pub async fn run_gate(
    sor: &Arc<dyn SorClient>,
    tracking: &Arc<dyn TrackingClient>,
    entity: &Entity,
    registry: &FieldRegistry,
    fields: &HashMap<String, FieldValue>,
    score: QualityScore,
    threshold: f64,
    min_completeness_floor: Option<f64>,
    cost: f64,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<GateDecision> {
    let mut decision = prepare_gate(sor, entity, registry, fields, score, threshold, min_completeness_floor).await?;

    if let Some(intent) = decision.intent.take() {
        let mut flushed = flush_sf_writes(sor, vec![intent]).await?;
        decision.intent = flushed.pop();
    }

    if let Err(e) = update_tracking(tracking, &entity.tracking_record_id, &decision, fields.len(), cost, now).await {
        error!(error = %e, "gate tracking update ultimately failed");
    }

    Ok(decision)
}
