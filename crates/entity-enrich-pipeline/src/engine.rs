//! Phase orchestration: crawl -> external sources -> profile -> loan records
//! -> classify -> route -> extract (T1/T2/T3) -> aggregate -> geocode -> gate.
//!
//! Phases run sequentially; fan-out within a phase is bounded by
//! [`crate::concurrency::MAX_DIRECT_CONCURRENCY`].

use std::time::Instant;

use entity_enrich_core::config::Config;
use entity_enrich_core::merge::NaicsReference;
use entity_enrich_core::model::{ClassifiedPage, Entity, PageIndex, Question};
use entity_enrich_core::registry::FieldRegistry;
use tracing::info;

use crate::collaborators::Collaborators;
use crate::concurrency::{BatchThresholds, CancellationHandle, MAX_DIRECT_CONCURRENCY};
use crate::error::Result;
use crate::phases::extract::{should_escalate, tier1, tier2, tier3};
use crate::phases::{aggregate, classify, crawl, external_sources, gate, geocode, profile, loan_records, route};
use crate::result::EnrichmentResult;

fn build_page_index(pages: Vec<ClassifiedPage>) -> PageIndex {
    let mut index = PageIndex::new();
    for page in pages {
        index.entry(page.page_type).or_insert_with(Vec::new).push(page);
    }
    index
}

fn external_source_queries(entity: &Entity) -> Vec<external_sources::ExternalSourceQuery> {
    let domain = entity.normalized_domain();
    vec![
        external_sources::ExternalSourceQuery { url: format!("https://www.bbb.org/search?q={domain}"), page_type: entity_enrich_core::model::PageType::Bbb },
        external_sources::ExternalSourceQuery { url: format!("https://www.google.com/maps/search/{domain}"), page_type: entity_enrich_core::model::PageType::GoogleMaps },
        external_sources::ExternalSourceQuery { url: format!("https://www.opencorporates.com/companies?q={domain}"), page_type: entity_enrich_core::model::PageType::Sos },
        external_sources::ExternalSourceQuery { url: format!("https://www.linkedin.com/company/{domain}"), page_type: entity_enrich_core::model::PageType::Linkedin },
    ]
}

/// Run crawl through score/geocode, stopping short of the gate phase so
/// callers can choose between the direct (`run`) and deferred-write
/// (`run_deferred`/`finalize_batch`) write paths.
pub async fn run_until_score(collaborators: &Collaborators, entity: Entity, config: &Config, registry: &FieldRegistry, questions: &[Question], naics: &NaicsReference, sos_keywords: &[String]) -> Result<EnrichmentResult> {
    let (cancel_handle, cancel) = CancellationHandle::new();
    let mut result = EnrichmentResult::new(entity.clone());

    let phase_start = Instant::now();
    let crawl_result = crawl::crawl(
        &collaborators.scraper,
        &collaborators.cache,
        &entity.primary_url,
        crawl::CrawlOptions {
            max_depth: config.crawl.max_depth,
            max_pages: config.crawl.max_pages,
            cache_ttl: std::time::Duration::from_secs(config.crawl.cache_ttl_hours as u64 * 3600),
        },
    )
    .await?;
    if crawl_result.from_cache {
        result.metrics.cache_hits += 1;
    } else {
        result.metrics.cache_misses += 1;
    }

    let batch_thresholds = BatchThresholds::default();

    let external_pages = external_sources::fetch_external_sources(&collaborators.scraper, external_source_queries(&entity)).await;
    let classified = classify::classify(
        &collaborators.haiku,
        &config.haiku_model,
        crawl_result.pages,
        config.small_batch_threshold as usize,
        config.no_batch,
        cancel.clone(),
        &mut result.metrics,
    )
    .await;

    result.external_pages = external_pages;
    result.pages = build_page_index(classified);
    result.metrics.record_phase("crawl", phase_start.elapsed());

    let (profile_record, profile_answer) = profile::lookup_profile(&collaborators.profile, &collaborators.haiku, &config.haiku_model, &entity.normalized_domain(), &mut result.metrics).await;
    result.profile = profile_record;

    let (loan_match, loan_answers) = loan_records::lookup_loan_records(&collaborators.loan_records, entity.display_name.as_deref().unwrap_or(&entity.normalized_domain()), entity.address_line.as_deref()).await;
    result.loan_match = loan_match;

    let route_result = route::route(questions, &result.pages, &result.external_pages);
    info!(routed = route_result.routed.len(), skipped = route_result.skipped.len(), "route complete");

    let mut t1_answers = tier1::run_tier1(
        &collaborators.haiku,
        &config.haiku_model,
        route_result.routed.clone(),
        &entity.seed_hints,
        result.loan_match.as_ref(),
        batch_thresholds.t1,
        config.no_batch,
        MAX_DIRECT_CONCURRENCY,
        cancel.clone(),
        &mut result.metrics,
    )
    .await;
    if let Some(answer) = profile_answer {
        t1_answers.push(answer);
    }
    t1_answers.extend(loan_answers);

    let escalate_questions: Vec<_> = route_result
        .routed
        .iter()
        .filter(|rq| {
            let keys = rq.question.field_keys();
            let question_answers: Vec<_> = t1_answers.iter().filter(|a| keys.contains(&a.field_key)).cloned().collect();
            should_escalate(&question_answers)
        })
        .cloned()
        .collect();

    result.metrics.escalations_t1_to_t2 = escalate_questions.len() as u64;

    let t2_answers = if escalate_questions.is_empty() {
        Vec::new()
    } else {
        tier2::run_tier2(
            &collaborators.sonnet,
            &config.sonnet_model,
            escalate_questions.clone(),
            &t1_answers,
            batch_thresholds.t2,
            config.no_batch,
            MAX_DIRECT_CONCURRENCY,
            cancel.clone(),
            &mut result.metrics,
        )
        .await
    };

    let still_failing: Vec<_> = escalate_questions
        .iter()
        .filter(|rq| {
            let keys = rq.question.field_keys();
            let question_answers: Vec<_> = t2_answers.iter().filter(|a| keys.contains(&a.field_key)).cloned().collect();
            should_escalate(&question_answers)
        })
        .cloned()
        .collect();

    let t3_answers = if still_failing.is_empty() {
        Vec::new()
    } else {
        tier3::run_tier3(
            &collaborators.opus,
            &config.opus_model,
            &collaborators.haiku,
            &config.haiku_model,
            still_failing,
            batch_thresholds.t3,
            config.no_batch,
            MAX_DIRECT_CONCURRENCY,
            cancel.clone(),
            &mut result.metrics,
        )
        .await
    };

    result.t1_answers = t1_answers;
    result.t2_answers = t2_answers;
    result.t3_answers = t3_answers;

    let profile_employee_range = result.profile.as_ref().and_then(|p| p.employee_range.as_deref()).and_then(entity_enrich_core::merge::parse_employee_range);

    let all_pages: Vec<ClassifiedPage> = result.pages.values().flatten().cloned().chain(result.external_pages.iter().cloned()).collect();

    let mut derived_sos_keywords = entity_enrich_core::merge::sos_page_keywords(&all_pages, naics);
    derived_sos_keywords.extend(sos_keywords.iter().cloned());

    let scoreable_keys: Vec<String> = questions.iter().flat_map(|q| q.field_keys()).collect();
    let scoreable_keys: Vec<&str> = scoreable_keys.iter().map(String::as_str).collect();

    let aggregate_result = aggregate::aggregate(
        aggregate::AggregateInput {
            t1_answers: result.t1_answers.clone(),
            t2_answers: result.t2_answers.clone(),
            t3_answers: result.t3_answers.clone(),
            seed_hints: &entity.seed_hints,
            pages: &all_pages,
            profile_employee_range,
            naics_reference: naics,
            sos_keywords: &derived_sos_keywords,
        },
        registry,
        &scoreable_keys,
        config.quality_weights(),
        chrono::Utc::now(),
    );

    result.field_values = aggregate_result.field_values;
    result.metrics.validation_drops = aggregate_result.validation.dropped as u64;
    result.metrics.contradictions_recorded = aggregate_result.winners.values().filter(|a| a.contradiction.is_some()).count() as u64;
    result.score = Some(aggregate_result.score);

    let geo = geocode::geocode_entity(&collaborators.geocoder, &collaborators.msa_lookup, entity.address_line.as_deref(), entity.city.as_deref(), entity.state.as_deref()).await;
    result.geo = geo.point;
    result.msa = geo.msa;

    cancel_handle.cancel();
    Ok(result)
}

/// Direct, single-entity path: run through scoring, then prepare, flush and
/// record the gate decision immediately.
pub async fn run(collaborators: &Collaborators, entity: Entity, config: &Config, registry: &FieldRegistry, questions: &[Question], naics: &NaicsReference, sos_keywords: &[String]) -> Result<EnrichmentResult> {
    let mut result = run_until_score(collaborators, entity, config, registry, questions, naics, sos_keywords).await?;

    let decision = gate::run_gate(
        &collaborators.sor,
        &collaborators.tracking,
        &result.entity,
        registry,
        &result.field_values,
        result.score.expect("run_until_score always sets a score"),
        config.quality_score_threshold,
        config.min_completeness_threshold,
        0.0,
        chrono::Utc::now(),
    )
    .await?;
    result.gate_decision = Some(decision);

    Ok(result)
}

/// Batch path: run every entity through scoring, then compute (but do not
/// execute) each one's write intent, so `finalize_batch` can flush them all
/// as a single deferred write pass.
pub async fn run_deferred(collaborators: &Collaborators, entity: Entity, config: &Config, registry: &FieldRegistry, questions: &[Question], naics: &NaicsReference, sos_keywords: &[String]) -> Result<EnrichmentResult> {
    let mut result = run_until_score(collaborators, entity, config, registry, questions, naics, sos_keywords).await?;

    let decision = gate::prepare_gate(
        &collaborators.sor,
        &result.entity,
        registry,
        &result.field_values,
        result.score.expect("run_until_score always sets a score"),
        config.quality_score_threshold,
        config.min_completeness_threshold,
    )
    .await?;
    result.gate_decision = Some(decision);

    Ok(result)
}

/// Flush every prepared entity's write intent in one batch, then update each
/// entity's tracking record with the outcome.
pub async fn finalize_batch(collaborators: &Collaborators, mut results: Vec<EnrichmentResult>, cost_per_entity: f64) -> Result<Vec<EnrichmentResult>> {
    let intents: Vec<_> = results.iter_mut().filter_map(|r| r.gate_decision.as_mut().and_then(|d| d.intent.take())).collect();
    let mut flushed = gate::flush_sf_writes(&collaborators.sor, intents).await?.into_iter();

    let now = chrono::Utc::now();
    for result in &mut results {
        let Some(decision) = result.gate_decision.as_mut() else { continue };
        if decision.passed {
            decision.intent = flushed.next();
        }
        if let Err(e) = gate::update_tracking(&collaborators.tracking, &result.entity.tracking_record_id, decision, result.field_values.len(), cost_per_entity, now).await {
            tracing::error!(error = %e, entity = %result.entity.primary_url, "batch tracking update ultimately failed");
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_clients::fakes::{FakeCacheStore, FakeGeocoder, FakeLlmClient, FakeLoanRecordsClient, FakeMsaLookup, FakeProfileClient, FakeScraper, FakeSorClient, FakeTrackingClient};
    use entity_enrich_clients::traits::ScrapeResult;
    use entity_enrich_core::model::{CrawledPage, DataType, FieldMapping, MetadataSource, TIER_CHEAP};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn entity() -> Entity {
        Entity {
            primary_url: "https://acme.com".to_string(),
            display_name: Some("Acme Corp".to_string()),
            address_line: None,
            city: None,
            state: None,
            postal_code: None,
            tracking_record_id: "rec-1".to_string(),
            sor_id: None,
            seed_hints: HashMap::new(),
        }
    }

    fn registry() -> FieldRegistry {
        FieldRegistry::new(vec![FieldMapping {
            key: "company_name".to_string(),
            sf_field: "Name".to_string(),
            sf_object: "Account".to_string(),
            data_type: DataType::String,
            required: false,
            max_length: None,
            validation_regex: None,
        }])
        .unwrap()
    }

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            text: "What is the company name?".to_string(),
            field_key: "company_name".to_string(),
            page_types: vec![],
            tier: TIER_CHEAP,
            output_format: "json".to_string(),
            instructions: None,
        }
    }

    #[tokio::test]
    async fn runs_end_to_end_with_fakes() {
        let scraper = FakeScraper::new().with_page(
            "https://acme.com",
            ScrapeResult {
                page: CrawledPage { url: "https://acme.com".to_string(), title: "Acme".to_string(), markdown: "Acme Corp makes widgets for everyone who needs them daily.".to_string(), status_code: 200, metadata: None },
                source: MetadataSource::Regex,
            },
        );
        let haiku = FakeLlmClient::new();
        let collaborators = Collaborators {
            scraper: Arc::new(scraper),
            cache: Arc::new(FakeCacheStore::new()),
            haiku: Arc::new(haiku),
            sonnet: Arc::new(FakeLlmClient::new()),
            opus: Arc::new(FakeLlmClient::new()),
            sor: Arc::new(FakeSorClient::new()),
            tracking: Arc::new(FakeTrackingClient::new()),
            geocoder: Arc::new(FakeGeocoder::new()),
            msa_lookup: Arc::new(FakeMsaLookup::new()),
            loan_records: Arc::new(FakeLoanRecordsClient::new()),
            profile: Arc::new(FakeProfileClient::new()),
        };
        let config = Config::default();
        let registry = registry();
        let questions = vec![question()];
        let naics = NaicsReference::default();

        let result = run(&collaborators, entity(), &config, &registry, &questions, &naics, &[]).await.unwrap();
        assert!(result.score.is_some());
        assert!(result.gate_decision.is_some());
    }
}
