//! Phase 1D: federal loan-record lookup by entity name and address.

use std::sync::Arc;

use entity_enrich_clients::traits::{LoanRecord, LoanRecordsClient};
use entity_enrich_core::merge::{loan_record_answers, LoanMatch};
use entity_enrich_core::model::ExtractionAnswer;
use tracing::warn;

fn to_loan_match(record: LoanRecord) -> LoanMatch {
    LoanMatch {
        match_score: record.match_score,
        loan_amount: record.loan_amount,
        jobs_reported: record.jobs_reported,
        approval_date: record.approval_date,
    }
}

/// Find the best-matching loan record and derive tier-0 `revenue_estimate`
/// and `employees` answers from it. A lookup failure is non-fatal.
pub async fn lookup_loan_records(
    client: &Arc<dyn LoanRecordsClient>,
    entity_name: &str,
    address: Option<&str>,
) -> (Option<LoanRecord>, Vec<ExtractionAnswer>) {
    match client.find_best_match(entity_name, address).await {
        Ok(Some(record)) => {
            let answers = loan_record_answers(&to_loan_match(record.clone()));
            (Some(record), answers)
        }
        Ok(None) => (None, Vec::new()),
        Err(e) => {
            warn!(error = %e, entity_name, "loan record lookup failed");
            (None, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use entity_enrich_clients::fakes::FakeLoanRecordsClient;

    #[tokio::test]
    async fn match_found_produces_tier0_answers() {
        let client: Arc<dyn LoanRecordsClient> = Arc::new(FakeLoanRecordsClient::new().with_match(
            "Acme Corp",
            LoanRecord { match_score: 0.9, loan_amount: 100_000.0, jobs_reported: 12, approval_date: Utc::now() },
        ));
        let (record, answers) = lookup_loan_records(&client, "Acme Corp", None).await;
        assert!(record.is_some());
        assert_eq!(answers.len(), 2);
        assert!(answers.iter().any(|a| a.field_key == "revenue_estimate"));
        assert!(answers.iter().any(|a| a.field_key == "employees"));
    }

    #[tokio::test]
    async fn no_match_is_empty_not_fatal() {
        let client: Arc<dyn LoanRecordsClient> = Arc::new(FakeLoanRecordsClient::new());
        let (record, answers) = lookup_loan_records(&client, "Unknown Co", None).await;
        assert!(record.is_none());
        assert!(answers.is_empty());
    }
}
