//! Pure data model, merge/validation/scoring logic and configuration for the
//! entity enrichment pipeline. Nothing in this crate performs I/O; the
//! `entity-enrich-pipeline` crate is the only place phases call out to
//! external collaborators.

pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod registry;
pub mod score;
pub mod test_support;

pub use error::{Error, Result};

use model::{DataType, FieldMapping, PageType, Question, TIER_CHEAP};
use registry::FieldRegistry;

/// The canonical field set this pipeline populates, independent of any one
/// run's question set. Used to build the default registry for CLI/tests;
/// production deployments may load a registry from their own config.
pub fn default_field_mappings() -> Vec<FieldMapping> {
    let string = |key: &str, sf_field: &str, required: bool| FieldMapping {
        key: key.to_string(),
        sf_field: sf_field.to_string(),
        sf_object: "Account".to_string(),
        data_type: DataType::String,
        required,
        max_length: None,
        validation_regex: None,
    };

    vec![
        string("company_name", "Name", true),
        string("account_name", "Account_Name__c", false),
        FieldMapping {
            data_type: DataType::Url,
            ..string("website", "Website", true)
        },
        string("industry", "Industry", false),
        string("business_model", "Business_Model__c", false),
        FieldMapping {
            data_type: DataType::String,
            validation_regex: Some(r"^\d{6}$".to_string()),
            ..string("naics_code", "NAICS_Code__c", false)
        },
        FieldMapping {
            data_type: DataType::Currency,
            ..string("revenue_estimate", "AnnualRevenue", false)
        },
        FieldMapping {
            data_type: DataType::Integer,
            ..string("employees", "NumberOfEmployees", false)
        },
        string("hq_address", "BillingStreet", false),
        FieldMapping {
            data_type: DataType::Phone,
            ..string("phone", "Phone", false)
        },
        FieldMapping {
            data_type: DataType::Float,
            ..string("google_reviews_rating", "Google_Rating__c", false)
        },
        FieldMapping {
            data_type: DataType::Integer,
            ..string("google_reviews_count", "Google_Review_Count__c", false)
        },
        string("bbb_rating", "BBB_Rating__c", false),
        FieldMapping {
            data_type: DataType::Json,
            ..string("contacts", "", false)
        },
        FieldMapping {
            data_type: DataType::String,
            sf_object: "Contact".to_string(),
            ..string("owner_first_name", "FirstName", false)
        },
        FieldMapping {
            data_type: DataType::String,
            sf_object: "Contact".to_string(),
            ..string("owner_last_name", "LastName", false)
        },
        FieldMapping {
            data_type: DataType::String,
            sf_object: "Contact".to_string(),
            ..string("owner_title", "Title", false)
        },
        FieldMapping {
            data_type: DataType::Email,
            sf_object: "Contact".to_string(),
            ..string("owner_email", "Email", false)
        },
        FieldMapping {
            data_type: DataType::Phone,
            sf_object: "Contact".to_string(),
            ..string("owner_phone", "Phone", false)
        },
        FieldMapping {
            data_type: DataType::Url,
            sf_object: "Contact".to_string(),
            ..string("owner_linkedin", "LinkedIn__c", false)
        },
    ]
}

/// Build the default registry described by [`default_field_mappings`].
pub fn default_registry() -> Result<FieldRegistry> {
    FieldRegistry::new(default_field_mappings())
}

/// One question per field in [`default_field_mappings`], at Tier 1, routed to
/// the page type where that field is most likely to be found. Production
/// deployments may load a richer, domain-tuned question set instead.
pub fn default_questions() -> Vec<Question> {
    let q = |id: &str, field_key: &str, text: &str, page_types: Vec<PageType>| Question {
        id: id.to_string(),
        text: text.to_string(),
        field_key: field_key.to_string(),
        page_types,
        tier: TIER_CHEAP,
        output_format: "json".to_string(),
        instructions: None,
    };

    vec![
        q("q_company_name", "company_name", "What is the legal or trade name of this company?", vec![PageType::Homepage, PageType::About]),
        q("q_industry", "industry", "What industry or sector does this company operate in?", vec![PageType::Homepage, PageType::About, PageType::Services]),
        q("q_business_model", "business_model", "Is this company B2B, B2C, marketplace, or another business model?", vec![PageType::Homepage, PageType::About]),
        q("q_revenue_estimate", "revenue_estimate", "What is this company's estimated annual revenue?", vec![PageType::About, PageType::Investors]),
        q("q_employees", "employees", "How many employees does this company have?", vec![PageType::About, PageType::Careers, PageType::Team]),
        q("q_hq_address", "hq_address", "What is this company's headquarters street address?", vec![PageType::Contact, PageType::About]),
        q("q_phone", "phone", "What is this company's main phone number?", vec![PageType::Contact]),
        q("q_contacts", "owner_first_name,owner_last_name,owner_title,owner_email,owner_phone,owner_linkedin", "Who is a named owner or executive contact, with title, email, phone, and LinkedIn URL?", vec![PageType::Team, PageType::About, PageType::Contact]),
    ]
}
