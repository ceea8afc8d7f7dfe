//! Phase 7D: geocode the entity's address and resolve its MSA.

use std::sync::Arc;

use entity_enrich_clients::traits::{GeoPoint, Geocoder, MsaLookup};
use tracing::warn;

pub struct GeoResult {
    pub point: Option<GeoPoint>,
    pub msa: Option<String>,
}

/// Build a one-line address from the entity's structured fields and resolve
/// it to a point and MSA. Missing inputs or lookup failures are non-fatal.
pub async fn geocode_entity(
    geocoder: &Arc<dyn Geocoder>,
    msa_lookup: &Arc<dyn MsaLookup>,
    address_line: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
) -> GeoResult {
    let Some(address) = build_address(address_line, city, state) else {
        return GeoResult { point: None, msa: None };
    };

    let point = match geocoder.geocode(&address).await {
        Ok(point) => point,
        Err(e) => {
            warn!(error = %e, address, "geocode failed");
            None
        }
    };

    let msa = match point {
        Some(point) => match msa_lookup.lookup_msa(point).await {
            Ok(msa) => msa,
            Err(e) => {
                warn!(error = %e, "msa lookup failed");
                None
            }
        },
        None => None,
    };

    GeoResult { point, msa }
}

fn build_address(address_line: Option<&str>, city: Option<&str>, state: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [address_line, city, state].into_iter().flatten().filter(|s| !s.trim().is_empty()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
