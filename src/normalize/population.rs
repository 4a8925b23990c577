use super::schema::{CanonicalSchema, FieldSpec};
use crate::listing::ListingError;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// DataUSA national population by year
pub const POPULATION_URL: &str = "https://honolulu-api.datausa.io/tesseract/data.jsonrecords?cube=acs_yg_total_population_1&drilldowns=Year%2CNation&locale=en&measures=Population";

/// Fixed object key of the population snapshot
pub const POPULATION_KEY: &str = "us_population.json";

/// Canonical shape of a population row
pub fn population_schema() -> CanonicalSchema {
    CanonicalSchema::new()
        .field(FieldSpec::text("nation_id").alias("Nation ID").alias("ID Nation").required())
        .field(FieldSpec::text("nation").alias("Nation").required())
        .field(FieldSpec::integer("year").alias("Year").alias("ID Year").required())
        .field(FieldSpec::integer("population").alias("Population").required())
        .field(FieldSpec::text("slug_nation").alias("Slug Nation"))
}

/// Fetches the raw population payload
#[derive(Debug, Clone)]
pub struct PopulationClient {
    client: Client,
    url: String,
}

impl PopulationClient {
    pub fn new(url: &str, user_agent: &str, timeout: Duration) -> Result<Self, ListingError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET the payload as untyped JSON. Validation happens in the normalizer.
    pub async fn fetch_payload(&self) -> Result<Value, ListingError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ListingError::Unavailable(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Unavailable(format!(
                "{} returned {}",
                self.url, status
            )));
        }

        let payload: Value = response.json().await?;
        debug!(url = %self.url, "Fetched population payload");
        Ok(payload)
    }
}
