//! Catalog synchronization: pages through upstream strains per country and
//! upserts the local projection.

use crate::errors::SyncError;
use crate::fields;
use crate::metrics_defs::{SYNC_RECORDS, SYNC_RUN_DURATION, SYNC_SKIPPED};
use chrono::{DateTime, Duration, Utc};
use drgreen::{DrGreenClient, StrainCache, UpstreamRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use store::Store;
use store::models::Strain;

pub const DEFAULT_COUNTRIES: &[&str] = &["PRT", "ZAF", "THA", "GBR"];

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StrainSyncOptions {
    pub country_codes: Vec<String>,
    /// Single country shorthand, takes precedence over `country_codes`.
    pub country_code: Option<String>,
    pub take: u32,
    pub max_pages: u32,
    pub skip_if_fresh_minutes: Option<i64>,
}

impl Default for StrainSyncOptions {
    fn default() -> Self {
        StrainSyncOptions {
            country_codes: DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect(),
            country_code: None,
            take: 100,
            max_pages: 10,
            skip_if_fresh_minutes: None,
        }
    }
}

impl StrainSyncOptions {
    fn countries(&self) -> Vec<String> {
        match &self.country_code {
            Some(code) if !code.trim().is_empty() => vec![code.trim().to_uppercase()],
            _ if self.country_codes.is_empty() => {
                DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect()
            }
            _ => self
                .country_codes
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
        }
    }

    /// Window for the freshness guard. Rejects values chrono cannot represent.
    fn freshness_window(&self) -> Result<Option<Duration>, SyncError> {
        let Some(minutes) = self.skip_if_fresh_minutes else {
            return Ok(None);
        };
        match Duration::try_minutes(minutes) {
            Some(window) if minutes >= 0 => Ok(Some(window)),
            _ => Err(SyncError::InvalidRequest(format!(
                "skipIfFreshMinutes out of range: {minutes}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CountryReport {
    pub country_code: String,
    pub synced: u32,
    pub errors: u32,
    pub total: u32,
    pub pages: u32,
    /// Set when the country-scoped listing failed and the unscoped one was used.
    pub unscoped_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrainSyncReport {
    pub success: bool,
    pub skipped: bool,
    pub synced: u32,
    pub errors: u32,
    pub total: u32,
    pub countries: Vec<CountryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Converts one upstream record into the local projection.
pub fn strain_from_upstream(record: &Value, now: DateTime<Utc>) -> Result<Strain, SyncError> {
    let id = fields::string(record, fields::STRAIN_ID)
        .ok_or_else(|| SyncError::Transform("strain without id".into()))?;
    let name = fields::string(record, fields::STRAIN_NAME)
        .ok_or_else(|| SyncError::Transform(format!("strain {id} has no name")))?;
    let stock = fields::number(record, fields::STOCK).map(|s| s.round() as i64);

    Ok(Strain {
        sku: fields::string(record, fields::SKU),
        description: fields::string(record, fields::DESCRIPTION),
        strain_type: fields::string(record, fields::STRAIN_TYPE),
        thc_content: fields::number(record, fields::THC),
        cbd_content: fields::number(record, fields::CBD),
        cbg_content: fields::number(record, fields::CBG),
        retail_price: fields::number(record, fields::RETAIL_PRICE),
        availability: fields::boolean(record, fields::AVAILABILITY)
            .unwrap_or_else(|| stock.is_some_and(|s| s > 0)),
        stock,
        image_url: fields::string(record, fields::IMAGE_URL),
        feelings: fields::string_list(record, fields::FEELINGS),
        flavors: fields::string_list(record, fields::FLAVORS),
        helps_with: fields::string_list(record, fields::HELPS_WITH),
        brand_name: fields::string(record, fields::BRAND_NAME),
        is_archived: false,
        updated_at: now,
        id,
        name,
    })
}

pub struct StrainSync {
    client: Arc<DrGreenClient>,
    store: Arc<dyn Store>,
    cache: Arc<StrainCache>,
}

impl StrainSync {
    pub fn new(
        client: Arc<DrGreenClient>,
        store: Arc<dyn Store>,
        cache: Arc<StrainCache>,
    ) -> Self {
        StrainSync {
            client,
            store,
            cache,
        }
    }

    pub async fn run(&self, options: &StrainSyncOptions) -> Result<StrainSyncReport, SyncError> {
        let started = Instant::now();

        if let Some(window) = options.freshness_window()? {
            let latest = self.store.latest_strain_update().await?;
            if let Some(latest) = latest
                && Utc::now() - latest < window
            {
                tracing::info!(
                    %latest,
                    minutes = window.num_minutes(),
                    "Catalog is fresh, skipping strain sync"
                );
                counter!(SYNC_SKIPPED).increment(1);
                return Ok(StrainSyncReport {
                    success: true,
                    skipped: true,
                    last_updated: Some(latest),
                    ..StrainSyncReport::default()
                });
            }
        }

        let mut report = StrainSyncReport {
            success: true,
            ..StrainSyncReport::default()
        };
        for country in options.countries() {
            let country_report = self.sync_country(&country, options).await;
            report.synced += country_report.synced;
            report.errors += country_report.errors;
            report.total += country_report.total;
            report.countries.push(country_report);
        }
        report.success = report.countries.iter().any(|c| c.error.is_none());

        histogram!(SYNC_RUN_DURATION, "job" => "strains")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            synced = report.synced,
            errors = report.errors,
            total = report.total,
            "Strain sync finished"
        );
        Ok(report)
    }

    async fn sync_country(&self, country: &str, options: &StrainSyncOptions) -> CountryReport {
        let mut report = CountryReport {
            country_code: country.to_string(),
            ..CountryReport::default()
        };
        let take = options.take.max(1);
        let mut scope = Some(country);
        let mut page = 1;

        while page <= options.max_pages {
            let body = match self.fetch_page(scope, take, page).await {
                Ok(body) => body,
                // Only a failing first page switches to the unscoped catalog.
                Err(e) if scope.is_some() && page == 1 => {
                    tracing::warn!(
                        country,
                        error = %e,
                        "Country listing failed, retrying unscoped"
                    );
                    report.unscoped_fallback = true;
                    scope = None;
                    continue;
                }
                Err(e) => {
                    tracing::error!(country, page, error = %e, "Strain listing failed");
                    report.error = Some(e.to_string());
                    break;
                }
            };
            report.pages += 1;

            let records = fields::strain_page(&body);
            for record in &records {
                report.total += 1;
                match self.upsert(record).await {
                    Ok(()) => {
                        report.synced += 1;
                        counter!(SYNC_RECORDS, "job" => "strains", "outcome" => "synced")
                            .increment(1);
                    }
                    Err(e) => {
                        report.errors += 1;
                        counter!(SYNC_RECORDS, "job" => "strains", "outcome" => "error")
                            .increment(1);
                        tracing::warn!(country, error = %e, "Skipping strain");
                    }
                }
            }

            let last_page = fields::has_next_page(&body) == Some(false)
                || (records.len() as u32) < take;
            if last_page {
                break;
            }
            page += 1;
        }

        tracing::info!(
            country,
            synced = report.synced,
            errors = report.errors,
            total = report.total,
            "Country synced"
        );
        report
    }

    async fn fetch_page(
        &self,
        country: Option<&str>,
        take: u32,
        page: u32,
    ) -> Result<Value, SyncError> {
        let request = UpstreamRequest::get("/strains")
            .query_opt("countryCode", country)
            .query("orderBy", "desc")
            .query("take", take)
            .query("page", page);
        Ok(self.client.send_json(&request).await?)
    }

    async fn upsert(&self, record: &Value) -> Result<(), SyncError> {
        let strain = strain_from_upstream(record, Utc::now())?;
        self.store.upsert_strain(&strain).await?;
        self.cache.invalidate(&strain.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{client, upstream_config};
    use drgreen::config::CacheConfig;
    use hyper::body::Bytes;
    use serde_json::json;
    use store::MemoryStore;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        sync: StrainSync,
        store: Arc<MemoryStore>,
        cache: Arc<StrainCache>,
    }

    fn fixture(server: &MockServer) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(StrainCache::new(&CacheConfig::default()));
        let sync = StrainSync::new(client(&upstream_config(server)), store.clone(), cache.clone());
        Fixture { sync, store, cache }
    }

    fn options(country: &str, take: u32) -> StrainSyncOptions {
        StrainSyncOptions {
            country_code: Some(country.into()),
            take,
            ..StrainSyncOptions::default()
        }
    }

    #[test]
    fn test_transform() {
        let now = Utc::now();
        let strain = strain_from_upstream(
            &json!({
                "id": "s1",
                "name": "Blue Dream",
                "type": "Hybrid",
                "thcContent": "21%",
                "feelings": ["Relaxed"],
                "strainLocations": [{"retailPrice": 9.5, "stockQuantity": 3}],
            }),
            now,
        )
        .unwrap();
        assert_eq!(strain.thc_content, Some(21.0));
        assert_eq!(strain.retail_price, Some(9.5));
        assert_eq!(strain.stock, Some(3));
        assert!(strain.availability);
        assert_eq!(strain.strain_type.as_deref(), Some("Hybrid"));
        assert_eq!(strain.updated_at, now);

        assert!(matches!(
            strain_from_upstream(&json!({"name": "No id"}), now),
            Err(SyncError::Transform(_))
        ));
    }

    #[test]
    fn test_countries() {
        assert_eq!(StrainSyncOptions::default().countries(), DEFAULT_COUNTRIES);
        assert_eq!(options("zaf", 10).countries(), vec!["ZAF"]);
        let options = StrainSyncOptions {
            country_codes: vec![],
            ..StrainSyncOptions::default()
        };
        assert_eq!(options.countries().len(), 4);
    }

    #[tokio::test]
    async fn test_sync_single_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .and(query_param("countryCode", "PRT"))
            .and(query_param("take", "2"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "strains": [
                        {"id": "s1", "name": "Blue Dream", "thc": 18},
                        {"id": "s2", "name": "Gelato", "thcContent": 22},
                    ],
                    "pageMetaDto": {"hasNextPage": false},
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        let fixture = fixture(&server);
        fixture.cache.insert("s1", Bytes::from_static(b"{}"));

        let report = fixture.sync.run(&options("PRT", 2)).await.unwrap();
        assert!(report.success);
        assert_eq!((report.synced, report.errors, report.total), (2, 0, 2));
        assert_eq!(fixture.store.strain_count(), 2);
        let s2 = fixture.store.get_strain("s2").await.unwrap().unwrap();
        assert_eq!(s2.thc_content, Some(22.0));
        assert!(fixture.cache.get("s1").is_none());
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_and_keeps_archive_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"strains": [{"id": "s1", "name": "Blue Dream", "thc": 18}]}
            })))
            .mount(&server)
            .await;
        let fixture = fixture(&server);

        fixture.sync.run(&options("PRT", 10)).await.unwrap();
        fixture.store.archive_strain("s1");
        fixture.sync.run(&options("PRT", 10)).await.unwrap();

        assert_eq!(fixture.store.strain_count(), 1);
        assert!(fixture.store.get_strain("s1").await.unwrap().unwrap().is_archived);
    }

    #[tokio::test]
    async fn test_bad_record_is_counted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"strains": [{"name": "No id"}, {"id": "s2", "name": "Gelato"}]}
            })))
            .mount(&server)
            .await;
        let fixture = fixture(&server);

        let report = fixture.sync.run(&options("PRT", 10)).await.unwrap();
        assert_eq!((report.synced, report.errors, report.total), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_pagination() {
        let server = MockServer::start().await;
        for (page, has_next) in [("1", true), ("2", false)] {
            Mock::given(method("GET"))
                .and(path("/api/v1/strains"))
                .and(query_param("page", page))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "data": {
                        "strains": [
                            {"id": format!("a{page}"), "name": "A"},
                            {"id": format!("b{page}"), "name": "B"},
                        ],
                        "pageMetaDto": {"hasNextPage": has_next},
                    }
                })))
                .expect(1)
                .mount(&server)
                .await;
        }
        let fixture = fixture(&server);

        let report = fixture.sync.run(&options("PRT", 2)).await.unwrap();
        assert_eq!(report.synced, 4);
        assert_eq!(report.countries[0].pages, 2);
    }

    #[tokio::test]
    async fn test_max_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"strains": [{"id": "a", "name": "A"}]}
            })))
            .expect(3)
            .mount(&server)
            .await;
        let fixture = fixture(&server);

        let options = StrainSyncOptions {
            max_pages: 3,
            ..options("PRT", 1)
        };
        let report = fixture.sync.run(&options).await.unwrap();
        assert_eq!(report.countries[0].pages, 3);
    }

    #[tokio::test]
    async fn test_unscoped_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .and(query_param("countryCode", "THA"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .and(query_param_is_missing("countryCode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"strains": [{"id": "s1", "name": "Blue Dream"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let fixture = fixture(&server);

        let report = fixture.sync.run(&options("THA", 10)).await.unwrap();
        assert!(report.countries[0].unscoped_fallback);
        assert_eq!(report.synced, 1);
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_country_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;
        let fixture = fixture(&server);

        let report = fixture.sync.run(&options("GBR", 10)).await.unwrap();
        assert!(!report.success);
        assert!(report.countries[0].error.is_some());
        assert_eq!(report.total, 0);
    }

    #[tokio::test]
    async fn test_fresh_catalog_skips_network() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let fixture = fixture(&server);
        let strain = strain_from_upstream(&json!({"id": "s1", "name": "A"}), Utc::now()).unwrap();
        fixture.store.upsert_strain(&strain).await.unwrap();

        let options = StrainSyncOptions {
            skip_if_fresh_minutes: Some(60),
            ..StrainSyncOptions::default()
        };
        let report = fixture.sync.run(&options).await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.total, 0);
    }

    #[tokio::test]
    async fn test_failure_after_first_page_stops_country() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .and(query_param("countryCode", "PRT"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "strains": [{"id": "a", "name": "A"}],
                    "pageMetaDto": {"hasNextPage": true},
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .and(query_param("countryCode", "PRT"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .and(query_param_is_missing("countryCode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"strains": [{"id": "global", "name": "G"}]}
            })))
            .expect(0)
            .mount(&server)
            .await;
        let fixture = fixture(&server);

        let report = fixture.sync.run(&options("PRT", 1)).await.unwrap();
        let country = &report.countries[0];
        assert!(!country.unscoped_fallback);
        assert!(country.error.is_some());
        assert_eq!((country.synced, country.pages), (1, 1));
        assert!(fixture.store.get_strain("global").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_freshness_window_out_of_range() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let fixture = fixture(&server);
        let strain = strain_from_upstream(&json!({"id": "s1", "name": "A"}), Utc::now()).unwrap();
        fixture.store.upsert_strain(&strain).await.unwrap();

        for minutes in [i64::MAX, -5] {
            let options = StrainSyncOptions {
                skip_if_fresh_minutes: Some(minutes),
                ..StrainSyncOptions::default()
            };
            assert!(matches!(
                fixture.sync.run(&options).await,
                Err(SyncError::InvalidRequest(_))
            ));
        }
    }
}
