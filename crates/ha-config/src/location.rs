//! Location and elevation detection
//!
//! Used to fill in core settings the user left out. Every lookup is bounded
//! by [`LOOKUP_TIMEOUT`]; transport errors, error statuses and unexpected
//! bodies all come back as `None`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const IPAPI_URL: &str = "https://ipapi.co/json/";
pub const IP_API_URL: &str = "http://ip-api.com/json";
pub const ELEVATION_URL: &str = "https://api.open-elevation.com/api/v1/lookup";

pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Countries that do not use the metric system
const NON_METRIC_COUNTRIES: [&str; 3] = ["US", "MM", "LR"];

/// Location of this installation as seen by a geo-IP service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub ip: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region_code: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub zip_code: Option<String>,
    pub time_zone: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub use_metric: bool,
}

/// Network lookups for missing core settings
#[async_trait]
pub trait LocationService: Send + Sync {
    async fn detect_location_info(&self) -> Option<LocationInfo>;

    /// Elevation in meters
    async fn get_elevation(&self, latitude: f64, longitude: f64) -> Option<i32>;
}

/// Response of ipapi.co
#[derive(Debug, Deserialize)]
struct IpapiResponse {
    ip: Option<String>,
    country: Option<String>,
    country_name: Option<String>,
    region_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    postal: Option<String>,
    timezone: Option<String>,
    latitude: f64,
    longitude: f64,
}

/// Response of ip-api.com
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    query: Option<String>,
    country_code: Option<String>,
    country: Option<String>,
    region: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    zip: Option<String>,
    timezone: Option<String>,
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    results: Vec<ElevationResult>,
}

#[derive(Debug, Deserialize)]
struct ElevationResult {
    elevation: f64,
}

fn uses_metric(country_code: Option<&str>) -> bool {
    !country_code.is_some_and(|code| NON_METRIC_COUNTRIES.contains(&code))
}

impl From<IpapiResponse> for LocationInfo {
    fn from(raw: IpapiResponse) -> Self {
        Self {
            use_metric: uses_metric(raw.country.as_deref()),
            ip: raw.ip,
            country_code: raw.country,
            country_name: raw.country_name,
            region_code: raw.region_code,
            region_name: raw.region,
            city: raw.city,
            zip_code: raw.postal,
            time_zone: raw.timezone,
            latitude: raw.latitude,
            longitude: raw.longitude,
        }
    }
}

impl From<IpApiResponse> for LocationInfo {
    fn from(raw: IpApiResponse) -> Self {
        Self {
            use_metric: uses_metric(raw.country_code.as_deref()),
            ip: raw.query,
            country_code: raw.country_code,
            country_name: raw.country,
            region_code: raw.region,
            region_name: raw.region_name,
            city: raw.city,
            zip_code: raw.zip,
            time_zone: raw.timezone,
            latitude: raw.lat,
            longitude: raw.lon,
        }
    }
}

/// [`LocationService`] backed by public geo-IP and elevation APIs
#[derive(Debug, Clone)]
pub struct HttpLocationService {
    client: Client,
    ipapi_url: String,
    ip_api_url: String,
    elevation_url: String,
}

impl HttpLocationService {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_endpoints(IPAPI_URL, IP_API_URL, ELEVATION_URL)
    }

    /// Use other endpoints, e.g. a local mirror
    pub fn with_endpoints(
        ipapi_url: impl Into<String>,
        ip_api_url: impl Into<String>,
        elevation_url: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        Ok(Self {
            client,
            ipapi_url: ipapi_url.into(),
            ip_api_url: ip_api_url.into(),
            elevation_url: elevation_url.into(),
        })
    }

    async fn fetch_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Option<T> {
        let response = match request.timeout(LOOKUP_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Location lookup failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(status = %response.status(), url = %response.url(), "Location lookup rejected");
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!("Unexpected location lookup response: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl LocationService for HttpLocationService {
    async fn detect_location_info(&self) -> Option<LocationInfo> {
        let ipapi: Option<IpapiResponse> =
            self.fetch_json(self.client.get(&self.ipapi_url)).await;
        if let Some(raw) = ipapi {
            return Some(raw.into());
        }

        let ip_api: Option<IpApiResponse> =
            self.fetch_json(self.client.get(&self.ip_api_url)).await;
        ip_api.map(LocationInfo::from)
    }

    async fn get_elevation(&self, latitude: f64, longitude: f64) -> Option<i32> {
        let request = self
            .client
            .get(&self.elevation_url)
            .query(&[("locations", format!("{},{}", latitude, longitude))]);
        let body: ElevationResponse = self.fetch_json(request).await?;
        body.results.first().map(|result| result.elevation.trunc() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> HttpLocationService {
        HttpLocationService::with_endpoints(
            format!("{}/ipapi", server.uri()),
            format!("{}/ip-api", server.uri()),
            format!("{}/elevation", server.uri()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_detect_with_ipapi() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipapi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "1.2.3.4",
                "city": "Testville",
                "region": "New York",
                "region_code": "NY",
                "country": "US",
                "country_name": "United States",
                "postal": "10001",
                "timezone": "America/New_York",
                "latitude": 40.0,
                "longitude": -73.0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let info = service(&server).detect_location_info().await.unwrap();

        assert_eq!(info.city.as_deref(), Some("Testville"));
        assert_eq!(info.time_zone.as_deref(), Some("America/New_York"));
        assert_eq!(info.latitude, 40.0);
        assert!(!info.use_metric);
    }

    #[tokio::test]
    async fn test_detect_falls_back_to_ip_api() {
        let server = MockServer::start().await;
        Mock::given(path("/ipapi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": true,
                "reason": "RateLimited"
            })))
            .mount(&server)
            .await;
        Mock::given(path("/ip-api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": "5.6.7.8",
                "countryCode": "NL",
                "country": "Netherlands",
                "regionName": "North Holland",
                "city": "Amsterdam",
                "timezone": "Europe/Amsterdam",
                "lat": 52.37,
                "lon": 4.89
            })))
            .mount(&server)
            .await;

        let info = service(&server).detect_location_info().await.unwrap();

        assert_eq!(info.country_code.as_deref(), Some("NL"));
        assert_eq!(info.region_name.as_deref(), Some("North Holland"));
        assert_eq!(info.longitude, 4.89);
        assert!(info.use_metric);
    }

    #[tokio::test]
    async fn test_detect_failure_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(service(&server).detect_location_info().await.is_none());
    }

    #[tokio::test]
    async fn test_elevation() {
        let server = MockServer::start().await;
        Mock::given(path("/elevation"))
            .and(query_param("locations", "40.5,-73"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"latitude": 40.5, "longitude": -73.0, "elevation": 101.7}]
            })))
            .mount(&server)
            .await;

        assert_eq!(service(&server).get_elevation(40.5, -73.0).await, Some(101));
    }

    #[tokio::test]
    async fn test_elevation_failure_is_none() {
        let server = MockServer::start().await;
        Mock::given(path("/elevation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        assert_eq!(service(&server).get_elevation(1.0, 2.0).await, None);

        let unreachable =
            HttpLocationService::with_endpoints("http://127.0.0.1:9", "http://127.0.0.1:9", "http://127.0.0.1:9")
                .unwrap();
        assert_eq!(unreachable.get_elevation(1.0, 2.0).await, None);
    }
}
