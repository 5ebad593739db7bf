//! Coarse positioning from an IP geolocation service, for hosts without a
//! GNSS receiver or OS location service.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{PositionError, PositionOptions, PositionProvider, PositionStream, RawPosition};

/// IP lookups resolve to roughly city level.
const IP_ACCURACY_M: f64 = 5000.0;

/// IP-derived positions change rarely; poll slowly while watching.
const WATCH_INTERVAL_SECS: u64 = 60;

/// Accepts both `{lat, lon}` (ip-api style) and `{latitude, longitude}` (ipapi style) bodies.
#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "longitude", alias = "lng")]
    lon: Option<f64>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Clone)]
pub struct IpPositionProvider {
    client: Client,
    url: String,
}

impl IpPositionProvider {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("saludmap/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn lookup(&self, timeout: Duration) -> Result<RawPosition, PositionError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_request_error)?;

        match response.status().as_u16() {
            200..=299 => {}
            401 | 403 => return Err(PositionError::PermissionDenied),
            status => {
                return Err(PositionError::Unavailable(format!(
                    "IP lookup returned status {}",
                    status
                )))
            }
        }

        let body: IpLookupResponse = response
            .json()
            .await
            .map_err(|e| PositionError::Unknown(format!("Invalid IP lookup response: {}", e)))?;

        if body.status.as_deref() == Some("fail") {
            return Err(PositionError::Unavailable(
                body.message.unwrap_or_else(|| "IP lookup failed".to_string()),
            ));
        }

        match (body.lat, body.lon) {
            (Some(lat), Some(lng)) => {
                debug!(lat, lng, "IP lookup resolved");
                Ok(RawPosition {
                    lat,
                    lng,
                    accuracy: Some(IP_ACCURACY_M),
                })
            }
            _ => Err(PositionError::Unavailable(
                "IP lookup returned no coordinates".to_string(),
            )),
        }
    }
}

fn map_request_error(e: reqwest::Error) -> PositionError {
    if e.is_timeout() {
        PositionError::Timeout
    } else if e.is_connect() {
        PositionError::Unavailable(format!("IP lookup unreachable: {}", e))
    } else {
        PositionError::Unknown(e.to_string())
    }
}

#[async_trait]
impl PositionProvider for IpPositionProvider {
    async fn current_position(&self, options: PositionOptions) -> Result<RawPosition, PositionError> {
        self.lookup(options.timeout).await
    }

    fn watch_position(&self, options: PositionOptions) -> PositionStream {
        let provider = self.clone();
        let interval = Duration::from_secs(WATCH_INTERVAL_SECS).max(options.maximum_age);

        Box::pin(stream::unfold(true, move |first| {
            let provider = provider.clone();
            async move {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                Some((provider.lookup(options.timeout).await, false))
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_both_response_styles() {
        let a: IpLookupResponse =
            serde_json::from_str(r#"{"status":"success","lat":-34.6,"lon":-58.38}"#).unwrap();
        assert_eq!((a.lat, a.lon), (Some(-34.6), Some(-58.38)));

        let b: IpLookupResponse =
            serde_json::from_str(r#"{"latitude":-34.6,"longitude":-58.38}"#).unwrap();
        assert_eq!((b.lat, b.lon), (Some(-34.6), Some(-58.38)));
    }
}
