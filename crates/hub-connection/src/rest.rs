//! Hub REST API client.
//!
//! Covers the few calls the WebSocket API has no equivalent for: firing an
//! event with a payload and reading or overwriting a single entity state.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use homelink_protocol::EntityState;

use crate::settings::HubSettings;

/// Host name under which the hub is reached from inside an add-on.
const SUPERVISOR_HOST: &str = "supervisor";
const SUPERVISOR_API_URL: &str = "http://supervisor/core/api";

/// Everything but RFC 3986 unreserved characters, so entity ids keep their dot.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid access token")]
    InvalidToken,

    #[error("request cancelled")]
    Cancelled,
}

/// Authenticated client for `/api`.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(settings: &HubSettings) -> Result<Self, RestError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", settings.token))
                .map_err(|_| RestError::InvalidToken)?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: api_url(settings),
        })
    }

    /// GETs `api_path` and deserializes the body. A non-success status is an
    /// error.
    pub async fn get<T: DeserializeOwned>(
        &self,
        api_path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, RestError> {
        let url = format!("{}/{api_path}", self.base_url);
        trace!(%url, "GET");
        let body = self.execute(self.http.get(&url), cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// POSTs `data` as JSON to `api_path`. An empty response body yields
    /// `None`.
    pub async fn post<T, D>(
        &self,
        api_path: &str,
        data: Option<&D>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, RestError>
    where
        T: DeserializeOwned,
        D: Serialize + ?Sized,
    {
        let url = format!("{}/{api_path}", self.base_url);
        trace!(%url, "POST");
        let mut request = self.http.post(&url);
        if let Some(data) = data {
            request = request.json(data);
        }

        let body = self.execute(request, cancel).await?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Fires `event_type` on the hub's event bus.
    pub async fn send_event(
        &self,
        event_type: &str,
        data: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<(), RestError> {
        let path = format!("events/{}", encode(event_type));
        self.post::<Value, _>(&path, data, cancel).await?;
        Ok(())
    }

    pub async fn get_entity_state(
        &self,
        entity_id: &str,
        cancel: &CancellationToken,
    ) -> Result<EntityState, RestError> {
        self.get(&format!("states/{}", encode(entity_id)), cancel)
            .await
    }

    /// Overwrites the state the hub reports for `entity_id`.
    ///
    /// This only changes the hub's record; the device itself is not told.
    /// Use a service call to control a device.
    pub async fn set_entity_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<EntityState>, RestError> {
        let mut data = json!({ "state": state });
        if let Some(attributes) = attributes {
            data["attributes"] = attributes.clone();
        }
        self.post(&format!("states/{}", encode(entity_id)), Some(&data), cancel)
            .await
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RestError> {
        let response = async {
            let resp = request.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(RestError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(resp.bytes().await?.to_vec())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RestError::Cancelled),
            response = response => response,
        }
    }
}

/// Base URL of the REST API for `settings`.
pub fn api_url(settings: &HubSettings) -> String {
    if settings.host == SUPERVISOR_HOST {
        return SUPERVISOR_API_URL.to_string();
    }
    let scheme = if settings.ssl { "https" } else { "http" };
    format!("{scheme}://{}:{}/api", settings.host, settings.port)
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}
