//! HTTP client for the external TLC model-checker endpoint.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::schedule::{Event, State};

/// Default request timeout for model-checker calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by TLC calls. The guiders downgrade all of them to a
/// zero-novelty outcome; nothing here aborts a run.
#[derive(Error, Debug)]
pub enum TlcError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("mismatched response arity: {states} states vs {keys} keys")]
    MismatchedArity { states: usize, keys: usize },
}

#[derive(Deserialize)]
struct ExecuteResponse {
    #[serde(rename = "States")]
    states: Vec<String>,
    #[serde(rename = "Keys")]
    keys: Vec<String>,
}

/// Client for `POST {addr}/execute`.
pub struct TlcClient {
    client: reqwest::Client,
    base: String,
}

impl TlcClient {
    /// `addr` is `host:port`; a scheme prefix is accepted as-is.
    pub fn new(addr: &str) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, base }
    }

    /// Submits an event trace (with the `Reset` sentinel appended) and
    /// returns the model states it maps to, in trace order.
    pub async fn send_trace(&self, events: &[Event]) -> Result<Vec<State>, TlcError> {
        let mut payload = events.to_vec();
        payload.push(Event::Reset);

        let response = self
            .client
            .post(format!("{}/execute", self.base))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TlcError::Status(response.status()));
        }
        let body: ExecuteResponse = response.json().await?;
        if body.states.len() != body.keys.len() {
            return Err(TlcError::MismatchedArity {
                states: body.states.len(),
                keys: body.keys.len(),
            });
        }
        Ok(body
            .states
            .into_iter()
            .zip(body.keys)
            .map(|(repr, key)| State { repr, key })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(TlcClient::new("127.0.0.1:2023").base, "http://127.0.0.1:2023");
        assert_eq!(
            TlcClient::new("http://127.0.0.1:2023/").base,
            "http://127.0.0.1:2023"
        );
    }
}
