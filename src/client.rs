//! Blocking HTTP implementation of [`GameServer`].
//!
//! The decision loop is single-threaded and at most one request is in
//! flight, so plain blocking calls are the whole transport story. Retry
//! scheduling lives in the controller; this layer only classifies failures
//! (retryable or not) and surfaces index skew as its own error.

use crate::{parse_index_skew, DecideAndNext, Error, GameServer, NewGameResponse};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Game server reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGameServer {
    base_url: String,
    client: Client,
}

impl HttpGameServer {
    /// Build a client with the given request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport { message: e.to_string(), retryable: false })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "request");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_http_failure(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("undecodable response from {path}: {e}")))
    }
}

impl GameServer for HttpGameServer {
    fn new_game(&self, scenario: u32, player_id: &str) -> Result<NewGameResponse, Error> {
        self.get_json(
            "/new-game",
            &[
                ("scenario", scenario.to_string()),
                ("playerId", player_id.to_string()),
            ],
        )
    }

    fn decide_and_next(
        &self,
        game_id: &str,
        person_index: u64,
        accept: Option<bool>,
    ) -> Result<DecideAndNext, Error> {
        let mut query = vec![
            ("gameId", game_id.to_string()),
            ("personIndex", person_index.to_string()),
        ];
        if let Some(accept) = accept {
            query.push(("accept", accept.to_string()));
        }
        self.get_json("/decide-and-next", &query)
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::Transport {
        message: e.to_string(),
        retryable: e.is_timeout() || e.is_connect(),
    }
}

/// Map a non-success HTTP status to the error taxonomy: index skew is
/// pulled out of the body (JSON `error`/`reason`/`message` field or raw
/// text), 5xx is retryable, other 4xx is fatal.
fn classify_http_failure(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "reason", "message"]
                .iter()
                .find_map(|k| v.get(k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string());
    if let Some((expected, submitted)) = parse_index_skew(&message) {
        return Error::IndexSkew { expected, submitted };
    }
    Error::Transport {
        message: format!("{status}: {message}"),
        retryable: status.is_server_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_is_extracted_from_json_and_plain_bodies() {
        let e = classify_http_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"Expected person 5, got 7"}"#,
        );
        assert!(matches!(e, Error::IndexSkew { expected: 5, submitted: 7 }));

        let e = classify_http_failure(StatusCode::BAD_REQUEST, "Expected person 2, got 3");
        assert!(matches!(e, Error::IndexSkew { expected: 2, submitted: 3 }));
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let e = classify_http_failure(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(e.is_transient());

        let e = classify_http_failure(StatusCode::FORBIDDEN, r#"{"message":"bad player"}"#);
        assert!(!e.is_transient());
        assert!(e.to_string().contains("bad player"));
    }
}
