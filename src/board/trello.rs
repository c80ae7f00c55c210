//! Trello REST implementation of `BoardSource`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::board::{BoardSource, Card, RawFieldDefinition};
use crate::error::{ConfigError, FetchError};

/// Board payload for the list's parent board, with custom-field definitions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardPayload {
    #[serde(default)]
    short_link: Option<String>,
    #[serde(default)]
    custom_fields: Vec<RawFieldDefinition>,
}

/// Fetches lists, cards, and custom-field definitions from the Trello API.
pub struct TrelloSource {
    base_url: String,
    api_key: SecretString,
    token: SecretString,
    timeout: Duration,
    client: reqwest::Client,
}

impl TrelloSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        token: SecretString,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            token,
            timeout,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/1/{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        list_id: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(self.api_url(path))
            .query(&[
                ("key", self.api_key.expose_secret()),
                ("token", self.token.expose_secret()),
            ])
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(list_id, e))?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                list_id: list_id.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| self.transport_error(list_id, e))?;
        parse_payload(list_id, &body)
    }

    fn transport_error(&self, list_id: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                list_id: list_id.to_string(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Unreachable {
                list_id: list_id.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn board(&self, list_id: &str) -> Result<BoardPayload, FetchError> {
        self.get_json(
            list_id,
            &format!("lists/{list_id}/board"),
            &[("fields", "id,shortLink"), ("customFields", "true")],
        )
        .await
    }
}

fn parse_payload<T: DeserializeOwned>(list_id: &str, body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Malformed {
        list_id: list_id.to_string(),
        reason: e.to_string(),
    })
}

fn board_link(list_id: &str, payload: &BoardPayload) -> Result<String, FetchError> {
    payload
        .short_link
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("https://trello.com/b/{s}"))
        .ok_or_else(|| FetchError::Malformed {
            list_id: list_id.to_string(),
            reason: "board payload has no shortLink".into(),
        })
}

#[async_trait]
impl BoardSource for TrelloSource {
    async fn fetch_cards(&self, list_id: &str) -> Result<Vec<Card>, FetchError> {
        self.get_json(
            list_id,
            &format!("lists/{list_id}/cards"),
            &[("customFieldItems", "true")],
        )
        .await
    }

    async fn fetch_schema(&self, list_id: &str) -> Result<Vec<RawFieldDefinition>, FetchError> {
        Ok(self.board(list_id).await?.custom_fields)
    }

    async fn board_url(&self, list_id: &str) -> Result<String, FetchError> {
        let board = self.board(list_id).await?;
        board_link(list_id, &board)
    }
}
