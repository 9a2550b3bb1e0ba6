use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::catalog::CatalogEntry;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("manifest request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("manifest endpoint returned {0}")]
    Status(StatusCode),
    #[error("manifest body malformed: {0}")]
    Malformed(String),
}

/// One blocking GET against the remote catalog, no retry. Retry policy, if
/// any, belongs to the caller; a failed fetch simply ends the run.
pub async fn fetch_manifest(client: &Client, url: &str) -> Result<Vec<CatalogEntry>, FetchError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    let body = resp.bytes().await?;
    parse_manifest(&body)
}

/// The manifest is a JSON array of objects, each carrying at least a string
/// `url`; remaining fields ride along as opaque metadata.
pub fn parse_manifest(body: &[u8]) -> Result<Vec<CatalogEntry>, FetchError> {
    let raw: Vec<Map<String, Value>> =
        serde_json::from_slice(body).map_err(|err| FetchError::Malformed(err.to_string()))?;
    let mut entries = Vec::with_capacity(raw.len());
    for mut obj in raw {
        let url = match obj.remove("url") {
            Some(Value::String(url)) if !url.is_empty() => url,
            _ => {
                return Err(FetchError::Malformed(
                    "manifest entry missing string `url`".into(),
                ))
            }
        };
        entries.push(CatalogEntry::from_remote(url, obj));
    }
    Ok(entries)
}
