use serde::Deserialize;
use serde_json::Value;

use agromap_core::EngineError;

use crate::backend::{ensure_success, network_error, RemoteConfig};

/// One entry of the crops-by-chapter lookup.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CropEntry {
    pub name: String,
}

/// Read-only client for the three chained crop-taxonomy lookups feeding the
/// classification field: chapters, crops per chapter, varieties per crop.
/// Server responses are filtered defensively, malformed entries are dropped
/// rather than failing the whole list.
#[derive(Debug)]
pub struct CropTaxonomyClient {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl CropTaxonomyClient {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn get_json(
        &self,
        path: &str,
        query: Option<(&str, &str)>,
    ) -> Result<Value, EngineError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut request = self.http.get(url).bearer_auth(&self.config.bearer_token);
        if let Some(pair) = query {
            request = request.query(&[pair]);
        }
        let response = request.send().await.map_err(network_error)?;
        let response = ensure_success(response).await?;
        response.json().await.map_err(network_error)
    }

    pub async fn chapters(&self) -> Result<Vec<String>, EngineError> {
        let value = self.get_json("/v1/crops/chapters", None).await?;
        chapters_from(&value)
    }

    pub async fn crops_by_chapter(&self, chapter: &str) -> Result<Vec<CropEntry>, EngineError> {
        let value = self
            .get_json("/v1/crops/by-chapter", Some(("chapter", chapter)))
            .await?;
        named_entries_from(&value)
    }

    pub async fn varieties_by_crop(&self, crop: &str) -> Result<Vec<String>, EngineError> {
        let value = self
            .get_json("/v1/crops/by-crop", Some(("crop", crop)))
            .await?;
        Ok(named_entries_from(&value)?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }
}

fn expect_array(value: &Value) -> Result<&Vec<Value>, EngineError> {
    value.as_array().ok_or_else(|| {
        EngineError::BackendRejected("crop lookup returned an unexpected format".to_string())
    })
}

fn chapters_from(value: &Value) -> Result<Vec<String>, EngineError> {
    Ok(expect_array(value)?
        .iter()
        .filter_map(|item| item.as_str())
        .map(str::to_string)
        .collect())
}

fn named_entries_from(value: &Value) -> Result<Vec<CropEntry>, EngineError> {
    Ok(expect_array(value)?
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?;
            Some(CropEntry {
                name: name.to_string(),
            })
        })
        .collect())
}
