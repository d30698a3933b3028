//! Store catalog and Steam metadata
//!
//! The store API answers `{"status": "success", "jogos": [{"nome", "appid"}]}`
//! for listings; anything else carries a `message`. Game names and artwork
//! come from Steam.

pub mod cache;

pub use cache::{ArtworkCache, LruCache, ARTWORK_CACHE_CAPACITY};

use crate::downloaders::HttpClient;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Steam store app details endpoint
pub const STEAM_APP_DETAILS_URL: &str = "http://store.steampowered.com/api/appdetails";

/// Steam CDN root for app images
pub const STEAM_CDN_URL: &str = "https://cdn.cloudflare.steamstatic.com/steam/apps";

/// Artwork variants, most preferred first
const ARTWORK_FILES: &[&str] = &["library_600x900.jpg", "header.jpg"];

/// Searches shorter than this return nothing without asking the server
pub const MIN_QUERY_LEN: usize = 3;

/// One game in a store listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogGame {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub appid: String,
}

/// Details shown for one game
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameDetails {
    pub app_id: String,
    pub name: String,
    pub short_description: String,
    pub header_image: Option<String>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub release_date: Option<String>,
    /// Keys left in the store; `None` when the store could not be asked
    pub keys_available: Option<u64>,
}

/// Client for the store API and Steam metadata
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: HttpClient,
    base_url: Option<String>,
    steam_details_url: String,
    cdn_url: String,
    artwork: ArtworkCache,
}

impl CatalogClient {
    /// `base_url` is the store API root (`api_url_site`); listing calls fail
    /// without it, Steam lookups still work.
    pub fn new(http: HttpClient, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            steam_details_url: STEAM_APP_DETAILS_URL.to_string(),
            cdn_url: STEAM_CDN_URL.to_string(),
            artwork: ArtworkCache::default(),
        }
    }

    /// Point Steam lookups at other hosts
    pub fn with_steam_endpoints(mut self, details_url: &str, cdn_url: &str) -> Self {
        self.steam_details_url = details_url.to_string();
        self.cdn_url = cdn_url.trim_end_matches('/').to_string();
        self
    }

    pub fn artwork_cache(&self) -> &ArtworkCache {
        &self.artwork
    }

    fn store_url(&self, path: &str) -> Result<String> {
        let base = self
            .base_url
            .as_deref()
            .context("Store API URL is not configured (api_url_site)")?;
        Ok(format!("{}/{}", base, path))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .await
            .with_context(|| format!("Request failed: {}", crate::downloaders::truncate_url(url)))?;
        response
            .json::<Value>()
            .await
            .with_context(|| format!("Invalid JSON from {}", crate::downloaders::truncate_url(url)))
    }

    /// Search the store; queries under [`MIN_QUERY_LEN`] characters return
    /// nothing
    pub async fn search(&self, query: &str) -> Result<Vec<CatalogGame>> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Ok(Vec::new());
        }
        let params = serde_urlencoded::to_string(&[("q", query)][..])?;
        let url = self.store_url(&format!("buscar-jogos-loja?{}", params))?;
        parse_store_games(self.get_json(&url).await?)
    }

    /// Games shown on the store front page
    pub async fn public_games(&self) -> Result<Vec<CatalogGame>> {
        let url = self.store_url("jogos-publicos")?;
        parse_store_games(self.get_json(&url).await?)
    }

    /// Keys left for `app_id`
    pub async fn availability(&self, app_id: &str) -> Result<u64> {
        let url = self.store_url(&format!("verificar-jogo/{}", app_id))?;
        let value = self.get_json(&url).await?;
        check_status(&value)?;
        value
            .get("keys_disponiveis")
            .and_then(Value::as_u64)
            .context("Store response has no keys_disponiveis")
    }

    /// Steam details plus store availability
    pub async fn details(&self, app_id: &str) -> Result<GameDetails> {
        let url = steam_details_url(&self.steam_details_url, app_id)?;
        let mut details = parse_app_details(&self.get_json(&url).await?, app_id)?;

        if self.base_url.is_some() {
            match self.availability(app_id).await {
                Ok(keys) => details.keys_available = Some(keys),
                Err(e) => warn!("Could not check availability of {}: {:#}", app_id, e),
            }
        }
        Ok(details)
    }

    /// Steam's name for `app_id`, or `None` if Steam does not know it
    pub async fn app_name(&self, app_id: &str) -> Option<String> {
        let url = steam_details_url(&self.steam_details_url, app_id).ok()?;
        let value = self.get_json(&url).await.ok()?;
        parse_app_details(&value, app_id).ok().map(|d| d.name)
    }

    /// Cover art for `app_id`: the portrait library image, else the header
    pub async fn artwork(&self, app_id: &str) -> Result<Option<Arc<[u8]>>> {
        if let Some(image) = self.artwork.get(app_id) {
            return Ok(Some(image));
        }

        for file in ARTWORK_FILES {
            let url = format!("{}/{}/{}", self.cdn_url, app_id, file);
            match self.http.get(&url).await {
                Ok(response) => {
                    let bytes = response
                        .bytes()
                        .await
                        .with_context(|| format!("Failed to read {}", url))?;
                    if bytes.is_empty() {
                        continue;
                    }
                    let image: Arc<[u8]> = Arc::from(bytes.as_ref());
                    self.artwork.insert(app_id, Arc::clone(&image));
                    return Ok(Some(image));
                }
                Err(e) => debug!("No artwork at {}: {}", url, e),
            }
        }
        Ok(None)
    }
}

/// Resolve a display name for `app_id` from Steam, falling back to
/// `game_<id>`
pub async fn resolve_game_name(http: &HttpClient, app_id: &str) -> String {
    let client = CatalogClient::new(http.clone(), None);
    match client.app_name(app_id).await {
        Some(name) => name,
        None => {
            warn!("Steam has no name for {}, using a placeholder", app_id);
            format!("game_{}", app_id)
        }
    }
}

fn steam_details_url(base: &str, app_id: &str) -> Result<String> {
    Ok(format!(
        "{}?{}",
        base,
        serde_urlencoded::to_string(&[("appids", app_id)][..])?
    ))
}

fn check_status(value: &Value) -> Result<()> {
    match value.get("status").and_then(Value::as_str) {
        Some("success") => Ok(()),
        _ => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("Store error: {}", message)
        }
    }
}

/// Extract the `jogos` list from a store response
pub fn parse_store_games(value: Value) -> Result<Vec<CatalogGame>> {
    check_status(&value)?;
    let games = value.get("jogos").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(games).context("Unexpected game list format")
}

/// Extract details for `app_id` from a Steam appdetails response
pub fn parse_app_details(value: &Value, app_id: &str) -> Result<GameDetails> {
    let entry = value
        .get(app_id)
        .with_context(|| format!("Steam returned nothing for {}", app_id))?;
    if !entry.get("success").and_then(Value::as_bool).unwrap_or(false) {
        bail!("Steam has no details for {}", app_id);
    }
    let data = entry.get("data").context("Steam details have no data")?;

    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
    let list = |key: &str| -> Vec<String> {
        data.get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    Ok(GameDetails {
        app_id: app_id.to_string(),
        name: text("name").context("Steam details have no name")?,
        short_description: text("short_description").unwrap_or_default(),
        header_image: text("header_image"),
        developers: list("developers"),
        publishers: list("publishers"),
        release_date: data
            .get("release_date")
            .and_then(|r| r.get("date"))
            .and_then(Value::as_str)
            .map(str::to_string),
        keys_available: None,
    })
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_store_games() {
        let games = parse_store_games(json!({
            "status": "success",
            "jogos": [{"nome": "Portal 2", "appid": 620}, {"nome": "Hades", "appid": "1145360"}]
        }))
        .unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].appid, "620");
        assert_eq!(games[1].name, "Hades");
    }

    #[test]
    fn test_parse_store_error() {
        let err = parse_store_games(json!({"status": "error", "message": "token expirado"}))
            .unwrap_err();
        assert!(err.to_string().contains("token expirado"));
    }

    #[test]
    fn test_parse_store_empty_list() {
        assert!(parse_store_games(json!({"status": "success"})).unwrap().is_empty());
    }

    #[test]
    fn test_parse_app_details() {
        let value = json!({
            "620": {
                "success": true,
                "data": {
                    "name": "Portal 2",
                    "short_description": "Puzzles",
                    "developers": ["Valve"],
                    "release_date": {"coming_soon": false, "date": "18 Apr, 2011"}
                }
            }
        });
        let details = parse_app_details(&value, "620").unwrap();
        assert_eq!(details.name, "Portal 2");
        assert_eq!(details.developers, vec!["Valve"]);
        assert!(details.publishers.is_empty());
        assert_eq!(details.release_date.as_deref(), Some("18 Apr, 2011"));
    }

    #[test]
    fn test_parse_app_details_unknown() {
        let value = json!({"1": {"success": false}});
        assert!(parse_app_details(&value, "1").is_err());
        assert!(parse_app_details(&value, "2").is_err());
    }

    #[tokio::test]
    async fn test_short_query_makes_no_request() {
        // No base URL: any request would fail, so success proves none was made
        let client = CatalogClient::new(HttpClient::new().unwrap(), None);
        assert!(client.search("ab").await.unwrap().is_empty());
        assert!(client.search("  x ").await.unwrap().is_empty());
        assert!(client.search("portal").await.is_err());
    }

    #[test]
    fn test_steam_details_url() {
        assert_eq!(
            steam_details_url(STEAM_APP_DETAILS_URL, "620").unwrap(),
            "http://store.steampowered.com/api/appdetails?appids=620"
        );
    }
}
