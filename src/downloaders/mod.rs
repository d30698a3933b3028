//! Package downloads
//!
//! Streams game packages from the store's download endpoint to disk.

mod http;

pub use http::{
    download_to_dir, stream_to_file, truncate_url, FetchStats, HttpClient, ResponseHead, CHUNK_SIZE,
    PROGRESS_INTERVAL,
};

use crate::error::{PipelineError, Result};

/// Build the package URL for `app_id`: `<api_url>?appid=<id>&auth_code=<code>`
pub fn package_url(api_url: &str, app_id: &str, auth_code: &str) -> Result<String> {
    if api_url.trim().is_empty() || auth_code.trim().is_empty() {
        return Err(PipelineError::Config(
            "download endpoint or auth code is not configured".into(),
        ));
    }

    let query = serde_urlencoded::to_string(&[("appid", app_id), ("auth_code", auth_code)][..])
        .map_err(|e| PipelineError::Config(format!("cannot encode download query: {}", e)))?;
    let separator = if api_url.contains('?') { '&' } else { '?' };
    Ok(format!("{}{}{}", api_url, separator, query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_url() {
        assert_eq!(
            package_url("https://dl.example/secure_download", "620", "ABC").unwrap(),
            "https://dl.example/secure_download?appid=620&auth_code=ABC"
        );
    }

    #[test]
    fn test_package_url_existing_query_and_escaping() {
        assert_eq!(
            package_url("https://dl.example/get?v=2", "10", "a b&c").unwrap(),
            "https://dl.example/get?v=2&appid=10&auth_code=a+b%26c"
        );
    }

    #[test]
    fn test_package_url_requires_config() {
        assert!(matches!(
            package_url("", "1", "x"),
            Err(PipelineError::Config(_))
        ));
        assert!(package_url("https://dl.example", "1", " ").is_err());
    }
}
