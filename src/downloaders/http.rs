//! HTTP client and streaming download with throttled progress reporting

use crate::error::{IoResultExt, PipelineError, Result};
use crate::pipeline::events::{percent_of, EventSink};
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum time to wait for data between chunks
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write buffer size; the file is written in chunks of at most this size
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// How often progress notifications are emitted while streaming
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Mozilla/5.0 (compatible; games-store/", env!("CARGO_PKG_VERSION"), ")"))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET `url`, failing on any non-2xx status
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus {
                status: status.as_u16(),
                url: truncate_url(url),
            });
        }
        Ok(response)
    }
}

/// Response metadata available before the body is read
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    pub content_type: String,
    pub content_disposition: String,
    /// `None` when the server sent no (or a zero) content length
    pub content_length: Option<u64>,
}

impl ResponseHead {
    pub fn from_response(response: &reqwest::Response) -> Self {
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase()
        };

        Self {
            content_type: header(reqwest::header::CONTENT_TYPE),
            content_disposition: header(reqwest::header::CONTENT_DISPOSITION),
            content_length: response.content_length().filter(|&len| len > 0),
        }
    }
}

/// Outcome of a completed download
#[derive(Debug, Clone)]
pub struct FetchStats {
    pub path: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl FetchStats {
    /// Average throughput over the whole download in MB/s
    pub fn average_mb_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / BYTES_PER_MB / secs
        } else {
            0.0
        }
    }
}

/// Turns a stream of chunk sizes into time-throttled notifications.
///
/// Percentage is only reported when the total size is known; byte counts and
/// speed are always reported.
struct ProgressThrottle<'a> {
    sink: &'a EventSink,
    total: Option<u64>,
    interval: Duration,
    downloaded: u64,
    last_emit: Instant,
    last_emit_bytes: u64,
    last_percent: Option<u8>,
}

impl<'a> ProgressThrottle<'a> {
    fn new(sink: &'a EventSink, total: Option<u64>, interval: Duration) -> Self {
        Self {
            sink,
            total,
            interval,
            downloaded: 0,
            last_emit: Instant::now(),
            last_emit_bytes: 0,
            last_percent: None,
        }
    }

    fn record(&mut self, len: u64) {
        self.downloaded += len;
        let now = Instant::now();
        let since_last = now.duration_since(self.last_emit);
        if since_last < self.interval {
            return;
        }

        let secs = since_last.as_secs_f64();
        if secs > 0.0 {
            let bytes = self.downloaded - self.last_emit_bytes;
            self.sink.speed(bytes as f64 / BYTES_PER_MB / secs);
        }
        self.emit_counts();
        self.last_emit = now;
        self.last_emit_bytes = self.downloaded;
    }

    fn emit_counts(&mut self) {
        if let Some(total) = self.total {
            let percent = percent_of(self.downloaded, total);
            if self.last_percent != Some(percent) {
                self.sink.progress(percent);
                self.last_percent = Some(percent);
            }
        }
        self.sink.downloaded(
            self.downloaded / (1024 * 1024),
            self.total.map(|t| t / (1024 * 1024)),
        );
    }

    fn finish(&mut self) {
        self.emit_counts();
    }
}

/// Write every chunk of `stream` to `path`, reporting progress to `sink`.
///
/// Progress is emitted at most once per `interval` plus once at the end.
/// A partially written file is removed when the stream fails.
pub async fn stream_to_file<S, B, E>(
    stream: S,
    path: &Path,
    total: Option<u64>,
    sink: &EventSink,
    interval: Duration,
) -> Result<FetchStats>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<PipelineError>,
{
    let result = write_stream(stream, path, total, sink, interval).await;
    if result.is_err() {
        crate::paths::remove_file_best_effort(path);
    }
    result
}

async fn write_stream<S, B, E>(
    stream: S,
    path: &Path,
    total: Option<u64>,
    sink: &EventSink,
    interval: Duration,
) -> Result<FetchStats>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<PipelineError>,
{
    let mut stream = std::pin::pin!(stream);
    let started = Instant::now();
    let file = tokio::fs::File::create(path)
        .await
        .io_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = tokio::io::BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut throttle = ProgressThrottle::new(sink, total, interval);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        let bytes = chunk.as_ref();
        if bytes.is_empty() {
            continue;
        }
        writer
            .write_all(bytes)
            .await
            .io_context(|| format!("Failed to write {}", path.display()))?;
        throttle.record(bytes.len() as u64);
    }

    writer
        .flush()
        .await
        .io_context(|| format!("Failed to flush {}", path.display()))?;
    throttle.finish();

    Ok(FetchStats {
        path: path.to_path_buf(),
        bytes: throttle.downloaded,
        elapsed: started.elapsed(),
    })
}

/// Download `url` into `dir`.
///
/// `name_for` picks the file name once the response headers are known; an
/// existing file with that name is replaced, or sidestepped with a timestamp
/// suffix when it cannot be deleted.
pub async fn download_to_dir<F>(
    client: &HttpClient,
    url: &str,
    dir: &Path,
    name_for: F,
    sink: &EventSink,
) -> Result<FetchStats>
where
    F: FnOnce(&ResponseHead) -> String,
{
    tokio::fs::create_dir_all(dir)
        .await
        .io_context(|| format!("Failed to create {}", dir.display()))?;

    let response = client.get(url).await?;
    let head = ResponseHead::from_response(&response);
    debug!(
        "Response: content-type='{}' disposition='{}' length={:?}",
        head.content_type, head.content_disposition, head.content_length
    );

    let file_name = name_for(&head);
    let path = crate::paths::resolve_destination(dir, &file_name, |p| std::fs::remove_file(p))
        .io_context(|| format!("Failed to prepare {}", dir.join(&file_name).display()))?;

    info!("Downloading {} -> {}", truncate_url(url), path.display());
    let stats = stream_to_file(
        response.bytes_stream(),
        &path,
        head.content_length,
        sink,
        PROGRESS_INTERVAL,
    )
    .await?;

    info!(
        "Downloaded {} bytes in {:.1}s ({:.2} MB/s)",
        stats.bytes,
        stats.elapsed.as_secs_f64(),
        stats.average_mb_per_sec()
    );
    Ok(stats)
}

/// Truncate URL for logs and error messages; drops the query string, which
/// carries the auth code
pub fn truncate_url(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    if without_query.len() > 80 {
        let mut end = 77;
        while !without_query.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &without_query[..end])
    } else {
        without_query.to_string()
    }
}
