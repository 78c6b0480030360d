//! Streaming file fetcher for record downloads.

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::StatusCode;
use tokio::io::{AsyncWriteExt as _, BufWriter};

// Larger buffer size to reduce the number of flushes.
const BUFFER_WRITER_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("failed to write the downloaded file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct Fetched {
    /// Full path of the written file.
    pub path: Utf8PathBuf,
    /// File name the fetcher settled on.
    pub file_name: String,
    /// Bytes written to disk.
    pub size: u64,
}

/// Streams `url` into a file under `dest_dir`.
///
/// The file name comes from the `Content-Disposition` header when present,
/// from the URL path otherwise, and from `fallback_name` as a last resort.
pub async fn fetch_to_dir(
    http: &reqwest::Client,
    url: &str,
    dest_dir: &Utf8Path,
    fallback_name: &str,
) -> Result<Fetched, FetchError> {
    let mut response = http.get(url).send().await?;

    if response.status() != StatusCode::OK {
        return Err(FetchError::Status(response.status()));
    }

    let file_name = file_name_from_headers(&response)
        .or_else(|| file_name_from_url(url))
        .unwrap_or_else(|| fallback_name.to_owned());

    let path = dest_dir.join(&file_name);

    let file = tokio::fs::File::create(&path).await?;
    let mut writer = BufWriter::with_capacity(BUFFER_WRITER_SIZE, file);

    let mut size: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        size += chunk.len() as u64;
        writer.write_all(&chunk).await?;
    }

    writer.flush().await?;

    Ok(Fetched { path, file_name, size })
}

/// Extracts the file name from a `Content-Disposition: attachment` header.
fn file_name_from_headers(response: &reqwest::Response) -> Option<String> {
    let value = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;

    let file_name = value
        .split(';')
        .find_map(|part| part.trim().strip_prefix("filename="))?
        .trim_matches('"');

    sanitize_file_name(file_name)
}

/// Last path segment of the URL, ignoring the query string.
fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next()?;

    let after_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);

    // A bare host has no path to take a file name from.
    let (_, path) = after_scheme.split_once('/')?;

    let candidate = path.trim_end_matches('/').rsplit('/').next()?;

    if candidate.is_empty() || !candidate.contains('.') {
        return None;
    }

    sanitize_file_name(candidate)
}

/// Refuses anything that could escape the destination directory.
fn sanitize_file_name(candidate: &str) -> Option<String> {
    let name = Utf8Path::new(candidate).file_name()?;

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    Some(name.to_owned())
}
