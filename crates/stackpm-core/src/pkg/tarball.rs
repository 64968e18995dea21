//! Tarball download and extraction.

use super::error::PkgError;
use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use reqwest::Client;
use stackpm_util::FileSystem;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tar::{Archive, EntryType};
use tracing::debug;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Download a tarball from a URL, reporting the fraction received so far.
///
/// `on_progress(0.0)` is always called first. Later ticks are only sent when
/// the server announces a length.
///
/// # Errors
/// Returns an error if the download fails or exceeds the size limit.
#[allow(clippy::cast_precision_loss)]
pub async fn download_tarball<F>(
    client: &Client,
    url: &str,
    max_bytes: u64,
    mut on_progress: F,
) -> Result<Bytes, PkgError>
where
    F: FnMut(f64),
{
    on_progress(0.0);

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to download '{url}': {e}")))?;

    if !response.status().is_success() {
        return Err(PkgError::download_failed(format!(
            "Download failed with status {} for '{url}'",
            response.status()
        )));
    }

    let total = response.content_length();
    if let Some(len) = total {
        if len > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to read response body: {e}")))?
    {
        body.extend_from_slice(&chunk);

        let read = body.len() as u64;
        if read > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: more than {max_bytes} bytes"
            )));
        }

        if let Some(total) = total.filter(|t| *t > 0) {
            on_progress((read as f64 / total as f64).min(1.0));
        }
    }

    Ok(body.freeze())
}

/// Download a tarball and unpack it into `dest`.
///
/// Extraction runs on the blocking pool.
///
/// # Errors
/// Returns an error if the download or the extraction fails.
pub async fn download_and_extract<F>(
    client: &Client,
    url: &str,
    dest: &Path,
    package_name: &str,
    fs: Arc<dyn FileSystem>,
    on_progress: F,
) -> Result<(), PkgError>
where
    F: FnMut(f64),
{
    let bytes = download_tarball(client, url, MAX_TARBALL_SIZE, on_progress).await?;

    let dest = dest.to_path_buf();
    let package_name = package_name.to_string();
    tokio::task::spawn_blocking(move || {
        extract_tarball(bytes.as_ref(), &dest, &package_name, fs.as_ref())
    })
    .await
    .map_err(|e| PkgError::extract_failed(format!("Extraction task failed: {e}")))?
}

/// Unpack a (gzipped or plain) tar stream into `dest`.
///
/// Each entry loses one leading `package/` or `<package_name>/` segment.
/// Only directories and regular files are written.
///
/// # Errors
/// Returns `PKG_ZIP_SLIP` if an entry would land outside `dest`, or
/// `PKG_EXTRACT_FAILED` if the archive is unreadable.
pub fn extract_tarball<R: Read>(
    reader: R,
    dest: &Path,
    package_name: &str,
    fs: &dyn FileSystem,
) -> Result<(), PkgError> {
    let mut reader = io::BufReader::new(reader);
    let mut magic = [0u8; 2];
    let peeked = read_prefix(&mut reader, &mut magic)?;
    let stream = io::Cursor::new(magic[..peeked].to_vec()).chain(reader);

    if peeked == 2 && magic == GZIP_MAGIC {
        unpack(Archive::new(GzDecoder::new(stream)), dest, package_name, fs)
    } else {
        unpack(Archive::new(stream), dest, package_name, fs)
    }
}

fn read_prefix<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, PkgError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(PkgError::extract_failed(format!("Failed to read tarball: {e}")))
            }
        }
    }
    Ok(filled)
}

fn unpack<R: Read>(
    mut archive: Archive<R>,
    dest: &Path,
    package_name: &str,
    fs: &dyn FileSystem,
) -> Result<(), PkgError> {
    let entries = archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(relative) = strip_package_prefix(&raw, package_name) else {
            continue;
        };

        let target = contained_path(dest, relative).ok_or_else(|| PkgError::zip_slip(&raw))?;

        let kind = entry.header().entry_type();
        match kind {
            EntryType::Directory => {
                fs.mkdir(&target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs.mkdir(parent)?;
                }
                let mut file = fs.create_file(&target)?;
                io::copy(&mut entry, &mut file).map_err(|e| {
                    PkgError::extract_failed(format!("Failed to write '{raw}': {e}"))
                })?;
            }
            other => {
                debug!(entry = %raw, kind = ?other, "Skipping non-file tarball entry");
            }
        }
    }

    Ok(())
}

/// Drop the tarball's top-level folder. `None` means the entry is the folder
/// itself (or empty) and should be skipped.
fn strip_package_prefix<'a>(raw: &'a str, package_name: &str) -> Option<&'a str> {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "package" || trimmed == package_name {
        return None;
    }

    let stripped = trimmed
        .strip_prefix("package/")
        .or_else(|| {
            trimmed
                .strip_prefix(package_name)
                .and_then(|rest| rest.strip_prefix('/'))
        })
        .unwrap_or(trimmed);

    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// Lexically join `relative` onto `dest`, refusing anything that climbs out.
fn contained_path(dest: &Path, relative: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let mut target = dest.to_path_buf();
    target.extend(parts);
    Some(target)
}
