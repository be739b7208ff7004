//! Output download with atomic placement.
//!
//! Bytes land in a temp file next to the destination and are renamed
//! into place, so readers never observe a partially written image.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use tokio::io::AsyncWriteExt;

use crate::api::ProviderApiError;
use crate::error::ProviderError;

/// Fetch `uri` and place its bytes at `dest`. Returns the byte count.
///
/// Accepts `http(s)://` URLs and `data:` URIs.
pub async fn download_to_path(
    client: &reqwest::Client,
    uri: &str,
    dest: &Path,
) -> Result<u64, ProviderError> {
    let bytes = if let Some(rest) = uri.strip_prefix("data:") {
        decode_data_uri(rest).ok_or_else(|| ProviderError::InvalidUri(truncate(uri)))?
    } else if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = client
            .get(uri)
            .send()
            .await
            .map_err(ProviderApiError::from)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderApiError::ApiError {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        response
            .bytes()
            .await
            .map_err(ProviderApiError::from)?
            .to_vec()
    } else {
        return Err(ProviderError::InvalidUri(truncate(uri)));
    };

    write_atomic(dest, &bytes).await?;
    Ok(bytes.len() as u64)
}

/// Write `bytes` to a sibling temp file, then rename onto `dest`.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let tmp = temp_path_for(dest);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, dest).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    dest.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Decode the part after `data:`; only base64 payloads are supported.
fn decode_data_uri(rest: &str) -> Option<Vec<u8>> {
    let (meta, payload) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
}

fn truncate(uri: &str) -> String {
    uri.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn data_uri_is_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("renders/SHOT_01/A/first.png");
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(b"png-bytes")
        );

        let n = download_to_path(&reqwest::Client::new(), &uri, &dest)
            .await
            .unwrap();

        assert_eq!(n, 9);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"png-bytes");
        let leftovers: Vec<_> = std::fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = download_to_path(
            &reqwest::Client::new(),
            "ftp://example.com/x.png",
            &dir.path().join("x.png"),
        )
        .await
        .unwrap_err();
        assert_matches!(err, ProviderError::InvalidUri(_));
    }

    #[tokio::test]
    async fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("last.png");
        write_atomic(&dest, b"old").await.unwrap();
        write_atomic(&dest, b"new").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }
}
