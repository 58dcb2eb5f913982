//! Sample images shipped next to a model, listed by an index file.

use crate::error::{Result, VisionError};
use crate::fetch::Fetcher;
use reqwest::Url;
use serde::{Deserialize, Serialize};

const THUMB_SUFFIX: &str = "_thumb";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestImageEntry {
    pub image_url: String,
    pub thumbnail_url: String,
}

/// Everything up to and including the last `/` of the URL path.
fn base_directory(index_url: &Url) -> String {
    let mut url = index_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    let s = url.as_str();
    match s.rfind('/') {
        Some(pos) => s[..=pos].to_string(),
        None => s.to_string(),
    }
}

/// Splits `file` into stem and extension (with its dot). Only the last path
/// component is considered and a leading dot does not start an extension.
fn split_extension(file: &str) -> (&str, &str) {
    let name_start = file.rfind('/').map_or(0, |p| p + 1);
    match file[name_start..].rfind('.') {
        Some(0) | None => (file, ""),
        Some(dot) => file.split_at(name_start + dot),
    }
}

/// Derives image and thumbnail URLs for each file name, keeping input order.
pub fn derive_test_images<S: AsRef<str>>(index_url: &Url, files: &[S]) -> Vec<TestImageEntry> {
    let base = base_directory(index_url);
    files
        .iter()
        .map(|f| {
            let f = f.as_ref();
            let (stem, ext) = split_extension(f);
            TestImageEntry {
                image_url: format!("{base}{f}"),
                thumbnail_url: format!("{base}{stem}{THUMB_SUFFIX}{ext}"),
            }
        })
        .collect()
}

/// Fetches the JSON file-name array at `index_url` and derives its entries.
pub async fn resolve_test_images<F: Fetcher + ?Sized>(
    fetcher: &F,
    index_url: &Url,
) -> Result<Vec<TestImageEntry>> {
    let fetch_err = |reason: String| VisionError::TestImageFetch {
        url: index_url.to_string(),
        reason,
    };
    let bytes = fetcher
        .fetch(index_url)
        .await
        .map_err(|e| fetch_err(e.to_string()))?;
    let files: Vec<String> = serde_json::from_slice(&bytes).map_err(|e| fetch_err(e.to_string()))?;
    Ok(derive_test_images(index_url, &files))
}
