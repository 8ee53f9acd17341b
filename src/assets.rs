use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("PUBLIC_BASE_URL is not configured")]
    MissingBaseUrl,
    #[error("PUBLIC_BASE_URL `{0}` cannot carry a path")]
    InvalidBaseUrl(String),
    #[error("asset path {0:?} is empty")]
    EmptyPath(String),
    #[error("asset path {0:?} escapes the tenant asset directory")]
    Traversal(String),
}

/// Turns tenant-relative asset paths into public URLs of the form
/// `<base>/tenants/<tenant>/assets/<path>`.
#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    base_url: Option<Url>,
}

impl AssetResolver {
    pub fn new(base_url: Option<Url>) -> Self {
        Self { base_url }
    }

    pub fn has_base_url(&self) -> bool {
        self.base_url.is_some()
    }

    pub fn public_url(&self, tenant: &str, path: &str) -> Result<String, AssetError> {
        let segments = normalize(path)?;
        let base = self.base_url.as_ref().ok_or(AssetError::MissingBaseUrl)?;

        let mut url = base.clone();
        {
            let mut out = url
                .path_segments_mut()
                .map_err(|_| AssetError::InvalidBaseUrl(base.to_string()))?;
            out.pop_if_empty();
            // each segment is percent-encoded on the way in
            out.extend(["tenants", tenant, "assets"]);
            out.extend(segments);
        }
        Ok(url.to_string())
    }
}

/// Splits a relative path into clean segments, dropping `.` and empty parts.
/// Any `..` is rejected outright rather than resolved.
pub(crate) fn normalize(path: &str) -> Result<Vec<&str>, AssetError> {
    let mut segments = Vec::new();
    for segment in path.trim().split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(AssetError::Traversal(path.to_string())),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(AssetError::EmptyPath(path.to_string()));
    }
    Ok(segments)
}
