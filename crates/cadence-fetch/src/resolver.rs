//! Candidate endpoint resolution for asset references

use crate::{AssetCategory, AssetReference, SourceConfig};
use serde::{Deserialize, Serialize};
use url::Url;

/// One endpoint that might serve an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Endpoint name used for breakers and metrics
    pub endpoint_name: String,
    /// Fully-qualified URL to fetch
    pub url: String,
}

impl Candidate {
    fn new(endpoint_name: &str, url: String) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            url,
        }
    }
}

/// Derives the ordered candidate list (primary, then origin) for a reference
#[derive(Debug, Clone)]
pub struct SourceResolver {
    config: SourceConfig,
}

impl SourceResolver {
    /// Create a resolver for the given endpoint layout
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    /// Endpoint layout in use
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Origin bucket for a category; unknown categories use the default bucket
    pub fn bucket_for(&self, category: &AssetCategory) -> &str {
        self.config
            .buckets
            .get(category.as_str())
            .unwrap_or(&self.config.default_bucket)
    }

    /// Normalize an id into a bucket-relative storage path
    ///
    /// Strips a primary-endpoint prefix, any other `scheme://host/` prefix,
    /// and leading slashes. Returns an empty string when nothing remains.
    pub fn storage_path(&self, id: &str) -> String {
        let id = id.trim();
        let primary = self.config.primary_base.trim_end_matches('/');

        let path = if let Some(rest) = strip_base(id, primary) {
            rest.to_string()
        } else if let Some(url) = Url::parse(id).ok().filter(|u| u.has_host()) {
            url.path().to_string()
        } else {
            id.to_string()
        };

        path.trim_start_matches('/').to_string()
    }

    /// Ordered candidates for `asset`; empty when the id has no usable path
    pub fn resolve_candidates(&self, asset: &AssetReference) -> Vec<Candidate> {
        let id = asset.id.trim();
        let primary = self.config.primary_base.trim_end_matches('/');
        let origin = self.config.origin_base.trim_end_matches('/');

        // Already a fully-qualified origin reference: keep it, wrap it for the CDN
        if let Some(rest) = strip_base(id, origin).map(|r| r.trim_start_matches('/')) {
            if rest.is_empty() {
                return Vec::new();
            }
            return vec![
                Candidate::new(&self.config.primary_name, format!("{primary}/{rest}")),
                Candidate::new(&self.config.origin_name, id.to_string()),
            ];
        }

        let path = self.storage_path(id);
        let bucket = self.bucket_for(&asset.category);
        let path = path
            .strip_prefix(bucket)
            .and_then(|p| p.strip_prefix('/'))
            .unwrap_or(&path);
        if path.is_empty() {
            return Vec::new();
        }

        vec![
            Candidate::new(&self.config.primary_name, format!("{primary}/{bucket}/{path}")),
            Candidate::new(&self.config.origin_name, format!("{origin}/{bucket}/{path}")),
        ]
    }
}

/// `id` with `base` removed, only when `base` ends at a path boundary
fn strip_base<'a>(id: &'a str, base: &str) -> Option<&'a str> {
    let rest = id.strip_prefix(base)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}
