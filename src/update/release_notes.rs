// Release notes links for an available update

use serde::Serialize;

use crate::update::{AppcastItem, UpdaterConfig};

/// Where to read about an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReleaseNotes {
    /// A tagged release with published notes
    Tagged { version: String, url: String },
    /// A build from a single commit
    Commit { hash: String, url: String },
}

impl ReleaseNotes {
    pub fn url(&self) -> &str {
        match self {
            ReleaseNotes::Tagged { url, .. } | ReleaseNotes::Commit { url, .. } => url,
        }
    }
}

impl AppcastItem {
    /// Release notes link, preferring the one declared by the feed
    pub fn release_notes(&self, config: &UpdaterConfig) -> Option<ReleaseNotes> {
        if let Some(url) = &self.release_notes_url {
            return Some(ReleaseNotes::Tagged {
                version: self.display_version.clone(),
                url: url.clone(),
            });
        }

        let version = self.version.trim();
        if let Some(parts) = parse_version(version) {
            let slug = parts
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join("-");
            return Some(ReleaseNotes::Tagged {
                version: version.to_string(),
                url: format!("{}/{}", config.release_notes_url.trim_end_matches('/'), slug),
            });
        }

        if is_commit_hash(version) {
            return Some(ReleaseNotes::Commit {
                hash: version.to_string(),
                url: format!("{}/{}", config.commit_url.trim_end_matches('/'), version),
            });
        }

        None
    }
}

/// Parse "major.minor.patch" (minor and patch optional), all numeric
fn parse_version(version: &str) -> Option<Vec<u32>> {
    let version = version.strip_prefix('v').unwrap_or(version);
    let parts: Vec<&str> = version.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    parts.iter().map(|p| p.parse().ok()).collect()
}

fn is_commit_hash(version: &str) -> bool {
    (7..=40).contains(&version.len()) && version.chars().all(|c| c.is_ascii_hexdigit())
}
