// src/targets.rs

//! Monitored URL provisioning.
//!
//! Each alert-routing group is backed by a plain-text URL file (one URL
//! per line, `#` comments and blank lines skipped). Files are re-read
//! every cycle so list edits take effect without a restart.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::models::{Config, MonitoredTarget, TargetGroup};
use crate::utils::url::domain_of;

/// Assembles monitored targets from group URL files.
pub struct TargetProvider {
    base_dir: PathBuf,
    groups: Vec<TargetGroup>,
}

impl TargetProvider {
    pub fn new(base_dir: impl Into<PathBuf>, groups: Vec<TargetGroup>) -> Self {
        Self {
            base_dir: base_dir.into(),
            groups,
        }
    }

    /// Read every group file and attach each URL's domain policy.
    ///
    /// Unreadable files are logged and skipped; the remaining groups
    /// still produce targets.
    pub fn load(&self, config: &Config) -> Vec<MonitoredTarget> {
        let mut targets = Vec::new();
        for group in &self.groups {
            let path = self.base_dir.join(&group.file);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    log::warn!(
                        "Cannot read URL file {} for group {}: {}",
                        path.display(),
                        group.name,
                        e
                    );
                    continue;
                }
            };
            for url in parse_url_lines(&content) {
                let domain = domain_of(&url).unwrap_or_default();
                targets.push(MonitoredTarget {
                    policy: config.policy_for(&domain),
                    url,
                    kind: group.kind,
                    group: group.name.clone(),
                });
            }
        }
        targets
    }
}

/// Parse a URL list: trimmed lines, `#` comments and blanks skipped,
/// anything that is not http(s) ignored, duplicates collapsed.
pub fn parse_url_lines(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .filter(|line| seen.insert(line.to_string()))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::models::{HeaderProfile, TargetKind};

    #[test]
    fn parse_skips_comments_blanks_and_non_http_lines() {
        let content = "\
# pokemon listings
https://shop.example/collections/pokemon

ftp://not-a-page.example/file
just some text
  https://other.example/products/widget
https://shop.example/collections/pokemon
";
        let urls = parse_url_lines(content);
        assert_eq!(
            urls,
            vec![
                "https://shop.example/collections/pokemon".to_string(),
                "https://other.example/products/widget".to_string(),
            ]
        );
    }

    #[test]
    fn load_attaches_domain_policy_per_url() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("catalog.txt"),
            "https://www.very.co.uk/toys/widget.html\nhttps://shop.example/products/widget\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.groups.push(TargetGroup {
            name: "catalog".into(),
            file: "catalog.txt".into(),
            kind: TargetKind::DirectProduct,
        });

        let provider = TargetProvider::new(dir.path(), config.groups.clone());
        let targets = provider.load(&config);

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].group, "catalog");
        assert_eq!(targets[0].kind, TargetKind::DirectProduct);
        // very.co.uk carries the mobile header override
        assert_eq!(targets[0].policy.header_profile, HeaderProfile::Mobile);
        assert_eq!(targets[1].policy.header_profile, HeaderProfile::Desktop);
    }

    #[test]
    fn missing_group_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("present.txt"), "https://shop.example/a.html\n").unwrap();

        let mut config = Config::default();
        config.groups.push(TargetGroup {
            name: "absent".into(),
            file: "absent.txt".into(),
            kind: TargetKind::Listing,
        });
        config.groups.push(TargetGroup {
            name: "present".into(),
            file: "present.txt".into(),
            kind: TargetKind::Listing,
        });

        let provider = TargetProvider::new(dir.path(), config.groups.clone());
        let targets = provider.load(&config);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].group, "present");
    }
}
