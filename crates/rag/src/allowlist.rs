use std::collections::HashSet;

use reqwest::Url;

pub static DEFAULT_ALLOW_DOMAINS: [&str; 2] = ["teknofest.ibtikar.org.tr", "ibtikar.org.tr"];

/// Prefix carried by manually curated, non-web documents.
pub const DEFAULT_SENTINEL: &str = "gdoc:";

/// Trusted provenance: a fixed host set plus one sentinel prefix.
#[derive(Debug, Clone)]
pub struct SourceAllowlist {
    domains: HashSet<String>,
    sentinel: String,
}

impl SourceAllowlist {
    pub fn new<I, S>(domains: I, sentinel: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            domains,
            sentinel: sentinel.into(),
        }
    }

    pub fn allows(&self, source: &str) -> bool {
        if source.is_empty() {
            return false;
        }
        if !self.sentinel.is_empty() && source.starts_with(&self.sentinel) {
            return true;
        }
        match Url::parse(source) {
            Ok(url) => url
                .host_str()
                .map(|host| self.domains.contains(&host.to_ascii_lowercase()))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }
}

impl Default for SourceAllowlist {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOW_DOMAINS, DEFAULT_SENTINEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_trusted_hosts_only() {
        let allowlist = SourceAllowlist::default();
        assert!(allowlist.allows("https://ibtikar.org.tr/about"));
        assert!(allowlist.allows("https://teknofest.ibtikar.org.tr/teams?id=3"));
        assert!(allowlist.allows("HTTPS://IBTIKAR.ORG.TR/"));
        assert!(!allowlist.allows("https://evil.example/ibtikar.org.tr"));
        assert!(!allowlist.allows("https://ibtikar.org.tr.evil.example/"));
        assert!(!allowlist.allows("https://www.ibtikar.org.tr/"));
    }

    #[test]
    fn sentinel_sources_are_always_trusted() {
        let allowlist = SourceAllowlist::default();
        assert!(allowlist.allows("gdoc:1AbCdEf"));
        assert!(!allowlist.allows("gdocs-mirror"));
    }

    #[test]
    fn empty_and_opaque_sources_are_rejected() {
        let allowlist = SourceAllowlist::default();
        assert!(!allowlist.allows(""));
        assert!(!allowlist.allows("unknown"));
        assert!(!allowlist.allows("ibtikar.org.tr"));
    }

    #[test]
    fn domains_are_trimmed_and_lowercased() {
        let allowlist = SourceAllowlist::new([" Ibtikar.ORG.tr ", "", "teknofest.ibtikar.org.tr"], "gdoc:");
        let mut domains: Vec<&str> = allowlist.domains().collect();
        domains.sort_unstable();
        assert_eq!(domains, vec!["ibtikar.org.tr", "teknofest.ibtikar.org.tr"]);
        assert_eq!(allowlist.sentinel(), "gdoc:");
    }

    #[test]
    fn empty_sentinel_does_not_trust_everything() {
        let allowlist = SourceAllowlist::new(["ibtikar.org.tr"], "");
        assert!(!allowlist.allows("anything"));
        assert!(allowlist.allows("http://ibtikar.org.tr:8080/x"));
    }
}
