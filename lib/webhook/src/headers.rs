//! Case-insensitive webhook headers.

use std::collections::HashMap;

/// Header marker sent by GitHub.
pub const GITHUB_EVENT: &str = "x-github-event";
/// Header marker sent by GitLab.
pub const GITLAB_EVENT: &str = "x-gitlab-event";
/// Header marker sent by Bitbucket.
pub const BITBUCKET_EVENT: &str = "x-event-key";

/// Request headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookHeaders(HashMap<String, String>);

impl WebhookHeaders {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header, replacing any previous value.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Returns the trimmed value of `name`, if present and non-empty.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for WebhookHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let headers = WebhookHeaders::new().with("X-GitHub-Event", "push");
        assert_eq!(headers.get(GITHUB_EVENT), Some("push"));
        assert_eq!(headers.get("X-GITHUB-EVENT"), Some("push"));
    }

    #[test]
    fn blank_values_are_absent() {
        let headers: WebhookHeaders = [("X-Event-Key", "  ")].into_iter().collect();
        assert_eq!(headers.get(BITBUCKET_EVENT), None);
    }
}
