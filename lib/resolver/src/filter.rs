//! Artifact build filters.
//!
//! A filter is either a glob, where `*` matches any run of characters and
//! `?` matches one character while everything else is literal, or a regular
//! expression. Both must match the whole build number or file name.

use crate::catalog::Artifact;
use crate::error::ResolveError;
use regex::Regex;
use tripwire_trigger::ArtifactFilterSpec;

/// A compiled artifact filter.
#[derive(Debug, Clone)]
pub struct ArtifactFilter {
    spec: ArtifactFilterSpec,
    regex: Regex,
}

impl ArtifactFilter {
    /// Compiles `spec`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` if the pattern is not a valid expression.
    pub fn compile(spec: &ArtifactFilterSpec) -> Result<Self, ResolveError> {
        let source = if spec.regex {
            format!("^(?:{})$", spec.pattern)
        } else {
            glob_to_regex(&spec.pattern)
        };
        let regex = Regex::new(&source).map_err(|e| ResolveError::InvalidFilter {
            pattern: spec.pattern.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            spec: spec.clone(),
            regex,
        })
    }

    /// Returns the filter as configured.
    #[must_use]
    pub fn spec(&self) -> &ArtifactFilterSpec {
        &self.spec
    }

    /// Returns true if `text` passes the filter.
    #[must_use]
    pub fn matches_text(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Returns true if the artifact's build number passes, or failing that,
    /// any of its file names.
    #[must_use]
    pub fn matches(&self, artifact: &Artifact) -> bool {
        self.matches_text(&artifact.build_number)
            || artifact
                .file_names
                .iter()
                .any(|name| self.matches_text(name))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tripwire_core::{ArtifactId, ArtifactStreamId};

    fn artifact(build: &str, files: &[&str]) -> Artifact {
        Artifact {
            id: ArtifactId::new(),
            artifact_stream_id: ArtifactStreamId::new(),
            build_number: build.to_string(),
            file_names: files.iter().map(|f| (*f).to_string()).collect(),
            service_id: None,
            collected_at: Utc::now(),
            duplicate: false,
        }
    }

    #[test]
    fn glob_dot_is_literal() {
        let filter = ArtifactFilter::compile(&ArtifactFilterSpec::glob("v1.*")).expect("compile");
        assert!(filter.matches_text("v1.0"));
        assert!(filter.matches_text("v1."));
        assert!(!filter.matches_text("v10"));
        assert!(!filter.matches_text("v2.0"));
    }

    #[test]
    fn glob_must_match_whole_build() {
        let filter = ArtifactFilter::compile(&ArtifactFilterSpec::glob("1.?")).expect("compile");
        assert!(filter.matches_text("1.5"));
        assert!(!filter.matches_text("1.55"));
        assert!(!filter.matches_text("release-1.5"));
    }

    #[test]
    fn glob_escapes_regex_syntax() {
        let filter =
            ArtifactFilter::compile(&ArtifactFilterSpec::glob("app+(x)*")).expect("compile");
        assert!(filter.matches_text("app+(x)-12"));
        assert!(!filter.matches_text("appp(x)"));
    }

    #[test]
    fn regex_must_match_whole_build() {
        let filter =
            ArtifactFilter::compile(&ArtifactFilterSpec::regex(r"release-\d+")).expect("compile");
        assert!(filter.matches_text("release-42"));
        assert!(!filter.matches_text("build/release-42"));
        assert!(!filter.matches_text("release-42-rc"));
        assert!(!filter.matches_text("release-x"));

        let filter =
            ArtifactFilter::compile(&ArtifactFilterSpec::regex("1.0|2.0")).expect("compile");
        assert!(filter.matches_text("2.0"));
        assert!(!filter.matches_text("1.0.1"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = ArtifactFilter::compile(&ArtifactFilterSpec::regex("(unclosed")).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidFilter { pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn file_names_are_a_fallback() {
        let filter =
            ArtifactFilter::compile(&ArtifactFilterSpec::glob("*.war")).expect("compile");
        assert!(filter.matches(&artifact("17", &["app.war", "app.pom"])));
        assert!(!filter.matches(&artifact("17", &["app.jar"])));
        assert!(!filter.matches(&artifact("17", &[])));
    }
}
