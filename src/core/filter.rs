//! Record filtering
//!
//! Decides, per raw YAML record, whether a node is constructed at all.
//! Applied to threats, countermeasures, and assets before construction, so
//! a filtered view is a structurally smaller graph rather than a masked one.

use miette::Diagnostic;
use semver::{Version, VersionReq};
use serde_yml::{Mapping, Value};
use thiserror::Error;

/// Errors raised while evaluating the filter predicate.
#[derive(Debug, Error, Diagnostic)]
pub enum FilterError {
    #[error("invalid filter version '{version}'")]
    #[diagnostic(
        code(tmkit::filter::invalid_version),
        help("filter versions must be concrete, e.g. '5.1' or '5.1.2'")
    )]
    InvalidFilterVersion { version: String },

    #[error("invalid version range '{range}' in '{owner}'")]
    #[diagnostic(
        code(tmkit::filter::invalid_range),
        help("'appliesToVersions' must be a semantic version range, e.g. '>=5.1'")
    )]
    InvalidVersionRange { range: String, owner: String },
}

/// The construction-time filter predicate.
///
/// Two independent axes, combined with OR: a record is excluded when the
/// public axis fires or the version axis fires.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    public_only: bool,
    versions: Vec<Version>,
}

impl RecordFilter {
    /// Build a filter from caller options, parsing the supplied concrete
    /// versions up front so a bad filter fails before any file is read.
    pub fn from_options(public_only: bool, versions: &[String]) -> Result<Self, FilterError> {
        let versions = versions
            .iter()
            .map(|v| parse_concrete_version(v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            public_only,
            versions,
        })
    }

    pub fn public_only(&self) -> bool {
        self.public_only
    }

    /// Whether the record should be skipped entirely.
    ///
    /// `owner` is the full id of the node the record belongs to (or would
    /// belong to), used in error messages.
    pub fn excludes(&self, record: &Mapping, owner: &str) -> Result<bool, FilterError> {
        if self.public_only && record.get("public") == Some(&Value::Bool(false)) {
            return Ok(true);
        }

        if !self.versions.is_empty() {
            if let Some(range) = record.get("appliesToVersions").and_then(Value::as_str) {
                let req = VersionReq::parse(range).map_err(|_| {
                    FilterError::InvalidVersionRange {
                        range: range.to_string(),
                        owner: owner.to_string(),
                    }
                })?;
                if !self.versions.iter().any(|v| req.matches(v)) {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

/// Parse a concrete version, padding missing minor/patch components so that
/// shorthand like "5.1" works the way authors expect.
fn parse_concrete_version(input: &str) -> Result<Version, FilterError> {
    if let Ok(v) = Version::parse(input) {
        return Ok(v);
    }

    let segments = input.split('.').count();
    if segments < 3 && input.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let mut padded = input.to_string();
        for _ in segments..3 {
            padded.push_str(".0");
        }
        if let Ok(v) = Version::parse(&padded) {
            return Ok(v);
        }
    }

    Err(FilterError::InvalidFilterVersion {
        version: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(yaml: &str) -> Mapping {
        match serde_yml::from_str(yaml).unwrap() {
            Value::Mapping(m) => m,
            other => panic!("fixture must be a mapping, got {other:?}"),
        }
    }

    #[test]
    fn test_default_filter_excludes_nothing() {
        let filter = RecordFilter::default();
        let rec = record("public: false\nappliesToVersions: '>=9.0'\n");
        assert!(!filter.excludes(&rec, "TM.T1").unwrap());
    }

    #[test]
    fn test_public_axis() {
        let filter = RecordFilter::from_options(true, &[]).unwrap();

        let hidden = record("public: false\n");
        assert!(filter.excludes(&hidden, "TM.T1").unwrap());

        let shown = record("public: true\n");
        assert!(!filter.excludes(&shown, "TM.T1").unwrap());

        // Absence of the key means "included in public view"
        let unmarked = record("title: x\n");
        assert!(!filter.excludes(&unmarked, "TM.T1").unwrap());
    }

    #[test]
    fn test_version_axis() {
        let filter = RecordFilter::from_options(false, &["5.1".to_string()]).unwrap();

        let matching = record("appliesToVersions: '>=5.0'\n");
        assert!(!filter.excludes(&matching, "TM.T1").unwrap());

        let outside = record("appliesToVersions: '<5.0'\n");
        assert!(filter.excludes(&outside, "TM.T1").unwrap());

        // Absence of the key means "always included"
        let unversioned = record("title: x\n");
        assert!(!filter.excludes(&unversioned, "TM.T1").unwrap());
    }

    #[test]
    fn test_version_axis_any_match_wins() {
        let filter =
            RecordFilter::from_options(false, &["4.0".to_string(), "5.1".to_string()]).unwrap();
        let rec = record("appliesToVersions: '>=5.0'\n");
        assert!(!filter.excludes(&rec, "TM.T1").unwrap());
    }

    #[test]
    fn test_axes_combine_with_or() {
        let filter = RecordFilter::from_options(true, &["5.1".to_string()]).unwrap();
        let rec = record("public: true\nappliesToVersions: '<5.0'\n");
        assert!(filter.excludes(&rec, "TM.T1").unwrap());
    }

    #[test]
    fn test_bad_range_is_an_error() {
        let filter = RecordFilter::from_options(false, &["5.1".to_string()]).unwrap();
        let rec = record("appliesToVersions: 'not a range'\n");
        let err = filter.excludes(&rec, "TM.T1").unwrap_err();
        assert!(matches!(err, FilterError::InvalidVersionRange { .. }));
    }

    #[test]
    fn test_concrete_version_shorthand() {
        assert_eq!(
            parse_concrete_version("5.1").unwrap(),
            Version::new(5, 1, 0)
        );
        assert_eq!(
            parse_concrete_version("5.1.2").unwrap(),
            Version::new(5, 1, 2)
        );
        assert!(parse_concrete_version("not-a-version").is_err());
    }
}
