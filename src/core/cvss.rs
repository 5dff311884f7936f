//! CVSS v3.0 / v3.1 vector parsing and scoring
//!
//! Computes base, temporal, and environmental scores with the official
//! round-up-to-one-decimal rule, and selects a "smart score" for ranking:
//! the most specific score that differs from the ones beneath it
//! (environmental over temporal over base).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a CVSS vector string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CvssError {
    #[error("unsupported CVSS version prefix '{0}' (expected CVSS:3.0 or CVSS:3.1)")]
    UnsupportedVersion(String),

    #[error("malformed CVSS vector segment '{0}' (expected METRIC:VALUE)")]
    MalformedSegment(String),

    #[error("unknown CVSS metric '{0}'")]
    UnknownMetric(String),

    #[error("invalid value '{value}' for CVSS metric '{metric}'")]
    InvalidValue { metric: String, value: String },

    #[error("duplicate CVSS metric '{0}'")]
    DuplicateMetric(String),

    #[error("missing mandatory CVSS metric '{0}'")]
    MissingMetric(&'static str),
}

/// Qualitative severity rating per the CVSS specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        if score <= 0.0 {
            Severity::None
        } else if score < 4.0 {
            Severity::Low
        } else if score < 7.0 {
            Severity::Medium
        } else if score < 9.0 {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "None",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    V3_0,
    V3_1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Unchanged,
    Changed,
}

/// A parsed CVSS v3 vector with its three computed scores.
#[derive(Debug, Clone, PartialEq)]
pub struct Cvss {
    vector: String,
    base: f64,
    temporal: f64,
    environmental: f64,
}

impl Cvss {
    pub fn vector(&self) -> &str {
        &self.vector
    }

    pub fn base_score(&self) -> f64 {
        self.base
    }

    pub fn temporal_score(&self) -> f64 {
        self.temporal
    }

    pub fn environmental_score(&self) -> f64 {
        self.environmental
    }

    /// The three scores in specification order.
    pub fn scores(&self) -> (f64, f64, f64) {
        (self.base, self.temporal, self.environmental)
    }

    pub fn severities(&self) -> (Severity, Severity, Severity) {
        (
            Severity::from_score(self.base),
            Severity::from_score(self.temporal),
            Severity::from_score(self.environmental),
        )
    }

    /// Index of the smart score in `(base, temporal, environmental)`.
    ///
    /// When all three agree the base score is authoritative; a diverging
    /// environmental score wins over temporal, which wins over base.
    fn smart_index(&self) -> usize {
        let b = tenths(self.base);
        let t = tenths(self.temporal);
        let e = tenths(self.environmental);
        if b == t && b == e {
            0
        } else if b == t {
            2
        } else if t == e {
            1
        } else {
            let scores = [b, t, e];
            let max = t.max(e);
            scores.iter().position(|&s| s == max).unwrap_or(0)
        }
    }

    pub fn smart_score(&self) -> f64 {
        let (b, t, e) = self.scores();
        [b, t, e][self.smart_index()]
    }

    pub fn smart_score_name(&self) -> &'static str {
        ["Base score", "Temporal score", "Environmental score"][self.smart_index()]
    }

    pub fn smart_severity(&self) -> Severity {
        Severity::from_score(self.smart_score())
    }

    /// RAG-style hex color for the smart score, used by report renderers.
    pub fn smart_color(&self) -> &'static str {
        let score = self.smart_score();
        if score <= 0.0 {
            "#53aa33"
        } else if score <= 3.9 {
            "#ffcb0d"
        } else if score <= 6.9 {
            "#f9a009"
        } else if score <= 8.9 {
            "#df3d03"
        } else {
            "#cc0500"
        }
    }
}

fn tenths(score: f64) -> i64 {
    (score * 10.0).round() as i64
}

impl FromStr for Cvss {
    type Err = CvssError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = s.split('/');
        let version = match segments.next() {
            Some("CVSS:3.0") => Version::V3_0,
            Some("CVSS:3.1") => Version::V3_1,
            other => return Err(CvssError::UnsupportedVersion(other.unwrap_or("").to_string())),
        };

        let mut metrics = MetricSet::default();
        for segment in segments {
            let (metric, value) = segment
                .split_once(':')
                .ok_or_else(|| CvssError::MalformedSegment(segment.to_string()))?;
            metrics.set(metric, value)?;
        }
        metrics.check_mandatory()?;

        let base = metrics.base_score(version);
        let temporal = metrics.temporal_score(version, base);
        let environmental = metrics.environmental_score(version);

        Ok(Cvss {
            vector: s.to_string(),
            base,
            temporal,
            environmental,
        })
    }
}

/// Raw metric weights gathered from the vector segments.
#[derive(Debug, Default)]
struct MetricSet {
    av: Option<f64>,
    ac: Option<f64>,
    pr: Option<char>,
    ui: Option<f64>,
    scope: Option<Scope>,
    c: Option<f64>,
    i: Option<f64>,
    a: Option<f64>,
    e: Option<f64>,
    rl: Option<f64>,
    rc: Option<f64>,
    cr: Option<f64>,
    ir: Option<f64>,
    ar: Option<f64>,
    mav: Option<f64>,
    mac: Option<f64>,
    mpr: Option<char>,
    mui: Option<f64>,
    ms: Option<Scope>,
    mc: Option<f64>,
    mi: Option<f64>,
    ma: Option<f64>,
}

fn invalid(metric: &str, value: &str) -> CvssError {
    CvssError::InvalidValue {
        metric: metric.to_string(),
        value: value.to_string(),
    }
}

fn attack_vector(metric: &str, value: &str) -> Result<f64, CvssError> {
    match value {
        "N" => Ok(0.85),
        "A" => Ok(0.62),
        "L" => Ok(0.55),
        "P" => Ok(0.2),
        _ => Err(invalid(metric, value)),
    }
}

fn attack_complexity(metric: &str, value: &str) -> Result<f64, CvssError> {
    match value {
        "L" => Ok(0.77),
        "H" => Ok(0.44),
        _ => Err(invalid(metric, value)),
    }
}

fn user_interaction(metric: &str, value: &str) -> Result<f64, CvssError> {
    match value {
        "N" => Ok(0.85),
        "R" => Ok(0.62),
        _ => Err(invalid(metric, value)),
    }
}

fn impact_metric(metric: &str, value: &str) -> Result<f64, CvssError> {
    match value {
        "H" => Ok(0.56),
        "L" => Ok(0.22),
        "N" => Ok(0.0),
        _ => Err(invalid(metric, value)),
    }
}

fn scope_metric(metric: &str, value: &str) -> Result<Scope, CvssError> {
    match value {
        "U" => Ok(Scope::Unchanged),
        "C" => Ok(Scope::Changed),
        _ => Err(invalid(metric, value)),
    }
}

fn requirement_metric(metric: &str, value: &str) -> Result<Option<f64>, CvssError> {
    match value {
        "X" => Ok(None),
        "H" => Ok(Some(1.5)),
        "M" => Ok(Some(1.0)),
        "L" => Ok(Some(0.5)),
        _ => Err(invalid(metric, value)),
    }
}

/// Privileges Required depends on scope, so the letter is kept until the
/// formulas run.
fn privileges_weight(letter: char, scope: Scope) -> f64 {
    match (letter, scope) {
        ('N', _) => 0.85,
        ('L', Scope::Unchanged) => 0.62,
        ('L', Scope::Changed) => 0.68,
        ('H', Scope::Unchanged) => 0.27,
        ('H', Scope::Changed) => 0.5,
        _ => 0.85,
    }
}

impl MetricSet {
    fn set(&mut self, metric: &str, value: &str) -> Result<(), CvssError> {
        macro_rules! assign {
            ($field:ident, $parsed:expr) => {{
                if self.$field.is_some() {
                    return Err(CvssError::DuplicateMetric(metric.to_string()));
                }
                self.$field = $parsed;
                Ok(())
            }};
        }

        match metric {
            "AV" => assign!(av, Some(attack_vector(metric, value)?)),
            "AC" => assign!(ac, Some(attack_complexity(metric, value)?)),
            "PR" => {
                let letter = match value {
                    "N" | "L" | "H" => value.chars().next().unwrap_or('N'),
                    _ => return Err(invalid(metric, value)),
                };
                assign!(pr, Some(letter))
            }
            "UI" => assign!(ui, Some(user_interaction(metric, value)?)),
            "S" => assign!(scope, Some(scope_metric(metric, value)?)),
            "C" => assign!(c, Some(impact_metric(metric, value)?)),
            "I" => assign!(i, Some(impact_metric(metric, value)?)),
            "A" => assign!(a, Some(impact_metric(metric, value)?)),
            "E" => {
                let weight = match value {
                    "X" | "H" => 1.0,
                    "F" => 0.97,
                    "P" => 0.94,
                    "U" => 0.91,
                    _ => return Err(invalid(metric, value)),
                };
                assign!(e, Some(weight))
            }
            "RL" => {
                let weight = match value {
                    "X" | "U" => 1.0,
                    "W" => 0.97,
                    "T" => 0.96,
                    "O" => 0.95,
                    _ => return Err(invalid(metric, value)),
                };
                assign!(rl, Some(weight))
            }
            "RC" => {
                let weight = match value {
                    "X" | "C" => 1.0,
                    "R" => 0.96,
                    "U" => 0.92,
                    _ => return Err(invalid(metric, value)),
                };
                assign!(rc, Some(weight))
            }
            "CR" => assign!(cr, requirement_metric(metric, value)?),
            "IR" => assign!(ir, requirement_metric(metric, value)?),
            "AR" => assign!(ar, requirement_metric(metric, value)?),
            "MAV" => {
                if value == "X" {
                    assign!(mav, None)
                } else {
                    assign!(mav, Some(attack_vector(metric, value)?))
                }
            }
            "MAC" => {
                if value == "X" {
                    assign!(mac, None)
                } else {
                    assign!(mac, Some(attack_complexity(metric, value)?))
                }
            }
            "MPR" => {
                let letter = match value {
                    "X" => None,
                    "N" | "L" | "H" => value.chars().next(),
                    _ => return Err(invalid(metric, value)),
                };
                assign!(mpr, letter)
            }
            "MUI" => {
                if value == "X" {
                    assign!(mui, None)
                } else {
                    assign!(mui, Some(user_interaction(metric, value)?))
                }
            }
            "MS" => {
                if value == "X" {
                    assign!(ms, None)
                } else {
                    assign!(ms, Some(scope_metric(metric, value)?))
                }
            }
            "MC" => {
                if value == "X" {
                    assign!(mc, None)
                } else {
                    assign!(mc, Some(impact_metric(metric, value)?))
                }
            }
            "MI" => {
                if value == "X" {
                    assign!(mi, None)
                } else {
                    assign!(mi, Some(impact_metric(metric, value)?))
                }
            }
            "MA" => {
                if value == "X" {
                    assign!(ma, None)
                } else {
                    assign!(ma, Some(impact_metric(metric, value)?))
                }
            }
            _ => Err(CvssError::UnknownMetric(metric.to_string())),
        }
    }

    fn check_mandatory(&self) -> Result<(), CvssError> {
        if self.av.is_none() {
            return Err(CvssError::MissingMetric("AV"));
        }
        if self.ac.is_none() {
            return Err(CvssError::MissingMetric("AC"));
        }
        if self.pr.is_none() {
            return Err(CvssError::MissingMetric("PR"));
        }
        if self.ui.is_none() {
            return Err(CvssError::MissingMetric("UI"));
        }
        if self.scope.is_none() {
            return Err(CvssError::MissingMetric("S"));
        }
        if self.c.is_none() {
            return Err(CvssError::MissingMetric("C"));
        }
        if self.i.is_none() {
            return Err(CvssError::MissingMetric("I"));
        }
        if self.a.is_none() {
            return Err(CvssError::MissingMetric("A"));
        }
        Ok(())
    }

    fn base_score(&self, version: Version) -> f64 {
        let scope = self.scope.unwrap_or(Scope::Unchanged);
        let c = self.c.unwrap_or(0.0);
        let i = self.i.unwrap_or(0.0);
        let a = self.a.unwrap_or(0.0);
        let iss = 1.0 - (1.0 - c) * (1.0 - i) * (1.0 - a);
        let impact = match scope {
            Scope::Unchanged => 6.42 * iss,
            Scope::Changed => 7.52 * (iss - 0.029) - 3.25 * (iss - 0.02).powi(15),
        };
        if impact <= 0.0 {
            return 0.0;
        }
        let exploitability = 8.22
            * self.av.unwrap_or(0.85)
            * self.ac.unwrap_or(0.77)
            * privileges_weight(self.pr.unwrap_or('N'), scope)
            * self.ui.unwrap_or(0.85);
        match scope {
            Scope::Unchanged => roundup(version, (impact + exploitability).min(10.0)),
            Scope::Changed => roundup(version, (1.08 * (impact + exploitability)).min(10.0)),
        }
    }

    fn temporal_multiplier(&self) -> f64 {
        self.e.unwrap_or(1.0) * self.rl.unwrap_or(1.0) * self.rc.unwrap_or(1.0)
    }

    fn temporal_score(&self, version: Version, base: f64) -> f64 {
        roundup(version, base * self.temporal_multiplier())
    }

    fn environmental_score(&self, version: Version) -> f64 {
        let scope = self.ms.or(self.scope).unwrap_or(Scope::Unchanged);
        let mc = self.mc.or(self.c).unwrap_or(0.0);
        let mi = self.mi.or(self.i).unwrap_or(0.0);
        let ma = self.ma.or(self.a).unwrap_or(0.0);
        let cr = self.cr.unwrap_or(1.0);
        let ir = self.ir.unwrap_or(1.0);
        let ar = self.ar.unwrap_or(1.0);

        let miss = (1.0 - (1.0 - cr * mc) * (1.0 - ir * mi) * (1.0 - ar * ma)).min(0.915);
        let impact = match (scope, version) {
            (Scope::Unchanged, _) => 6.42 * miss,
            (Scope::Changed, Version::V3_0) => {
                7.52 * (miss - 0.029) - 3.25 * (miss - 0.02).powi(15)
            }
            (Scope::Changed, Version::V3_1) => {
                7.52 * (miss - 0.029) - 3.25 * (miss * 0.9731 - 0.02).powi(13)
            }
        };
        if impact <= 0.0 {
            return 0.0;
        }

        let exploitability = 8.22
            * self.mav.or(self.av).unwrap_or(0.85)
            * self.mac.or(self.ac).unwrap_or(0.77)
            * privileges_weight(self.mpr.or(self.pr).unwrap_or('N'), scope)
            * self.mui.or(self.ui).unwrap_or(0.85);

        let modified = match scope {
            Scope::Unchanged => (impact + exploitability).min(10.0),
            Scope::Changed => (1.08 * (impact + exploitability)).min(10.0),
        };
        roundup(
            version,
            roundup(version, modified) * self.temporal_multiplier(),
        )
    }
}

/// Round up to one decimal place.
///
/// v3.1 defines an integer-based rule to sidestep floating point drift;
/// v3.0 used a plain ceiling on the first decimal.
fn roundup(version: Version, value: f64) -> f64 {
    match version {
        Version::V3_0 => (value * 10.0).ceil() / 10.0,
        Version::V3_1 => {
            let scaled = (value * 100_000.0).round() as i64;
            if scaled % 10_000 == 0 {
                scaled as f64 / 100_000.0
            } else {
                ((scaled / 10_000) + 1) as f64 / 10.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(vector: &str) -> Cvss {
        vector.parse().unwrap()
    }

    #[test]
    fn test_critical_base_score() {
        let cvss = parse("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H");
        assert_eq!(cvss.base_score(), 9.8);
        assert_eq!(cvss.smart_score(), 9.8);
        assert_eq!(cvss.smart_score_name(), "Base score");
        assert_eq!(cvss.smart_severity(), Severity::Critical);
    }

    #[test]
    fn test_scope_changed_base_score() {
        // Typical stored-XSS shape
        let cvss = parse("CVSS:3.1/AV:N/AC:L/PR:N/UI:R/S:C/C:L/I:L/A:N");
        assert_eq!(cvss.base_score(), 6.1);
        assert_eq!(cvss.smart_severity(), Severity::Medium);
    }

    #[test]
    fn test_low_base_score() {
        let cvss = parse("CVSS:3.1/AV:L/AC:H/PR:H/UI:R/S:U/C:L/I:N/A:N");
        assert_eq!(cvss.base_score(), 1.8);
        assert_eq!(cvss.smart_severity(), Severity::Low);
    }

    #[test]
    fn test_zero_impact_scores_zero() {
        let cvss = parse("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:N/I:N/A:N");
        assert_eq!(cvss.base_score(), 0.0);
        assert_eq!(cvss.smart_severity(), Severity::None);
        assert_eq!(cvss.smart_color(), "#53aa33");
    }

    #[test]
    fn test_temporal_score_selected_when_it_diverges() {
        let cvss = parse("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H/E:F/RL:O/RC:C");
        assert_eq!(cvss.base_score(), 9.8);
        assert_eq!(cvss.temporal_score(), 9.1);
        assert_eq!(cvss.environmental_score(), 9.1);
        assert_eq!(cvss.smart_score(), 9.1);
        assert_eq!(cvss.smart_score_name(), "Temporal score");
    }

    #[test]
    fn test_environmental_score_selected_when_it_diverges() {
        let cvss = parse("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H/MAV:P");
        assert_eq!(cvss.base_score(), 9.8);
        assert_eq!(cvss.temporal_score(), 9.8);
        assert_eq!(cvss.environmental_score(), 6.8);
        assert_eq!(cvss.smart_score(), 6.8);
        assert_eq!(cvss.smart_score_name(), "Environmental score");
    }

    #[test]
    fn test_defaults_keep_all_scores_equal() {
        let cvss = parse("CVSS:3.0/AV:N/AC:L/PR:L/UI:N/S:U/C:H/I:L/A:N");
        let (base, temporal, environmental) = cvss.scores();
        assert_eq!(base, temporal);
        assert_eq!(temporal, environmental);
    }

    #[test]
    fn test_rejects_bad_vectors() {
        assert!(matches!(
            "CVSS:2.0/AV:N".parse::<Cvss>(),
            Err(CvssError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H".parse::<Cvss>(),
            Err(CvssError::MissingMetric("A"))
        ));
        assert!(matches!(
            "CVSS:3.1/AV:Q/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H".parse::<Cvss>(),
            Err(CvssError::InvalidValue { .. })
        ));
        assert!(matches!(
            "CVSS:3.1/AV:N/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H".parse::<Cvss>(),
            Err(CvssError::DuplicateMetric(_))
        ));
        assert!(matches!(
            "CVSS:3.1/AV".parse::<Cvss>(),
            Err(CvssError::MalformedSegment(_))
        ));
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(Severity::from_score(0.0), Severity::None);
        assert_eq!(Severity::from_score(3.9), Severity::Low);
        assert_eq!(Severity::from_score(4.0), Severity::Medium);
        assert_eq!(Severity::from_score(8.9), Severity::High);
        assert_eq!(Severity::from_score(9.0), Severity::Critical);
    }
}
