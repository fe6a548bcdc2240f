/// Link lifecycle and provenance definitions
///
/// This module defines the states a discovered PDF link moves through and
/// the extraction methods that can produce it.
use std::fmt;

/// Lifecycle status of a discovered link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    // ===== Active States =====
    /// Link was found but not yet checked
    Discovered,

    /// Link has been checked at least once and is awaiting classification
    Validated,

    // ===== Validation Outcomes =====
    /// Existence check returned 200
    Accessible,

    /// Existence check failed or returned an error status
    Broken,

    /// Existence check was refused (401/403/429 or a blocking page)
    Blocked,

    // ===== Terminal State =====
    /// Document body has been retrieved by a downstream consumer
    Downloaded,
}

impl LinkStatus {
    /// Returns true once the link has a validation outcome
    pub fn is_validated(&self) -> bool {
        !matches!(self, Self::Discovered)
    }

    /// Returns true if this represents a failed validation
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Broken | Self::Blocked)
    }

    /// Returns true if the transition is allowed by the link lifecycle
    ///
    /// `discovered → validated → {accessible | broken | blocked} → downloaded`.
    /// Outcomes may be re-validated; nothing moves back to `discovered`.
    pub fn can_transition_to(&self, next: LinkStatus) -> bool {
        use LinkStatus::*;
        match (self, next) {
            (Discovered, Validated | Accessible | Broken | Blocked) => true,
            (Validated, Accessible | Broken | Blocked) => true,
            (Accessible | Broken | Blocked, Validated | Accessible | Broken | Blocked) => true,
            (Accessible, Downloaded) => true,
            _ => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Validated => "validated",
            Self::Accessible => "accessible",
            Self::Broken => "broken",
            Self::Blocked => "blocked",
            Self::Downloaded => "downloaded",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "validated" => Some(Self::Validated),
            "accessible" => Some(Self::Accessible),
            "broken" => Some(Self::Broken),
            "blocked" => Some(Self::Blocked),
            "downloaded" => Some(Self::Downloaded),
            _ => None,
        }
    }

    /// Returns all link statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Discovered,
            Self::Validated,
            Self::Accessible,
            Self::Broken,
            Self::Blocked,
            Self::Downloaded,
        ]
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// How a PDF link was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionMethod {
    /// Anchor element whose href ends in .pdf
    StructuralSelector,
    /// Regular expression over raw markup, or a generated URL
    PatternMatch,
    /// String literal inside a script block
    ScriptScan,
    /// `<loc>` entry in a sitemap
    Sitemap,
    /// JSON-LD or other embedded metadata
    StructuredMetadata,
    /// Result of submitting a search or filter form
    FormSubmission,
}

impl ExtractionMethod {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::StructuralSelector => "structural-selector",
            Self::PatternMatch => "pattern-match",
            Self::ScriptScan => "script-scan",
            Self::Sitemap => "sitemap",
            Self::StructuredMetadata => "structured-metadata",
            Self::FormSubmission => "form-submission",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "structural-selector" => Some(Self::StructuralSelector),
            "pattern-match" => Some(Self::PatternMatch),
            "script-scan" => Some(Self::ScriptScan),
            "sitemap" => Some(Self::Sitemap),
            "structured-metadata" => Some(Self::StructuredMetadata),
            "form-submission" => Some(Self::FormSubmission),
            _ => None,
        }
    }

    pub fn all_methods() -> Vec<Self> {
        vec![
            Self::StructuralSelector,
            Self::PatternMatch,
            Self::ScriptScan,
            Self::Sitemap,
            Self::StructuredMetadata,
            Self::FormSubmission,
        ]
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_validated() {
        assert!(!LinkStatus::Discovered.is_validated());
        assert!(LinkStatus::Validated.is_validated());
        assert!(LinkStatus::Accessible.is_validated());
        assert!(LinkStatus::Downloaded.is_validated());
    }

    #[test]
    fn test_is_error() {
        assert!(LinkStatus::Broken.is_error());
        assert!(LinkStatus::Blocked.is_error());
        assert!(!LinkStatus::Accessible.is_error());
        assert!(!LinkStatus::Discovered.is_error());
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(LinkStatus::Discovered.can_transition_to(LinkStatus::Validated));
        assert!(LinkStatus::Discovered.can_transition_to(LinkStatus::Accessible));
        assert!(LinkStatus::Validated.can_transition_to(LinkStatus::Broken));
        assert!(LinkStatus::Broken.can_transition_to(LinkStatus::Accessible));
        assert!(LinkStatus::Accessible.can_transition_to(LinkStatus::Downloaded));

        assert!(!LinkStatus::Discovered.can_transition_to(LinkStatus::Downloaded));
        assert!(!LinkStatus::Broken.can_transition_to(LinkStatus::Downloaded));
        assert!(!LinkStatus::Accessible.can_transition_to(LinkStatus::Discovered));
        assert!(!LinkStatus::Downloaded.can_transition_to(LinkStatus::Validated));
    }

    #[test]
    fn test_roundtrip_db_string() {
        for status in LinkStatus::all_states() {
            let parsed = LinkStatus::from_db_string(status.to_db_string());
            assert_eq!(Some(status), parsed, "Failed roundtrip for {:?}", status);
        }
        assert_eq!(LinkStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_method_db_strings() {
        assert_eq!(
            ExtractionMethod::StructuralSelector.to_db_string(),
            "structural-selector"
        );
        assert_eq!(
            ExtractionMethod::from_db_string("form-submission"),
            Some(ExtractionMethod::FormSubmission)
        );
        for method in ExtractionMethod::all_methods() {
            assert_eq!(
                ExtractionMethod::from_db_string(method.to_db_string()),
                Some(method)
            );
        }
        assert_eq!(ExtractionMethod::from_db_string("xpath"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", LinkStatus::Accessible), "accessible");
        assert_eq!(format!("{}", ExtractionMethod::Sitemap), "sitemap");
    }
}
