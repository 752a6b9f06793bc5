//! Package spec parsing.
//!
//! Parses package specifications like:
//! - `react`
//! - `react@18.2.0`
//! - `react@^18.0.0`
//! - `react@next` (dist-tag)
//! - `@types/node`
//! - `@types/node@^20`
//!
//! The version part starts after the last `@` that is not the leading scope
//! marker, so scoped names split correctly.

use super::error::PkgError;
use std::fmt;
use std::str::FromStr;

/// Dist-tag used when a spec carries no version part.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed package specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Scope without the @ prefix, if scoped.
    pub scope: Option<String>,
    /// Version range, exact version or tag (None means latest).
    pub range: Option<String>,
}

impl PackageSpec {
    /// Parse a package specification string.
    ///
    /// # Errors
    /// Returns an error if the name part is invalid.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package spec"));
        }

        let (name, range) = match input.rfind('@') {
            Some(at_pos) if at_pos > 0 => (&input[..at_pos], Some(input[at_pos + 1..].trim())),
            _ => (input, None),
        };
        let range = range.filter(|r| !r.is_empty()).map(String::from);

        let scope = Self::validate_name(name, input)?;

        Ok(Self {
            name: name.to_string(),
            scope,
            range,
        })
    }

    /// Validate a package name, returning its scope if it has one.
    fn validate_name(name: &str, input: &str) -> Result<Option<String>, PkgError> {
        let (scope, bare) = if let Some(scoped) = name.strip_prefix('@') {
            let Some((scope, bare)) = scoped.split_once('/') else {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid scoped package: missing '/' in '{input}'"
                )));
            };
            if scope.is_empty() {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid scoped package: empty scope in '{input}'"
                )));
            }
            Self::validate_segment(scope, input)?;
            (Some(scope.to_string()), bare)
        } else {
            (None, name)
        };

        if bare.is_empty() {
            return Err(PkgError::spec_invalid(format!(
                "Invalid package spec: empty name in '{input}'"
            )));
        }
        Self::validate_segment(bare, input)?;

        Ok(scope)
    }

    fn validate_segment(segment: &str, input: &str) -> Result<(), PkgError> {
        if matches!(segment, "." | "..") {
            return Err(PkgError::spec_invalid(format!(
                "Invalid package name '{segment}' in '{input}'"
            )));
        }
        // Basic validation: no spaces, no special chars except - _ . ~
        for c in segment.chars() {
            if !c.is_alphanumeric() && !matches!(c, '-' | '_' | '.' | '~') {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid character '{c}' in package spec '{input}'"
                )));
            }
        }
        Ok(())
    }

    /// The version constraint, with an absent range meaning `latest`.
    #[must_use]
    pub fn constraint(&self) -> &str {
        self.range.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Check if this is a scoped package.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    /// Get the unscoped portion of the name.
    ///
    /// For `@scope/name`, returns `name`.
    /// For `react`, returns `react`.
    #[must_use]
    pub fn unscoped_name(&self) -> &str {
        if let Some(ref scope) = self.scope {
            // Skip @scope/
            &self.name[scope.len() + 2..]
        } else {
            &self.name
        }
    }

    /// URL-encode the package name for registry requests.
    #[must_use]
    pub fn url_encoded_name(&self) -> String {
        encode_name(&self.name)
    }
}

impl FromStr for PackageSpec {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.constraint())
    }
}

/// URL-encode a package name: scoped packages get their `/` encoded as `%2F`.
#[must_use]
pub fn encode_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}
