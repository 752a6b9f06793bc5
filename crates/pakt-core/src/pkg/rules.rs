//! Dependency rules: which edges of a package version to follow.

use super::model::{DependencyMap, PackageVersion};
use std::fmt;
use std::sync::Arc;

/// Function-valued rule for selections the built-in variants don't cover.
pub type RuleFn = dyn Fn(&PackageVersion) -> DependencyMap + Send + Sync;

/// Selects the dependencies of a package version that a traversal expands.
#[derive(Clone, Default)]
pub enum DependencyRule {
    /// `dependencies`
    #[default]
    Dependencies,
    /// `devDependencies`
    DevDependencies,
    /// `optionalDependencies`
    OptionalDependencies,
    /// `peerDependencies`
    PeerDependencies,
    /// Follow nothing.
    NoDependencies,
    /// Union of several rules; later rules overwrite earlier entries of the same name.
    Combined(Vec<DependencyRule>),
    Custom(Arc<RuleFn>),
}

impl DependencyRule {
    /// Dependencies to expand for `version`, keyed by package name.
    #[must_use]
    pub fn next_dependencies(&self, version: &PackageVersion) -> DependencyMap {
        match self {
            Self::Dependencies => version.dependencies.clone(),
            Self::DevDependencies => version.dev_dependencies.clone(),
            Self::OptionalDependencies => version.optional_dependencies.clone(),
            Self::PeerDependencies => version.peer_dependencies.clone(),
            Self::NoDependencies => DependencyMap::new(),
            Self::Combined(rules) => {
                let mut merged = DependencyMap::new();
                for rule in rules {
                    // Same-name entries are overwritten, not intersected
                    merged.extend(rule.next_dependencies(version));
                }
                merged
            }
            Self::Custom(f) => f(version),
        }
    }

    /// Union of `rules` in order.
    #[must_use]
    pub fn combine(rules: impl IntoIterator<Item = DependencyRule>) -> Self {
        Self::Combined(rules.into_iter().collect())
    }

    /// Build a rule from the usual CLI switches.
    ///
    /// All false gives [`DependencyRule::NoDependencies`]; exactly one gives that rule
    /// unwrapped.
    #[must_use]
    pub fn for_flags(prod: bool, dev: bool, optional: bool, peer: bool) -> Self {
        let mut rules: Vec<Self> = [
            (prod, Self::Dependencies),
            (dev, Self::DevDependencies),
            (optional, Self::OptionalDependencies),
            (peer, Self::PeerDependencies),
        ]
        .into_iter()
        .filter_map(|(on, rule)| on.then_some(rule))
        .collect();

        match rules.len() {
            0 => Self::NoDependencies,
            1 => rules.remove(0),
            _ => Self::Combined(rules),
        }
    }

    /// Wrap a closure as a rule.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&PackageVersion) -> DependencyMap + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Debug for DependencyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependencies => f.write_str("Dependencies"),
            Self::DevDependencies => f.write_str("DevDependencies"),
            Self::OptionalDependencies => f.write_str("OptionalDependencies"),
            Self::PeerDependencies => f.write_str("PeerDependencies"),
            Self::NoDependencies => f.write_str("NoDependencies"),
            Self::Combined(rules) => f.debug_tuple("Combined").field(rules).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::model::Dist;

    fn sample() -> PackageVersion {
        let mut v = PackageVersion::new("app", "1.0.0", Dist::default());
        v.dependencies.insert("shared".into(), "^1.0.0".into());
        v.dependencies.insert("prod-only".into(), "^2.0.0".into());
        v.dev_dependencies.insert("shared".into(), "^3.0.0".into());
        v.dev_dependencies.insert("jest".into(), "^29.0.0".into());
        v.optional_dependencies.insert("fsevents".into(), "^2.3.0".into());
        v.peer_dependencies.insert("react".into(), ">=16".into());
        v
    }

    #[test]
    fn test_atomic_rules_select_their_map() {
        let v = sample();
        assert_eq!(DependencyRule::Dependencies.next_dependencies(&v).len(), 2);
        assert_eq!(
            DependencyRule::DevDependencies.next_dependencies(&v)["jest"],
            "^29.0.0"
        );
        assert!(DependencyRule::OptionalDependencies
            .next_dependencies(&v)
            .contains_key("fsevents"));
        assert!(DependencyRule::PeerDependencies
            .next_dependencies(&v)
            .contains_key("react"));
        assert!(DependencyRule::NoDependencies.next_dependencies(&v).is_empty());
    }

    #[test]
    fn test_absent_maps_are_empty() {
        let v = PackageVersion::new("leaf", "1.0.0", Dist::default());
        assert!(DependencyRule::Dependencies.next_dependencies(&v).is_empty());
        assert!(DependencyRule::PeerDependencies.next_dependencies(&v).is_empty());
    }

    #[test]
    fn test_combine_later_rule_overwrites_same_name() {
        let v = sample();
        let prod_then_dev =
            DependencyRule::combine([DependencyRule::Dependencies, DependencyRule::DevDependencies]);
        let merged = prod_then_dev.next_dependencies(&v);
        assert_eq!(merged.len(), 3);
        // Not reconciled with ^1.0.0: the dev entry simply wins
        assert_eq!(merged["shared"], "^3.0.0");

        let dev_then_prod =
            DependencyRule::combine([DependencyRule::DevDependencies, DependencyRule::Dependencies]);
        assert_eq!(dev_then_prod.next_dependencies(&v)["shared"], "^1.0.0");
    }

    #[test]
    fn test_for_flags() {
        assert!(matches!(
            DependencyRule::for_flags(false, false, false, false),
            DependencyRule::NoDependencies
        ));
        assert!(matches!(
            DependencyRule::for_flags(true, false, false, false),
            DependencyRule::Dependencies
        ));
        assert!(matches!(
            DependencyRule::for_flags(false, false, false, true),
            DependencyRule::PeerDependencies
        ));

        let wide = DependencyRule::for_flags(true, true, true, true);
        let DependencyRule::Combined(ref rules) = wide else {
            panic!("expected combined rule, got {wide:?}");
        };
        assert_eq!(rules.len(), 4);
        assert_eq!(wide.next_dependencies(&sample()).len(), 5);
    }

    #[test]
    fn test_custom_rule() {
        let only_prod = DependencyRule::custom(|v| {
            v.dependencies
                .iter()
                .filter(|(name, _)| name.starts_with("prod"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });
        let deps = only_prod.next_dependencies(&sample());
        assert_eq!(deps.len(), 1);
        assert!(deps.contains_key("prod-only"));
        assert_eq!(format!("{only_prod:?}"), "Custom(..)");
    }
}
