//! Registry data model.
//!
//! A packument (`GET /<name>`) decodes into [`PackageInfo`]; each entry of its
//! `versions` object decodes into a [`PackageVersion`].

use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use url::Url;

/// Dependency map: package name to version constraint.
pub type DependencyMap = BTreeMap<String, String>;

/// Identity of a published package version: `(name, version string)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    /// Package name (e.g., "react" or "@types/node").
    pub name: String,
    /// Version string exactly as published.
    pub version: String,
}

impl PackageId {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Distribution descriptor of a version (`dist` in the registry payload).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dist {
    /// Tarball URL.
    #[serde(default)]
    pub tarball: String,
    /// Hex SHA-1 of the tarball.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    /// Subresource integrity string (e.g. `sha512-...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpacked_size: Option<u64>,
}

impl Dist {
    /// File name of the tarball: the last path segment of its URL.
    ///
    /// Falls back to the raw string's last `/` segment when the URL does not parse.
    #[must_use]
    pub fn tarball_name(&self) -> Option<String> {
        let from_url = Url::parse(&self.tarball).ok().and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        });
        let name = from_url.or_else(|| {
            self.tarball
                .rsplit('/')
                .next()
                .map(|s| s.split(['?', '#']).next().unwrap_or(s).to_string())
        })?;
        if name.is_empty() || name == "." || name == ".." {
            None
        } else {
            Some(name)
        }
    }
}

/// One published version of a package.
///
/// Immutable after decoding. Equality and hashing use `(name, version string)`;
/// ordering uses semver precedence and falls back to comparing the raw strings
/// when either side is not valid semver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawVersion", into = "RawVersion")]
pub struct PackageVersion {
    pub name: String,
    version: String,
    semver: Option<semver::Version>,
    pub dependencies: DependencyMap,
    pub dev_dependencies: DependencyMap,
    pub optional_dependencies: DependencyMap,
    pub peer_dependencies: DependencyMap,
    pub dist: Dist,
    /// Preferred CDN entry file (`unpkg` field), if published.
    pub unpkg: Option<String>,
    /// Alternative CDN entry file (`jsdelivr` field), if published.
    pub jsdelivr: Option<String>,
}

impl PackageVersion {
    /// Create a version record with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, dist: Dist) -> Self {
        let version = version.into();
        Self {
            name: name.into(),
            semver: parse_semver(&version),
            version,
            dependencies: DependencyMap::new(),
            dev_dependencies: DependencyMap::new(),
            optional_dependencies: DependencyMap::new(),
            peer_dependencies: DependencyMap::new(),
            dist,
            unpkg: None,
            jsdelivr: None,
        }
    }

    /// The version string as published.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The parsed semantic version, or `None` for a non-semver version string.
    #[must_use]
    pub fn semver(&self) -> Option<&semver::Version> {
        self.semver.as_ref()
    }

    /// Identity of this version.
    #[must_use]
    pub fn id(&self) -> PackageId {
        PackageId::new(self.name.clone(), self.version.clone())
    }

    /// Check if this version satisfies a parsed requirement set.
    ///
    /// Non-semver versions never satisfy anything.
    #[must_use]
    pub fn satisfies(&self, reqs: &[semver::VersionReq]) -> bool {
        self.semver
            .as_ref()
            .is_some_and(|v| reqs.iter().any(|req| req.matches(v)))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version
    }
}

impl Eq for PackageVersion {}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Unparseable versions sort before every semver one
        let by_version = match (&self.semver, &other.semver) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.version.cmp(&other.version),
        };
        // Tie-breaks keep Ord consistent with Eq
        by_version
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

fn parse_semver(version: &str) -> Option<semver::Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed).ok()
}

/// Wire shape of a version entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersion {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default, deserialize_with = "lenient_deps")]
    dependencies: DependencyMap,
    #[serde(default, deserialize_with = "lenient_deps")]
    dev_dependencies: DependencyMap,
    #[serde(default, deserialize_with = "lenient_deps")]
    optional_dependencies: DependencyMap,
    #[serde(default, deserialize_with = "lenient_deps")]
    peer_dependencies: DependencyMap,
    #[serde(default)]
    dist: Dist,
    #[serde(default, deserialize_with = "lenient_string")]
    unpkg: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    jsdelivr: Option<String>,
}

impl From<RawVersion> for PackageVersion {
    fn from(raw: RawVersion) -> Self {
        Self {
            semver: parse_semver(&raw.version),
            name: raw.name,
            version: raw.version,
            dependencies: raw.dependencies,
            dev_dependencies: raw.dev_dependencies,
            optional_dependencies: raw.optional_dependencies,
            peer_dependencies: raw.peer_dependencies,
            dist: raw.dist,
            unpkg: raw.unpkg,
            jsdelivr: raw.jsdelivr,
        }
    }
}

impl From<PackageVersion> for RawVersion {
    fn from(v: PackageVersion) -> Self {
        Self {
            name: v.name,
            version: v.version,
            dependencies: v.dependencies,
            dev_dependencies: v.dev_dependencies,
            optional_dependencies: v.optional_dependencies,
            peer_dependencies: v.peer_dependencies,
            dist: v.dist,
            unpkg: v.unpkg,
            jsdelivr: v.jsdelivr,
        }
    }
}

/// Accept a dependency object, skipping entries whose value is not a string.
/// Anything that is not an object becomes an empty map.
fn lenient_deps<'de, D>(deserializer: D) -> Result<DependencyMap, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().map(String::from))
}

/// All published versions of a package plus its dist-tags.
#[derive(Debug, Clone, Default)]
pub struct PackageInfo {
    pub name: String,
    /// Tag name to version string (e.g. `latest` -> `2.0.0`).
    pub dist_tags: BTreeMap<String, String>,
    /// Version string to version record.
    pub versions: BTreeMap<String, Arc<PackageVersion>>,
}

impl PackageInfo {
    /// Create an empty package with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a version, keyed by its version string.
    pub fn insert_version(&mut self, version: PackageVersion) {
        self.versions
            .insert(version.version().to_string(), Arc::new(version));
    }

    /// Point a dist-tag at a version string.
    pub fn set_tag(&mut self, tag: impl Into<String>, version: impl Into<String>) {
        self.dist_tags.insert(tag.into(), version.into());
    }

    /// Look up the version a dist-tag points to.
    #[must_use]
    pub fn tagged(&self, tag: &str) -> Option<&Arc<PackageVersion>> {
        self.dist_tags.get(tag).and_then(|v| self.versions.get(v))
    }

    /// Decode a packument JSON document.
    ///
    /// Version entries that omit `name`/`version` inherit them from the
    /// packument and the `versions` key respectively.
    ///
    /// # Errors
    /// Returns an error if the document is not a JSON object.
    pub fn from_packument(packument: &serde_json::Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct RawPackument {
            #[serde(default)]
            name: String,
            #[serde(rename = "dist-tags", default, deserialize_with = "lenient_deps")]
            dist_tags: BTreeMap<String, String>,
            #[serde(default)]
            versions: BTreeMap<String, RawVersion>,
        }

        let raw = RawPackument::deserialize(packument)?;
        let mut info = Self::new(raw.name);
        info.dist_tags = raw.dist_tags;
        for (key, mut version) in raw.versions {
            if version.name.is_empty() {
                version.name.clone_from(&info.name);
            }
            if version.version.is_empty() {
                version.version.clone_from(&key);
            }
            info.versions.insert(key, Arc::new(version.into()));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(name: &str, v: &str) -> PackageVersion {
        PackageVersion::new(name, v, Dist::default())
    }

    #[test]
    fn test_identity_is_name_and_version() {
        let mut a = version("vue", "2.6.11");
        let b = version("vue", "2.6.11");
        a.dependencies.insert("x".into(), "^1".into());
        assert_eq!(a, b);
        assert_ne!(a, version("vue", "2.6.12"));
        assert_ne!(a, version("react", "2.6.11"));
    }

    #[test]
    fn test_semver_ordering() {
        let mut versions = [
            version("p", "1.10.0"),
            version("p", "1.2.0"),
            version("p", "1.2.0-beta.1"),
            version("p", "0.9.0"),
        ];
        versions.sort();
        let order: Vec<&str> = versions.iter().map(PackageVersion::version).collect();
        assert_eq!(order, ["0.9.0", "1.2.0-beta.1", "1.2.0", "1.10.0"]);
    }

    #[test]
    fn test_non_semver_falls_back_to_lexical() {
        let odd = version("p", "banana");
        assert!(odd.semver().is_none());
        assert!(version("p", "apple") < odd);
        assert_eq!(odd.version(), "banana");
    }

    #[test]
    fn test_mixed_ordering_is_transitive() {
        let mut versions = [
            version("p", "9.0.0"),
            version("p", "2.x-junk"),
            version("p", "10.0.0"),
            version("p", "banana"),
        ];
        versions.sort();
        let order: Vec<&str> = versions.iter().map(PackageVersion::version).collect();
        assert_eq!(order, ["2.x-junk", "banana", "9.0.0", "10.0.0"]);
        assert!(version("p", "10.0.0") > version("p", "2.x-junk"));
    }

    #[test]
    fn test_tarball_name() {
        let dist = Dist {
            tarball: "https://registry.npmjs.org/vue/-/vue-2.6.11.tgz".into(),
            ..Default::default()
        };
        assert_eq!(dist.tarball_name().as_deref(), Some("vue-2.6.11.tgz"));

        let scoped = Dist {
            tarball: "https://registry.npmjs.org/@types/node/-/node-20.0.0.tgz".into(),
            ..Default::default()
        };
        assert_eq!(scoped.tarball_name().as_deref(), Some("node-20.0.0.tgz"));

        assert_eq!(Dist::default().tarball_name(), None);
    }

    #[test]
    fn test_from_packument() {
        let packument = serde_json::json!({
            "name": "vue",
            "dist-tags": { "latest": "2.6.11", "next": "3.0.0-beta.1" },
            "versions": {
                "2.6.11": {
                    "name": "vue",
                    "version": "2.6.11",
                    "dependencies": { "a": "^1.0.0", "weird": { "not": "a string" } },
                    "devDependencies": { "typescript": "^3.8.0" },
                    "unpkg": "dist/vue.js",
                    "dist": {
                        "tarball": "https://registry.npmjs.org/vue/-/vue-2.6.11.tgz",
                        "shasum": "76594d877d4b12234406e84e35275c6d514125c5",
                        "fileCount": 259,
                        "unpackedSize": 3043433
                    }
                },
                "3.0.0-beta.1": {
                    "dependencies": "not-an-object"
                }
            }
        });

        let info = PackageInfo::from_packument(&packument).unwrap();
        assert_eq!(info.name, "vue");
        assert_eq!(info.versions.len(), 2);

        let latest = info.tagged("latest").unwrap();
        assert_eq!(latest.version(), "2.6.11");
        assert_eq!(latest.dependencies.len(), 1);
        assert_eq!(latest.dev_dependencies["typescript"], "^3.8.0");
        assert_eq!(latest.dist.file_count, Some(259));
        assert_eq!(latest.unpkg.as_deref(), Some("dist/vue.js"));

        let beta = info.tagged("next").unwrap();
        assert_eq!(beta.name, "vue");
        assert!(beta.dependencies.is_empty());
        assert!(beta.semver().is_some());
    }

    #[test]
    fn test_tag_to_missing_version() {
        let mut info = PackageInfo::new("p");
        info.set_tag("latest", "9.9.9");
        assert!(info.tagged("latest").is_none());
        assert!(info.tagged("nope").is_none());
    }
}
