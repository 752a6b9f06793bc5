use crate::error::Error;
use crate::paths::default_home_dir;
use crate::pkg::registry::{DEFAULT_REGISTRY, REGISTRY_ENV};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default number of concurrent registry requests.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Runtime configuration for pakt.
///
/// Every field is optional in a config file; missing ones take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Registry base URL.
    pub registry_url: String,

    /// Root for pakt's own files.
    pub home_dir: PathBuf,

    /// Tarball cache. Defaults to `<home_dir>/cache`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,

    /// Target of global installs. Defaults to `<home_dir>/node_modules`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,

    /// Basic-auth user for the registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Basic-auth password. Never written back out.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Reuse tarballs already in the download directory.
    pub use_cache: bool,

    /// Check fresh downloads against the registry's shasum.
    pub verify_checksums: bool,

    /// Maximum concurrent registry requests.
    pub concurrency: usize,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Whether to emit JSON logs.
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_url: std::env::var(REGISTRY_ENV)
                .unwrap_or_else(|_| DEFAULT_REGISTRY.to_string()),
            home_dir: default_home_dir(),
            download_dir: None,
            install_dir: None,
            username: None,
            password: None,
            use_cache: true,
            verify_checksums: true,
            concurrency: DEFAULT_CONCURRENCY,
            verbosity: 0,
            json_logs: false,
        }
    }
}

impl Config {
    /// Create a config rooted at `home_dir`.
    #[must_use]
    pub fn new(home_dir: PathBuf) -> Self {
        Self {
            home_dir,
            ..Default::default()
        }
    }

    /// Read a JSON config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if it asks
    /// for zero concurrent requests.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.concurrency == 0 {
            return Err(Error::other(format!(
                "{}: concurrency must be at least 1",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Effective tarball cache directory.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("cache"))
    }

    /// Effective global install directory.
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        self.install_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("node_modules"))
    }

    /// Create the home, download, and install directories.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created.
    pub fn create_dirs(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.home_dir)?;
        fs::create_dir_all(self.download_dir())?;
        fs::create_dir_all(self.install_dir())?;
        Ok(())
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    /// Set the home directory.
    #[must_use]
    pub fn with_home_dir(mut self, dir: PathBuf) -> Self {
        self.home_dir = dir;
        self
    }

    /// Set the download directory.
    #[must_use]
    pub fn with_download_dir(mut self, dir: PathBuf) -> Self {
        self.download_dir = Some(dir);
        self
    }

    /// Set the global install directory.
    #[must_use]
    pub fn with_install_dir(mut self, dir: PathBuf) -> Self {
        self.install_dir = Some(dir);
        self
    }

    /// Set registry credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Enable or disable tarball reuse.
    #[must_use]
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Enable or disable checksum verification.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Set the registry request limit (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}
