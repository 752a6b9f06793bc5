//! npm registry access.
//!
//! [`Registry`] is the seam the resolver and installer talk to.
//! [`RegistryClient`] implements it over HTTP; [`LimitedRegistry`] bounds how
//! many requests any registry serves at once.

use super::error::PkgError;
use super::model::PackageInfo;
use super::spec::encode_name;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "PAKT_REGISTRY";

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Source of package metadata and tarballs.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch every published version and the dist-tags of a package.
    ///
    /// # Errors
    /// Fails with `PKG_NOT_FOUND` when the package does not exist, or a
    /// transport error.
    async fn fetch_package(&self, name: &str) -> Result<PackageInfo, PkgError>;

    /// Fetch raw tarball bytes.
    ///
    /// # Errors
    /// Fails with a transport error.
    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError>;
}

#[async_trait]
impl<R: Registry + ?Sized> Registry for Arc<R> {
    async fn fetch_package(&self, name: &str) -> Result<PackageInfo, PkgError> {
        (**self).fetch_package(name).await
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        (**self).fetch_tarball(url).await
    }
}

/// Basic-auth credentials sent with every request.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// HTTP registry client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    credentials: Option<Credentials>,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(PkgError::registry(format!(
                "Invalid registry URL '{base_url}': not a base URL"
            )));
        }
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("pakt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            credentials: None,
        })
    }

    /// Create a client using the registry URL from environment or default.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created.
    pub fn from_env() -> Result<Self, PkgError> {
        let url = std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        Self::new(&url)
    }

    /// Attach basic-auth credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, creds.password.as_ref()),
            None => request,
        }
    }

    /// Fetch the packument (package metadata) for a package.
    ///
    /// # Errors
    /// Returns an error if the request fails or the package is not found.
    pub async fn fetch_packument(&self, name: &str) -> Result<serde_json::Value, PkgError> {
        let url = self
            .base_url
            .join(&encode_name(name))
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        let response = self.get(url.as_str()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !response.status().is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let json: serde_json::Value = response.json().await?;
        Ok(json)
    }

    /// Download a tarball, rejecting bodies above `max_bytes`.
    ///
    /// # Errors
    /// Returns an error if the download fails or exceeds the size limit.
    pub async fn download_tarball(&self, url: &str, max_bytes: u64) -> Result<Bytes, PkgError> {
        let response = self
            .get(url)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| PkgError::download_failed(format!("Failed to download '{url}': {e}")))?;

        if !response.status().is_success() {
            return Err(PkgError::download_failed(format!(
                "Download failed with status {} for '{url}'",
                response.status()
            )));
        }

        // Check content length if available
        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(PkgError::download_failed(format!(
                    "Tarball too large: {len} bytes (max: {max_bytes})"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PkgError::download_failed(format!("Failed to read response body: {e}")))?;

        if bytes.len() as u64 > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {} bytes (max: {max_bytes})",
                bytes.len()
            )));
        }

        Ok(bytes)
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn fetch_package(&self, name: &str) -> Result<PackageInfo, PkgError> {
        let mut packument = self.fetch_packument(name).await?;
        let has_name = packument
            .get("name")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|n| !n.is_empty());
        if !has_name {
            if let Some(obj) = packument.as_object_mut() {
                obj.insert("name".to_string(), name.into());
            }
        }
        Ok(PackageInfo::from_packument(&packument)?)
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        self.download_tarball(url, MAX_TARBALL_SIZE).await
    }
}

/// Registry wrapper that admits at most `limit` requests at a time.
pub struct LimitedRegistry<R> {
    inner: R,
    permits: Semaphore,
}

impl<R: Registry> LimitedRegistry<R> {
    /// Wrap `inner`; a limit of zero is treated as one.
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(limit.max(1)),
        }
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, PkgError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| PkgError::registry("Registry request limiter closed"))
    }
}

#[async_trait]
impl<R: Registry> Registry for LimitedRegistry<R> {
    async fn fetch_package(&self, name: &str) -> Result<PackageInfo, PkgError> {
        let _permit = self.acquire().await?;
        self.inner.fetch_package(name).await
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        let _permit = self.acquire().await?;
        self.inner.fetch_tarball(url).await
    }
}
