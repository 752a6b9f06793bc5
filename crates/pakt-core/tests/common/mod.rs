//! Shared fixtures: an in-memory registry and tarball builders.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use pakt_core::pkg::{Dist, PackageInfo, PackageVersion, PkgError, Registry};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tar::Builder;

pub const BASE: &str = "https://registry.test";

/// Registry backed by hash maps, counting every fetch.
#[derive(Default)]
pub struct MemoryRegistry {
    packages: Mutex<HashMap<String, PackageInfo>>,
    tarballs: Mutex<HashMap<String, Vec<u8>>>,
    broken: Mutex<HashSet<String>>,
    /// Vary response latency so concurrent branches finish in shifting orders.
    jitter: bool,
    calls: AtomicUsize,
    pub package_fetches: AtomicUsize,
    pub tarball_fetches: AtomicUsize,
}

/// Tarball URL of a published version.
pub fn tarball_url(name: &str, version: &str) -> String {
    let file = name.rsplit('/').next().unwrap_or(name);
    format!("{BASE}/{name}/-/{file}-{version}.tgz")
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jitter() -> Self {
        Self {
            jitter: true,
            ..Self::default()
        }
    }

    /// Publish `name@version` with runtime dependencies. The newest publish
    /// becomes `latest`.
    pub fn publish(&self, name: &str, version: &str, deps: &[(&str, &str)]) {
        let mut v = Self::version(name, version);
        v.dependencies = to_map(deps);
        self.publish_version(v);
    }

    /// Publish a fully built version record.
    pub fn publish_version(&self, version: PackageVersion) {
        let mut packages = self.packages.lock().unwrap();
        let info = packages
            .entry(version.name.clone())
            .or_insert_with(|| PackageInfo::new(version.name.clone()));
        info.set_tag("latest", version.version());
        info.insert_version(version);
    }

    /// A bare version record whose tarball lives at [`tarball_url`].
    pub fn version(name: &str, version: &str) -> PackageVersion {
        let dist = Dist {
            tarball: tarball_url(name, version),
            ..Dist::default()
        };
        PackageVersion::new(name, version, dist)
    }

    pub fn add_tarball(&self, url: &str, bytes: Vec<u8>) {
        self.tarballs.lock().unwrap().insert(url.to_string(), bytes);
    }

    /// Make every metadata request for `name` fail with a transport error.
    pub fn break_package(&self, name: &str) {
        self.broken.lock().unwrap().insert(name.to_string());
    }

    async fn pause(&self) {
        if self.jitter {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            let ms = (n.wrapping_mul(7919) % 4) as u64;
            tokio::time::sleep(Duration::from_millis(ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn fetch_package(&self, name: &str) -> Result<PackageInfo, PkgError> {
        self.package_fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.broken.lock().unwrap().contains(name) {
            return Err(PkgError::registry(format!("connection reset fetching {name}")));
        }
        self.packages
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| PkgError::not_found(name))
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        self.tarball_fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.tarballs
            .lock()
            .unwrap()
            .get(url)
            .map(|b| Bytes::from(b.clone()))
            .ok_or_else(|| PkgError::download_failed(format!("no tarball at {url}")))
    }
}

pub fn to_map(deps: &[(&str, &str)]) -> BTreeMap<String, String> {
    deps.iter()
        .map(|(n, r)| ((*n).to_string(), (*r).to_string()))
        .collect()
}

/// Build a registry-style `.tgz` with every file under `package/`.
pub fn tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(format!("package/{path}")).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.finish().unwrap();
    }
    gzip(&tar_bytes)
}

/// A `.tgz` holding one entry with a raw, unvalidated name.
pub fn tgz_with_raw_entry(name: &str, data: &[u8]) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);
        let mut header = tar::Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data).unwrap();
        builder.finish().unwrap();
    }
    gzip(&tar_bytes)
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// A minimal package tarball: `package.json` plus `index.js`.
pub fn package_tgz(name: &str, version: &str) -> Vec<u8> {
    let pkg_json = format!("{{\n  \"name\": \"{name}\",\n  \"version\": \"{version}\"\n}}\n");
    tgz(&[
        ("package.json", pkg_json.as_bytes()),
        ("index.js", b"module.exports = 42;\n"),
    ])
}
