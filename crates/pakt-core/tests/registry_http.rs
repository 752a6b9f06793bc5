//! The HTTP registry client against a mock npm registry.

mod common;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use common::package_tgz;
use pakt_core::pkg::{
    pkg_codes, InstallationStrategy, PackageManager, Registry, RegistryClient, Resolver,
    TraversalOptions,
};
use pakt_core::Config;
use pakt_util::hash::sha1_hex;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

struct Mock {
    base: String,
    /// `Authorization` header of every packument request.
    auth: Mutex<Vec<Option<String>>>,
}

type Published = (&'static str, &'static [(&'static str, &'static str)]);

const NO_DEPS: &[(&str, &str)] = &[];
const APP_DEPS: &[(&str, &str)] = &[("@vue/shared", "^3.0.0"), ("lib", "^1")];
const LIB_DEPS: &[(&str, &str)] = &[("@vue/shared", "3.0.0")];

fn published(name: &str) -> Option<(Vec<Published>, &'static str)> {
    let versions: Vec<Published> = match name {
        "vue" => vec![("2.6.10", NO_DEPS), ("2.6.11", NO_DEPS), ("3.0.0-beta.1", NO_DEPS)],
        "app" => vec![("1.0.0", APP_DEPS)],
        "@vue/shared" => vec![("3.0.0", NO_DEPS)],
        "lib" => vec![("1.0.0", LIB_DEPS)],
        _ => return None,
    };
    let latest = if name == "vue" { "2.6.11" } else { versions[0].0 };
    Some((versions, latest))
}

fn file_name(name: &str, version: &str) -> String {
    let short = name.rsplit('/').next().unwrap_or(name);
    format!("{short}-{version}.tgz")
}

fn packument(base: &str, name: &str) -> Option<serde_json::Value> {
    let (versions, latest) = published(name)?;
    let mut entries = serde_json::Map::new();
    for (version, deps) in versions {
        let deps: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|(n, r)| ((*n).to_string(), (*r).into()))
            .collect();
        entries.insert(
            version.to_string(),
            serde_json::json!({
                "name": name,
                "version": version,
                "dependencies": deps,
                "dist": {
                    "tarball": format!("{base}/files/{}", file_name(name, version)),
                    "shasum": sha1_hex(&package_tgz(name, version)),
                }
            }),
        );
    }
    Some(serde_json::json!({
        "name": name,
        "dist-tags": { "latest": latest, "next": "3.0.0-beta.1" },
        "versions": entries,
    }))
}

async fn handle_packument(
    Path(name): Path<String>,
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    mock.auth.lock().unwrap().push(auth);

    match packument(&mock.base, &name) {
        Some(doc) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            doc.to_string(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn handle_tarball(Path(file): Path<String>) -> Response {
    let found = ["vue", "app", "@vue/shared", "lib"].iter().find_map(|name| {
        let (versions, _) = published(name)?;
        versions
            .iter()
            .find(|(v, _)| file_name(name, v) == file)
            .map(|(v, _)| package_tgz(name, v))
    });
    match found {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/gzip")],
            Body::from(bytes),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// Serve the mock registry on an ephemeral port.
async fn start_mock_registry() -> Arc<Mock> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mock = Arc::new(Mock {
        base: format!("http://{addr}"),
        auth: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/files/:file", get(handle_tarball))
        .route("/:name", get(handle_packument))
        .with_state(Arc::clone(&mock));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    mock
}

#[tokio::test]
async fn test_fetch_package() {
    let mock = start_mock_registry().await;
    let client = RegistryClient::new(&mock.base).unwrap();

    let vue = client.fetch_package("vue").await.unwrap();
    assert_eq!(vue.name, "vue");
    assert_eq!(vue.versions.len(), 3);
    assert_eq!(vue.tagged("latest").unwrap().version(), "2.6.11");
    assert_eq!(vue.tagged("next").unwrap().version(), "3.0.0-beta.1");

    let resolver = Resolver::new(Arc::new(client));
    let best = resolver.resolve("vue", Some("~2.6.0")).await.unwrap().unwrap();
    assert_eq!(best.version(), "2.6.11");
    let next = resolver.resolve("vue", Some("next")).await.unwrap().unwrap();
    assert_eq!(next.version(), "3.0.0-beta.1");
}

#[tokio::test]
async fn test_unknown_package_is_not_found() {
    let mock = start_mock_registry().await;
    let client = RegistryClient::new(&mock.base).unwrap();

    let err = client.fetch_package("ghost").await.unwrap_err();
    assert!(err.is_not_found());

    let resolver = Resolver::new(Arc::new(client));
    assert!(resolver.resolve("ghost", None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_scoped_package_name_is_encoded() {
    let mock = start_mock_registry().await;
    let client = RegistryClient::new(&mock.base).unwrap();

    let shared = client.fetch_package("@vue/shared").await.unwrap();
    assert_eq!(shared.name, "@vue/shared");
    assert!(shared.versions.contains_key("3.0.0"));
}

#[tokio::test]
async fn test_basic_auth_is_sent() {
    let mock = start_mock_registry().await;
    let anonymous = RegistryClient::new(&mock.base).unwrap();
    anonymous.fetch_package("vue").await.unwrap();

    let client = RegistryClient::new(&mock.base)
        .unwrap()
        .with_credentials("ci", Some("pw".to_string()));
    client.fetch_package("vue").await.unwrap();

    let seen = mock.auth.lock().unwrap().clone();
    assert_eq!(seen, [None, Some("Basic Y2k6cHc=".to_string())]);
}

#[tokio::test]
async fn test_tarball_size_limit() {
    let mock = start_mock_registry().await;
    let client = RegistryClient::new(&mock.base).unwrap();
    let url = format!("{}/files/vue-2.6.11.tgz", mock.base);

    let bytes = client.fetch_tarball(&url).await.unwrap();
    assert_eq!(bytes.as_ref(), package_tgz("vue", "2.6.11").as_slice());

    let err = client.download_tarball(&url, 16).await.unwrap_err();
    assert_eq!(err.code(), pkg_codes::PKG_DOWNLOAD_FAILED);

    let missing = format!("{}/files/vue-9.9.9.tgz", mock.base);
    let err = client.fetch_tarball(&missing).await.unwrap_err();
    assert_eq!(err.code(), pkg_codes::PKG_DOWNLOAD_FAILED);
}

#[tokio::test]
async fn test_install_over_http() {
    let mock = start_mock_registry().await;
    let home = tempdir().unwrap();
    let out = tempdir().unwrap();

    let config = Config::new(home.path().to_path_buf()).with_registry_url(mock.base.clone());
    let pm = PackageManager::new(config).unwrap();
    let nodes = pm
        .traverse(TraversalOptions::default(), &["app"])
        .unwrap()
        .collect()
        .await
        .unwrap();

    let names: Vec<String> = nodes.iter().map(|n| n.version().name.clone()).collect();
    assert_eq!(names, ["app", "@vue/shared", "lib", "@vue/shared"]);
    assert!(nodes[3].is_duplicate());

    let installed = pm
        .install_all(&nodes, out.path(), &InstallationStrategy::Npm)
        .await
        .unwrap();
    assert_eq!(installed, 3);

    let modules = out.path().join("node_modules");
    assert!(modules.join("app/package.json").is_file());
    assert!(modules.join("lib/index.js").is_file());
    let shared = std::fs::read_to_string(modules.join("@vue/shared/package.json")).unwrap();
    assert!(shared.contains("\"version\": \"3.0.0\""));

    assert!(home.path().join("cache/@vue/shared-3.0.0.tgz").is_file());
    assert_eq!(
        pm.cache().list_cached().unwrap(),
        ["@vue/shared-3.0.0.tgz", "app-1.0.0.tgz", "lib-1.0.0.tgz"]
    );
}
