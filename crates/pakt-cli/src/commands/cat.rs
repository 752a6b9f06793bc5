//! `pakt cat` command implementation.

use miette::{miette, IntoDiagnostic, Result};
use pakt_core::pkg::pkg_codes;
use pakt_core::{Config, PackageManager, PackageSpec, PkgError};
use std::io::Write;

pub async fn run(config: Config, spec: &str, path: &str) -> Result<()> {
    let manager = PackageManager::new(config).into_diagnostic()?;
    let spec = PackageSpec::parse(spec).into_diagnostic()?;
    let version = manager.resolver().require(&spec).await.into_diagnostic()?;

    manager.config().create_dirs().into_diagnostic()?;
    let Some(bytes) = manager.read_file(&version, path).await.into_diagnostic()? else {
        let e = PkgError::new(
            pkg_codes::PKG_NOT_FOUND,
            format!("{path} not found in {version}"),
        );
        return Err(miette!("{e}"));
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes).into_diagnostic()?;
    stdout.flush().into_diagnostic()
}
