/// Tor binary selection and staging
///
/// The bundled binaries live under `<assets>/tor/<variant>/tor`. On every
/// start the variant matching the device ABI is copied into the private app
/// directory and marked executable.

use darkmsg_common::{DarkMsgError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Variant used when the reported ABI matches nothing in the table
pub const DEFAULT_VARIANT: &str = "armeabi-v7a";

/// Substring of the reported ABI -> bundled variant. Checked in order, so
/// `x86_64` precedes `x86` and `armeabi` precedes `arm`.
const ABI_TABLE: &[(&str, &str)] = &[
    ("arm64", "arm64-v8a"),
    ("aarch64", "arm64-v8a"),
    ("armeabi", "armeabi-v7a"),
    ("armv7", "armeabi-v7a"),
    ("x86_64", "x86_64"),
    ("amd64", "x86_64"),
    ("x86", "x86"),
    ("i686", "x86"),
    ("i386", "x86"),
    ("arm", "armeabi-v7a"),
];

/// The ABI the device reports: the configured override, else the build target
pub fn reported_abi(configured: Option<&str>) -> String {
    configured
        .filter(|abi| !abi.trim().is_empty())
        .unwrap_or(std::env::consts::ARCH)
        .to_string()
}

/// Map a reported ABI onto one of the bundled variants
pub fn select_variant(reported: &str) -> &'static str {
    let reported = reported.trim().to_ascii_lowercase();
    ABI_TABLE
        .iter()
        .find(|(pattern, _)| reported.contains(pattern))
        .map(|(_, variant)| *variant)
        .unwrap_or(DEFAULT_VARIANT)
}

/// Location of a bundled binary
pub fn asset_path(assets_dir: &Path, variant: &str) -> PathBuf {
    assets_dir.join("tor").join(variant).join("tor")
}

/// Copy the bundled binary for `variant` to `dest` and make it executable.
///
/// The copy goes through a temporary file and a rename so that a binary still
/// held by an exiting process is replaced rather than written into.
pub async fn stage_binary(assets_dir: &Path, variant: &str, dest: &Path) -> Result<PathBuf> {
    let source = asset_path(assets_dir, variant);
    if !source.is_file() {
        return Err(DarkMsgError::staging(format!(
            "no bundled Tor binary for ABI {} at {}",
            variant,
            source.display()
        )));
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            DarkMsgError::staging(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }

    let partial = dest.with_extension("partial");
    tokio::fs::copy(&source, &partial).await.map_err(|e| {
        DarkMsgError::staging(format!(
            "failed to copy {} to {}: {}",
            source.display(),
            partial.display(),
            e
        ))
    })?;

    make_executable(&partial).await?;

    tokio::fs::rename(&partial, dest).await.map_err(|e| {
        DarkMsgError::staging(format!("failed to install {}: {}", dest.display(), e))
    })?;

    debug!(variant, path = %dest.display(), "Staged Tor binary");
    Ok(dest.to_path_buf())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| {
            DarkMsgError::staging(format!("failed to chmod {}: {}", path.display(), e))
        })
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_variant() {
        assert_eq!(select_variant("arm64-v8a"), "arm64-v8a");
        assert_eq!(select_variant("aarch64"), "arm64-v8a");
        assert_eq!(select_variant("armeabi-v7a"), "armeabi-v7a");
        assert_eq!(select_variant("armeabi"), "armeabi-v7a");
        assert_eq!(select_variant("arm"), "armeabi-v7a");
        assert_eq!(select_variant("x86_64"), "x86_64");
        assert_eq!(select_variant("X86"), "x86");
        assert_eq!(select_variant("i686"), "x86");
    }

    #[test]
    fn test_unknown_abi_falls_back() {
        assert_eq!(select_variant("mips"), DEFAULT_VARIANT);
        assert_eq!(select_variant(""), DEFAULT_VARIANT);
    }

    #[test]
    fn test_reported_abi_override() {
        assert_eq!(reported_abi(Some("arm64-v8a")), "arm64-v8a");
        assert_eq!(reported_abi(Some("  ")), std::env::consts::ARCH);
        assert_eq!(reported_abi(None), std::env::consts::ARCH);
    }

    #[tokio::test]
    async fn test_stage_binary_copies_and_marks_executable() {
        let assets = tempfile::tempdir().unwrap();
        let app = tempfile::tempdir().unwrap();
        let source = asset_path(assets.path(), "arm64-v8a");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"#!/bin/sh\nexit 0\n").unwrap();

        let dest = app.path().join("tor_binary");
        let staged = stage_binary(assets.path(), "arm64-v8a", &dest).await.unwrap();
        assert_eq!(staged, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"#!/bin/sh\nexit 0\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }

        // staging again replaces the previous copy
        std::fs::write(&source, b"v2").unwrap();
        stage_binary(assets.path(), "arm64-v8a", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_stage_binary_missing_asset() {
        let assets = tempfile::tempdir().unwrap();
        let app = tempfile::tempdir().unwrap();
        let err = stage_binary(assets.path(), "x86", &app.path().join("tor_binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, DarkMsgError::Staging(_)));
    }
}
