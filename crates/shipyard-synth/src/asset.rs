//! Asset staging: locate the seed archive and fingerprint its contents.

use sha2::{Digest, Sha256};
use shipyard_core::repository::{Asset, AssetPackaging};
use shipyard_core::{Error, Result};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Stage a file or directory as an asset.
///
/// Fails with [`Error::AssetNotFound`] when the path does not exist.
pub fn stage_asset(path: &Path) -> Result<Asset> {
    if !path.exists() {
        return Err(Error::AssetNotFound(path.to_path_buf()));
    }
    let source_path = path.canonicalize()?;

    let (packaging, hash) = if source_path.is_dir() {
        (AssetPackaging::ZipDirectory, hash_directory(&source_path)?)
    } else {
        (AssetPackaging::File, hash_file(&source_path)?)
    };

    debug!(path = %source_path.display(), %packaging, %hash, "Staged asset");
    Ok(Asset {
        source_path,
        packaging,
        hash,
    })
}

/// Whether a file exists at `relative` inside a directory asset. `None` when
/// the asset is an archive and its contents are only known at build time.
pub fn contains_file(asset: &Asset, relative: &str) -> Option<bool> {
    match asset.packaging {
        AssetPackaging::ZipDirectory => Some(asset.source_path.join(relative).is_file()),
        AssetPackaging::File => None,
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hash of every file's relative path and content, independent of the
/// order the filesystem lists entries in. Symlinks are followed, so linked
/// content counts the same as a regular file.
fn hash_directory(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            Error::Io(e.into_io_error().unwrap_or_else(|| {
                io::Error::other("filesystem loop while hashing asset directory")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        let relative: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        hasher.update(relative.join("/").as_bytes());
        hasher.update([0u8]);
        hasher.update(hash_file(entry.path())?.as_bytes());
        hasher.update([0u8]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_asset() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("java-project.zip");
        let err = stage_asset(&missing).unwrap_err();
        assert!(matches!(err, Error::AssetNotFound(p) if p == missing));
    }

    #[test]
    fn test_file_hash_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.zip");
        let b = dir.path().join("b.zip");
        let c = dir.path().join("c.zip");
        fs::write(&a, b"PK\x03\x04 project").unwrap();
        fs::write(&b, b"PK\x03\x04 project").unwrap();
        fs::write(&c, b"PK\x03\x04 other").unwrap();

        let a = stage_asset(&a).unwrap();
        let b = stage_asset(&b).unwrap();
        let c = stage_asset(&c).unwrap();
        assert_eq!(a.packaging, AssetPackaging::File);
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.hash.len(), 64);
        assert_eq!(contains_file(&a, "buildspec.yml"), None);
    }

    #[test]
    fn test_directory_hash() {
        let first = tempfile::tempdir().unwrap();
        fs::create_dir_all(first.path().join("src")).unwrap();
        fs::write(first.path().join("buildspec.yml"), "version: 0.2\n").unwrap();
        fs::write(first.path().join("src/Main.java"), "class Main {}").unwrap();

        // Same tree, written in the opposite order.
        let second = tempfile::tempdir().unwrap();
        fs::create_dir_all(second.path().join("src")).unwrap();
        fs::write(second.path().join("src/Main.java"), "class Main {}").unwrap();
        fs::write(second.path().join("buildspec.yml"), "version: 0.2\n").unwrap();

        let a = stage_asset(first.path()).unwrap();
        let b = stage_asset(second.path()).unwrap();
        assert_eq!(a.packaging, AssetPackaging::ZipDirectory);
        assert_eq!(a.hash, b.hash);
        assert_eq!(contains_file(&a, "buildspec.yml"), Some(true));
        assert_eq!(contains_file(&a, "ci/buildspec.yml"), Some(false));

        // Renaming a file changes the hash even with identical content.
        fs::rename(
            second.path().join("src/Main.java"),
            second.path().join("src/App.java"),
        )
        .unwrap();
        let c = stage_asset(second.path()).unwrap();
        assert_ne!(a.hash, c.hash);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_hash_follows_symlinks() {
        let shared = tempfile::tempdir().unwrap();
        let target = shared.path().join("Main.java");
        fs::write(&target, "class Main {}").unwrap();

        let seed = tempfile::tempdir().unwrap();
        fs::write(seed.path().join("buildspec.yml"), "version: 0.2\n").unwrap();
        std::os::unix::fs::symlink(&target, seed.path().join("Main.java")).unwrap();

        let linked = stage_asset(seed.path()).unwrap();
        assert_eq!(contains_file(&linked, "Main.java"), Some(true));

        // Same tree with a regular file hashes the same.
        let copy = tempfile::tempdir().unwrap();
        fs::write(copy.path().join("buildspec.yml"), "version: 0.2\n").unwrap();
        fs::write(copy.path().join("Main.java"), "class Main {}").unwrap();
        assert_eq!(linked.hash, stage_asset(copy.path()).unwrap().hash);

        fs::write(&target, "class Main { int x; }").unwrap();
        assert_ne!(linked.hash, stage_asset(seed.path()).unwrap().hash);
    }
}
