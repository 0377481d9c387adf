//! Archive handling: extraction, media stripping, re-zipping and hashing.
//!
//! Zip work is synchronous and runs under `spawn_blocking`; hashing streams
//! the file through SHA-256 without loading it whole.

use std::fs::File;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::task;
use tracing::debug;

use super::types::ImportError;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Result of a media-stripping pass.
#[derive(Debug)]
pub struct StripOutcome {
    /// Path of the re-zipped stripped archive, or `None` when no media file
    /// was found (in which case no second archive is produced).
    pub stripped_path: Option<PathBuf>,
    pub files_removed: u32,
}

/// Extract `archive` into `scratch`, delete every file matching one of the
/// media `extensions`, and re-zip the remainder to `stripped_out` if at
/// least one file was removed. The scratch directory is always deleted
/// afterward, on success and failure alike.
pub async fn strip_alt_media(
    archive: &Path,
    scratch: &Path,
    stripped_out: &Path,
    extensions: &[String],
) -> Result<StripOutcome, ImportError> {
    let archive = archive.to_path_buf();
    let scratch_owned = scratch.to_path_buf();
    let out = stripped_out.to_path_buf();
    let extensions = extensions.to_vec();

    let result = task::spawn_blocking(move || {
        strip_alt_media_sync(&archive, &scratch_owned, &out, &extensions)
    })
    .await
    .map_err(|e| ImportError::Archive(format!("Strip task panicked: {e}")))?;

    let _ = tokio::fs::remove_dir_all(scratch).await;
    result
}

fn strip_alt_media_sync(
    archive: &Path,
    scratch: &Path,
    out: &Path,
    extensions: &[String],
) -> Result<StripOutcome, ImportError> {
    let file = File::open(archive)?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| ImportError::Archive(e.to_string()))?;
    std::fs::create_dir_all(scratch)?;
    zip.extract(scratch)
        .map_err(|e| ImportError::Archive(e.to_string()))?;

    let mut removed = 0u32;
    remove_media_files(scratch, extensions, &mut removed)?;
    if removed == 0 {
        return Ok(StripOutcome {
            stripped_path: None,
            files_removed: 0,
        });
    }

    zip_dir_sync(scratch, out)?;
    Ok(StripOutcome {
        stripped_path: Some(out.to_path_buf()),
        files_removed: removed,
    })
}

fn remove_media_files(
    dir: &Path,
    extensions: &[String],
    removed: &mut u32,
) -> Result<(), ImportError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            remove_media_files(&path, extensions, removed)?;
        } else if is_media_file(&path, extensions) {
            debug!("Removing embedded media file {}", path.display());
            std::fs::remove_file(&path)?;
            *removed += 1;
        }
    }
    Ok(())
}

fn is_media_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            extensions.iter().any(|m| *m == e)
        })
        .unwrap_or(false)
}

/// Zip a directory tree into `out`, storing entries with forward-slash
/// relative paths.
fn zip_dir_sync(dir: &Path, out: &Path) -> Result<(), ImportError> {
    let file = File::create(out)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
                continue;
            }
            let rel = path
                .strip_prefix(dir)
                .map_err(|e| ImportError::Archive(e.to_string()))?;
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            writer
                .start_file(name, options)
                .map_err(|e| ImportError::Archive(e.to_string()))?;
            let mut src = File::open(&path)?;
            std::io::copy(&mut src, &mut writer)?;
        }
    }

    writer
        .finish()
        .map_err(|e| ImportError::Archive(e.to_string()))?;
    Ok(())
}

/// Zip a flat list of files into `out`, named by their file names.
pub async fn zip_files(files: &[PathBuf], out: &Path) -> Result<(), ImportError> {
    let files = files.to_vec();
    let out = out.to_path_buf();
    task::spawn_blocking(move || zip_files_sync(&files, &out))
        .await
        .map_err(|e| ImportError::Archive(format!("Zip task panicked: {e}")))?
}

fn zip_files_sync(files: &[PathBuf], out: &Path) -> Result<(), ImportError> {
    let file = File::create(out)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ImportError::Archive(format!("Bad file path {}", path.display())))?;
        writer
            .start_file(name, options)
            .map_err(|e| ImportError::Archive(e.to_string()))?;
        let mut src = File::open(path)?;
        std::io::copy(&mut src, &mut writer)?;
    }

    writer
        .finish()
        .map_err(|e| ImportError::Archive(e.to_string()))?;
    Ok(())
}

/// Streaming SHA-256 and byte size of a file.
pub async fn hash_and_size(path: &Path) -> Result<(String, u64), ImportError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), total))
}

/// List entry names of a zip archive. Test helper for asserting on
/// produced variants.
pub fn list_zip_entries(bytes: &[u8]) -> Result<Vec<String>, ImportError> {
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ImportError::Archive(e.to_string()))?;
    let mut names = Vec::new();
    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| ImportError::Archive(e.to_string()))?;
        names.push(entry.name().to_string());
    }
    names.sort();
    Ok(names)
}
