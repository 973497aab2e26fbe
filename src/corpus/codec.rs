//! Canonical decode/encode helpers shared by the curation stages.
//!
//! All writes go through a temporary file in the destination directory that is
//! renamed into place, so a failed encode never leaves a partial file behind.

use std::fs;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, RgbImage};

use crate::corpus::walker::extension_of;
use crate::corpus::CANONICAL_EXTENSION;
use crate::utils::error::{CurationError, FileProblem, ProblemKind, Result};

/// A fully decoded image together with the container it came from
pub struct LoadedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

/// How a canonical write treats an existing file at the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Atomically replace whatever is at the target
    Replace,
    /// Fail if the target already exists
    CreateNew,
}

/// Detect the container format from content, falling back to the extension
pub fn detect_format(path: &Path, bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .or_else(|| ImageFormat::from_path(path).ok())
}

/// Fully decode `bytes` (not just the header)
///
/// The `image` crate's default allocation limits stay in force. Hitting them
/// yields `TooLarge` rather than `Decode`, since the file itself may be fine.
pub fn decode_bytes(path: &Path, bytes: &[u8]) -> Result<LoadedImage> {
    let format = detect_format(path, bytes).ok_or_else(|| {
        CurationError::Decode(path.to_path_buf(), "unrecognized image format".to_string())
    })?;

    let image = ImageReader::with_format(Cursor::new(bytes), format)
        .decode()
        .map_err(|e| match e {
            ImageError::Limits(_) => CurationError::TooLarge(path.to_path_buf(), e.to_string()),
            _ => CurationError::Decode(path.to_path_buf(), e.to_string()),
        })?;

    Ok(LoadedImage { image, format })
}

/// Read and decode an image file
pub fn load_image(path: &Path) -> Result<LoadedImage> {
    let bytes = fs::read(path)?;
    decode_bytes(path, &bytes)
}

/// Convert to the canonical 3-channel representation, reusing the buffer when possible
pub fn to_canonical(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

/// Whether the file name already ends in the canonical extension
pub fn has_canonical_extension(path: &Path) -> bool {
    extension_of(path).as_deref() == Some(CANONICAL_EXTENSION)
}

/// Encode `rgb` as JPEG at `quality` and move it into place at `target`
pub fn write_canonical(rgb: &RgbImage, target: &Path, quality: u8, mode: WriteMode) -> Result<()> {
    let write_err = |reason: String| CurationError::Write(target.to_path_buf(), reason);

    let dir = target
        .parent()
        .ok_or_else(|| write_err("target has no parent directory".to_string()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".curate-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| write_err(e.to_string()))?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        JpegEncoder::new_with_quality(&mut writer, quality)
            .encode_image(rgb)
            .map_err(|e| write_err(e.to_string()))?;
        writer.flush().map_err(|e| write_err(e.to_string()))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_err(e.to_string()))?;

    let persisted = match mode {
        WriteMode::Replace => tmp.persist(target),
        WriteMode::CreateNew => tmp.persist_noclobber(target),
    };
    persisted.map_err(|e| write_err(e.error.to_string()))?;

    Ok(())
}

/// Remove a copy made by a move or conversion that could not complete
///
/// Returns a `Delete` problem for `copy` when it cannot be removed, so the
/// caller can report that two files now hold the same record.
pub fn discard_copy(copy: &Path) -> Option<FileProblem> {
    match fs::remove_file(copy) {
        Ok(()) => None,
        Err(err) => {
            tracing::warn!("Could not remove leftover copy {:?}: {}", copy, err);
            Some(FileProblem::new(
                copy,
                ProblemKind::Delete,
                format!("leftover copy could not be removed: {}", err),
            ))
        }
    }
}

/// Whether two existing paths name the same file
pub fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Find a free path for `candidate`, appending `_1`, `_2`, ... to the stem
///
/// `owner` is the file that will end up at the path; if `candidate` already is
/// that file, it is returned unchanged. The search gives up after
/// `max_attempts` suffixes.
pub fn resolve_collision(
    candidate: &Path,
    owner: Option<&Path>,
    max_attempts: usize,
) -> Result<PathBuf> {
    if !candidate.exists() || owner.is_some_and(|o| same_file(o, candidate)) {
        return Ok(candidate.to_path_buf());
    }

    let dir = candidate.parent().unwrap_or_else(|| Path::new(""));
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for n in 1..=max_attempts {
        let next = dir.join(format!("{}_{}{}", stem, n, ext));
        if !next.exists() {
            return Ok(next);
        }
    }

    Err(CurationError::CollisionUnresolved(
        candidate.to_path_buf(),
        max_attempts,
    ))
}
