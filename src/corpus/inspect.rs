//! Container inspection for soft corruption
//!
//! Decoders are lenient: a JPEG whose stream stops before the end-of-image
//! marker is usually padded and decoded without complaint. This module walks
//! the container structure (JPEG marker segments, PNG chunks) and reports the
//! anomalies a strict decoder would warn about.

use std::fmt;

use image::ImageFormat;
use serde::{Deserialize, Serialize};

/// Anomaly found in an otherwise decodable file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DecodeWarning {
    /// Stream ends before the end-of-image marker / `IEND` chunk
    Truncated,
    /// Non-marker bytes between JPEG segments
    ExtraneousBytes { count: usize, marker: u8 },
    /// Data after the end-of-image marker / `IEND` chunk
    TrailingBytes { count: usize },
    /// Segment length field that cannot be valid
    MalformedSegment { offset: usize },
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeWarning::Truncated => write!(f, "premature end of data"),
            DecodeWarning::ExtraneousBytes { count, marker } => {
                write!(f, "{} extraneous bytes before marker 0x{:02x}", count, marker)
            }
            DecodeWarning::TrailingBytes { count } => {
                write!(f, "{} bytes after end of image", count)
            }
            DecodeWarning::MalformedSegment { offset } => {
                write!(f, "malformed segment at offset {}", offset)
            }
        }
    }
}

/// Inspect the container structure of `bytes`
///
/// Formats without a structural check return no warnings.
pub fn inspect(bytes: &[u8], format: ImageFormat) -> Vec<DecodeWarning> {
    match format {
        ImageFormat::Jpeg => inspect_jpeg(bytes),
        ImageFormat::Png => inspect_png(bytes),
        _ => Vec::new(),
    }
}

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_TEM: u8 = 0x01;

fn is_rst(marker: u8) -> bool {
    (0xD0..=0xD7).contains(&marker)
}

fn inspect_jpeg(bytes: &[u8]) -> Vec<DecodeWarning> {
    let mut warnings = Vec::new();
    if bytes.len() < 2 || bytes[..2] != JPEG_SOI {
        // Not a JPEG stream at all; the decoder reports this as a hard error
        return warnings;
    }

    let len = bytes.len();
    let mut pos = 2;

    loop {
        let start = pos;
        while pos < len && bytes[pos] != 0xFF {
            pos += 1;
        }
        let extraneous = pos - start;

        // Fill bytes
        while pos < len && bytes[pos] == 0xFF {
            pos += 1;
        }
        if pos >= len {
            warnings.push(DecodeWarning::Truncated);
            break;
        }

        let marker = bytes[pos];
        pos += 1;

        if extraneous > 0 {
            warnings.push(DecodeWarning::ExtraneousBytes {
                count: extraneous,
                marker,
            });
        }

        match marker {
            MARKER_EOI => {
                if pos < len {
                    warnings.push(DecodeWarning::TrailingBytes { count: len - pos });
                }
                break;
            }
            m if is_rst(m) || m == MARKER_TEM || m == 0x00 => continue,
            _ => {}
        }

        if pos + 2 > len {
            warnings.push(DecodeWarning::Truncated);
            break;
        }
        let segment_len = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        if segment_len < 2 {
            warnings.push(DecodeWarning::MalformedSegment { offset: pos });
            break;
        }
        pos += segment_len;
        if pos > len {
            warnings.push(DecodeWarning::Truncated);
            break;
        }

        if marker == MARKER_SOS {
            pos = skip_entropy_coded(bytes, pos);
        }
    }

    warnings
}

/// Advance past entropy-coded scan data to the next real marker
fn skip_entropy_coded(bytes: &[u8], mut pos: usize) -> usize {
    let len = bytes.len();
    while pos < len {
        if bytes[pos] == 0xFF && pos + 1 < len {
            let next = bytes[pos + 1];
            if next == 0x00 || is_rst(next) {
                pos += 2;
                continue;
            }
            return pos;
        }
        pos += 1;
    }
    len
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn inspect_png(bytes: &[u8]) -> Vec<DecodeWarning> {
    let mut warnings = Vec::new();
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return warnings;
    }

    let len = bytes.len();
    let mut pos = PNG_SIGNATURE.len();

    loop {
        if pos + 8 > len {
            warnings.push(DecodeWarning::Truncated);
            break;
        }

        let data_len =
            u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
                as usize;
        let chunk_type = &bytes[pos + 4..pos + 8];

        // length + type + data + crc
        let next = match pos.checked_add(12).and_then(|p| p.checked_add(data_len)) {
            Some(next) if next <= len => next,
            _ => {
                warnings.push(DecodeWarning::Truncated);
                break;
            }
        };

        if chunk_type == b"IEND" {
            if next < len {
                warnings.push(DecodeWarning::TrailingBytes { count: len - next });
            }
            break;
        }

        pos = next;
    }

    warnings
}
