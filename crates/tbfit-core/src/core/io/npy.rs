//! Minimal NPY (format version 1.0) support for one-dimensional `f64` vectors.
//!
//! Only the `<f8` dtype in C order is produced or accepted, which is what
//! parameter vectors are stored as.

use std::path::Path;
use thiserror::Error;

const MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGNMENT: usize = 64;
const PREFIX_LEN: usize = MAGIC.len() + 2 + 2;

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("'{path}' is not an NPY file: {reason}")]
    Format { path: String, reason: String },
    #[error("'{path}' holds an unsupported array: {reason}")]
    Unsupported { path: String, reason: String },
}

pub fn encode_vector(values: &[f64]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    let unpadded = PREFIX_LEN + header.len() + 1;
    let padding = (HEADER_ALIGNMENT - unpadded % HEADER_ALIGNMENT) % HEADER_ALIGNMENT;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');

    let mut bytes = Vec::with_capacity(PREFIX_LEN + header.len() + values.len() * 8);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_vector(bytes: &[u8], origin: &str) -> Result<Vec<f64>, NpyError> {
    let format_err = |reason: &str| NpyError::Format {
        path: origin.to_string(),
        reason: reason.to_string(),
    };
    let unsupported = |reason: String| NpyError::Unsupported {
        path: origin.to_string(),
        reason,
    };

    if bytes.len() < PREFIX_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(format_err("missing magic string"));
    }
    let major = bytes[MAGIC.len()];
    let (header_start, header_len) = match major {
        1 => (PREFIX_LEN, u16::from_le_bytes([bytes[8], bytes[9]]) as usize),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(format_err("truncated header length"));
            }
            (
                12,
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            )
        }
        other => return Err(unsupported(format!("format version {other}"))),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(format_err("truncated header"));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| format_err("header is not valid text"))?;

    let descr = header_value(header, "descr").ok_or_else(|| format_err("missing 'descr'"))?;
    if descr.trim_matches(|c| c == '\'' || c == '"') != "<f8" {
        return Err(unsupported(format!("dtype {descr}")));
    }
    let fortran = header_value(header, "fortran_order")
        .ok_or_else(|| format_err("missing 'fortran_order'"))?;
    let shape = header_value(header, "shape").ok_or_else(|| format_err("missing 'shape'"))?;
    let dims: Vec<&str> = shape
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    let len = match dims.as_slice() {
        [len] => len.parse::<usize>().map_err(|_| format_err("invalid shape"))?,
        _ => return Err(unsupported(format!("shape {shape}"))),
    };
    if fortran != "False" && len > 1 {
        return Err(unsupported("Fortran-ordered data".to_string()));
    }

    let data = &bytes[data_start..];
    if data.len() != len * 8 {
        return Err(format_err("data length does not match shape"));
    }
    Ok(data
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        })
        .collect())
}

/// Extracts the raw value of `key` from a Python dict literal header.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let quoted = [format!("'{key}'"), format!("\"{key}\"")];
    let start = quoted.iter().find_map(|k| header.find(k.as_str()).map(|i| i + k.len()))?;
    let rest = header[start..].trim_start().strip_prefix(':')?.trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find([',', '}']).unwrap_or(rest.len())
    };
    Some(rest[..end].trim())
}

pub fn write_vector(path: &Path, values: &[f64]) -> Result<(), NpyError> {
    std::fs::write(path, encode_vector(values)).map_err(|e| NpyError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

pub fn read_vector(path: &Path) -> Result<Vec<f64>, NpyError> {
    let origin = path.to_string_lossy().to_string();
    let bytes = std::fs::read(path).map_err(|e| NpyError::Io {
        path: origin.clone(),
        source: e,
    })?;
    decode_vector(&bytes, &origin)
}
