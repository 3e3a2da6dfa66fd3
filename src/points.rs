//! Filepath: src/points.rs
//!
//! Point-file readers: the inputs a tree build consumes.
//!
//! Two formats:
//!
//! - **Text** — one vector per line, components whitespace-separated,
//!   blank lines ignored, dimensionality inferred from the first line.
//! - **Binary** — one native-endian `usize` dimensionality `D`, then a
//!   stream of records of `D` IEEE-754 `f32`s.
//!
//! Both readers place every vector in the caller's arena so the parsed
//! points can be handed straight to [`Tree::insert`](crate::Tree::insert).

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::arena::Arena;
use crate::vector::Vector;

// ============================================================================
//  PointFileError
// ============================================================================

/// Failures while reading a point file.
#[derive(Debug)]
pub enum PointFileError {
    /// The file could not be read.
    Io(io::Error),

    /// The file held no points at all.
    Empty,

    /// A component failed to parse as `f32`.
    InvalidFloat {
        /// 1-based source line.
        line: usize,
        /// The offending token.
        token: String,
    },

    /// A line's component count differs from the first line's.
    InconsistentWidth {
        /// 1-based source line.
        line: usize,
        /// Width set by the first line.
        expected: usize,
        /// Width found on this line.
        found: usize,
    },

    /// The binary header is missing or declares a zero width.
    InvalidHeader,

    /// The binary payload ends mid-record.
    TruncatedRecord,
}

impl fmt::Display for PointFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "cannot read point file: {error}"),

            Self::Empty => write!(f, "point file holds no points"),

            Self::InvalidFloat { line, token } => {
                write!(f, "line {line}: invalid component '{token}'")
            }

            Self::InconsistentWidth {
                line,
                expected,
                found,
            } => write!(
                f,
                "line {line}: {found} components but the first line set {expected}"
            ),

            Self::InvalidHeader => write!(f, "binary point file header is missing or zero"),

            Self::TruncatedRecord => write!(f, "binary point file ends mid-record"),
        }
    }
}

impl std::error::Error for PointFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for PointFileError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

// ============================================================================
//  Text format
// ============================================================================

/// Parse whitespace-delimited text points into arena vectors.
///
/// Blank lines are skipped; the first non-blank line fixes the width.
///
/// # Errors
/// Rejects empty input, non-numeric components, and width changes.
pub fn parse_text_points<'a>(
    arena: &'a Arena,
    text: &str,
) -> Result<Vec<&'a Vector>, PointFileError> {
    let mut points = Vec::new();
    let mut width = None;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let mut components = Vec::new();

        for token in line.split_ascii_whitespace() {
            let value: f32 = token.parse().map_err(|_| PointFileError::InvalidFloat {
                line: line_no,
                token: token.to_owned(),
            })?;
            components.push(value);
        }

        if components.is_empty() {
            // Blank line.
            continue;
        }

        match width {
            None => width = Some(components.len()),
            Some(expected) if expected != components.len() => {
                return Err(PointFileError::InconsistentWidth {
                    line: line_no,
                    expected,
                    found: components.len(),
                });
            }
            Some(_) => {}
        }

        points.push(&*Vector::from_slice_in(arena, &components));
    }

    if points.is_empty() {
        return Err(PointFileError::Empty);
    }
    Ok(points)
}

/// Read and parse a text point file.
///
/// # Errors
/// I/O failures plus everything [`parse_text_points`] rejects.
pub fn read_text_points<'a>(
    arena: &'a Arena,
    path: &Path,
) -> Result<Vec<&'a Vector>, PointFileError> {
    let text = fs::read_to_string(path)?;
    parse_text_points(arena, &text)
}

// ============================================================================
//  Binary format
// ============================================================================

/// Parse binary points: a native-endian `usize` width, then `f32` records.
///
/// # Errors
/// Rejects a short or zero header, a payload that ends mid-record, and an
/// empty record stream.
pub fn parse_binary_points<'a>(
    arena: &'a Arena,
    bytes: &[u8],
) -> Result<Vec<&'a Vector>, PointFileError> {
    const HEADER: usize = std::mem::size_of::<usize>();
    const F32: usize = std::mem::size_of::<f32>();

    let header = bytes.get(..HEADER).ok_or(PointFileError::InvalidHeader)?;
    let dims = usize::from_ne_bytes(header.try_into().expect("header slice is usize-sized"));
    if dims == 0 {
        return Err(PointFileError::InvalidHeader);
    }

    let payload = &bytes[HEADER..];
    let record = dims * F32;
    if payload.len() % record != 0 {
        return Err(PointFileError::TruncatedRecord);
    }
    if payload.is_empty() {
        return Err(PointFileError::Empty);
    }

    let mut points = Vec::with_capacity(payload.len() / record);
    let mut components = vec![0.0f32; dims];

    for chunk in payload.chunks_exact(record) {
        for (component, raw) in components.iter_mut().zip(chunk.chunks_exact(F32)) {
            *component = f32::from_ne_bytes(raw.try_into().expect("chunk is f32-sized"));
        }
        points.push(&*Vector::from_slice_in(arena, &components));
    }

    Ok(points)
}

/// Read and parse a binary point file.
///
/// # Errors
/// I/O failures plus everything [`parse_binary_points`] rejects.
pub fn read_binary_points<'a>(
    arena: &'a Arena,
    path: &Path,
) -> Result<Vec<&'a Vector>, PointFileError> {
    let bytes = fs::read(path)?;
    parse_binary_points(arena, &bytes)
}

/// Write points in the binary format (the generator and tests share this).
///
/// # Errors
/// Propagates writer failures.
///
/// # Panics
/// Panics if `points` is empty or widths are inconsistent.
pub fn write_binary_points<W: io::Write>(out: &mut W, points: &[&Vector]) -> io::Result<()> {
    let dims = points.first().expect("at least one point").dims();
    out.write_all(&dims.to_ne_bytes())?;

    for point in points {
        assert_eq!(point.dims(), dims, "inconsistent point widths");
        for component in point.as_slice() {
            out.write_all(&component.to_ne_bytes())?;
        }
    }
    Ok(())
}

// ============================================================================
//  Tests
// ============================================================================
