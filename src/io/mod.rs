use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

pub mod error;
pub mod mapfile;
pub mod matrix;
pub mod metadata;
pub mod results;
pub mod sumstats;

use error::{ColumnNotFound, MrpError};

/// Open a file for reading, decompressing `.gz` and `.zst` files on the fly.
pub fn open_input(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let boxed: Box<dyn Read + Send> = match path.extension().and_then(|e| e.to_str()) {
        Some("gz") | Some("bgz") => Box::new(flate2::read::MultiGzDecoder::new(reader)),
        Some("zst") => Box::new(zstd::Decoder::with_buffer(reader)?),
        _ => Box::new(reader),
    };
    Ok(boxed)
}

/// Tab-separated reader with a header row.
pub fn tsv_reader(path: &Path) -> Result<csv::Reader<Box<dyn Read + Send>>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(false)
        .from_reader(open_input(path)?))
}

pub(crate) fn find_column(header: &csv::StringRecord, name: &str) -> Result<usize, MrpError> {
    header
        .iter()
        .position(|x| x == name)
        .ok_or_else(|| ColumnNotFound::new(name).into())
}

/// Returns the first of the candidate columns present in the header.
pub(crate) fn find_any_column(
    header: &csv::StringRecord,
    names: &[&str],
) -> Result<usize, MrpError> {
    names
        .iter()
        .find_map(|name| header.iter().position(|x| x == *name))
        .ok_or_else(|| ColumnNotFound::new(&names.join(" or ")).into())
}

pub(crate) fn is_missing(value: &str) -> bool {
    matches!(value, "" | "NA" | "NaN" | "nan" | "." | "None")
}

/// Parse an optional float. Missing markers map to `None`, anything else
/// that fails to parse is an error.
pub(crate) fn parse_optional_f64(value: &str, column: &str) -> Result<Option<f64>, MrpError> {
    if is_missing(value) {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(|x| if x.is_nan() { None } else { Some(x) })
        .map_err(|_| MrpError::InvalidValue {
            column: column.to_string(),
            value: value.to_string(),
        })
}

/// Case-insensitive TRUE/FALSE.
pub(crate) fn parse_bool(value: &str, column: &str) -> Result<bool, MrpError> {
    match value.to_ascii_uppercase().as_str() {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(MrpError::InvalidValue {
            column: column.to_string(),
            value: value.to_string(),
        }),
    }
}
