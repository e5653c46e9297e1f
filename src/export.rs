//! Dashboard export of persisted contact rows.
//!
//! Both formats carry exactly the ledger record layout ([`RECORD_COLUMNS`]), so a
//! spreadsheet or dashboard sees the same columns the ledger stores.

use std::fmt;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use csv::Writer;
use serde_json::{Map, Value};

use crate::error::{JourneyError, Result};
use crate::models::{Contact, RECORD_COLUMNS};

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Header row plus one row per contact
    Csv,
    /// Array of objects keyed by column name
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Json => "json",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(JourneyError::Other(format!("unsupported export format: {other}"))),
        }
    }
}

/// Write `contacts` to `file_path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_contacts_to_file(contacts: &[Contact], format: ExportFormat, file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    match format {
        ExportFormat::Csv => write_csv_file(contacts, file_path),
        ExportFormat::Json => write_json_file(contacts, file_path),
    }
}

fn write_csv_file(contacts: &[Contact], file_path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(file_path)?;

    writer.write_record(RECORD_COLUMNS)?;
    for contact in contacts {
        writer.write_record(contact.to_record())?;
    }

    writer.flush()?;
    Ok(())
}

fn write_json_file(contacts: &[Contact], file_path: &Path) -> Result<()> {
    let file = File::create(file_path)?;
    let mut writer = BufWriter::new(file);

    let rows: Vec<Value> = contacts.iter().map(row_object).collect();

    serde_json::to_writer_pretty(&mut writer, &rows)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn row_object(contact: &Contact) -> Value {
    let map: Map<String, Value> = RECORD_COLUMNS
        .iter()
        .zip(contact.to_record())
        .map(|(column, cell)| ((*column).to_string(), Value::String(cell)))
        .collect();
    Value::Object(map)
}
