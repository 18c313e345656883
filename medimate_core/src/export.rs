//! CSV export of dose history for caregivers and archival.

use crate::{DoseEvent, Result};
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    device_id: String,
    slot: u32,
    medication_name: String,
    scheduled_time: Option<String>,
    occurred_at: String,
    status: &'static str,
    created_at: String,
}

impl From<&DoseEvent> for CsvRow {
    fn from(event: &DoseEvent) -> Self {
        CsvRow {
            id: event.id.to_string(),
            device_id: event.device_id.clone(),
            slot: event.slot,
            medication_name: event.medication_name.clone(),
            scheduled_time: event.scheduled_time.clone(),
            occurred_at: event.occurred_at.to_rfc3339(),
            status: event.status.as_str(),
            created_at: event.created_at.to_rfc3339(),
        }
    }
}

/// Append events to a CSV file, writing headers only when the file is new
///
/// The file is fsynced before returning. Returns the number of rows written.
pub fn append_events_csv(events: &[DoseEvent], csv_path: &Path) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    let needs_headers = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for event in events {
        writer.serialize(CsvRow::from(event))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} events to {:?}", events.len(), csv_path);
    Ok(events.len())
}
