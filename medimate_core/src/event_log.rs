//! Append-only dose event log.
//!
//! Each device's events are a JSONL (JSON Lines) file under `events/`,
//! appended with file locking so concurrent writers never interleave lines.
//! Recording checks the device's current slot assignment and appends while
//! holding the device lock, so an assignment cannot be replaced mid-record.

use crate::clock::{local_date, Clock};
use crate::registry::DeviceRegistry;
use crate::schedule::latest_due_time;
use crate::store::validate_device_id;
use crate::{time_codec, Device, DoseEvent, DoseStatus, Error, NewDoseEvent, Result};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Event sink trait for persisting dose events
pub trait EventSink {
    fn append(&mut self, event: &DoseEvent) -> Result<()>;
}

/// JSONL-based event sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ensure the parent directory exists
    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl EventSink for JsonlSink {
    fn append(&mut self, event: &DoseEvent) -> Result<()> {
        self.ensure_parent_dir()?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;
        let torn = ends_mid_line(&mut file)?;

        let mut writer = std::io::BufWriter::new(&file);
        if torn {
            tracing::warn!("Log {:?} ends with a partial line, starting a new one", self.path);
            writer.write_all(b"\n")?;
        }
        let line = serde_json::to_string(event)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Appended event {} to {:?}", event.id, self.path);
        Ok(())
    }
}

/// True when the last byte of a non-empty log is not a newline
fn ends_mid_line(file: &mut File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Read all events from a JSONL file
///
/// Lines that fail to parse (e.g. a torn write after a crash) are skipped.
pub fn read_events(path: &Path) -> Result<Vec<DoseEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut events = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<DoseEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!(
                    "Skipping unreadable event at {:?} line {}: {}",
                    path,
                    line_num + 1,
                    e
                );
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} events from {:?}", events.len(), path);
    Ok(events)
}

fn load_device(registry: &DeviceRegistry, device_id: &str) -> Result<Device> {
    registry
        .store()
        .load(device_id)?
        .ok_or_else(|| Error::NotFound(device_id.to_string()))
}

/// Per-device dose event history
pub struct DoseEventLog {
    events_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl DoseEventLog {
    pub fn new(data_dir: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events_dir: data_dir.as_ref().join("events"),
            clock,
        }
    }

    pub fn log_path(&self, device_id: &str) -> PathBuf {
        self.events_dir.join(format!("{}.jsonl", device_id))
    }

    /// Record one event against an active slot assignment
    pub fn record_event(&self, registry: &DeviceRegistry, new: NewDoseEvent) -> Result<DoseEvent> {
        let device_id = validate_device_id(&new.device_id)?;
        let _lock = registry.store().lock(device_id)?;
        let device = load_device(registry, device_id)?;
        let today = registry.local_today(&device);
        self.append_checked(&device, new, today)
    }

    /// Record a dose with the status implied by the entry point, resolving
    /// the medication and the most recent scheduled time from the slot's
    /// current assignment
    pub fn record_slot_status(
        &self,
        registry: &DeviceRegistry,
        device_id: &str,
        slot: u32,
        status: DoseStatus,
    ) -> Result<DoseEvent> {
        let device_id = validate_device_id(device_id)?;
        let _lock = registry.store().lock(device_id)?;
        let device = load_device(registry, device_id)?;

        let now = self.clock.now();
        let today = registry.local_today(&device);
        let cartridge = device
            .active_cartridge(slot, today)
            .ok_or_else(|| Error::Unassigned {
                device_id: device.device_id.clone(),
                slot,
                medication: None,
            })?;

        let mut new = NewDoseEvent::new(
            device.device_id.clone(),
            slot,
            cartridge.medication_name.clone(),
            status,
        );
        new.scheduled_time = latest_due_time(cartridge, now, &device.timezone)?;
        self.append_checked(&device, new, today)
    }

    /// Decide which events to record from the device and its history, and
    /// append them, all under one hold of the device lock
    ///
    /// Each decided event must match an assignment active on the local date
    /// it occurred.
    pub fn record_batch<F>(
        &self,
        registry: &DeviceRegistry,
        device_id: &str,
        decide: F,
    ) -> Result<Vec<DoseEvent>>
    where
        F: FnOnce(&Device, &[DoseEvent]) -> Result<Vec<NewDoseEvent>>,
    {
        let device_id = validate_device_id(device_id)?;
        let _lock = registry.store().lock(device_id)?;
        let device = load_device(registry, device_id)?;
        let history = read_events(&self.log_path(device_id))?;

        let now = self.clock.now();
        let mut recorded = Vec::new();
        for new in decide(&device, &history)? {
            let on = local_date(new.occurred_at.unwrap_or(now), &device.timezone);
            recorded.push(self.append_checked(&device, new, on)?);
        }
        Ok(recorded)
    }

    /// Validate `new` against `device` and append it; the caller holds the
    /// device lock
    fn append_checked(
        &self,
        device: &Device,
        new: NewDoseEvent,
        active_on: NaiveDate,
    ) -> Result<DoseEvent> {
        if new.device_id.trim() != device.device_id {
            return Err(Error::invalid(
                "device_id",
                format!("{:?} does not match {}", new.device_id, device.device_id),
            ));
        }
        if let Some(time) = &new.scheduled_time {
            if !time_codec::is_valid(time) {
                return Err(Error::invalid(
                    "scheduled_time",
                    format!("{:?} is not HH:MM", time),
                ));
            }
        }

        let medication = new.medication_name.trim();
        let cartridge = device
            .active_cartridge(new.slot, active_on)
            .filter(|c| c.medication_name == medication)
            .ok_or_else(|| Error::Unassigned {
                device_id: device.device_id.clone(),
                slot: new.slot,
                medication: Some(medication.to_string()),
            })?;

        let now = self.clock.now();
        let event = DoseEvent {
            id: Uuid::new_v4(),
            device_id: device.device_id.clone(),
            slot: new.slot,
            medication_name: cartridge.medication_name.clone(),
            scheduled_time: new.scheduled_time,
            occurred_at: new.occurred_at.unwrap_or(now),
            status: new.status,
            created_at: now,
        };

        JsonlSink::new(self.log_path(&device.device_id)).append(&event)?;

        tracing::info!(
            "Recorded {} for device {} slot {} ({})",
            event.status,
            event.device_id,
            event.slot,
            event.medication_name
        );
        Ok(event)
    }

    /// Patient pressed the confirm button
    pub fn confirm_dose(
        &self,
        registry: &DeviceRegistry,
        device_id: &str,
        slot: u32,
    ) -> Result<DoseEvent> {
        self.record_slot_status(registry, device_id, slot, DoseStatus::Confirmed)
    }

    /// No confirmation arrived in time
    pub fn miss_dose(
        &self,
        registry: &DeviceRegistry,
        device_id: &str,
        slot: u32,
    ) -> Result<DoseEvent> {
        self.record_slot_status(registry, device_id, slot, DoseStatus::Missed)
    }

    /// Events with `occurred_at` in `[from, to]`, newest first
    ///
    /// The caller is responsible for checking that the device exists.
    pub fn list_events(
        &self,
        device_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DoseEvent>> {
        let device_id = validate_device_id(device_id)?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(Error::invalid(
                    "from",
                    format!("{} is after {}", from.to_rfc3339(), to.to_rfc3339()),
                ));
            }
        }

        let mut events: Vec<_> = read_events(&self.log_path(device_id))?
            .into_iter()
            .filter(|e| from.map_or(true, |from| e.occurred_at >= from))
            .filter(|e| to.map_or(true, |to| e.occurred_at <= to))
            .collect();

        events.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(events)
    }
}
