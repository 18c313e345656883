//! Dose scheduling and compliance engine.
//!
//! `DoseEngine` is the single entry point callers use. It wires the device
//! registry, the dose event log and the compliance reporter over one data
//! directory and one clock:
//!
//! - Registry operations (register, upsert, update, touch)
//! - Event recording (explicit status, confirm, miss)
//! - Reporting and device schedule sync
//! - Missed-dose sweeps and CSV export

use crate::clock::{Clock, SystemClock};
use crate::event_log::DoseEventLog;
use crate::registry::DeviceRegistry;
use crate::report::{build_report, window_start, ComplianceReport, ReportSubject};
use crate::schedule::{device_schedule, overdue_doses, OverdueDose};
use crate::{
    Config, Device, DoseEvent, DoseStatus, NewDoseEvent, Result, SlotAssignment, SlotSchedule,
};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Engine over one data directory
pub struct DoseEngine {
    config: Config,
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
    registry: DeviceRegistry,
    log: DoseEventLog,
}

impl DoseEngine {
    /// Open the engine on `config.data.data_dir` with the system clock
    pub fn open(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let data_dir = config.data.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let registry = DeviceRegistry::new(
            &data_dir,
            clock.clone(),
            config.device.slot_count,
            config.device.default_timezone.clone(),
        );
        let log = DoseEventLog::new(&data_dir, clock.clone());

        tracing::debug!("Opened dose engine at {:?}", data_dir);
        Ok(Self {
            config,
            data_dir,
            clock,
            registry,
            log,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Device registry
    // ------------------------------------------------------------------

    pub fn register_device(
        &self,
        device_id: &str,
        patient_name: &str,
        cartridges: Vec<SlotAssignment>,
    ) -> Result<Device> {
        self.registry
            .register_device(device_id, patient_name, cartridges)
    }

    pub fn upsert_device_schedule(
        &self,
        device_id: &str,
        patient_name: Option<&str>,
        cartridges: Option<Vec<SlotAssignment>>,
    ) -> Result<Device> {
        self.registry
            .upsert_device_schedule(device_id, patient_name, cartridges)
    }

    pub fn get_device(&self, device_id: &str) -> Result<Device> {
        self.registry.get_device(device_id)
    }

    pub fn list_devices(&self) -> Result<Vec<Device>> {
        self.registry.list_devices()
    }

    pub fn update_slot_assignments(
        &self,
        device_id: &str,
        cartridges: Vec<SlotAssignment>,
    ) -> Result<Device> {
        self.registry.update_slot_assignments(device_id, cartridges)
    }

    pub fn clear_slot(&self, device_id: &str, slot: u32) -> Result<Device> {
        self.registry.clear_slot(device_id, slot)
    }

    pub fn touch_last_sync(&self, device_id: &str) -> Result<DateTime<Utc>> {
        self.registry.touch_last_sync(device_id)
    }

    /// Liveness ping from a device
    pub fn heartbeat(&self, device_id: &str) -> Result<DateTime<Utc>> {
        self.touch_last_sync(device_id)
    }

    /// Device-facing schedule fetch; marks the device as synced
    pub fn fetch_schedule(&self, device_id: &str) -> Result<Vec<SlotSchedule>> {
        self.touch_last_sync(device_id)?;
        let device = self.registry.get_device(device_id)?;
        device_schedule(&device, self.registry.local_today(&device))
    }

    // ------------------------------------------------------------------
    // Dose event log
    // ------------------------------------------------------------------

    pub fn record_event(&self, new: NewDoseEvent) -> Result<DoseEvent> {
        self.log.record_event(&self.registry, new)
    }

    pub fn confirm_dose(&self, device_id: &str, slot: u32) -> Result<DoseEvent> {
        self.log.confirm_dose(&self.registry, device_id, slot)
    }

    pub fn miss_dose(&self, device_id: &str, slot: u32) -> Result<DoseEvent> {
        self.log.miss_dose(&self.registry, device_id, slot)
    }

    pub fn list_events(
        &self,
        device_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DoseEvent>> {
        let device = self.registry.get_device(device_id)?;
        self.log.list_events(&device.device_id, from, to)
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Compliance over the trailing `window_days` (config default when `None`)
    pub fn generate_report(
        &self,
        device_id: &str,
        window_days: Option<u32>,
    ) -> Result<ComplianceReport> {
        let window_days = window_days.unwrap_or(self.config.report.window_days);
        let device = self.registry.get_device(device_id)?;

        let now = self.clock.now();
        let start = window_start(now, window_days)?;
        let events = self
            .log
            .list_events(&device.device_id, Some(start), Some(now))?;

        let subject = ReportSubject {
            device_id: &device.device_id,
            patient_name: &device.patient_name,
            timezone: &device.timezone,
        };
        let report = build_report(&subject, &events, now, window_days)?;

        tracing::info!(
            "Generated {}-day report for device {}: {} ({} events)",
            window_days,
            device.device_id,
            report.summary.compliance,
            report.summary.counts.total
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Missed-dose policy
    // ------------------------------------------------------------------

    /// Doses due yesterday or today that passed the grace period without
    /// resolution
    pub fn overdue_doses(&self, device_id: &str) -> Result<Vec<OverdueDose>> {
        let device = self.registry.get_device(device_id)?;
        let now = self.clock.now();
        let since = now - Duration::days(3);
        let events = self.log.list_events(&device.device_id, Some(since), None)?;
        overdue_doses(
            &device,
            &events,
            now,
            self.config.schedule.miss_grace_minutes,
        )
    }

    /// Record a `missed` event for every overdue dose on one device
    ///
    /// Detection and recording share one hold of the device lock, so
    /// concurrent sweeps record each dose once. Each miss is stamped with
    /// the dose's due instant.
    pub fn sweep_missed_doses(&self, device_id: &str) -> Result<Vec<DoseEvent>> {
        let now = self.clock.now();
        let grace_minutes = self.config.schedule.miss_grace_minutes;

        let recorded = self
            .log
            .record_batch(&self.registry, device_id, |device, history| {
                let misses: Vec<NewDoseEvent> = overdue_doses(device, history, now, grace_minutes)?
                    .into_iter()
                    .map(|dose| {
                        NewDoseEvent::new(
                            device.device_id.clone(),
                            dose.slot,
                            dose.medication_name,
                            DoseStatus::Missed,
                        )
                        .scheduled_at(dose.scheduled_time)
                        .occurred_at(dose.due_at)
                    })
                    .collect();
                Ok(misses)
            })?;

        if !recorded.is_empty() {
            tracing::info!(
                "Swept {} missed doses on device {}",
                recorded.len(),
                device_id
            );
        }
        Ok(recorded)
    }

    /// Sweep every registered device
    pub fn sweep_all(&self) -> Result<Vec<DoseEvent>> {
        let mut recorded = Vec::new();
        for device in self.registry.list_devices()? {
            recorded.extend(self.sweep_missed_doses(&device.device_id)?);
        }
        Ok(recorded)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Append a device's full history (oldest first) to a CSV file
    pub fn export_events_csv(&self, device_id: &str, csv_path: &Path) -> Result<usize> {
        let mut events = self.list_events(device_id, None, None)?;
        events.reverse();
        crate::export::append_events_csv(&events, csv_path)
    }
}
