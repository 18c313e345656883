//! Device registry: devices, their patients, and slot assignments.
//!
//! Every mutation runs under the device's exclusive lock and either writes
//! the whole new record or nothing.

use crate::clock::{local_date, Clock};
use crate::store::{validate_device_id, DeviceStore};
use crate::{time_codec, Device, Error, Result, SlotAssignment};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Owner of device records
pub struct DeviceRegistry {
    store: DeviceStore,
    clock: Arc<dyn Clock>,
    slot_count: u32,
    default_timezone: String,
}

impl DeviceRegistry {
    pub fn new(
        data_dir: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        slot_count: u32,
        default_timezone: impl Into<String>,
    ) -> Self {
        Self {
            store: DeviceStore::new(data_dir),
            clock,
            slot_count,
            default_timezone: default_timezone.into(),
        }
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub(crate) fn store(&self) -> &DeviceStore {
        &self.store
    }

    /// Create a device; fails with `Conflict` if the id is taken
    pub fn register_device(
        &self,
        device_id: &str,
        patient_name: &str,
        cartridges: Vec<SlotAssignment>,
    ) -> Result<Device> {
        let device_id = validate_device_id(device_id)?;
        let patient_name = validate_patient_name(patient_name)?;
        let cartridges = self.validate_cartridges(cartridges)?;

        let _lock = self.store.lock(device_id)?;
        if self.store.load(device_id)?.is_some() {
            return Err(Error::Conflict(device_id.to_string()));
        }

        let device = self.new_device(device_id, patient_name, cartridges);
        self.store.save(&device)?;

        tracing::info!(
            "Registered device {} for {} with {} cartridges",
            device.device_id,
            device.patient_name,
            device.cartridges.len()
        );
        Ok(device)
    }

    /// Create the device if absent, otherwise overwrite the supplied fields
    pub fn upsert_device_schedule(
        &self,
        device_id: &str,
        patient_name: Option<&str>,
        cartridges: Option<Vec<SlotAssignment>>,
    ) -> Result<Device> {
        let device_id = validate_device_id(device_id)?;
        let patient_name = patient_name.map(validate_patient_name).transpose()?;
        let cartridges = cartridges
            .map(|c| self.validate_cartridges(c))
            .transpose()?;

        let _lock = self.store.lock(device_id)?;
        let device = match self.store.load(device_id)? {
            Some(mut device) => {
                if let Some(name) = patient_name {
                    device.patient_name = name.to_string();
                }
                if let Some(cartridges) = cartridges {
                    device.cartridges = cartridges;
                }
                device.updated_at = self.clock.now();
                tracing::info!("Updated device {} from boot registration", device_id);
                device
            }
            None => {
                let name = patient_name.ok_or_else(|| {
                    Error::invalid("patient_name", "required when registering a new device")
                })?;
                tracing::info!("Registered device {} on boot", device_id);
                self.new_device(device_id, name, cartridges.unwrap_or_default())
            }
        };

        self.store.save(&device)?;
        Ok(device)
    }

    pub fn get_device(&self, device_id: &str) -> Result<Device> {
        let device_id = validate_device_id(device_id)?;
        self.store
            .load(device_id)?
            .ok_or_else(|| Error::NotFound(device_id.to_string()))
    }

    /// All registered devices, sorted by id
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();
        for id in self.store.device_ids()? {
            if let Some(device) = self.store.load(&id)? {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    /// Replace the full cartridge set; any invalid entry rejects the batch
    pub fn update_slot_assignments(
        &self,
        device_id: &str,
        cartridges: Vec<SlotAssignment>,
    ) -> Result<Device> {
        let cartridges = self.validate_cartridges(cartridges)?;
        let device = self.modify(device_id, |device| {
            device.cartridges = cartridges;
            Ok(())
        })?;

        tracing::info!(
            "Replaced cartridges on device {} ({} slots loaded)",
            device.device_id,
            device.cartridges.len()
        );
        Ok(device)
    }

    /// Remove the assignment in one slot
    pub fn clear_slot(&self, device_id: &str, slot: u32) -> Result<Device> {
        let device = self.modify(device_id, |device| {
            let before = device.cartridges.len();
            device.cartridges.retain(|c| c.slot != slot);
            if device.cartridges.len() == before {
                return Err(Error::Unassigned {
                    device_id: device.device_id.clone(),
                    slot,
                    medication: None,
                });
            }
            Ok(())
        })?;

        tracing::info!("Cleared slot {} on device {}", slot, device.device_id);
        Ok(device)
    }

    /// Record that the device just synced or sent a heartbeat
    pub fn touch_last_sync(&self, device_id: &str) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        self.modify(device_id, |device| {
            device.last_sync_at = Some(now);
            Ok(())
        })?;
        tracing::debug!("Device {} synced at {}", device_id.trim(), now);
        Ok(now)
    }

    /// Load, modify and save a device under its lock
    fn modify<F>(&self, device_id: &str, f: F) -> Result<Device>
    where
        F: FnOnce(&mut Device) -> Result<()>,
    {
        let device_id = validate_device_id(device_id)?;
        let _lock = self.store.lock(device_id)?;

        let mut device = self
            .store
            .load(device_id)?
            .ok_or_else(|| Error::NotFound(device_id.to_string()))?;
        f(&mut device)?;
        device.updated_at = self.clock.now();
        self.store.save(&device)?;
        Ok(device)
    }

    fn new_device(
        &self,
        device_id: &str,
        patient_name: &str,
        cartridges: Vec<SlotAssignment>,
    ) -> Device {
        let now = self.clock.now();
        Device {
            device_id: device_id.to_string(),
            patient_name: patient_name.to_string(),
            timezone: self.default_timezone.clone(),
            last_sync_at: None,
            cartridges,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate and normalize a cartridge batch
    ///
    /// Output is sorted by slot, with trimmed medication names and times
    /// sorted by minute of day without duplicates.
    pub fn validate_cartridges(
        &self,
        cartridges: Vec<SlotAssignment>,
    ) -> Result<Vec<SlotAssignment>> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(cartridges.len());

        for (i, mut cartridge) in cartridges.into_iter().enumerate() {
            let field = |name: &str| format!("cartridges[{}].{}", i, name);

            if cartridge.slot >= self.slot_count {
                return Err(Error::invalid(
                    field("slot"),
                    format!("slot {} is outside 0..{}", cartridge.slot, self.slot_count),
                ));
            }
            if !seen.insert(cartridge.slot) {
                return Err(Error::invalid(
                    field("slot"),
                    format!("slot {} is assigned more than once", cartridge.slot),
                ));
            }

            let name = cartridge.medication_name.trim();
            if name.is_empty() {
                return Err(Error::invalid(field("medicationName"), "must not be empty"));
            }
            cartridge.medication_name = name.to_string();

            let mut times = Vec::with_capacity(cartridge.times.len());
            for time in &cartridge.times {
                let minutes = time_codec::encode(time).map_err(|_| {
                    Error::invalid(field("times"), format!("{:?} is not HH:MM", time))
                })?;
                times.push(minutes);
            }
            times.sort_unstable();
            times.dedup();
            cartridge.times = times
                .into_iter()
                .map(time_codec::decode)
                .collect::<Result<_>>()?;

            if let (Some(from), Some(until)) = (cartridge.active_from, cartridge.active_until) {
                if from > until {
                    return Err(Error::invalid(
                        field("activeUntil"),
                        format!("{} is before activeFrom {}", until, from),
                    ));
                }
            }

            normalized.push(cartridge);
        }

        normalized.sort_by_key(|c| c.slot);
        Ok(normalized)
    }

    /// Today's date in the device's timezone
    pub fn local_today(&self, device: &Device) -> chrono::NaiveDate {
        local_date(self.clock.now(), &device.timezone)
    }
}

fn validate_patient_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid("patient_name", "must not be empty"));
    }
    Ok(name)
}
