//! Core domain types for the Medimate dose-tracking system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Devices and their slot assignments (cartridges)
//! - Dose events and the dose status taxonomy
//! - The schedule payload sent to dispensers

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Device Types
// ============================================================================

/// Binding of one physical dispensing slot to a medication and its daily times
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotAssignment {
    pub slot: u32,
    pub medication_name: String,
    /// Informational stock counter, never decremented by the engine
    #[serde(default)]
    pub pill_count: u32,
    /// `HH:MM` times of day
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_until: Option<NaiveDate>,
}

impl SlotAssignment {
    pub fn new(slot: u32, medication_name: impl Into<String>) -> Self {
        Self {
            slot,
            medication_name: medication_name.into(),
            pill_count: 0,
            times: Vec::new(),
            active_from: None,
            active_until: None,
        }
    }

    pub fn with_times<I, S>(mut self, times: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.times = times.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pill_count(mut self, pill_count: u32) -> Self {
        self.pill_count = pill_count;
        self
    }

    pub fn active_between(mut self, from: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        self.active_from = from;
        self.active_until = until;
        self
    }

    /// Whether the assignment is in force on `date` (missing bounds are open)
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.active_from.map_or(true, |from| from <= date)
            && self.active_until.map_or(true, |until| date <= until)
    }
}

/// A physical pill dispenser and the patient it serves
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub patient_name: String,
    pub timezone: String,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Sorted by slot, slot numbers unique
    #[serde(default)]
    pub cartridges: Vec<SlotAssignment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Assignment currently loaded in `slot`, regardless of its active window
    pub fn cartridge(&self, slot: u32) -> Option<&SlotAssignment> {
        self.cartridges.iter().find(|c| c.slot == slot)
    }

    /// Assignment in `slot` if it is active on `date`
    pub fn active_cartridge(&self, slot: u32, date: NaiveDate) -> Option<&SlotAssignment> {
        self.cartridge(slot).filter(|c| c.is_active_on(date))
    }

    /// All assignments active on `date`, in slot order
    pub fn active_cartridges(&self, date: NaiveDate) -> impl Iterator<Item = &SlotAssignment> {
        self.cartridges.iter().filter(move |c| c.is_active_on(date))
    }
}

/// One slot's schedule in the compact form dispensers consume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotSchedule {
    pub slot: u32,
    pub medication_name: String,
    /// Minutes since midnight
    pub times: Vec<u16>,
    pub time_count: usize,
}

// ============================================================================
// Dose Event Types
// ============================================================================

/// Classification of a dose event
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    /// The mechanism released medication
    Dispensed,
    /// The patient acknowledged taking it
    #[serde(alias = "taken")]
    Confirmed,
    /// No confirmation arrived within the expected window
    Missed,
    /// Deliberate non-dose (patient or caregiver override)
    Skipped,
}

impl DoseStatus {
    pub const ALL: [DoseStatus; 4] = [
        DoseStatus::Dispensed,
        DoseStatus::Confirmed,
        DoseStatus::Missed,
        DoseStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DoseStatus::Dispensed => "dispensed",
            DoseStatus::Confirmed => "confirmed",
            DoseStatus::Missed => "missed",
            DoseStatus::Skipped => "skipped",
        }
    }

    /// Whether this status settles a scheduled dose (no miss should be
    /// inferred afterwards)
    pub fn resolves_dose(&self) -> bool {
        match self {
            DoseStatus::Confirmed | DoseStatus::Missed | DoseStatus::Skipped => true,
            DoseStatus::Dispensed => false,
        }
    }
}

impl fmt::Display for DoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoseStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dispensed" => Ok(DoseStatus::Dispensed),
            "confirmed" | "taken" => Ok(DoseStatus::Confirmed),
            "missed" => Ok(DoseStatus::Missed),
            "skipped" => Ok(DoseStatus::Skipped),
            _ => Err(crate::Error::InvalidStatus(s.to_string())),
        }
    }
}

/// An immutable record of one dispense/confirm/miss/skip occurrence
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoseEvent {
    pub id: Uuid,
    pub device_id: String,
    pub slot: u32,
    /// Copied from the slot assignment at write time
    pub medication_name: String,
    #[serde(default)]
    pub scheduled_time: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub status: DoseStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a dose event
#[derive(Clone, Debug)]
pub struct NewDoseEvent {
    pub device_id: String,
    pub slot: u32,
    pub medication_name: String,
    pub status: DoseStatus,
    pub scheduled_time: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewDoseEvent {
    pub fn new(
        device_id: impl Into<String>,
        slot: u32,
        medication_name: impl Into<String>,
        status: DoseStatus,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            slot,
            medication_name: medication_name.into(),
            status,
            scheduled_time: None,
            occurred_at: None,
        }
    }

    pub fn scheduled_at(mut self, time_of_day: impl Into<String>) -> Self {
        self.scheduled_time = Some(time_of_day.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }
}
