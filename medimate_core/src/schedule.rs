//! Device schedule payloads and missed-dose detection.
//!
//! A dose is one scheduled time on one local date. It becomes overdue once
//! `due + grace` has passed without a confirmed, missed or skipped event
//! settling it. An event naming a scheduled time `T` settles the latest
//! dose at `T` due at or before the moment it occurred. An event without a
//! scheduled time settles a dose when it occurred within that dose's grace
//! period.
//!
//! Detection looks at doses due yesterday and today in device-local time,
//! so the grace period must stay under one day.

use crate::clock::{local_date, utc_offset};
use crate::{time_codec, Device, DoseEvent, Result, SlotAssignment, SlotSchedule};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Compact schedule for every slot active on `date`
pub fn device_schedule(device: &Device, date: NaiveDate) -> Result<Vec<SlotSchedule>> {
    device
        .active_cartridges(date)
        .map(|cartridge| {
            let times = cartridge
                .times
                .iter()
                .map(|t| time_codec::encode(t))
                .collect::<Result<Vec<_>>>()?;
            Ok(SlotSchedule {
                slot: cartridge.slot,
                medication_name: cartridge.medication_name.clone(),
                time_count: times.len(),
                times,
            })
        })
        .collect()
}

/// A scheduled dose whose grace period ran out without resolution
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OverdueDose {
    pub slot: u32,
    pub medication_name: String,
    pub scheduled_time: String,
    pub due_at: DateTime<Utc>,
}

/// UTC instant of `minutes` past local midnight on `date`
fn due_instant(date: NaiveDate, minutes: u16, offset: FixedOffset) -> Option<DateTime<Utc>> {
    date.and_hms_opt(u32::from(minutes / 60), u32::from(minutes % 60), 0)
        .and_then(|local| offset.from_local_datetime(&local).single())
        .map(|at| at.with_timezone(&Utc))
}

/// Latest instant of the daily time `minutes` at or before `at`
fn latest_instant(
    minutes: u16,
    at: DateTime<Utc>,
    offset: FixedOffset,
    timezone: &str,
) -> Option<DateTime<Utc>> {
    let date = local_date(at, timezone);
    [Some(date), date.pred_opt()]
        .into_iter()
        .flatten()
        .filter_map(|d| due_instant(d, minutes, offset))
        .find(|due| *due <= at)
}

/// The cartridge time whose most recent dose is the latest one due at or
/// before `now`; `None` when the cartridge has no times
pub fn latest_due_time(
    cartridge: &SlotAssignment,
    now: DateTime<Utc>,
    timezone: &str,
) -> Result<Option<String>> {
    let offset = utc_offset(timezone);
    let mut latest: Option<(DateTime<Utc>, &String)> = None;
    for time in &cartridge.times {
        let minutes = time_codec::encode(time)?;
        if let Some(due) = latest_instant(minutes, now, offset, timezone) {
            if latest.map_or(true, |(best, _)| due > best) {
                latest = Some((due, time));
            }
        }
    }
    Ok(latest.map(|(_, time)| time.clone()))
}

/// Whether `event` settles the dose of `slot` at `time` due at `due_at`
fn settles(
    event: &DoseEvent,
    slot: u32,
    time: &str,
    due_at: DateTime<Utc>,
    grace: Duration,
    device: &Device,
) -> bool {
    if event.slot != slot || !event.status.resolves_dose() {
        return false;
    }
    match event.scheduled_time.as_deref() {
        Some(scheduled) if scheduled == time => time_codec::encode(scheduled)
            .ok()
            .and_then(|minutes| {
                latest_instant(
                    minutes,
                    event.occurred_at,
                    utc_offset(&device.timezone),
                    &device.timezone,
                )
            })
            .map_or(false, |due| due == due_at),
        Some(_) => false,
        None => event.occurred_at >= due_at && event.occurred_at <= due_at + grace,
    }
}

/// Doses due yesterday or today (device-local) that are past their grace
/// period and not settled by any event
///
/// Doses due before the device was registered are ignored.
pub fn overdue_doses(
    device: &Device,
    events: &[DoseEvent],
    now: DateTime<Utc>,
    grace_minutes: u32,
) -> Result<Vec<OverdueDose>> {
    let offset = utc_offset(&device.timezone);
    let today = local_date(now, &device.timezone);
    let grace = Duration::minutes(i64::from(grace_minutes));

    let mut overdue = Vec::new();
    for date in [today.pred_opt(), Some(today)].into_iter().flatten() {
        for cartridge in device.active_cartridges(date) {
            for time in &cartridge.times {
                let minutes = time_codec::encode(time)?;
                let due_at = match due_instant(date, minutes, offset) {
                    Some(at) => at,
                    None => continue,
                };
                if due_at < device.created_at || now < due_at + grace {
                    continue;
                }

                let settled = events
                    .iter()
                    .any(|e| settles(e, cartridge.slot, time, due_at, grace, device));
                if !settled {
                    overdue.push(OverdueDose {
                        slot: cartridge.slot,
                        medication_name: cartridge.medication_name.clone(),
                        scheduled_time: time.clone(),
                        due_at,
                    });
                }
            }
        }
    }
    Ok(overdue)
}
