use crate::application::error::SchedulingError;
use crate::domain::interval::{merge, subtract, FreeSlot, TimeInterval};
use crate::domain::models::WorkingWindow;
use chrono::{DateTime, NaiveDate, Utc};

/// Usable gaps of `window` on `day`, in ascending order.
///
/// `busy_events` may overlap and arrive in any order. A fully booked day
/// yields an empty list.
pub fn find_free_slots(
    day: NaiveDate,
    window: &WorkingWindow,
    busy_events: impl IntoIterator<Item = TimeInterval>,
    min_slot_minutes: u32,
) -> Result<Vec<FreeSlot>, SchedulingError> {
    let anchored = window.anchor(day).map_err(SchedulingError::InvalidInput)?;
    let busy = merge(busy_events);
    Ok(subtract(&anchored, &busy)
        .into_iter()
        .map(FreeSlot::new)
        .filter(|slot| slot.fits(min_slot_minutes))
        .collect())
}

/// Drops the part of each slot that lies before `now`, then re-applies the
/// minimum granularity.
pub fn discard_elapsed(
    slots: Vec<FreeSlot>,
    now: DateTime<Utc>,
    min_slot_minutes: u32,
) -> Vec<FreeSlot> {
    let earliest = ceil_to_minute(now);
    slots
        .into_iter()
        .filter_map(|slot| {
            if slot.start() >= earliest {
                return Some(slot);
            }
            TimeInterval::new(earliest, slot.end())
                .ok()
                .map(FreeSlot::new)
        })
        .filter(|slot| slot.fits(min_slot_minutes))
        .collect()
}

fn ceil_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = instant.timestamp();
    if seconds.rem_euclid(60) == 0 && instant.timestamp_subsec_nanos() == 0 {
        return instant;
    }
    DateTime::from_timestamp((seconds.div_euclid(60) + 1) * 60, 0).unwrap_or(instant)
}
