//! Dose scheduling: next-due instants and dose status classification.
//!
//! Everything here is pure: no I/O, no shared state. Instants are ward-local
//! wall-clock `NaiveDateTime`s supplied by the caller.
//!
//! Two questions are answered for an order:
//! - `next_due(order, now)`: the next scheduled slot strictly after `now`
//!   (PRN and continuous orders are always due "now").
//! - `classify(order, now)`: the status of the dose the patient is currently
//!   owed, i.e. the first slot after the one satisfied by the last
//!   administration (or the first slot of the order if never given).
//!
//! Daily patterns roll over through `next_occurrence` / `previous_occurrence`
//! on a set of times-of-day. Every-N-hours patterns walk forward from the
//! first registered time each day (`next_interval_slot`).

use chrono::{Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DoseStatus, Frequency, MedicationCategory, MedicationOrder};

/// Window after a scheduled slot during which the dose is `Due` rather than `Overdue`.
pub const DEFAULT_GRACE_PERIOD_MINUTES: i64 = 30;

const SECONDS_PER_DAY: i64 = 86_400;

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid configuration for order {order_id}: {reason}")]
    InvalidOrderConfiguration { order_id: Uuid, reason: String },
}

fn invalid(order: &MedicationOrder, reason: impl Into<String>) -> ScheduleError {
    ScheduleError::InvalidOrderConfiguration {
        order_id: order.id,
        reason: reason.into(),
    }
}

// ═══════════════════════════════════════════════════════════
// Time-of-day set primitive
// ═══════════════════════════════════════════════════════════

/// A concrete instant produced from a registered time-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub at: NaiveDateTime,
    /// Position of the time-of-day in the registered list.
    pub index: usize,
}

fn occurrences_on(times: &[NaiveTime], date: NaiveDate) -> impl Iterator<Item = Occurrence> + '_ {
    times.iter().enumerate().map(move |(index, t)| Occurrence {
        at: date.and_time(*t),
        index,
    })
}

/// Earliest occurrence of any time in `times` strictly after `after`.
///
/// Candidates on `after`'s date are tried first; if none is left the smallest
/// time-of-day on the following date is returned. Equal instants resolve to
/// the earliest-registered entry. `None` for an empty set or at the end of the
/// representable calendar.
pub fn next_occurrence(times: &[NaiveTime], after: NaiveDateTime) -> Option<Occurrence> {
    let today = after.date();
    occurrences_on(times, today)
        .filter(|o| o.at > after)
        .min_by_key(|o| (o.at, o.index))
        .or_else(|| {
            let tomorrow = today.checked_add_days(Days::new(1))?;
            occurrences_on(times, tomorrow).min_by_key(|o| (o.at, o.index))
        })
}

/// Latest occurrence of any time in `times` at or before `at_or_before`.
pub fn previous_occurrence(times: &[NaiveTime], at_or_before: NaiveDateTime) -> Option<Occurrence> {
    let today = at_or_before.date();
    occurrences_on(times, today)
        .filter(|o| o.at <= at_or_before)
        .max_by_key(|o| (o.at, std::cmp::Reverse(o.index)))
        .or_else(|| {
            let yesterday = today.checked_sub_days(Days::new(1))?;
            occurrences_on(times, yesterday).max_by_key(|o| (o.at, std::cmp::Reverse(o.index)))
        })
}

/// Earliest occurrence on `date` itself.
pub fn first_occurrence_on(times: &[NaiveTime], date: NaiveDate) -> Option<Occurrence> {
    occurrences_on(times, date).min_by_key(|o| (o.at, o.index))
}

// ═══════════════════════════════════════════════════════════
// Order validation
// ═══════════════════════════════════════════════════════════

/// Check an order's schedule configuration. Never corrects anything.
pub fn validate_order(order: &MedicationOrder) -> Result<(), ScheduleError> {
    if let Some(end) = order.end_date {
        if end < order.start_date {
            return Err(invalid(
                order,
                format!("end date {end} precedes start date {}", order.start_date),
            ));
        }
    }

    match (order.frequency, order.category) {
        (Frequency::AsNeeded, c) if c != MedicationCategory::Prn => {
            return Err(invalid(order, format!("prn frequency on {c} order")));
        }
        (Frequency::Continuous, c) if c != MedicationCategory::Continuous => {
            return Err(invalid(order, format!("continuous frequency on {c} order")));
        }
        _ => {}
    }

    let times = &order.administration_times;
    for (i, t) in times.iter().enumerate() {
        if times[..i].contains(t) {
            return Err(invalid(order, format!("administration time {t} registered twice")));
        }
    }

    let expected = order.frequency.dose_count();
    match order.category {
        MedicationCategory::Prn | MedicationCategory::Continuous => {
            // Nominal anchor (0 or 1), or the full pattern when one is given.
            if times.len() > 1 && Some(times.len()) != expected {
                return Err(invalid(
                    order,
                    format!(
                        "{} order expects at most one anchor time{}, got {}",
                        order.category,
                        expected.map(|n| format!(" or {n} times")).unwrap_or_default(),
                        times.len()
                    ),
                ));
            }
        }
        MedicationCategory::Scheduled | MedicationCategory::Diabetic => {
            if times.is_empty() {
                return Err(invalid(
                    order,
                    format!("{} requires administration times, none registered", order.frequency),
                ));
            }
            if Some(times.len()) != expected {
                return Err(invalid(
                    order,
                    format!(
                        "{} requires {} administration times, got {}",
                        order.frequency,
                        expected.unwrap_or(0),
                        times.len()
                    ),
                ));
            }
        }
    }

    if let Some(hours) = order.frequency.interval_hours() {
        if times.len() > 1 {
            let anchor = times[0].num_seconds_from_midnight() as i64;
            let step = hours * 3600;
            for t in &times[1..] {
                let offset = (t.num_seconds_from_midnight() as i64 - anchor).rem_euclid(SECONDS_PER_DAY);
                if offset % step != 0 {
                    return Err(invalid(
                        order,
                        format!("{t} is not on the {hours}-hour cycle anchored at {}", times[0]),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Next step of an every-N-hours chain, strictly after `after`.
///
/// The chain restarts each day at the anchor: the candidate is `after`'s date
/// at the anchor time, stepped forward by the interval while it is not yet
/// past `after`. Before today's anchor the answer is the anchor itself.
pub fn next_interval_slot(anchor: NaiveTime, interval_hours: i64, after: NaiveDateTime) -> Option<NaiveDateTime> {
    let step = Duration::try_hours(interval_hours).filter(|s| *s > Duration::zero())?;
    let mut candidate = after.date().and_time(anchor);
    while candidate <= after {
        candidate = candidate.checked_add_signed(step)?;
    }
    Some(candidate)
}

/// Latest step of an every-N-hours chain at or before `at_or_before`.
///
/// Mirrors `next_interval_slot`: a day's chain starts at its anchor and ends
/// with its first step past midnight. Before today's anchor the search runs
/// on yesterday's chain.
pub fn previous_interval_slot(
    anchor: NaiveTime,
    interval_hours: i64,
    at_or_before: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let step = Duration::try_hours(interval_hours).filter(|s| *s > Duration::zero())?;
    let mut slot = at_or_before.date().and_time(anchor);
    if slot > at_or_before {
        slot = at_or_before.date().checked_sub_days(Days::new(1))?.and_time(anchor);
    }
    let chain_ends = slot.date().checked_add_days(Days::new(1))?.and_hms_opt(0, 0, 0)?;
    while slot < chain_ends {
        match slot.checked_add_signed(step) {
            Some(next) if next <= at_or_before => slot = next,
            _ => break,
        }
    }
    Some(slot)
}

/// Where an order's slots fall.
enum SlotPattern<'a> {
    /// Registered times-of-day, repeated every calendar day.
    Daily(&'a [NaiveTime]),
    /// Every-N-hours chain restarting daily at the first registered time.
    Interval { anchor: NaiveTime, hours: i64 },
}

impl<'a> SlotPattern<'a> {
    fn of(order: &'a MedicationOrder) -> Self {
        match (order.frequency.interval_hours(), order.administration_times.first()) {
            (Some(hours), Some(anchor)) => Self::Interval {
                anchor: *anchor,
                hours,
            },
            _ => Self::Daily(&order.administration_times),
        }
    }

    fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Self::Daily(times) => next_occurrence(times, after).map(|o| o.at),
            Self::Interval { anchor, hours } => next_interval_slot(*anchor, *hours, after),
        }
    }

    fn previous_at_or_before(&self, at_or_before: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Self::Daily(times) => previous_occurrence(times, at_or_before).map(|o| o.at),
            Self::Interval { anchor, hours } => previous_interval_slot(*anchor, *hours, at_or_before),
        }
    }

    fn first_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        match self {
            Self::Daily(times) => first_occurrence_on(times, date).map(|o| o.at),
            Self::Interval { anchor, .. } => Some(date.and_time(*anchor)),
        }
    }
}

fn calendar_exhausted(order: &MedicationOrder) -> ScheduleError {
    invalid(order, "schedule runs past the representable calendar")
}

// ═══════════════════════════════════════════════════════════
// Next due
// ═══════════════════════════════════════════════════════════

/// Next instant a dose of `order` is due, strictly after `now`.
///
/// PRN and continuous orders return `now` unchanged.
pub fn next_due(order: &MedicationOrder, now: NaiveDateTime) -> Result<NaiveDateTime, ScheduleError> {
    validate_order(order)?;
    if order.is_prn() || order.is_continuous() {
        return Ok(now);
    }
    SlotPattern::of(order)
        .next_after(now)
        .ok_or_else(|| calendar_exhausted(order))
}

/// The slot of the dose currently owed, if the order runs on slots.
///
/// The last administration is matched to the slot nearest to it (ties go to
/// the earlier slot), so an early dose satisfies the upcoming slot and a late
/// dose satisfies the one it was late for. `None` for PRN orders and for
/// continuous orders without an anchor time.
pub fn pending_due(order: &MedicationOrder) -> Result<Option<NaiveDateTime>, ScheduleError> {
    validate_order(order)?;
    if order.is_prn() || order.administration_times.is_empty() {
        return Ok(None);
    }
    let slots = SlotPattern::of(order);

    let Some(given_at) = order.last_administered else {
        return slots
            .first_on(order.start_date)
            .map(Some)
            .ok_or_else(|| calendar_exhausted(order));
    };

    let satisfied = match (slots.previous_at_or_before(given_at), slots.next_after(given_at)) {
        (Some(prev), Some(next)) => {
            if next - given_at < given_at - prev {
                next
            } else {
                prev
            }
        }
        (Some(prev), None) => prev,
        (None, Some(next)) => next,
        (None, None) => return Err(calendar_exhausted(order)),
    };

    slots
        .next_after(satisfied)
        .map(Some)
        .ok_or_else(|| calendar_exhausted(order))
}

// ═══════════════════════════════════════════════════════════
// Classification
// ═══════════════════════════════════════════════════════════

/// Result of assessing an order at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoseAssessment {
    pub status: DoseStatus,
    /// Slot of the dose currently owed (`None` for PRN / unanchored continuous).
    pub due_at: Option<NaiveDateTime>,
    pub next_due: NaiveDateTime,
}

/// Classifies doses against a configured grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleCalculator {
    grace_period: Duration,
}

impl Default for ScheduleCalculator {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_GRACE_PERIOD_MINUTES))
    }
}

impl ScheduleCalculator {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn next_due(&self, order: &MedicationOrder, now: NaiveDateTime) -> Result<NaiveDateTime, ScheduleError> {
        next_due(order, now)
    }

    /// Status of the dose currently owed by `order` at `now`.
    pub fn classify(&self, order: &MedicationOrder, now: NaiveDateTime) -> Result<DoseStatus, ScheduleError> {
        Ok(self.assess(order, now)?.status)
    }

    pub fn assess(&self, order: &MedicationOrder, now: NaiveDateTime) -> Result<DoseAssessment, ScheduleError> {
        let next = next_due(order, now)?;
        let due_at = pending_due(order)?;
        let status = match due_at {
            // PRN is due on request; unanchored infusions are monitored, not scheduled.
            None => DoseStatus::Due,
            Some(due) => self.status_for(order, due, now),
        };
        Ok(DoseAssessment {
            status,
            due_at,
            next_due: next,
        })
    }

    fn status_for(&self, order: &MedicationOrder, due: NaiveDateTime, now: NaiveDateTime) -> DoseStatus {
        if now < due {
            DoseStatus::NotDue
        } else if order.is_continuous() {
            // Any lapse on an infusion escalates immediately, no grace.
            if now == due {
                DoseStatus::Due
            } else {
                DoseStatus::Critical
            }
        } else if due
            .checked_add_signed(self.grace_period)
            .map_or(true, |window_ends| now < window_ends)
        {
            // A window past the end of the calendar never closes.
            DoseStatus::Due
        } else {
            DoseStatus::Overdue
        }
    }

    /// Value for the order's `next_due` cache once a dose is given at `given_at`.
    pub fn next_due_after_administration(
        &self,
        order: &MedicationOrder,
        given_at: NaiveDateTime,
    ) -> Result<NaiveDateTime, ScheduleError> {
        let mut updated = order.clone();
        updated.last_administered = Some(given_at);
        match pending_due(&updated)? {
            Some(due) => Ok(due),
            None => next_due(&updated, given_at),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
