//! Date-gap arithmetic shared by the collector and the notifier.
//!
//! Both jobs reduce to the same question: given the most recent date a
//! watermark has reached, what inclusive range of dates still needs work?
//! `next_range` answers it, and `DateRange::windows` chunks the answer into
//! request-sized pieces.

use chrono::{Days, NaiveDate};
use std::fmt;

// ── DateRange ─────────────────────────────────────────────────────────────────

/// An inclusive range of calendar dates. Never empty: construction fails
/// instead of producing `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self { start, end })
    }

    /// Inclusive day count. A one-day range has length 1.
    pub fn len_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Every date in the range, ascending.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        std::iter::successors(Some(self.start), |d| d.succ_opt())
            .take_while(move |d| *d <= self.end)
    }

    /// Consecutive chronological sub-ranges of at most `window_days` days,
    /// covering the range exactly with no overlap.
    pub fn windows(&self, window_days: u32) -> Windows {
        Windows {
            cursor: Some(self.start),
            end: self.end,
            window_days: window_days.max(1),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start, self.end)
    }
}

// ── Windows ───────────────────────────────────────────────────────────────────

pub struct Windows {
    cursor: Option<NaiveDate>,
    end: NaiveDate,
    window_days: u32,
}

impl Iterator for Windows {
    type Item = DateRange;

    fn next(&mut self) -> Option<DateRange> {
        let start = self.cursor?;
        if start > self.end {
            self.cursor = None;
            return None;
        }
        let span = Days::new(u64::from(self.window_days) - 1);
        let window_end = start
            .checked_add_days(span)
            .map_or(self.end, |candidate| candidate.min(self.end));
        self.cursor = window_end.succ_opt();
        Some(DateRange {
            start,
            end: window_end,
        })
    }
}

// ── Gap calculation ───────────────────────────────────────────────────────────

/// The next inclusive range to process: the day after the last processed
/// date (or the fallback when nothing was processed yet) through `until`.
/// `None` means there is no work.
pub fn next_range(
    last_processed: Option<NaiveDate>,
    fallback_start: NaiveDate,
    until: NaiveDate,
) -> Option<DateRange> {
    let start = match last_processed {
        Some(date) => date.succ_opt()?,
        None => fallback_start,
    };
    DateRange::new(start, until)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
