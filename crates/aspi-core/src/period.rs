//! Splits a job's date range into provider-sized windows.

use chrono::{Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{DateRange, PeriodChunk};

/// Widest window a provider's report UI accepts in one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookback {
    Days(u32),
    Months(u32),
}

impl Lookback {
    fn window_end(self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Lookback::Days(0) | Lookback::Months(0) => None,
            Lookback::Days(n) => start.checked_add_signed(Duration::days(i64::from(n) - 1)),
            Lookback::Months(n) => start
                .checked_add_months(Months::new(n))
                .and_then(|d| d.pred_opt()),
        }
    }
}

/// Lazily yields contiguous, non-overlapping chunks covering `range` in order.
#[derive(Debug, Clone)]
pub struct PeriodChunks {
    next_start: Option<NaiveDate>,
    end: NaiveDate,
    lookback: Option<Lookback>,
}

pub fn chunk(range: DateRange, lookback: Option<Lookback>) -> PeriodChunks {
    PeriodChunks {
        next_start: Some(range.start),
        end: range.end,
        lookback,
    }
}

impl Iterator for PeriodChunks {
    type Item = PeriodChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let end = self
            .lookback
            .and_then(|lb| lb.window_end(start))
            .map_or(self.end, |window_end| window_end.min(self.end));
        self.next_start = if end < self.end { end.succ_opt() } else { None };
        Some(PeriodChunk { start, end })
    }
}
