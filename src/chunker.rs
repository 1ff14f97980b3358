use crate::error::Error;
use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use std::fmt;

/// An inclusive span of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        if start > end {
            return Err(Error::InvalidDateRange {
                start_date: start.to_string(),
                end_date: end.to_string(),
            });
        }
        Ok(DateRange { start, end })
    }

    pub fn single_day(day: NaiveDate) -> Self {
        DateRange {
            start: day,
            end: day,
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last day of `date`'s month, `None` only at the far end of chrono's range.
pub fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    first_day_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
}

/// Calendar-month chunks of a date range, produced lazily.
///
/// The first chunk starts at the requested start date and the last one stops
/// at the requested end date; every chunk in between covers a whole month.
#[derive(Debug, Clone)]
pub struct DateChunks {
    next_start: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for DateChunks {
    type Item = DateRange;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let month_end = last_day_of_month(start).unwrap_or(self.end);
        let end = month_end.min(self.end);

        self.next_start = if end < self.end {
            end.succ_opt()
        } else {
            None
        };

        Some(DateRange { start, end })
    }
}

/// Splits `[start, end]` into month-sized chunks.
///
/// # Returns
/// A fresh [`DateChunks`] iterator or [`Error::InvalidDateRange`] when `start > end`.
pub fn split(start: NaiveDate, end: NaiveDate) -> Result<DateChunks, Error> {
    let range = DateRange::new(start, end)?;
    Ok(DateChunks {
        next_start: Some(range.start),
        end: range.end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::date;

    fn num_days(range: &DateRange) -> i64 {
        (range.end - range.start).num_days() + 1
    }

    #[test]
    fn test_split_clips_first_and_last_chunk() {
        let chunks: Vec<DateRange> = split(date("2024-01-15"), date("2024-03-10"))
            .unwrap()
            .collect();

        assert_eq!(
            chunks,
            vec![
                DateRange::new(date("2024-01-15"), date("2024-01-31")).unwrap(),
                DateRange::new(date("2024-02-01"), date("2024-02-29")).unwrap(),
                DateRange::new(date("2024-03-01"), date("2024-03-10")).unwrap(),
            ]
        );
    }

    #[test]
    fn test_split_single_day() {
        let chunks: Vec<DateRange> = split(date("2024-05-31"), date("2024-05-31"))
            .unwrap()
            .collect();
        assert_eq!(chunks, vec![DateRange::single_day(date("2024-05-31"))]);
    }

    #[test]
    fn test_split_rejects_inverted_range() {
        let result = split(date("2024-03-01"), date("2024-02-01"));
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidDateRange { start_date, end_date }
                if start_date == "2024-03-01" && end_date == "2024-02-01"
        ));
    }

    #[test]
    fn test_split_chunks_are_contiguous_and_cover_range() {
        let cases = [
            ("2023-11-03", "2024-02-27"),
            ("2024-01-01", "2024-12-31"),
            ("2023-12-31", "2024-01-01"),
            ("2024-02-29", "2025-03-01"),
        ];

        for (start, end) in cases {
            let (start, end) = (date(start), date(end));
            let chunks: Vec<DateRange> = split(start, end).unwrap().collect();

            assert_eq!(chunks.first().unwrap().start, start);
            assert_eq!(chunks.last().unwrap().end, end);

            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end.succ_opt().unwrap(), pair[1].start);
                assert_eq!(Some(pair[0].end), last_day_of_month(pair[0].start));
            }
            for chunk in &chunks {
                assert!(chunk.start <= chunk.end);
                assert_eq!(chunk.start.month(), chunk.end.month());
            }

            let covered: i64 = chunks.iter().map(num_days).sum();
            assert_eq!(covered, (end - start).num_days() + 1);
        }
    }

    #[test]
    fn test_split_is_fresh_per_call() {
        let first: Vec<DateRange> = split(date("2024-01-10"), date("2024-02-10"))
            .unwrap()
            .collect();
        let second: Vec<DateRange> = split(date("2024-01-10"), date("2024-02-10"))
            .unwrap()
            .collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_month_boundaries() {
        assert_eq!(first_day_of_month(date("2024-02-17")), date("2024-02-01"));
        assert_eq!(last_day_of_month(date("2024-02-17")), Some(date("2024-02-29")));
        assert_eq!(last_day_of_month(date("2023-12-05")), Some(date("2023-12-31")));
    }
}
