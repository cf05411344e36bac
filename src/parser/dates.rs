//! Receipt dates.

use std::sync::LazyLock;

use chrono::{Months, NaiveDate};
use regex::Regex;
use schemars::JsonSchema;

use crate::prelude::*;

/// A date layout we know how to read. Tried in the configured order; the
/// first layout that yields a plausible date wins.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub enum DateFormat {
    /// `01/15/2024` or `01-15-2024`.
    #[serde(rename = "mm/dd/yyyy")]
    MonthDayYear,
    /// `2024-01-15`.
    #[serde(rename = "yyyy-mm-dd")]
    YearMonthDay,
    /// `Jan 15, 2024` or `January 15 2024`.
    #[serde(rename = "mon dd, yyyy")]
    MonthNameDayYear,
    /// `15 January 2024` or `15 Jan 2024`.
    #[serde(rename = "dd month yyyy")]
    DayMonthNameYear,
    /// `15.01.2024`.
    #[serde(rename = "dd.mm.yyyy")]
    DayMonthYearDotted,
    /// `01/15/24`.
    #[serde(rename = "mm/dd/yy")]
    MonthDayShortYear,
}

impl DateFormat {
    /// Every format, in the default order.
    pub fn all() -> Vec<DateFormat> {
        vec![
            DateFormat::MonthDayYear,
            DateFormat::YearMonthDay,
            DateFormat::MonthNameDayYear,
            DateFormat::DayMonthNameYear,
            DateFormat::DayMonthYearDotted,
            DateFormat::MonthDayShortYear,
        ]
    }

    fn regex(self) -> &'static Regex {
        static MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").expect("failed to compile regex")
        });
        static YEAR_MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b").expect("failed to compile regex")
        });
        static MONTH_NAME_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b")
                .expect("failed to compile regex")
        });
        static DAY_MONTH_NAME_YEAR: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?,?\s+(\d{4})\b")
                .expect("failed to compile regex")
        });
        static DAY_MONTH_YEAR_DOTTED: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("failed to compile regex")
        });
        static MONTH_DAY_SHORT_YEAR: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{2})\b").expect("failed to compile regex")
        });
        match self {
            DateFormat::MonthDayYear => &MONTH_DAY_YEAR,
            DateFormat::YearMonthDay => &YEAR_MONTH_DAY,
            DateFormat::MonthNameDayYear => &MONTH_NAME_DAY_YEAR,
            DateFormat::DayMonthNameYear => &DAY_MONTH_NAME_YEAR,
            DateFormat::DayMonthYearDotted => &DAY_MONTH_YEAR_DOTTED,
            DateFormat::MonthDayShortYear => &MONTH_DAY_SHORT_YEAR,
        }
    }

    /// Find the first date in `line` with this layout, ignoring plausibility.
    pub fn find(self, line: &str) -> Option<NaiveDate> {
        self.regex().captures_iter(line).find_map(|caps| {
            let num = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
            let (year, month, day) = match self {
                DateFormat::MonthDayYear => (num(3)?, num(1)?, num(2)?),
                DateFormat::YearMonthDay => (num(1)?, num(2)?, num(3)?),
                DateFormat::MonthNameDayYear => (num(3)?, month_number(&caps[1])?, num(2)?),
                DateFormat::DayMonthNameYear => (num(3)?, month_number(&caps[2])?, num(1)?),
                DateFormat::DayMonthYearDotted => (num(3)?, num(2)?, num(1)?),
                DateFormat::MonthDayShortYear => (2000 + num(3)?, num(1)?, num(2)?),
            };
            NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
        })
    }
}

/// Map an English month name or abbreviation to 1–12.
fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_ascii_lowercase();
    let full = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    // Accept any prefix of the full name that is at least three letters.
    MONTHS
        .iter()
        .zip(full)
        .position(|(abbr, full)| lower.starts_with(abbr) && full.starts_with(&lower))
        .map(|idx| idx as u32 + 1)
}

/// Is `date` within five years before and one year after `today`?
pub fn is_plausible(date: NaiveDate, today: NaiveDate) -> bool {
    let earliest = today
        .checked_sub_months(Months::new(60))
        .unwrap_or(NaiveDate::MIN);
    let latest = today
        .checked_add_months(Months::new(12))
        .unwrap_or(NaiveDate::MAX);
    earliest <= date && date <= latest
}

/// Find a plausible date in `line`, trying `formats` in order.
pub fn find_date(line: &str, formats: &[DateFormat], today: NaiveDate) -> Option<NaiveDate> {
    let date = formats
        .iter()
        .filter_map(|format| format.find(line))
        .find(|date| is_plausible(*date, today));
    if let Some(date) = date {
        trace!(%date, line, "Found date");
    }
    date
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn each_format_is_recognized() {
        let formats = DateFormat::all();
        let cases = [
            ("Date: 01/15/2024 12:31 PM", ymd(2024, 1, 15)),
            ("2024-01-15", ymd(2024, 1, 15)),
            ("Jan 15, 2024", ymd(2024, 1, 15)),
            ("September 3 2023", ymd(2023, 9, 3)),
            ("15 January 2024", ymd(2024, 1, 15)),
            ("3rd Sept 2023", ymd(2023, 9, 3)),
            ("15.01.2024", ymd(2024, 1, 15)),
            ("01/15/24 10:02", ymd(2024, 1, 15)),
        ];
        for (line, expected) in cases {
            assert_eq!(find_date(line, &formats, today()), expected, "{line}");
        }
    }

    #[test]
    fn implausible_dates_are_rejected() {
        let formats = DateFormat::all();
        assert_eq!(find_date("01/15/2015", &formats, today()), None);
        assert_eq!(find_date("01/15/2026", &formats, today()), None);
        assert_eq!(find_date("13/45/2024", &formats, today()), None);
        assert_eq!(find_date("Total 4.84", &formats, today()), None);
    }

    #[test]
    fn formats_are_tried_in_order() {
        // Ambiguous without a preference: 03/04/2024 is March 4 in US order.
        assert_eq!(
            find_date("03/04/2024", &[DateFormat::MonthDayYear], today()),
            ymd(2024, 3, 4)
        );
        // Restricting to dotted day-first dates ignores the US layout.
        assert_eq!(find_date("03/04/2024", &[DateFormat::DayMonthYearDotted], today()), None);
    }

    #[test]
    fn month_names() {
        assert_eq!(month_number("Jan"), Some(1));
        assert_eq!(month_number("DECEMBER"), Some(12));
        assert_eq!(month_number("sept"), Some(9));
        assert_eq!(month_number("Total"), None);
        assert_eq!(month_number("Marble"), None);
    }

    #[test]
    fn formats_deserialize_from_layout_strings() -> Result<()> {
        let formats: Vec<DateFormat> = serde_json::from_str(r#"["dd.mm.yyyy", "yyyy-mm-dd"]"#)?;
        assert_eq!(
            formats,
            vec![DateFormat::DayMonthYearDotted, DateFormat::YearMonthDay]
        );
        Ok(())
    }
}
