//! Session dates and project names inferred from a data file's storage path.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

static RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)-(\d+)\s").expect("range regex"));

static ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\D)((\d{4})[-/.](\d{1,2})[-/.](\d{1,2}))(?:\D|$)").expect("iso date regex")
});
static US: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\D)((\d{1,2})[-/.](\d{1,2})[-/.](\d{4}|\d{2}))(?:\D|$)")
        .expect("us date regex")
});
static COMPACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\D)((\d{4})(\d{2})(\d{2}))(?:\D|$)").expect("compact date regex")
});

const MONTH: &str = r"(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?";

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b({}\s*(\d{{1,2}})(?:st|nd|rd|th)?,?[\s-]*(\d{{4}}))",
        MONTH
    ))
    .expect("month day year regex")
});
static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:^|\D)((\d{{1,2}})(?:st|nd|rd|th)?[\s-]*{}[\s,-]*(\d{{4}}))",
        MONTH
    ))
    .expect("day month year regex")
});
static MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b({}[\s,-]*(\d{{4}}))", MONTH)).expect("month year regex")
});

/// Date tokens shorter than this are too ambiguous to trust
const MIN_TOKEN_LEN: usize = 5;

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn num(caps: &Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

fn year(caps: &Captures<'_>, i: usize) -> Option<i32> {
    let raw = caps.get(i)?.as_str();
    let value: i32 = raw.parse().ok()?;
    // Two-digit years land in 2000-2069 or 1970-1999
    Some(match raw.len() {
        2 if value < 70 => 2000 + value,
        2 => 1900 + value,
        _ => value,
    })
}

type Builder = fn(&Captures<'_>) -> Option<NaiveDate>;

fn patterns() -> [(&'static Lazy<Regex>, Builder); 6] {
    [
        (&ISO, |c| {
            NaiveDate::from_ymd_opt(year(c, 2)?, num(c, 3)?, num(c, 4)?)
        }),
        (&COMPACT, |c| {
            NaiveDate::from_ymd_opt(year(c, 2)?, num(c, 3)?, num(c, 4)?)
        }),
        (&US, |c| {
            NaiveDate::from_ymd_opt(year(c, 4)?, num(c, 2)?, num(c, 3)?)
        }),
        (&MONTH_DAY_YEAR, |c| {
            NaiveDate::from_ymd_opt(year(c, 4)?, month_number(c.get(2)?.as_str())?, num(c, 3)?)
        }),
        (&DAY_MONTH_YEAR, |c| {
            NaiveDate::from_ymd_opt(year(c, 4)?, month_number(c.get(3)?.as_str())?, num(c, 2)?)
        }),
        (&MONTH_YEAR, |c| {
            NaiveDate::from_ymd_opt(year(c, 3)?, month_number(c.get(2)?.as_str())?, 1)
        }),
    ]
}

/// Earliest valid date token in `text`, with the source text it came from.
pub fn find_date(text: &str) -> Option<(NaiveDateTime, String)> {
    let mut found: Vec<(usize, NaiveDate, String)> = Vec::new();
    for (pattern, build) in patterns() {
        for caps in pattern.captures_iter(text) {
            let Some(token) = caps.get(1) else { continue };
            if token.as_str().len() < MIN_TOKEN_LEN {
                continue;
            }
            if let Some(date) = build(&caps) {
                found.push((token.start(), date, token.as_str().to_string()));
            }
        }
    }
    found.sort_by_key(|(start, _, _)| *start);
    let (_, date, source) = found.into_iter().next()?;
    Some((date.and_hms_opt(0, 0, 0)?, source))
}

/// Date of a storage path, searching path segments from the file name upward.
///
/// Numeric ranges such as `123-456 ` are collapsed to their upper bound first,
/// so sample number spans are not read as dates.
pub fn extract_datetime(file_path: &str) -> Option<NaiveDateTime> {
    for segment in file_path.split('/').rev() {
        let without_ranges = RANGE.replace_all(segment, "${2} ");
        let hit = find_date(&without_ranges).or_else(|| find_date(segment));
        if let Some((date, source)) = hit {
            debug!("Extracted date {} from '{}'", date, source);
            return Some(date);
        }
    }
    None
}

/// Longest directory segment of a storage path (first one wins on ties).
pub fn infer_project_name(file_path: &str) -> Option<String> {
    let mut folders: Vec<&str> = file_path.split('/').collect();
    folders.pop();
    let mut best: Option<&str> = None;
    for folder in folders {
        if best.map_or(true, |b| folder.len() > b.len()) {
            best = Some(folder);
        }
    }
    best.filter(|b| !b.is_empty()).map(str::to_string)
}

/// Sentinel for sessions whose date could not be determined
pub fn unknown_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_iso_date_in_file_name() {
        assert_eq!(
            extract_datetime("Detrital/Gehrels 2019/2019-03-14 ALC-14.xlsx"),
            Some(date(2019, 3, 14))
        );
    }

    #[test]
    fn test_file_name_wins_over_folder() {
        assert_eq!(
            extract_datetime("Runs 2017-01-02/run 2018-05-06.xlsx"),
            Some(date(2018, 5, 6))
        );
    }

    #[test]
    fn test_folder_date_is_used_when_file_has_none() {
        assert_eq!(
            extract_datetime("Runs March 3 2016/ALC-14.xlsx"),
            Some(date(2016, 3, 3))
        );
    }

    #[test]
    fn test_us_and_compact_forms() {
        assert_eq!(extract_datetime("proj/5-17-2015 zircon.xls"), Some(date(2015, 5, 17)));
        assert_eq!(extract_datetime("proj/run_20160412.xls"), Some(date(2016, 4, 12)));
        assert_eq!(extract_datetime("proj/12 Jan 2014 zircon.xls"), Some(date(2014, 1, 12)));
    }

    #[test]
    fn test_short_tokens_and_missing_dates() {
        assert_eq!(extract_datetime("proj/2019/ALC-14.xlsx"), None);
        assert_eq!(extract_datetime("ALC-14.xlsx"), None);
    }

    #[test]
    fn test_numeric_ranges_are_collapsed() {
        assert_eq!(
            extract_datetime("proj/Samples 12-14 2015-06-01.xlsx"),
            Some(date(2015, 6, 1))
        );
    }

    #[test]
    fn test_project_name_is_longest_folder() {
        assert_eq!(
            infer_project_name("Gehrels/Detrital zircon 2019/run.xlsx").as_deref(),
            Some("Detrital zircon 2019")
        );
        assert_eq!(infer_project_name("abc/xyz/run.xlsx").as_deref(), Some("abc"));
        assert_eq!(infer_project_name("run.xlsx"), None);
    }

    #[test]
    fn test_unknown_date_sentinel() {
        assert_eq!(unknown_date(), date(1, 1, 1));
    }
}
