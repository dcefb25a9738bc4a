use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid quarter format: {0:?} (expected YYYY-Q, e.g. 2023-4)")]
pub struct QuarterError(pub String);

fn quarter_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^20([0-9]{2})-([1-4])$").ok())
        .as_ref()
}

/// A quarterly data release, written as `YYYY-Q`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quarter {
    year: u16,
    quarter: u8,
}

impl Quarter {
    pub fn new(year: u16, quarter: u8) -> Result<Quarter, QuarterError> {
        format!("{}-{}", year, quarter).parse()
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// Convert a label of the release listing, e.g. `2023_trimestre_04/`.
    pub fn from_listing_label(label: &str) -> Result<Quarter, QuarterError> {
        label.replace("_trimestre_0", "-").replace('/', "").parse()
    }

    /// Check a string against the `YYYY-Q` format without building a value.
    pub fn is_valid(s: &str) -> bool {
        quarter_regex().is_some_and(|re| re.is_match(s))
    }
}

impl FromStr for Quarter {
    type Err = QuarterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = quarter_regex()
            .and_then(|re| re.captures(s))
            .ok_or_else(|| QuarterError(s.to_string()))?;
        let yy: u16 = caps[1].parse().map_err(|_| QuarterError(s.to_string()))?;
        let quarter: u8 = caps[2].parse().map_err(|_| QuarterError(s.to_string()))?;
        Ok(Quarter {
            year: 2000 + yy,
            quarter,
        })
    }
}

impl Display for Quarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.year, self.quarter)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn parse_quarter() -> Result<(), Box<dyn Error>> {
        let q = "2023-4".parse::<Quarter>()?;
        assert_eq!(q.year(), 2023);
        assert_eq!(q.quarter(), 4);
        assert_eq!(q.to_string(), "2023-4");
        Ok(())
    }

    #[test]
    fn pattern_compiles() {
        assert!(quarter_regex().is_some());
        assert!(Quarter::is_valid("2023-4"));
    }

    #[test]
    fn reject_bad_formats() {
        for s in ["2023-5", "2023-0", "1999-1", "2023-04", "23-1", "2023-1 ", ""] {
            assert!(s.parse::<Quarter>().is_err(), "{s:?} should be rejected");
            assert!(!Quarter::is_valid(s));
        }
    }

    #[test]
    fn from_listing_label() -> Result<(), Box<dyn Error>> {
        let q = Quarter::from_listing_label("2023_trimestre_04/")?;
        assert_eq!(q, Quarter::new(2023, 4)?);
        assert!(Quarter::from_listing_label("Parent Directory").is_err());
        Ok(())
    }

    #[test]
    fn chronological_order() -> Result<(), Box<dyn Error>> {
        let mut qs: Vec<Quarter> = ["2022-4", "2023-1", "2020-3"]
            .iter()
            .map(|s| s.parse())
            .collect::<Result<_, _>>()?;
        qs.sort();
        assert_eq!(qs.last().map(|q| q.to_string()), Some("2023-1".to_string()));
        Ok(())
    }
}
