//! Filename pattern engine.
//!
//! This module provides:
//! - [`DatePattern`] - A tokenized date pattern that resolves to a [`RotationKey`]
//! - [`FilenameTemplate`] - Turns a key and an overflow sequence into a file name
//!   and recognizes the members of a file family on disk
//!
//! Patterns use a small date mini-language. Both the upper-case and the
//! lower-case spellings of year and day tokens are accepted, so `YYYY-MM-DD`
//! and `.yyyy-MM-dd` resolve the same fields:
//!
//! | Token | Field |
//! |---|---|
//! | `YYYY` `yyyy` | four digit year |
//! | `YY` `yy` | two digit year |
//! | `MM` / `M` | month, padded / unpadded |
//! | `DD` `dd` / `D` `d` | day of month, padded / unpadded |
//! | `HH` / `H` | hour (24h), padded / unpadded |
//! | `mm` / `m` | minute, padded / unpadded |
//! | `ddd` / `dddd` | weekday, short / full name |
//!
//! Text wrapped in `[...]` is emitted literally; any other character is a literal.

use std::fmt;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RotateError};

/// Placeholder substituted with the rotation key inside a file name.
pub const DATE_PLACEHOLDER: &str = "%DATE%";

/// Pattern used when none is configured.
pub const DEFAULT_DATE_PATTERN: &str = "YYYY-MM-DD";

/// Extension appended to archived family members.
pub const GZIP_EXTENSION: &str = ".gz";

/// The concrete value a pattern resolves to at a given instant.
///
/// Two writes target different files iff their keys differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RotationKey(pub String);

impl RotationKey {
    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RotationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finest calendar field a pattern names, ordered from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Granularity {
    /// The pattern names no calendar field and never expires.
    None,
    /// Rotates yearly.
    Year,
    /// Rotates monthly.
    Month,
    /// Rotates daily (also used for weekday tokens).
    Day,
    /// Rotates hourly.
    Hour,
    /// Rotates every minute.
    Minute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    YearFull,
    YearShort,
    MonthPadded,
    Month,
    DayPadded,
    Day,
    HourPadded,
    Hour,
    MinutePadded,
    Minute,
    WeekdayShort,
    WeekdayLong,
}

// Longest spellings first so `dddd` wins over `ddd`, `dd` and `d`.
const TOKENS: &[(&str, Token)] = &[
    ("YYYY", Token::YearFull),
    ("yyyy", Token::YearFull),
    ("dddd", Token::WeekdayLong),
    ("ddd", Token::WeekdayShort),
    ("YY", Token::YearShort),
    ("yy", Token::YearShort),
    ("MM", Token::MonthPadded),
    ("DD", Token::DayPadded),
    ("dd", Token::DayPadded),
    ("HH", Token::HourPadded),
    ("mm", Token::MinutePadded),
    ("M", Token::Month),
    ("D", Token::Day),
    ("d", Token::Day),
    ("H", Token::Hour),
    ("m", Token::Minute),
];

impl Token {
    const fn granularity(self) -> Granularity {
        match self {
            Self::YearFull | Self::YearShort => Granularity::Year,
            Self::MonthPadded | Self::Month => Granularity::Month,
            Self::DayPadded | Self::Day | Self::WeekdayShort | Self::WeekdayLong => {
                Granularity::Day
            }
            Self::HourPadded | Self::Hour => Granularity::Hour,
            Self::MinutePadded | Self::Minute => Granularity::Minute,
        }
    }

    const fn regex(self) -> &'static str {
        match self {
            Self::YearFull => r"\d{4}",
            Self::YearShort | Self::MonthPadded | Self::DayPadded | Self::HourPadded
            | Self::MinutePadded => r"\d{2}",
            Self::Month | Self::Day | Self::Hour | Self::Minute => r"\d{1,2}",
            Self::WeekdayShort | Self::WeekdayLong => r"[A-Za-z]+",
        }
    }

    fn render<Tz: TimeZone>(self, at: &DateTime<Tz>, out: &mut String) {
        use std::fmt::Write;

        // Writing into a String cannot fail.
        let _ = match self {
            Self::YearFull => write!(out, "{:04}", at.year()),
            Self::YearShort => write!(out, "{:02}", at.year().rem_euclid(100)),
            Self::MonthPadded => write!(out, "{:02}", at.month()),
            Self::Month => write!(out, "{}", at.month()),
            Self::DayPadded => write!(out, "{:02}", at.day()),
            Self::Day => write!(out, "{}", at.day()),
            Self::HourPadded => write!(out, "{:02}", at.hour()),
            Self::Hour => write!(out, "{}", at.hour()),
            Self::MinutePadded => write!(out, "{:02}", at.minute()),
            Self::Minute => write!(out, "{}", at.minute()),
            Self::WeekdayShort => write!(out, "{}", weekday_name(at.weekday()).0),
            Self::WeekdayLong => write!(out, "{}", weekday_name(at.weekday()).1),
        };
    }
}

const fn weekday_name(day: Weekday) -> (&'static str, &'static str) {
    match day {
        Weekday::Mon => ("Mon", "Monday"),
        Weekday::Tue => ("Tue", "Tuesday"),
        Weekday::Wed => ("Wed", "Wednesday"),
        Weekday::Thu => ("Thu", "Thursday"),
        Weekday::Fri => ("Fri", "Friday"),
        Weekday::Sat => ("Sat", "Saturday"),
        Weekday::Sun => ("Sun", "Sunday"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Token),
}

/// A date pattern, tokenized once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    source: String,
    segments: Vec<Segment>,
}

impl Default for DatePattern {
    fn default() -> Self {
        Self::parse(DEFAULT_DATE_PATTERN)
    }
}

impl DatePattern {
    /// Tokenizes a pattern string.
    ///
    /// Tokenizing never fails: unrecognized characters are literals and an
    /// unterminated `[` runs to the end of the pattern.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(ch) = rest.chars().next() {
            if ch == '[' {
                let body = &rest[1..];
                let (text, remaining) = match body.find(']') {
                    Some(end) => (&body[..end], &body[end + 1..]),
                    None => (body, ""),
                };
                literal.push_str(text);
                rest = remaining;
                continue;
            }

            if let Some((spelling, token)) = TOKENS.iter().find(|(s, _)| rest.starts_with(s)) {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(*token));
                rest = &rest[spelling.len()..];
                continue;
            }

            literal.push(ch);
            rest = &rest[ch.len_utf8()..];
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    /// Returns the pattern as it was configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the finest calendar field named by the pattern.
    #[must_use]
    pub fn granularity(&self) -> Granularity {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(token) => Some(token.granularity()),
                Segment::Literal(_) => None,
            })
            .max()
            .unwrap_or(Granularity::None)
    }

    /// Resolves the pattern at `instant`, using UTC or local calendar fields.
    #[must_use]
    pub fn resolve(&self, instant: DateTime<Utc>, utc: bool) -> RotationKey {
        if utc {
            self.render(&instant)
        } else {
            self.render(&instant.with_timezone(&Local))
        }
    }

    /// Returns true if a file opened under `old_key` no longer matches `now`.
    ///
    /// A key only carries the fields the pattern names, so a day pattern
    /// ignores hour and minute changes. Patterns without calendar fields
    /// never expire.
    #[must_use]
    pub fn has_expired(&self, old_key: &RotationKey, now: DateTime<Utc>, utc: bool) -> bool {
        if self.granularity() == Granularity::None {
            return false;
        }
        self.resolve(now, utc) != *old_key
    }

    fn render<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> RotationKey {
        let mut out = String::with_capacity(self.source.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(token) => token.render(at, &mut out),
            }
        }
        RotationKey(out)
    }

    fn regex(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => regex::escape(text),
                Segment::Field(token) => token.regex().to_string(),
            })
            .collect()
    }
}

/// A family member's name, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberName {
    /// The rotation key embedded in the name.
    pub key: String,
    /// Overflow sequence (0 when the name carries no `.<n>` suffix).
    pub seq: u32,
    /// Whether the name ends in `.gz`.
    pub compressed: bool,
}

/// Turns rotation keys into file names for one file family.
#[derive(Debug, Clone)]
pub struct FilenameTemplate {
    basename: String,
    pattern: DatePattern,
    prepend: bool,
    matcher: Regex,
}

impl FilenameTemplate {
    /// Creates a template from a basename and a pattern.
    ///
    /// When `basename` contains [`DATE_PLACEHOLDER`] the key replaces it.
    /// Otherwise the key is appended, or prepended when `prepend` is set; a
    /// leading `.` on the pattern then moves to the end so that
    /// `app.log` + `.yyyy-MM-dd` becomes `2029-01-15.app.log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the family matcher cannot be compiled.
    pub fn new(basename: impl Into<String>, pattern: &str, prepend: bool) -> Result<Self> {
        let basename = basename.into();
        let has_placeholder = basename.contains(DATE_PLACEHOLDER);

        let pattern = match pattern.strip_prefix('.') {
            Some(rest) if prepend && !has_placeholder => DatePattern::parse(&format!("{rest}.")),
            _ => DatePattern::parse(pattern),
        };

        let key = format!("(?P<key>{})", pattern.regex());
        let body = if has_placeholder {
            let (prefix, suffix) = basename
                .split_once(DATE_PLACEHOLDER)
                .unwrap_or((basename.as_str(), ""));
            format!("{}{key}{}", regex::escape(prefix), regex::escape(suffix))
        } else if prepend {
            format!("{key}{}", regex::escape(&basename))
        } else {
            format!("{}{key}", regex::escape(&basename))
        };
        let matcher = Regex::new(&format!(
            r"(?i)^{body}(?:\.(?P<seq>\d+))?(?P<gz>{})?$",
            regex::escape(GZIP_EXTENSION)
        ))
        .map_err(|e| RotateError::Config(format!("filename template: {e}")))?;

        Ok(Self {
            basename,
            pattern,
            prepend,
            matcher,
        })
    }

    /// Returns the configured basename.
    #[must_use]
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Returns the pattern in effect (adjusted for prepend mode).
    #[must_use]
    pub const fn pattern(&self) -> &DatePattern {
        &self.pattern
    }

    /// Resolves the rotation key at `instant`.
    #[must_use]
    pub fn resolve(&self, instant: DateTime<Utc>, utc: bool) -> RotationKey {
        self.pattern.resolve(instant, utc)
    }

    /// Returns the file name for `key` and overflow sequence `seq`.
    #[must_use]
    pub fn file_name(&self, key: &RotationKey, seq: u32) -> String {
        let name = if self.basename.contains(DATE_PLACEHOLDER) {
            self.basename.replacen(DATE_PLACEHOLDER, key.as_str(), 1)
        } else if self.prepend {
            format!("{key}{}", self.basename)
        } else {
            format!("{}{key}", self.basename)
        };

        if seq == 0 {
            name
        } else {
            format!("{name}.{seq}")
        }
    }

    /// Parses `name` as a member of this family.
    ///
    /// Returns `None` if the name does not belong to the family.
    #[must_use]
    pub fn parse_member(&self, name: &str) -> Option<MemberName> {
        let caps = self.matcher.captures(name)?;
        let seq = match caps.name("seq") {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(MemberName {
            key: caps.name("key").map_or_else(String::new, |m| m.as_str().to_string()),
            seq,
            compressed: caps.name("gz").is_some(),
        })
    }
}
