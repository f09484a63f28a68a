//! Bucket Timestamp Formats
//!
//! Each time unit renders its bucket timestamp with a restricted `strftime`
//! template. Only fixed-width, zero-padded specifiers are accepted so that
//! string order of the rendered timestamps matches chronological order:
//!
//! | Specifier | Field            | Width |
//! |-----------|------------------|-------|
//! | `%Y`      | year             | 4     |
//! | `%m`      | month            | 2     |
//! | `%d`      | day of month     | 2     |
//! | `%H`      | hour (00-23)     | 2     |
//! | `%M`      | minute           | 2     |
//! | `%%`      | literal `%`      | 1     |
//!
//! Templates are read with chrono's strftime parser, so shorthands that
//! expand to these fields (`%F`, `%R`) are accepted too.
//!
//! Putting the fields in most-significant-first order is still the caller's
//! job. A template like `%d-%m-%Y` validates but drains out of order.

use super::TimeUnit;
use crate::error::{QueueError, Result};
use chrono::format::{Item, Numeric, Pad, StrftimeItems};
use chrono::NaiveDateTime;

/// Default template for [`TimeUnit::Minutes`].
pub const DEFAULT_MINUTES_FORMAT: &str = "%Y-%m-%d_%H-%M";
/// Default template for [`TimeUnit::Hours`].
pub const DEFAULT_HOURS_FORMAT: &str = "%Y-%m-%d_%H";
/// Default template for [`TimeUnit::Days`].
pub const DEFAULT_DAYS_FORMAT: &str = "%Y-%m-%d";

/// Characters that would change the meaning of a key pattern.
const GLOB_META: &[char] = &['*', '?', '[', ']', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl Field {
    fn from_numeric(numeric: &Numeric) -> Option<Self> {
        match numeric {
            Numeric::Year => Some(Field::Year),
            Numeric::Month => Some(Field::Month),
            Numeric::Day => Some(Field::Day),
            Numeric::Hour => Some(Field::Hour),
            Numeric::Minute => Some(Field::Minute),
            _ => None,
        }
    }

    fn numeric(self) -> Numeric {
        match self {
            Field::Year => Numeric::Year,
            Field::Month => Numeric::Month,
            Field::Day => Numeric::Day,
            Field::Hour => Numeric::Hour,
            Field::Minute => Numeric::Minute,
        }
    }

    fn specifier(self) -> &'static str {
        match self {
            Field::Year => "%Y",
            Field::Month => "%m",
            Field::Day => "%d",
            Field::Hour => "%H",
            Field::Minute => "%M",
        }
    }

    fn required_for(unit: TimeUnit) -> &'static [Field] {
        match unit {
            TimeUnit::Days => &[Field::Year, Field::Month, Field::Day],
            TimeUnit::Hours => &[Field::Year, Field::Month, Field::Day, Field::Hour],
            TimeUnit::Minutes => &[
                Field::Year,
                Field::Month,
                Field::Day,
                Field::Hour,
                Field::Minute,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

impl Segment {
    fn item(&self) -> Item<'_> {
        match self {
            Segment::Literal(text) => Item::Literal(text),
            Segment::Field(field) => Item::Numeric(field.numeric(), Pad::Zero),
        }
    }
}

/// A validated timestamp template for one time unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketFormat {
    unit: TimeUnit,
    template: String,
    segments: Vec<Segment>,
}

impl BucketFormat {
    /// Parses and validates a template for `unit`.
    ///
    /// Fails with [`QueueError::Configuration`] when the template uses an
    /// unsupported specifier, contains glob metacharacters, or lacks a field
    /// the unit needs.
    pub fn parse(unit: TimeUnit, template: &str) -> Result<Self> {
        let segments = tokenize(template)?;

        for field in Field::required_for(unit) {
            if !segments.contains(&Segment::Field(*field)) {
                return Err(QueueError::config(format!(
                    "{} bucket format {:?} is missing {}",
                    unit,
                    template,
                    field.specifier()
                )));
            }
        }

        Ok(Self {
            unit,
            template: template.to_string(),
            segments,
        })
    }

    /// The built-in format for `unit`.
    pub fn default_for(unit: TimeUnit) -> Self {
        use Field::*;
        let dash = || Segment::Literal("-".to_string());
        let under = || Segment::Literal("_".to_string());

        let (template, segments) = match unit {
            TimeUnit::Days => (
                DEFAULT_DAYS_FORMAT,
                vec![Segment::Field(Year), dash(), Segment::Field(Month), dash(), Segment::Field(Day)],
            ),
            TimeUnit::Hours => (
                DEFAULT_HOURS_FORMAT,
                vec![
                    Segment::Field(Year),
                    dash(),
                    Segment::Field(Month),
                    dash(),
                    Segment::Field(Day),
                    under(),
                    Segment::Field(Hour),
                ],
            ),
            TimeUnit::Minutes => (
                DEFAULT_MINUTES_FORMAT,
                vec![
                    Segment::Field(Year),
                    dash(),
                    Segment::Field(Month),
                    dash(),
                    Segment::Field(Day),
                    under(),
                    Segment::Field(Hour),
                    dash(),
                    Segment::Field(Minute),
                ],
            ),
        };

        Self {
            unit,
            template: template.to_string(),
            segments,
        }
    }

    /// The unit this format was validated for.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// The original template text.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Renders the bucket timestamp for `at`.
    pub fn render(&self, at: &NaiveDateTime) -> String {
        at.format_with_items(self.segments.iter().map(Segment::item))
            .to_string()
    }

    /// Glob pattern matching every timestamp this format can render.
    ///
    /// Each field becomes `*`; literal separators are kept.
    pub fn pattern(&self) -> String {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(_) => out.push('*'),
            }
        }
        out
    }
}

/// Splits `template` with chrono's strftime reader, keeping only literals and
/// the zero-padded fields in the table above.
fn tokenize(template: &str) -> Result<Vec<Segment>> {
    if let Some(c) = template.chars().find(|c| GLOB_META.contains(c)) {
        return Err(QueueError::config(format!(
            "bucket format {:?} contains pattern character {:?}",
            template, c
        )));
    }

    let mut segments: Vec<Segment> = Vec::new();
    for item in StrftimeItems::new(template) {
        let segment = match item {
            Item::Literal(text) | Item::Space(text) => Segment::Literal(text.to_string()),
            Item::Numeric(ref numeric, Pad::Zero) => match Field::from_numeric(numeric) {
                Some(field) => Segment::Field(field),
                None => return Err(unsupported(template, &item)),
            },
            Item::Error => {
                return Err(QueueError::config(format!(
                    "bucket format {:?} is not a valid strftime template",
                    template
                )))
            }
            other => return Err(unsupported(template, &other)),
        };

        // Adjacent literals collapse so equal templates compare equal
        if let Segment::Literal(text) = &segment {
            if let Some(Segment::Literal(previous)) = segments.last_mut() {
                previous.push_str(text);
                continue;
            }
        }
        segments.push(segment);
    }
    Ok(segments)
}

fn unsupported(template: &str, item: &Item<'_>) -> QueueError {
    QueueError::config(format!(
        "bucket format {:?} uses unsupported item {:?}",
        template, item
    ))
}

/// One validated format per time unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketFormats {
    minutes: BucketFormat,
    hours: BucketFormat,
    days: BucketFormat,
}

impl Default for BucketFormats {
    fn default() -> Self {
        Self {
            minutes: BucketFormat::default_for(TimeUnit::Minutes),
            hours: BucketFormat::default_for(TimeUnit::Hours),
            days: BucketFormat::default_for(TimeUnit::Days),
        }
    }
}

impl BucketFormats {
    /// Builds the per-unit formats, falling back to the defaults for any
    /// slot left as `None`.
    pub fn new(minutes: Option<&str>, hours: Option<&str>, days: Option<&str>) -> Result<Self> {
        let slot = |unit: TimeUnit, custom: Option<&str>| match custom {
            Some(template) => BucketFormat::parse(unit, template),
            None => Ok(BucketFormat::default_for(unit)),
        };

        Ok(Self {
            minutes: slot(TimeUnit::Minutes, minutes)?,
            hours: slot(TimeUnit::Hours, hours)?,
            days: slot(TimeUnit::Days, days)?,
        })
    }

    pub fn get(&self, unit: TimeUnit) -> &BucketFormat {
        match unit {
            TimeUnit::Minutes => &self.minutes,
            TimeUnit::Hours => &self.hours,
            TimeUnit::Days => &self.days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_defaults_match_their_templates() {
        for unit in [TimeUnit::Minutes, TimeUnit::Hours, TimeUnit::Days] {
            let builtin = BucketFormat::default_for(unit);
            let parsed = BucketFormat::parse(unit, builtin.template()).unwrap();
            assert_eq!(builtin, parsed);
        }
    }

    #[test]
    fn test_render_defaults() {
        let t = at(2026, 3, 7, 9, 5);
        let formats = BucketFormats::default();
        assert_eq!(formats.get(TimeUnit::Days).render(&t), "2026-03-07");
        assert_eq!(formats.get(TimeUnit::Hours).render(&t), "2026-03-07_09");
        assert_eq!(formats.get(TimeUnit::Minutes).render(&t), "2026-03-07_09-05");
    }

    #[test]
    fn test_pattern_keeps_separators() {
        let formats = BucketFormats::default();
        assert_eq!(formats.get(TimeUnit::Hours).pattern(), "*-*-*_*");
        assert_eq!(formats.get(TimeUnit::Minutes).pattern(), "*-*-*_*-*");

        let custom = BucketFormat::parse(TimeUnit::Days, "%Y/%m/%d").unwrap();
        assert_eq!(custom.pattern(), "*/*/*");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = BucketFormat::parse(TimeUnit::Hours, "%Y-%m-%d").unwrap_err();
        assert!(matches!(err, QueueError::Configuration(ref m) if m.contains("%H")));

        let err = BucketFormat::parse(TimeUnit::Minutes, "%Y%m%d%H").unwrap_err();
        assert!(matches!(err, QueueError::Configuration(ref m) if m.contains("%M")));

        assert!(BucketFormat::parse(TimeUnit::Days, "%Y-%m").is_err());
        assert!(BucketFormat::parse(TimeUnit::Days, "").is_err());
    }

    #[test]
    fn test_unsupported_specifiers_rejected() {
        assert!(BucketFormat::parse(TimeUnit::Days, "%Y-%m-%d %a").is_err());
        assert!(BucketFormat::parse(TimeUnit::Days, "%Y-%m-%d%").is_err());
        assert!(BucketFormat::parse(TimeUnit::Days, "%Y-%m-%e").is_err());
    }

    #[test]
    fn test_glob_characters_rejected() {
        assert!(BucketFormat::parse(TimeUnit::Days, "%Y*%m-%d").is_err());
        assert!(BucketFormat::parse(TimeUnit::Days, "[%Y]%m%d").is_err());
    }

    #[test]
    fn test_escaped_percent() {
        let f = BucketFormat::parse(TimeUnit::Days, "%Y%%%m%%%d").unwrap();
        assert_eq!(f.render(&at(2026, 1, 2, 0, 0)), "2026%01%02");
        assert_eq!(f.pattern(), "*%*%*");
    }

    #[test]
    fn test_composite_specifier_expands() {
        let f = BucketFormat::parse(TimeUnit::Days, "%F").unwrap();
        assert_eq!(f.render(&at(2026, 1, 2, 0, 0)), "2026-01-02");
        assert_eq!(f.pattern(), "*-*-*");
    }

    #[test]
    fn test_space_padded_fields_rejected() {
        let err = BucketFormat::parse(TimeUnit::Hours, "%Y-%m-%d_%k").unwrap_err();
        assert!(matches!(err, QueueError::Configuration(ref m) if m.contains("unsupported")));
    }

    #[test]
    fn test_each_unit_has_its_own_slot() {
        let formats = BucketFormats::new(None, None, Some("%Y.%m.%d")).unwrap();
        assert_eq!(formats.get(TimeUnit::Days).template(), "%Y.%m.%d");
        assert_eq!(formats.get(TimeUnit::Hours).template(), DEFAULT_HOURS_FORMAT);
    }

    #[test]
    fn test_rendered_order_is_chronological() {
        let f = BucketFormat::default_for(TimeUnit::Minutes);
        let mut stamps = vec![
            f.render(&at(2026, 12, 31, 23, 59)),
            f.render(&at(2026, 1, 1, 0, 0)),
            f.render(&at(2026, 1, 1, 10, 5)),
            f.render(&at(2026, 1, 1, 9, 59)),
        ];
        stamps.sort();
        assert_eq!(
            stamps,
            vec![
                "2026-01-01_00-00",
                "2026-01-01_09-59",
                "2026-01-01_10-05",
                "2026-12-31_23-59",
            ]
        );
    }
}
