//! Turning symbolic filters into concrete values.
//!
//! All filters known for one column (or one equivalence class) are folded
//! into a [`Domain`]: explicit points from `=`/`IN`, ranges from
//! `BETWEEN`/comparisons, excluded points from `<>` and `LIKE` patterns.

use chrono::{Duration, NaiveDate};
use sqlsynth_schema::{fit_decimal, CanonicalType, CmpOp, FilterValue, Literal};

use crate::value::{format_date, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bound {
    key: f64,
    inclusive: bool,
}

/// One interval over the ordering key of a type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Range {
    low: Option<Bound>,
    high: Option<Bound>,
    /// Textual bounds for string-typed columns.
    text_low: Option<String>,
    text_high: Option<String>,
}

impl Range {
    fn intersect(&self, other: &Range) -> Range {
        let pick = |a: Option<Bound>, b: Option<Bound>, higher: bool| match (a, b) {
            (Some(x), Some(y)) => {
                let x_wins = if higher { x.key > y.key } else { x.key < y.key };
                if x.key == y.key {
                    Some(Bound {
                        key: x.key,
                        inclusive: x.inclusive && y.inclusive,
                    })
                } else if x_wins {
                    Some(x)
                } else {
                    Some(y)
                }
            }
            (x, None) => x,
            (None, y) => y,
        };
        Range {
            low: pick(self.low, other.low, true),
            high: pick(self.high, other.high, false),
            text_low: self.text_low.clone().or_else(|| other.text_low.clone()),
            text_high: self.text_high.clone().or_else(|| other.text_high.clone()),
        }
    }

    fn is_empty(&self) -> bool {
        match (self.low, self.high) {
            (Some(l), Some(h)) => l.key > h.key || (l.key == h.key && !(l.inclusive && h.inclusive)),
            _ => false,
        }
    }

    fn contains(&self, key: f64) -> bool {
        let above = self
            .low
            .map_or(true, |l| key > l.key || (l.inclusive && key == l.key));
        let below = self
            .high
            .map_or(true, |h| key < h.key || (h.inclusive && key == h.key));
        above && below
    }
}

/// What a set of filters allows for one column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    pub points: Vec<Literal>,
    pub ranges: Vec<Range>,
    pub excluded: Vec<Literal>,
    pub likes: Vec<String>,
}

impl Domain {
    pub fn from_filters<'a>(filters: impl IntoIterator<Item = &'a FilterValue>, ty: CanonicalType) -> Self {
        let mut domain = Domain::default();
        for filter in filters {
            match filter {
                FilterValue::Eq { value } => push_unique(&mut domain.points, value),
                FilterValue::In { values } => {
                    for v in values {
                        push_unique(&mut domain.points, v);
                    }
                }
                FilterValue::Between { low, high } => domain.ranges.push(range_of(
                    Some((low, true)),
                    Some((high, true)),
                    ty,
                )),
                FilterValue::Cmp { op, value } => match op {
                    CmpOp::Gt => domain.ranges.push(range_of(Some((value, false)), None, ty)),
                    CmpOp::GtEq => domain.ranges.push(range_of(Some((value, true)), None, ty)),
                    CmpOp::Lt => domain.ranges.push(range_of(None, Some((value, false)), ty)),
                    CmpOp::LtEq => domain.ranges.push(range_of(None, Some((value, true)), ty)),
                    CmpOp::NotEq => push_unique(&mut domain.excluded, value),
                },
                FilterValue::Like { pattern } => {
                    if !domain.likes.contains(pattern) {
                        domain.likes.push(pattern.clone());
                    }
                }
            }
        }
        domain
    }

    pub fn is_unconstrained(&self) -> bool {
        self.points.is_empty() && self.ranges.is_empty() && self.likes.is_empty()
    }

    /// The intersection of every range, when it is non-empty.
    fn merged_range(&self) -> Option<Range> {
        let mut ranges = self.ranges.iter();
        let first = ranges.next()?.clone();
        let merged = ranges.fold(first, |acc, r| acc.intersect(r));
        (!merged.is_empty()).then_some(merged)
    }

    /// Generators that produce matching values: one per point, then either one
    /// merged range or one per range when they do not intersect, then one per
    /// LIKE pattern.
    fn slots(&self, ty: CanonicalType) -> Vec<Slot<'_>> {
        let merged = self.merged_range();
        let mut slots = Vec::new();
        for p in &self.points {
            let in_range = match (&merged, order_key(p, ty)) {
                (Some(r), Some(k)) => r.contains(k),
                _ => true,
            };
            if in_range && !self.excluded.contains(p) {
                slots.push(Slot::Point(p));
            }
        }
        if slots.is_empty() {
            slots.extend(self.points.iter().filter(|p| !self.excluded.contains(p)).map(Slot::Point));
        }
        if self.points.is_empty() {
            match merged {
                Some(r) => slots.push(Slot::Range(r)),
                None => slots.extend(self.ranges.iter().cloned().map(Slot::Range)),
            }
            slots.extend(self.likes.iter().map(|p| Slot::Like(p.as_str())));
        }
        slots
    }

    /// Number of distinct matching generators.
    pub fn slot_count(&self, ty: CanonicalType) -> usize {
        self.slots(ty).len()
    }

    /// A matching value from generator `slot`, varied by `offset` where the
    /// generator admits more than one value.
    pub fn matching_value(&self, ty: CanonicalType, slot: usize, offset: u64) -> Option<SqlValue> {
        let slots = self.slots(ty);
        if slots.is_empty() {
            return None;
        }
        let value = match &slots[slot % slots.len()] {
            Slot::Point(p) => SqlValue::from_literal(p, ty),
            Slot::Range(r) => range_value(r, ty, offset)?,
            Slot::Like(p) => like_value(p, offset),
        };
        Some(self.avoid_excluded(value, ty))
    }

    /// The first matching value; what an equivalence class resolves to.
    pub fn first_value(&self, ty: CanonicalType, offset: u64) -> Option<SqlValue> {
        self.matching_value(ty, 0, offset)
    }

    /// Points other than `current` that also satisfy the domain.
    pub fn alternatives(&self, ty: CanonicalType, current: &SqlValue) -> Vec<SqlValue> {
        self.slots(ty)
            .into_iter()
            .filter_map(|s| match s {
                Slot::Point(p) => Some(SqlValue::from_literal(p, ty)),
                _ => None,
            })
            .filter(|v| v != current)
            .collect()
    }

    /// Whether a stored `value` satisfies at least one matching generator.
    pub fn admits(&self, value: &SqlValue, ty: CanonicalType) -> bool {
        if value.is_null() || self.excludes(value, ty) {
            return false;
        }
        if self.is_unconstrained() {
            return true;
        }
        let key = if ty.is_temporal() {
            value
                .as_date()
                .map(|d| (i64::from(chrono::Datelike::num_days_from_ce(&d)) - EPOCH_DAYS_CE) as f64)
        } else if ty.is_numeric() {
            value.as_f64()
        } else {
            None
        };
        self.slots(ty).iter().any(|slot| match slot {
            Slot::Point(p) => &SqlValue::from_literal(p, ty) == value,
            Slot::Range(r) => key.is_some_and(|k| r.contains(k)),
            Slot::Like(p) => match value {
                SqlValue::Text(text) => like_matches(p, text),
                _ => false,
            },
        })
    }

    pub fn excludes(&self, value: &SqlValue, ty: CanonicalType) -> bool {
        self.excluded
            .iter()
            .any(|e| &SqlValue::from_literal(e, ty) == value)
    }

    fn avoid_excluded(&self, mut value: SqlValue, ty: CanonicalType) -> SqlValue {
        let mut step = 1;
        while self.excludes(&value, ty) && step <= self.excluded.len() as i64 + 1 {
            value = value.shifted(step);
            step += 1;
        }
        value
    }
}

enum Slot<'a> {
    Point(&'a Literal),
    Range(Range),
    Like(&'a str),
}

fn push_unique(into: &mut Vec<Literal>, value: &Literal) {
    if !into.contains(value) {
        into.push(value.clone());
    }
}

const EPOCH_DAYS_CE: i64 = 719_163;

/// Ordering key: numbers as-is, dates as days since 1970-01-01.
pub fn order_key(literal: &Literal, ty: CanonicalType) -> Option<f64> {
    if ty.is_temporal() {
        let date = literal.as_date()?;
        return Some((i64::from(chrono::Datelike::num_days_from_ce(&date)) - EPOCH_DAYS_CE) as f64);
    }
    if ty.is_numeric() {
        return literal.as_f64();
    }
    None
}

fn date_from_key(key: i64) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(i32::try_from(key + EPOCH_DAYS_CE).ok()?)
}

fn range_of(low: Option<(&Literal, bool)>, high: Option<(&Literal, bool)>, ty: CanonicalType) -> Range {
    let bound = |b: Option<(&Literal, bool)>| {
        b.and_then(|(l, inclusive)| order_key(l, ty).map(|key| Bound { key, inclusive }))
    };
    Range {
        low: bound(low),
        high: bound(high),
        text_low: low.map(|(l, _)| l.to_string()),
        text_high: high.map(|(l, _)| l.to_string()),
    }
}

fn step_of(ty: CanonicalType) -> f64 {
    match ty {
        CanonicalType::Decimal { scale, .. } => 10f64.powi(-i32::from(scale)),
        _ => 1.0,
    }
}

fn range_value(range: &Range, ty: CanonicalType, offset: u64) -> Option<SqlValue> {
    let Some(value) = numeric_range_value(range, ty, offset) else {
        return text_range_value(range, offset);
    };
    Some(match ty {
        CanonicalType::Integer | CanonicalType::BigInt => SqlValue::Integer(value as i64),
        CanonicalType::Decimal { precision, scale } => SqlValue::Real(fit_decimal(value, precision, scale)),
        CanonicalType::Date => SqlValue::Text(format_date(date_from_key(value as i64)?)),
        CanonicalType::Timestamp => SqlValue::Text(format!("{} 12:00:00", format_date(date_from_key(value as i64)?))),
        CanonicalType::Varchar { .. } => return text_range_value(range, offset),
    })
}

/// Pick inside `[low, high]` on the type's grid, cycling with `offset`.
fn numeric_range_value(range: &Range, ty: CanonicalType, offset: u64) -> Option<f64> {
    if !(ty.is_numeric() || ty.is_temporal()) || (range.low.is_none() && range.high.is_none()) {
        return None;
    }
    let step = step_of(ty);
    let snap_up = |b: Bound| {
        let v = (b.key / step).ceil() * step;
        if !b.inclusive && v <= b.key { v + step } else { v }
    };
    let snap_down = |b: Bound| {
        let v = (b.key / step).floor() * step;
        if !b.inclusive && v >= b.key { v - step } else { v }
    };
    let spread = (offset % 10) as f64;
    match (range.low.map(snap_up), range.high.map(snap_down)) {
        (Some(lo), Some(hi)) => {
            if hi < lo {
                return Some(lo);
            }
            let width = ((hi - lo) / step).floor();
            let stride = (width / 10.0).floor().max(1.0);
            let k = ((offset as f64) * stride) % (width + 1.0);
            Some(lo + k * step)
        }
        (Some(lo), None) => Some(lo + spread * step.max(1.0)),
        (None, Some(hi)) => Some(hi - spread * step.max(1.0)),
        (None, None) => None,
    }
}

fn text_range_value(range: &Range, offset: u64) -> Option<SqlValue> {
    match (&range.text_low, &range.text_high) {
        (Some(lo), _) => Some(SqlValue::Text(format!("{lo}~{offset}"))),
        (None, Some(_)) => Some(SqlValue::Text(format!(" {offset}"))),
        (None, None) => None,
    }
}

/// A string matching a LIKE pattern: `_` becomes `x`, `%` is dropped, and a
/// trailing `%` admits a distinguishing suffix.
pub fn like_value(pattern: &str, offset: u64) -> SqlValue {
    let mut text: String = pattern
        .chars()
        .filter(|c| *c != '%')
        .map(|c| if c == '_' { 'x' } else { c })
        .collect();
    if pattern.ends_with('%') && offset > 0 {
        text.push_str(&offset.to_string());
    }
    SqlValue::Text(text)
}

/// SQLite `LIKE` semantics: `%` spans any run, `_` one character, ASCII
/// letters compare case-insensitively.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut resume: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                resume = Some((p, t));
                p += 1;
            }
            Some(c) if *c == '_' || c.eq_ignore_ascii_case(&text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match resume {
                Some((rp, rt)) => {
                    p = rp + 1;
                    t = rt + 1;
                    resume = Some((rp, rt + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

/// Add `days` to an ISO date value, leaving other values untouched.
pub fn shift_days(value: &SqlValue, days: i64) -> SqlValue {
    match value.as_date() {
        Some(d) => d
            .checked_add_signed(Duration::days(days))
            .map(|d| SqlValue::Text(format_date(d)))
            .unwrap_or_else(|| value.clone()),
        None => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Literal {
        Literal::Number(s.into())
    }

    #[test]
    fn ranges_intersect_before_concretizing() {
        let filters = [
            FilterValue::Cmp { op: CmpOp::Gt, value: num("10") },
            FilterValue::Cmp { op: CmpOp::LtEq, value: num("12") },
        ];
        let d = Domain::from_filters(filters.iter(), CanonicalType::Integer);
        assert_eq!(d.slot_count(CanonicalType::Integer), 1);
        for offset in 0..20 {
            let Some(SqlValue::Integer(v)) = d.matching_value(CanonicalType::Integer, 0, offset) else {
                panic!("expected an integer");
            };
            assert!((11..=12).contains(&v), "{v}");
        }
    }

    #[test]
    fn disjoint_ranges_become_separate_slots() {
        let filters = [
            FilterValue::Cmp { op: CmpOp::Gt, value: num("100") },
            FilterValue::Between { low: num("1"), high: num("5") },
        ];
        let d = Domain::from_filters(filters.iter(), CanonicalType::Integer);
        assert_eq!(d.slot_count(CanonicalType::Integer), 2);
    }

    #[test]
    fn points_respect_ranges_and_exclusions() {
        let filters = [
            FilterValue::In { values: vec![num("1"), num("7"), num("9")] },
            FilterValue::Cmp { op: CmpOp::GtEq, value: num("5") },
            FilterValue::Cmp { op: CmpOp::NotEq, value: num("9") },
        ];
        let d = Domain::from_filters(filters.iter(), CanonicalType::Integer);
        assert_eq!(d.first_value(CanonicalType::Integer, 0), Some(SqlValue::Integer(7)));
        assert_eq!(d.slot_count(CanonicalType::Integer), 1);
    }

    #[test]
    fn dates_and_decimals_stay_inside_bounds() {
        let filters = [FilterValue::Between {
            low: Literal::String("2000-01-27".into()),
            high: Literal::String("2000-04-26".into()),
        }];
        let d = Domain::from_filters(filters.iter(), CanonicalType::Date);
        for offset in 0..15 {
            let v = d.matching_value(CanonicalType::Date, 0, offset);
            let date = v.and_then(|v| v.as_date()).unwrap_or_default();
            assert!(date >= NaiveDate::from_ymd_opt(2000, 1, 27).unwrap_or_default());
            assert!(date <= NaiveDate::from_ymd_opt(2000, 4, 26).unwrap_or_default());
        }

        let price = [FilterValue::Cmp { op: CmpOp::Gt, value: num("100") }];
        let d = Domain::from_filters(price.iter(), CanonicalType::DEFAULT_DECIMAL);
        let v = d
            .first_value(CanonicalType::DEFAULT_DECIMAL, 0)
            .and_then(|v| v.as_f64())
            .unwrap_or_default();
        assert!(v > 100.0);
    }

    #[test]
    fn admitted_values_follow_every_slot() {
        let ty = CanonicalType::Integer;
        let filters = [
            FilterValue::Eq { value: num("40") },
            FilterValue::Cmp { op: CmpOp::NotEq, value: num("41") },
        ];
        let d = Domain::from_filters(filters.iter(), ty);
        assert!(d.admits(&SqlValue::Integer(40), ty));
        assert!(!d.admits(&SqlValue::Integer(41), ty));
        assert!(!d.admits(&SqlValue::Integer(12), ty));

        let range = [FilterValue::Between { low: num("10"), high: num("20") }];
        let d = Domain::from_filters(range.iter(), ty);
        assert!(d.admits(&SqlValue::Integer(10), ty));
        assert!(!d.admits(&SqlValue::Integer(21), ty));

        let text = CanonicalType::Varchar { length: 100 };
        let like = [FilterValue::Like { pattern: "ab%".into() }];
        let d = Domain::from_filters(like.iter(), text);
        assert!(d.admits(&SqlValue::Text("ABC".into()), text));
        assert!(!d.admits(&SqlValue::Text("xab".into()), text));
    }

    #[test]
    fn like_matching_handles_wildcards() {
        assert!(like_matches("a%c", "abbbc"));
        assert!(like_matches("a_c", "abc"));
        assert!(like_matches("%", ""));
        assert!(!like_matches("a_c", "ac"));
        assert!(!like_matches("abc", "abcd"));
    }

    #[test]
    fn like_patterns_produce_matching_text() {
        assert_eq!(like_value("ab_c%", 0), SqlValue::Text("abxc".into()));
        assert_eq!(like_value("ab%", 3), SqlValue::Text("ab3".into()));
    }
}
