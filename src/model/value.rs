use crate::error::{CubeError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AxisType {
    Discrete,
    Range,
    Set,
    Nearest,
    Rule,
}

impl AxisType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DISCRETE" => Ok(AxisType::Discrete),
            "RANGE" => Ok(AxisType::Range),
            "SET" => Ok(AxisType::Set),
            "NEAREST" => Ok(AxisType::Nearest),
            "RULE" => Ok(AxisType::Rule),
            other => Err(CubeError::illegal_argument(format!(
                "'{}' is not an axis type",
                other
            ))),
        }
    }
}

impl fmt::Display for AxisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AxisType::Discrete => "DISCRETE",
            AxisType::Range => "RANGE",
            AxisType::Set => "SET",
            AxisType::Nearest => "NEAREST",
            AxisType::Rule => "RULE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AxisValueType {
    String,
    Long,
    BigDecimal,
    Double,
    Date,
    Expression,
    Comparable,
}

impl AxisValueType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRING" => Ok(AxisValueType::String),
            "LONG" => Ok(AxisValueType::Long),
            "BIG_DECIMAL" => Ok(AxisValueType::BigDecimal),
            "DOUBLE" => Ok(AxisValueType::Double),
            "DATE" => Ok(AxisValueType::Date),
            "EXPRESSION" => Ok(AxisValueType::Expression),
            "COMPARABLE" => Ok(AxisValueType::Comparable),
            other => Err(CubeError::illegal_argument(format!(
                "'{}' is not an axis value type",
                other
            ))),
        }
    }
}

impl fmt::Display for AxisValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AxisValueType::String => "STRING",
            AxisValueType::Long => "LONG",
            AxisValueType::BigDecimal => "BIG_DECIMAL",
            AxisValueType::Double => "DOUBLE",
            AxisValueType::Date => "DATE",
            AxisValueType::Expression => "EXPRESSION",
            AxisValueType::Comparable => "COMPARABLE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnOrder {
    Sorted,
    Display,
}

/// A single comparable value. Axes store uniform scalar kinds, so cross-kind
/// comparisons only arise transiently during coercion; numerics coerce to a
/// common width, everything else orders by kind.
#[derive(Debug, Clone)]
pub enum Scalar {
    Long(i64),
    Double(f64),
    Decimal(Decimal),
    Str(String),
    Date(DateTime<Utc>),
}

impl Scalar {
    fn kind_rank(&self) -> u8 {
        match self {
            Scalar::Long(_) | Scalar::Double(_) | Scalar::Decimal(_) => 0,
            Scalar::Str(_) => 1,
            Scalar::Date(_) => 2,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Long(v) => Some(*v as f64),
            Scalar::Double(v) => Some(*v),
            Scalar::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Key used by discrete indexes; strings fold case.
    pub fn index_key(&self) -> String {
        match self {
            Scalar::Str(s) => s.to_lowercase(),
            other => other.to_canonical_string(),
        }
    }

    pub fn to_canonical_string(&self) -> String {
        match self {
            Scalar::Long(v) => v.to_string(),
            Scalar::Double(v) => v.to_string(),
            Scalar::Decimal(d) => d.normalize().to_string(),
            Scalar::Str(s) => s.clone(),
            Scalar::Date(d) => d.to_rfc3339(),
        }
    }

    /// Distance metric for nearest-neighbor axes: absolute difference, with
    /// dates measured in milliseconds.
    pub fn distance_to(&self, other: &Scalar) -> Option<f64> {
        match (self, other) {
            (Scalar::Date(a), Scalar::Date(b)) => {
                Some((*a - *b).num_milliseconds().abs() as f64)
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Some((x - y).abs()),
                _ => None,
            },
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Scalar::Long(a), Scalar::Long(b)) => a.cmp(b),
            (Scalar::Decimal(a), Scalar::Decimal(b)) => a.cmp(b),
            (Scalar::Str(a), Scalar::Str(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (Scalar::Date(a), Scalar::Date(b)) => a.cmp(b),
            (a, b) if a.kind_rank() == 0 && b.kind_rank() == 0 => {
                // Mixed numerics; NaN is rejected at parse time.
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

/// Half-open interval `[low, high)` with `low < high` strictly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub low: Scalar,
    pub high: Scalar,
}

impl Range {
    pub fn new(low: Scalar, high: Scalar) -> Result<Self> {
        if low >= high {
            return Err(CubeError::illegal_argument(format!(
                "range low '{}' must be strictly below high '{}'",
                low, high
            )));
        }
        Ok(Range { low, high })
    }

    pub fn contains(&self, v: &Scalar) -> bool {
        self.low <= *v && *v < self.high
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        self.low < other.high && other.low < self.high
    }

    pub fn to_canonical_string(&self) -> String {
        format!("[{}, {})", self.low, self.high)
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Range {
    fn cmp(&self, other: &Self) -> Ordering {
        self.low
            .cmp(&other.low)
            .then_with(|| self.high.cmp(&other.high))
    }
}

/// One member of a SET column: either a discrete point or a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetElement {
    Value(Scalar),
    Range(Range),
}

impl SetElement {
    pub fn to_canonical_string(&self) -> String {
        match self {
            SetElement::Value(s) => s.to_canonical_string(),
            SetElement::Range(r) => r.to_canonical_string(),
        }
    }
}

/// Ordered collection of ranges and discrete values backing a SET column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeSet {
    pub elements: Vec<SetElement>,
}

impl RangeSet {
    pub fn new(elements: Vec<SetElement>) -> Result<Self> {
        if elements.is_empty() {
            return Err(CubeError::illegal_argument("set requires at least one element"));
        }
        Ok(RangeSet { elements })
    }

    pub fn contains(&self, v: &Scalar) -> bool {
        self.elements.iter().any(|e| match e {
            SetElement::Value(s) => s == v,
            SetElement::Range(r) => r.contains(v),
        })
    }

    pub fn overlaps(&self, other: &RangeSet) -> bool {
        self.elements.iter().any(|a| {
            other.elements.iter().any(|b| match (a, b) {
                (SetElement::Value(x), SetElement::Value(y)) => x == y,
                (SetElement::Value(x), SetElement::Range(r))
                | (SetElement::Range(r), SetElement::Value(x)) => r.contains(x),
                (SetElement::Range(x), SetElement::Range(y)) => x.overlaps(y),
            })
        })
    }

    pub fn to_canonical_string(&self) -> String {
        let parts: Vec<String> = self.elements.iter().map(|e| e.to_canonical_string()).collect();
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn distance_to(&self, other: &LatLon) -> f64 {
        let (dx, dy) = (self.lat - other.lat, self.lon - other.lon);
        (dx * dx + dy * dy).sqrt()
    }

    pub fn to_canonical_string(&self) -> String {
        format!("{}, {}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn distance_to(&self, other: &Point3D) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn to_canonical_string(&self) -> String {
        format!("{}, {}, {}", self.x, self.y, self.z)
    }
}

/// A command cell or rule condition: inline source, or a URL to fetch,
/// with an optional cache flag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Expression {
    pub cmd: Option<String>,
    pub url: Option<String>,
    pub cacheable: bool,
}

impl Expression {
    pub fn from_source(cmd: impl Into<String>) -> Self {
        Expression {
            cmd: Some(cmd.into()),
            url: None,
            cacheable: false,
        }
    }

    /// Parse `url|` / `cache|` options (any order) followed by the payload.
    pub fn parse(text: &str) -> Self {
        let mut cacheable = false;
        let mut is_url = false;
        let mut rest = text;
        loop {
            if let Some(r) = rest.strip_prefix("url|") {
                is_url = true;
                rest = r;
            } else if let Some(r) = rest.strip_prefix("cache|") {
                cacheable = true;
                rest = r;
            } else {
                break;
            }
        }
        if is_url {
            Expression {
                cmd: None,
                url: Some(rest.to_string()),
                cacheable,
            }
        } else {
            Expression {
                cmd: Some(rest.to_string()),
                url: None,
                cacheable,
            }
        }
    }

    pub fn to_canonical_string(&self) -> String {
        let mut s = String::new();
        if self.url.is_some() {
            s.push_str("url|");
        }
        if self.cacheable {
            s.push_str("cache|");
        }
        s.push_str(self.url.as_deref().or(self.cmd.as_deref()).unwrap_or(""));
        s
    }
}

/// The value bound to a column. `None` at the column level marks the default
/// column; every present value is one of these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Scalar(Scalar),
    Range(Range),
    Set(RangeSet),
    LatLon(LatLon),
    Point3(Point3D),
    Rule(Expression),
}

impl ColumnValue {
    pub fn to_canonical_string(&self) -> String {
        match self {
            ColumnValue::Scalar(s) => s.to_canonical_string(),
            ColumnValue::Range(r) => r.to_canonical_string(),
            ColumnValue::Set(s) => s.to_canonical_string(),
            ColumnValue::LatLon(p) => p.to_canonical_string(),
            ColumnValue::Point3(p) => p.to_canonical_string(),
            ColumnValue::Rule(e) => e.to_canonical_string(),
        }
    }
}

pub fn parse_scalar(value_type: AxisValueType, token: &str, axis: &str) -> Result<Scalar> {
    let token = token.trim();
    let bad = |what: &str| {
        CubeError::illegal_argument(format!(
            "unable to parse '{}' as {} on axis '{}'",
            token, what, axis
        ))
    };
    match value_type {
        AxisValueType::String => Ok(Scalar::Str(token.to_string())),
        AxisValueType::Long => token
            .parse::<i64>()
            .map(Scalar::Long)
            .map_err(|_| bad("LONG")),
        AxisValueType::Double => {
            let v = token.parse::<f64>().map_err(|_| bad("DOUBLE"))?;
            if v.is_nan() || v.is_infinite() {
                return Err(bad("DOUBLE"));
            }
            Ok(Scalar::Double(v))
        }
        AxisValueType::BigDecimal => Decimal::from_str(token)
            .map(Scalar::Decimal)
            .map_err(|_| bad("BIG_DECIMAL")),
        AxisValueType::Date => parse_date(token).ok_or_else(|| bad("DATE")).map(Scalar::Date),
        AxisValueType::Comparable | AxisValueType::Expression => Err(CubeError::illegal_argument(
            format!(
                "'{}' on axis '{}' requires a structured form, not a bare scalar token",
                token, axis
            ),
        )),
    }
}

/// Accepts the common textual date forms: `YYYY/MM/DD`, `MM/DD/YYYY`,
/// `Mon DD YYYY [HH:MM:SS]`, ISO-8601.
pub fn parse_date(token: &str) -> Option<DateTime<Utc>> {
    let token = token.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%b %d %Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(token, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    for fmt in ["%Y/%m/%d", "%m/%d/%Y", "%b %d %Y", "%Y-%m-%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(token, fmt) {
            return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
        }
    }
    None
}

/// Parse the textual form of a column value for the given axis/value type
/// pairing. The `axis` name is only used in error messages.
pub fn parse_column_value(
    axis_type: AxisType,
    value_type: AxisValueType,
    text: &str,
    axis: &str,
) -> Result<ColumnValue> {
    match axis_type {
        AxisType::Discrete => match value_type {
            AxisValueType::Comparable => parse_comparable_json(text, axis),
            _ => parse_scalar(value_type, text, axis).map(ColumnValue::Scalar),
        },
        AxisType::Range => parse_range(value_type, text, axis).map(ColumnValue::Range),
        AxisType::Set => parse_set(value_type, text, axis).map(ColumnValue::Set),
        AxisType::Nearest => match value_type {
            AxisValueType::Comparable => parse_point(text, axis),
            _ => parse_scalar(value_type, text, axis).map(ColumnValue::Scalar),
        },
        AxisType::Rule => Ok(ColumnValue::Rule(Expression::parse(text))),
    }
}

/// `"low, high"` or `"[low, high]"`.
pub fn parse_range(value_type: AxisValueType, text: &str, axis: &str) -> Result<Range> {
    let inner = strip_brackets(text.trim());
    let parts = split_top_level(inner, axis)?;
    if parts.len() != 2 {
        return Err(CubeError::illegal_argument(format!(
            "range '{}' on axis '{}' must have exactly two bounds",
            text, axis
        )));
    }
    let low = parse_scalar(value_type, &unquote(&parts[0]), axis)?;
    let high = parse_scalar(value_type, &unquote(&parts[1]), axis)?;
    Range::new(low, high).map_err(|_| {
        CubeError::illegal_argument(format!(
            "range '{}' on axis '{}' requires low strictly below high",
            text, axis
        ))
    })
}

/// Comma-separated mix of discrete tokens and bracketed `[low, high]` ranges.
pub fn parse_set(value_type: AxisValueType, text: &str, axis: &str) -> Result<RangeSet> {
    let mut elements = Vec::new();
    for token in split_set_tokens(text.trim(), axis)? {
        match token {
            SetToken::Range(inner) => {
                elements.push(SetElement::Range(parse_range(value_type, &inner, axis)?));
            }
            SetToken::Value(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                    return Err(CubeError::illegal_argument(format!(
                        "null element in set on axis '{}'",
                        axis
                    )));
                }
                elements.push(SetElement::Value(parse_scalar(
                    value_type,
                    &unquote(trimmed),
                    axis,
                )?));
            }
        }
    }
    RangeSet::new(elements)
}

/// `"x, y"` → LatLon; `"x, y, z"` → Point3D.
pub fn parse_point(text: &str, axis: &str) -> Result<ColumnValue> {
    let parts = split_top_level(text.trim(), axis)?;
    let nums: Result<Vec<f64>> = parts
        .iter()
        .map(|p| {
            p.trim().parse::<f64>().map_err(|_| {
                CubeError::illegal_argument(format!(
                    "unable to parse '{}' as a coordinate on axis '{}'",
                    p, axis
                ))
            })
        })
        .collect();
    let nums = nums?;
    match nums.as_slice() {
        [x, y] => Ok(ColumnValue::LatLon(LatLon { lat: *x, lon: *y })),
        [x, y, z] => Ok(ColumnValue::Point3(Point3D {
            x: *x,
            y: *y,
            z: *z,
        })),
        _ => Err(CubeError::illegal_argument(format!(
            "'{}' on axis '{}' must have two or three coordinates",
            text, axis
        ))),
    }
}

/// JSON object form for COMPARABLE discrete values:
/// `{"type": "...", "value": "..."}`.
fn parse_comparable_json(text: &str, axis: &str) -> Result<ColumnValue> {
    let parsed: serde_json::Value = serde_json::from_str(text).map_err(|_| {
        CubeError::illegal_argument(format!(
            "comparable value '{}' on axis '{}' must be a JSON object",
            text, axis
        ))
    })?;
    let obj = parsed.as_object().ok_or_else(|| {
        CubeError::illegal_argument(format!(
            "comparable value '{}' on axis '{}' must be a JSON object",
            text, axis
        ))
    })?;
    let ty = obj.get("type").and_then(|v| v.as_str()).unwrap_or("string");
    let value = obj
        .get("value")
        .ok_or_else(|| {
            CubeError::illegal_argument(format!(
                "comparable value on axis '{}' is missing 'value'",
                axis
            ))
        })?
        .clone();
    let as_text = match &value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match ty.to_ascii_lowercase().as_str() {
        "latlon" | "point2d" => parse_point(&as_text, axis),
        "point3d" => parse_point(&as_text, axis),
        "long" => parse_scalar(AxisValueType::Long, &as_text, axis).map(ColumnValue::Scalar),
        "double" => parse_scalar(AxisValueType::Double, &as_text, axis).map(ColumnValue::Scalar),
        "big_decimal" | "bigdecimal" => {
            parse_scalar(AxisValueType::BigDecimal, &as_text, axis).map(ColumnValue::Scalar)
        }
        "date" => parse_scalar(AxisValueType::Date, &as_text, axis).map(ColumnValue::Scalar),
        "string" => Ok(ColumnValue::Scalar(Scalar::Str(as_text))),
        other => Err(CubeError::illegal_argument(format!(
            "unknown comparable type '{}' on axis '{}'",
            other, axis
        ))),
    }
}

/// Coerce a JSON lookup value into a scalar of the axis's value type.
pub fn promote_json(value_type: AxisValueType, v: &serde_json::Value, axis: &str) -> Result<Scalar> {
    match v {
        serde_json::Value::String(s) => match value_type {
            // COMPARABLE axes take dates and plain strings as they come.
            AxisValueType::Comparable => Ok(parse_date(s)
                .map(Scalar::Date)
                .unwrap_or_else(|| Scalar::Str(s.clone()))),
            _ => parse_scalar(value_type, s, axis),
        },
        serde_json::Value::Number(n) => match value_type {
            AxisValueType::Long => n
                .as_i64()
                .map(Scalar::Long)
                .ok_or_else(|| whole_number_error(n, axis)),
            AxisValueType::Double | AxisValueType::Comparable => n
                .as_f64()
                .map(Scalar::Double)
                .ok_or_else(|| whole_number_error(n, axis)),
            AxisValueType::BigDecimal => Decimal::from_str(&n.to_string())
                .map(Scalar::Decimal)
                .map_err(|_| whole_number_error(n, axis)),
            _ => Err(CubeError::illegal_argument(format!(
                "numeric value '{}' cannot bind to a {} axis '{}'",
                n, value_type, axis
            ))),
        },
        other => Err(CubeError::illegal_argument(format!(
            "value '{}' cannot bind to axis '{}'",
            other, axis
        ))),
    }
}

fn whole_number_error(n: &serde_json::Number, axis: &str) -> CubeError {
    CubeError::illegal_argument(format!(
        "unable to convert number '{}' for axis '{}'",
        n, axis
    ))
}

fn strip_brackets(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('[') && s.ends_with(']')) || (s.starts_with('[') && s.ends_with(')')) {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"")
    } else {
        s.to_string()
    }
}

/// Split on top-level commas, honoring double quotes with `\"` escapes.
fn split_top_level(s: &str, axis: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(&next) = chars.peek() {
                    cur.push(c);
                    cur.push(next);
                    chars.next();
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            ',' if !in_quotes => {
                parts.push(cur.trim().to_string());
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if in_quotes {
        return Err(CubeError::illegal_argument(format!(
            "unterminated quote in '{}' on axis '{}'",
            s, axis
        )));
    }
    parts.push(cur.trim().to_string());
    Ok(parts)
}

enum SetToken {
    Value(String),
    Range(String),
}

/// Tokenize a SET literal into discrete tokens and bracketed range groups.
fn split_set_tokens(s: &str, axis: &str) -> Result<Vec<SetToken>> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut bracket_depth = 0usize;
    let mut just_closed_range = false;
    let mut chars = s.chars().peekable();

    let mut flush = |cur: &mut String, tokens: &mut Vec<SetToken>| {
        let t = cur.trim().to_string();
        if !t.is_empty() {
            tokens.push(SetToken::Value(t));
        }
        cur.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(&next) = chars.peek() {
                    cur.push(c);
                    cur.push(next);
                    chars.next();
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            '[' if !in_quotes => {
                if bracket_depth > 0 {
                    return Err(CubeError::illegal_argument(format!(
                        "nested brackets in set '{}' on axis '{}'",
                        s, axis
                    )));
                }
                flush(&mut cur, &mut tokens);
                bracket_depth = 1;
            }
            ']' if !in_quotes => {
                if bracket_depth == 0 {
                    return Err(CubeError::illegal_argument(format!(
                        "unbalanced brackets in set '{}' on axis '{}'",
                        s, axis
                    )));
                }
                bracket_depth = 0;
                just_closed_range = true;
                tokens.push(SetToken::Range(cur.trim().to_string()));
                cur.clear();
            }
            ',' if !in_quotes && bracket_depth == 0 => {
                let t = cur.trim().to_string();
                if !t.is_empty() {
                    tokens.push(SetToken::Value(t));
                } else if !just_closed_range {
                    return Err(CubeError::illegal_argument(format!(
                        "null element in set on axis '{}'",
                        axis
                    )));
                }
                just_closed_range = false;
                cur.clear();
            }
            _ => {
                if !c.is_whitespace() {
                    just_closed_range = false;
                }
                cur.push(c);
            }
        }
    }
    if in_quotes || bracket_depth > 0 {
        return Err(CubeError::illegal_argument(format!(
            "unbalanced set literal '{}' on axis '{}'",
            s, axis
        )));
    }
    flush(&mut cur, &mut tokens);
    if tokens.is_empty() {
        return Err(CubeError::illegal_argument(format!(
            "empty set on axis '{}'",
            axis
        )));
    }
    Ok(tokens)
}
