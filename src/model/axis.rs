use crate::error::{CubeError, Result};
use crate::model::app_id::ApplicationId;
use crate::model::column::{pack_column_id, Column, MetaMap};
use crate::model::value::{
    parse_point, promote_json, AxisType, AxisValueType, ColumnOrder, ColumnValue, LatLon, Point3D,
    Range, RangeSet, Scalar, SetElement,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Coordinate of an axis borrowed from another cube.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisRef {
    pub app: ApplicationId,
    pub cube: String,
    pub axis: String,
}

/// Transform cube applied to a reference axis's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRef {
    pub app: ApplicationId,
    pub cube: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpec {
    pub source: AxisRef,
    pub transform: Option<TransformRef>,
}

/// Acceleration structures per axis type. Building them doubles as overlap
/// validation: an insertion that collides is the overlap error.
#[derive(Debug, Clone, Default)]
struct AxisIndexes {
    /// DISCRETE scalar keys and RULE names → column id.
    discrete: HashMap<String, i64>,
    /// SET discrete members, ordered for range-cover queries.
    set_points: BTreeMap<Scalar, i64>,
    /// RANGE columns and SET range members, keyed by low bound.
    ranges: BTreeMap<Scalar, (Scalar, i64)>,
}

impl AxisIndexes {
    fn build(axis_type: AxisType, columns: &[Column], axis_name: &str) -> Result<AxisIndexes> {
        let mut idx = AxisIndexes::default();
        for col in columns {
            let value = match &col.value {
                None => continue,
                Some(v) => v,
            };
            match (axis_type, value) {
                (AxisType::Discrete, ColumnValue::Scalar(s)) => {
                    idx.insert_discrete(s.index_key(), col.id, axis_name, || s.to_canonical_string())?;
                }
                (AxisType::Rule, ColumnValue::Rule(_)) => {
                    if let Some(name) = col.column_name() {
                        idx.insert_discrete(name.to_lowercase(), col.id, axis_name, || {
                            name.to_string()
                        })?;
                    }
                }
                (AxisType::Range, ColumnValue::Range(r)) => {
                    idx.insert_range(r, col.id, axis_name)?;
                }
                (AxisType::Set, ColumnValue::Set(set)) => {
                    for elem in &set.elements {
                        match elem {
                            SetElement::Value(s) => idx.insert_point(s, col.id, axis_name)?,
                            SetElement::Range(r) => idx.insert_range(r, col.id, axis_name)?,
                        }
                    }
                }
                // Nearest columns are scanned linearly; no index.
                (AxisType::Nearest, _) => {}
                (t, v) => {
                    return Err(CubeError::illegal_argument(format!(
                        "value '{}' is not valid on {} axis '{}'",
                        v.to_canonical_string(),
                        t,
                        axis_name
                    )))
                }
            }
        }
        Ok(idx)
    }

    fn insert_discrete<F: Fn() -> String>(
        &mut self,
        key: String,
        id: i64,
        axis: &str,
        display: F,
    ) -> Result<()> {
        if self.discrete.insert(key, id).is_some() {
            return Err(CubeError::axis_overlap(format!(
                "value '{}' already exists on axis '{}'",
                display(),
                axis
            )));
        }
        Ok(())
    }

    fn insert_point(&mut self, s: &Scalar, id: i64, axis: &str) -> Result<()> {
        if self.set_points.contains_key(s) || self.covering_range(s).is_some() {
            return Err(CubeError::axis_overlap(format!(
                "set member '{}' overlaps another column on axis '{}'",
                s, axis
            )));
        }
        self.set_points.insert(s.clone(), id);
        Ok(())
    }

    fn insert_range(&mut self, r: &Range, id: i64, axis: &str) -> Result<()> {
        // Committed entries never overlap each other, so the nearest
        // predecessor by low bound is the only overlap candidate.
        let conflict = self
            .ranges
            .range(..r.high.clone())
            .next_back()
            .map(|(low, (high, _))| Range {
                low: low.clone(),
                high: high.clone(),
            })
            .map(|existing| existing.overlaps(r))
            .unwrap_or(false);
        let point_inside = self
            .set_points
            .range(r.low.clone()..r.high.clone())
            .next()
            .is_some();
        if conflict || point_inside {
            return Err(CubeError::axis_overlap(format!(
                "range '{}' overlaps another column on axis '{}'",
                r.to_canonical_string(),
                axis
            )));
        }
        self.ranges.insert(r.low.clone(), (r.high.clone(), id));
        Ok(())
    }

    fn covering_range(&self, v: &Scalar) -> Option<i64> {
        self.ranges
            .range(..=v.clone())
            .next_back()
            .and_then(|(_, (high, id))| if v < high { Some(*id) } else { None })
    }

    fn find_scalar(&self, v: &Scalar) -> Option<i64> {
        if let Some(id) = self.set_points.get(v) {
            return Some(*id);
        }
        self.covering_range(v)
    }
}

/// A named dimension with ordered columns. Mutations validate against a
/// candidate column list first and commit atomically.
#[derive(Debug, Clone)]
pub struct Axis {
    id: u16,
    name: String,
    axis_type: AxisType,
    value_type: AxisValueType,
    order: ColumnOrder,
    /// Non-default columns in current order; the default column sits apart.
    columns: Vec<Column>,
    default_column: Option<Column>,
    next_seq: i64,
    pub meta: MetaMap,
    pub reference: Option<ReferenceSpec>,
    indexes: AxisIndexes,
}

impl Axis {
    pub fn new(
        id: u16,
        name: impl Into<String>,
        axis_type: AxisType,
        value_type: AxisValueType,
        order: ColumnOrder,
        has_default: bool,
    ) -> Result<Axis> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CubeError::illegal_argument("axis name cannot be empty"));
        }
        if axis_type == AxisType::Nearest && has_default {
            return Err(CubeError::illegal_argument(format!(
                "NEAREST axis '{}' cannot have a default column",
                name
            )));
        }
        // Rule axes are forgiving: any constructor value type is coerced to
        // EXPRESSION and the order is always DISPLAY.
        let (value_type, order) = if axis_type == AxisType::Rule {
            (AxisValueType::Expression, ColumnOrder::Display)
        } else {
            (value_type, order)
        };
        let mut axis = Axis {
            id,
            name,
            axis_type,
            value_type,
            order,
            columns: Vec::new(),
            default_column: None,
            next_seq: 1,
            meta: MetaMap::new(),
            reference: None,
            indexes: AxisIndexes::default(),
        };
        if has_default {
            let id = axis.allocate_id();
            axis.default_column = Some(Column::new(id, None, 0));
        }
        Ok(axis)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn axis_type(&self) -> AxisType {
        self.axis_type
    }

    pub fn value_type(&self) -> AxisValueType {
        self.value_type
    }

    pub fn order(&self) -> ColumnOrder {
        self.order
    }

    pub fn has_default(&self) -> bool {
        self.default_column.is_some()
    }

    pub fn default_column(&self) -> Option<&Column> {
        self.default_column.as_ref()
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// All columns in display order, default last.
    pub fn columns(&self) -> Vec<&Column> {
        let mut out: Vec<&Column> = self.columns.iter().collect();
        if let Some(d) = &self.default_column {
            out.push(d);
        }
        out
    }

    pub fn size(&self) -> usize {
        self.columns.len() + if self.default_column.is_some() { 1 } else { 0 }
    }

    pub fn column_by_id(&self, id: i64) -> Option<&Column> {
        if let Some(d) = &self.default_column {
            if d.id == id {
                return Some(d);
            }
        }
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.column_name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    fn allocate_id(&mut self) -> i64 {
        let id = pack_column_id(self.id, self.next_seq);
        self.next_seq += 1;
        id
    }

    fn next_display_order(&self) -> i32 {
        self.columns
            .iter()
            .map(|c| c.display_order)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    /// Parse a textual column value for this axis.
    pub fn parse_value(&self, text: &str) -> Result<ColumnValue> {
        crate::model::value::parse_column_value(self.axis_type, self.value_type, text, &self.name)
    }

    /// Add a column. `None` adds the default column. Returns the new id.
    pub fn add_column(&mut self, value: Option<ColumnValue>) -> Result<i64> {
        self.add_column_with_name(value, None)
    }

    pub fn add_column_with_name(
        &mut self,
        value: Option<ColumnValue>,
        name: Option<&str>,
    ) -> Result<i64> {
        match value {
            None => {
                if self.axis_type == AxisType::Nearest {
                    return Err(CubeError::illegal_argument(format!(
                        "NEAREST axis '{}' cannot have a default column",
                        self.name
                    )));
                }
                if self.default_column.is_some() {
                    return Err(CubeError::illegal_argument(format!(
                        "axis '{}' already has a default column",
                        self.name
                    )));
                }
                let id = self.allocate_id();
                self.default_column = Some(Column::new(id, None, 0));
                Ok(id)
            }
            Some(v) => {
                let v = self.coerce_value(v)?;
                let id = self.allocate_id();
                let mut col = Column::new(id, Some(v), self.next_display_order());
                if let Some(n) = name {
                    col.set_column_name(n);
                }
                let mut candidate = self.columns.clone();
                let at = self.insertion_point(&candidate, &col);
                candidate.insert(at, col);
                let indexes = AxisIndexes::build(self.axis_type, &candidate, &self.name)?;
                self.columns = candidate;
                self.indexes = indexes;
                Ok(id)
            }
        }
    }

    /// Rule axes accept only expressions; everything else must match the
    /// declared value type.
    fn coerce_value(&self, v: ColumnValue) -> Result<ColumnValue> {
        let ok = match (self.axis_type, &v) {
            (AxisType::Rule, ColumnValue::Rule(_)) => true,
            (AxisType::Rule, _) => false,
            (AxisType::Range, ColumnValue::Range(_)) => true,
            (AxisType::Set, ColumnValue::Set(_)) => true,
            (AxisType::Discrete, ColumnValue::Scalar(s)) => self.scalar_matches(s),
            (AxisType::Nearest, ColumnValue::Scalar(s)) => self.scalar_matches(s),
            (AxisType::Nearest, ColumnValue::LatLon(_) | ColumnValue::Point3(_)) => {
                self.value_type == AxisValueType::Comparable
            }
            _ => false,
        };
        if ok {
            // Range/set bounds were parsed with the axis value type; a
            // programmatically built range still needs its kind checked.
            match &v {
                ColumnValue::Range(r) => {
                    if !self.scalar_matches(&r.low) || !self.scalar_matches(&r.high) {
                        return Err(self.type_error(&v));
                    }
                }
                ColumnValue::Set(s) => {
                    for e in &s.elements {
                        let scalar = match e {
                            SetElement::Value(x) => x.clone(),
                            SetElement::Range(r) => r.low.clone(),
                        };
                        if !self.scalar_matches(&scalar) {
                            return Err(self.type_error(&v));
                        }
                    }
                }
                _ => {}
            }
            Ok(v)
        } else {
            Err(self.type_error(&v))
        }
    }

    fn type_error(&self, v: &ColumnValue) -> CubeError {
        CubeError::illegal_argument(format!(
            "value '{}' does not match {} {} axis '{}'",
            v.to_canonical_string(),
            self.axis_type,
            self.value_type,
            self.name
        ))
    }

    fn scalar_matches(&self, s: &Scalar) -> bool {
        matches!(
            (self.value_type, s),
            (AxisValueType::String, Scalar::Str(_))
                | (AxisValueType::Long, Scalar::Long(_))
                | (AxisValueType::Double, Scalar::Double(_))
                | (AxisValueType::BigDecimal, Scalar::Decimal(_))
                | (AxisValueType::Date, Scalar::Date(_))
                | (AxisValueType::Comparable, _)
        )
    }

    fn insertion_point(&self, existing: &[Column], col: &Column) -> usize {
        match self.order {
            ColumnOrder::Display => existing.len(),
            ColumnOrder::Sorted => existing
                .binary_search_by(|probe| {
                    compare_column_values(probe.value.as_ref(), col.value.as_ref())
                })
                .unwrap_or_else(|pos| pos),
        }
    }

    /// Remove the column bound to `value`. Returns the removed id so the
    /// owning cube can drop its cells.
    pub fn delete_column(&mut self, value: &serde_json::Value) -> Result<i64> {
        let id = self
            .find_column(value)?
            .map(|c| c.id)
            .ok_or_else(|| {
                CubeError::coordinate_not_found(format!(
                    "no column for '{}' on axis '{}'",
                    value, self.name
                ))
            })?;
        self.delete_column_by_id(id)
    }

    pub fn delete_column_by_id(&mut self, id: i64) -> Result<i64> {
        if let Some(d) = &self.default_column {
            if d.id == id {
                self.default_column = None;
                return Ok(id);
            }
        }
        let pos = self.columns.iter().position(|c| c.id == id).ok_or_else(|| {
            CubeError::coordinate_not_found(format!(
                "column {} does not exist on axis '{}'",
                id, self.name
            ))
        })?;
        self.columns.remove(pos);
        self.indexes = AxisIndexes::build(self.axis_type, &self.columns, &self.name)?;
        Ok(id)
    }

    /// Reconcile this axis against an externally edited column list.
    /// Positive ids update existing columns, negative ids are additions,
    /// absent ids are removals. Atomic: any overlap aborts untouched.
    /// Returns the removed column ids.
    pub fn update_columns(&mut self, new_cols: &[Column]) -> Result<Vec<i64>> {
        let mut candidate: Vec<Column> = Vec::with_capacity(new_cols.len());
        let mut seen = Vec::new();
        let mut next_seq = self.next_seq;

        for incoming in new_cols {
            if incoming.is_default() {
                continue;
            }
            let value = incoming
                .value
                .clone()
                .map(|v| self.coerce_value(v))
                .transpose()?;
            if incoming.id > 0 {
                let existing = self.columns.iter().find(|c| c.id == incoming.id).ok_or_else(
                    || {
                        CubeError::illegal_argument(format!(
                            "column {} does not exist on axis '{}'",
                            incoming.id, self.name
                        ))
                    },
                )?;
                let mut updated = existing.clone();
                updated.value = value;
                updated.display_order = incoming.display_order;
                updated.meta = incoming.meta.clone();
                seen.push(incoming.id);
                candidate.push(updated);
            } else {
                let id = pack_column_id(self.id, next_seq);
                next_seq += 1;
                let mut added = Column::new(id, value, incoming.display_order);
                added.meta = incoming.meta.clone();
                candidate.push(added);
            }
        }

        let removed: Vec<i64> = self
            .columns
            .iter()
            .filter(|c| !seen.contains(&c.id))
            .map(|c| c.id)
            .collect();

        match self.order {
            ColumnOrder::Sorted => candidate
                .sort_by(|a, b| compare_column_values(a.value.as_ref(), b.value.as_ref())),
            ColumnOrder::Display => candidate.sort_by_key(|c| c.display_order),
        }
        for (i, col) in candidate.iter_mut().enumerate() {
            col.display_order = i as i32;
        }

        let indexes = AxisIndexes::build(self.axis_type, &candidate, &self.name)?;
        self.columns = candidate;
        self.indexes = indexes;
        self.next_seq = next_seq;
        Ok(removed)
    }

    /// Bind a coordinate value to a column: the matching column, else the
    /// default column if present, else `None`.
    pub fn find_column(&self, v: &serde_json::Value) -> Result<Option<&Column>> {
        match self.axis_type {
            AxisType::Rule => self.find_rule_column(v),
            AxisType::Discrete => {
                let scalar = promote_json(self.value_type, v, &self.name)?;
                Ok(self
                    .indexes
                    .discrete
                    .get(&scalar.index_key())
                    .and_then(|id| self.column_by_id(*id))
                    .or(self.default_column.as_ref()))
            }
            AxisType::Range | AxisType::Set => {
                let scalar = promote_json(self.value_type, v, &self.name)?;
                let hit = match self.axis_type {
                    AxisType::Range => self.indexes.covering_range(&scalar),
                    _ => self.indexes.find_scalar(&scalar),
                };
                Ok(hit
                    .and_then(|id| self.column_by_id(id))
                    .or(self.default_column.as_ref()))
            }
            AxisType::Nearest => self.find_nearest(v),
        }
    }

    fn find_rule_column(&self, v: &serde_json::Value) -> Result<Option<&Column>> {
        let name = match v {
            serde_json::Value::String(s) => s.as_str(),
            serde_json::Value::Number(n) => {
                return Err(CubeError::illegal_argument(format!(
                    "rule axis '{}' must be located by name, not number '{}'",
                    self.name, n
                )))
            }
            other => {
                return Err(CubeError::illegal_argument(format!(
                    "rule axis '{}' cannot bind '{}'",
                    self.name, other
                )))
            }
        };
        Ok(self
            .indexes
            .discrete
            .get(&name.to_lowercase())
            .and_then(|id| self.column_by_id(*id))
            .or(self.default_column.as_ref()))
    }

    fn find_nearest(&self, v: &serde_json::Value) -> Result<Option<&Column>> {
        let probe = self.promote_nearest(v)?;
        let mut best: Option<(&Column, f64)> = None;
        for col in &self.columns {
            let d = match (&probe, col.value.as_ref()) {
                (NearestProbe::Scalar(a), Some(ColumnValue::Scalar(b))) => a.distance_to(b),
                (NearestProbe::LatLon(a), Some(ColumnValue::LatLon(b))) => Some(a.distance_to(b)),
                (NearestProbe::Point3(a), Some(ColumnValue::Point3(b))) => Some(a.distance_to(b)),
                _ => None,
            };
            if let Some(d) = d {
                // Strict less-than keeps the earliest column on ties.
                if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                    best = Some((col, d));
                }
            }
        }
        Ok(best.map(|(c, _)| c))
    }

    fn promote_nearest(&self, v: &serde_json::Value) -> Result<NearestProbe> {
        if let serde_json::Value::Array(items) = v {
            let nums: Option<Vec<f64>> = items.iter().map(|i| i.as_f64()).collect();
            if let Some(nums) = nums {
                return match nums.as_slice() {
                    [x, y] => Ok(NearestProbe::LatLon(LatLon { lat: *x, lon: *y })),
                    [x, y, z] => Ok(NearestProbe::Point3(Point3D {
                        x: *x,
                        y: *y,
                        z: *z,
                    })),
                    _ => Err(CubeError::illegal_argument(format!(
                        "nearest axis '{}' takes two or three coordinates",
                        self.name
                    ))),
                };
            }
        }
        if self.value_type == AxisValueType::Comparable {
            if let serde_json::Value::String(s) = v {
                return match parse_point(s, &self.name)? {
                    ColumnValue::LatLon(p) => Ok(NearestProbe::LatLon(p)),
                    ColumnValue::Point3(p) => Ok(NearestProbe::Point3(p)),
                    _ => unreachable!("parse_point yields only points"),
                };
            }
        }
        promote_json(self.value_type, v, &self.name).map(NearestProbe::Scalar)
    }

    /// The ordered tail of rule columns beginning with `start`. A blank start
    /// returns every column.
    pub fn rule_columns_starting_at(&self, start: Option<&str>) -> Result<Vec<&Column>> {
        if self.axis_type != AxisType::Rule {
            return Err(CubeError::illegal_argument(format!(
                "axis '{}' is not a rule axis",
                self.name
            )));
        }
        match start {
            None | Some("") => Ok(self.columns()),
            Some(name) => {
                let pos = self.columns.iter().position(|c| {
                    c.column_name().is_some_and(|n| n.eq_ignore_ascii_case(name))
                });
                match pos {
                    Some(p) => {
                        let mut tail: Vec<&Column> = self.columns[p..].iter().collect();
                        if let Some(d) = &self.default_column {
                            tail.push(d);
                        }
                        Ok(tail)
                    }
                    None => {
                        if let Some(d) = &self.default_column {
                            Ok(vec![d])
                        } else {
                            Err(CubeError::coordinate_not_found(format!(
                                "rule '{}' not found on axis '{}'",
                                name, self.name
                            )))
                        }
                    }
                }
            }
        }
    }

    /// Replace columns wholesale, preserving ids (reference-axis loading and
    /// deserialization). Overlap is validated; the id counter advances past
    /// every seen sequence.
    pub fn set_columns_raw(&mut self, cols: Vec<Column>) -> Result<()> {
        let mut non_default = Vec::new();
        let mut default = None;
        let mut max_seq = self.next_seq - 1;
        for col in cols {
            let seq = crate::model::column::sequence_of_column_id(col.id);
            if seq > max_seq {
                max_seq = seq;
            }
            if col.is_default() {
                if default.is_some() {
                    return Err(CubeError::illegal_argument(format!(
                        "axis '{}' has more than one default column",
                        self.name
                    )));
                }
                default = Some(col);
            } else {
                non_default.push(col);
            }
        }
        if default.is_some() && self.axis_type == AxisType::Nearest {
            return Err(CubeError::illegal_argument(format!(
                "NEAREST axis '{}' cannot have a default column",
                self.name
            )));
        }
        if self.order == ColumnOrder::Sorted {
            non_default
                .sort_by(|a, b| compare_column_values(a.value.as_ref(), b.value.as_ref()));
        } else {
            non_default.sort_by_key(|c| c.display_order);
        }
        let indexes = AxisIndexes::build(self.axis_type, &non_default, &self.name)?;
        self.columns = non_default;
        self.default_column = default;
        self.indexes = indexes;
        self.next_seq = max_seq + 1;
        Ok(())
    }

    /// Materialize a reference axis into an ordinary one; columns and cells
    /// are unchanged.
    pub fn break_reference(&mut self) {
        self.reference = None;
    }

    /// Take over the shape of a resolved reference source. The local name and
    /// id stay; type, value type and order follow the source so that lookups
    /// coerce values the way the source axis does.
    pub(crate) fn adopt_reference_shape(&mut self, source: &Axis) {
        self.axis_type = source.axis_type;
        self.value_type = source.value_type;
        self.order = source.order;
    }
}

enum NearestProbe {
    Scalar(Scalar),
    LatLon(LatLon),
    Point3(Point3D),
}

/// Value ordering used for SORTED axes. Default (None) always sorts last.
pub fn compare_column_values(a: Option<&ColumnValue>, b: Option<&ColumnValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => match (x, y) {
            (ColumnValue::Scalar(p), ColumnValue::Scalar(q)) => p.cmp(q),
            (ColumnValue::Range(p), ColumnValue::Range(q)) => p.cmp(q),
            (ColumnValue::Set(p), ColumnValue::Set(q)) => compare_sets(p, q),
            (ColumnValue::LatLon(p), ColumnValue::LatLon(q)) => p
                .lat
                .partial_cmp(&q.lat)
                .unwrap_or(Ordering::Equal)
                .then(p.lon.partial_cmp(&q.lon).unwrap_or(Ordering::Equal)),
            (ColumnValue::Point3(p), ColumnValue::Point3(q)) => p
                .x
                .partial_cmp(&q.x)
                .unwrap_or(Ordering::Equal)
                .then(p.y.partial_cmp(&q.y).unwrap_or(Ordering::Equal))
                .then(p.z.partial_cmp(&q.z).unwrap_or(Ordering::Equal)),
            _ => x.to_canonical_string().cmp(&y.to_canonical_string()),
        },
    }
}

fn compare_sets(a: &RangeSet, b: &RangeSet) -> Ordering {
    let low = |s: &RangeSet| -> Option<Scalar> {
        s.elements.first().map(|e| match e {
            SetElement::Value(v) => v.clone(),
            SetElement::Range(r) => r.low.clone(),
        })
    };
    match (low(a), low(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => Ordering::Equal,
    }
}
