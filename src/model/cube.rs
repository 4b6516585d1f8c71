use crate::error::{CubeError, Result};
use crate::logic::evaluate::{
    is_truthy, Coordinate, ExpressionEvaluator, Output, RuleExecution, RuleInfo,
};
use crate::model::app_id::ApplicationId;
use crate::model::axis::Axis;
use crate::model::column::{Column, MetaMap};
use crate::model::value::{AxisType, AxisValueType, ColumnOrder, ColumnValue, Expression};
use sha1::{Digest, Sha1};
use std::collections::{BTreeSet, HashMap};

/// Unordered set of column ids (one per axis) keying a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ColumnIdSet(pub BTreeSet<i64>);

impl FromIterator<i64> for ColumnIdSet {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        ColumnIdSet(iter.into_iter().collect())
    }
}

/// A stored cell: a plain JSON value or a command cell evaluated through the
/// expression port.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Json(serde_json::Value),
    Cmd(Expression),
}

impl CellValue {
    pub fn to_canonical_string(&self) -> String {
        match self {
            CellValue::Json(v) => v.to_string(),
            CellValue::Cmd(e) => format!("cmd:{}", e.to_canonical_string()),
        }
    }
}

/// N-dimensional decision table: an ordered axis list plus a sparse cell map.
#[derive(Debug, Clone)]
pub struct Cube {
    name: String,
    pub app_id: ApplicationId,
    axes: Vec<Axis>,
    cells: HashMap<ColumnIdSet, CellValue>,
    pub default_cell_value: Option<CellValue>,
    pub meta: MetaMap,
    next_axis_id: u16,
}

impl Cube {
    pub fn new(name: impl Into<String>, app_id: ApplicationId) -> Result<Cube> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CubeError::illegal_argument("cube name cannot be empty"));
        }
        Ok(Cube {
            name,
            app_id,
            axes: Vec::new(),
            cells: HashMap::new(),
            default_cell_value: None,
            meta: MetaMap::new(),
            next_axis_id: 1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }

    pub(crate) fn axis_mut(&mut self, name: &str) -> Option<&mut Axis> {
        self.axes
            .iter_mut()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }

    pub fn has_rule_axis(&self) -> bool {
        self.axes.iter().any(|a| a.axis_type() == AxisType::Rule)
    }

    /// Create and attach a new axis.
    pub fn add_axis(
        &mut self,
        name: &str,
        axis_type: AxisType,
        value_type: AxisValueType,
        order: ColumnOrder,
        has_default: bool,
    ) -> Result<&mut Axis> {
        if self.axis(name).is_some() {
            return Err(CubeError::illegal_argument(format!(
                "axis '{}' already exists on cube '{}'",
                name, self.name
            )));
        }
        let id = self.next_axis_id;
        self.next_axis_id += 1;
        let axis = Axis::new(id, name, axis_type, value_type, order, has_default)?;
        self.axes.push(axis);
        Ok(self.axes.last_mut().expect("axis just pushed"))
    }

    /// Attach a fully built axis (deserialization, reference loading); ids
    /// are preserved.
    pub fn attach_axis(&mut self, axis: Axis) -> Result<()> {
        if self.axis(axis.name()).is_some() {
            return Err(CubeError::illegal_argument(format!(
                "axis '{}' already exists on cube '{}'",
                axis.name(),
                self.name
            )));
        }
        if axis.id() >= self.next_axis_id {
            self.next_axis_id = axis.id() + 1;
        }
        self.axes.push(axis);
        Ok(())
    }

    /// Remove an axis; all cells are cleared since their keys lose a
    /// dimension.
    pub fn delete_axis(&mut self, name: &str) -> Result<()> {
        let pos = self
            .axes
            .iter()
            .position(|a| a.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                CubeError::illegal_argument(format!(
                    "axis '{}' does not exist on cube '{}'",
                    name, self.name
                ))
            })?;
        self.axes.remove(pos);
        self.cells.clear();
        Ok(())
    }

    /// Add a column to the named axis.
    pub fn add_column(&mut self, axis: &str, value: Option<ColumnValue>) -> Result<i64> {
        self.add_column_with_name(axis, value, None)
    }

    pub fn add_column_with_name(
        &mut self,
        axis: &str,
        value: Option<ColumnValue>,
        col_name: Option<&str>,
    ) -> Result<i64> {
        let cube_name = self.name.clone();
        let ax = self.axis_mut(axis).ok_or_else(|| {
            CubeError::illegal_argument(format!(
                "axis '{}' does not exist on cube '{}'",
                axis, cube_name
            ))
        })?;
        ax.add_column_with_name(value, col_name)
    }

    /// Delete the column bound to `value`; cells referencing it are dropped.
    pub fn delete_column(&mut self, axis: &str, value: &serde_json::Value) -> Result<()> {
        let cube_name = self.name.clone();
        let ax = self.axis_mut(axis).ok_or_else(|| {
            CubeError::illegal_argument(format!(
                "axis '{}' does not exist on cube '{}'",
                axis, cube_name
            ))
        })?;
        let removed = ax.delete_column(value)?;
        self.drop_cells_referencing(&[removed]);
        Ok(())
    }

    /// Reconcile an axis against an externally edited column list; cells of
    /// removed columns are dropped. Atomic per axis.
    pub fn update_columns(&mut self, axis: &str, new_cols: &[Column]) -> Result<()> {
        let cube_name = self.name.clone();
        let ax = self.axis_mut(axis).ok_or_else(|| {
            CubeError::illegal_argument(format!(
                "axis '{}' does not exist on cube '{}'",
                axis, cube_name
            ))
        })?;
        let removed = ax.update_columns(new_cols)?;
        self.drop_cells_referencing(&removed);
        Ok(())
    }

    fn drop_cells_referencing(&mut self, removed: &[i64]) {
        if removed.is_empty() {
            return;
        }
        self.cells
            .retain(|ids, _| !removed.iter().any(|r| ids.0.contains(r)));
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &HashMap<ColumnIdSet, CellValue> {
        &self.cells
    }

    pub fn clear_cells(&mut self) {
        self.cells.clear();
    }

    fn normalize(coord: &Coordinate) -> HashMap<String, &serde_json::Value> {
        coord
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect()
    }

    /// Bind every axis (rule axes by name) to a single column id set.
    /// Used by writes, where a concrete cell must be addressed.
    pub fn bind_coordinate(&self, coord: &Coordinate) -> Result<ColumnIdSet> {
        let by_name = Self::normalize(coord);
        let mut ids = BTreeSet::new();
        for axis in &self.axes {
            let key = axis.name().to_lowercase();
            let col = match by_name.get(key.as_str()) {
                Some(v) => axis.find_column(v)?,
                None => axis.default_column(),
            };
            match col {
                Some(c) => {
                    ids.insert(c.id);
                }
                None => {
                    return Err(CubeError::coordinate_not_found(format!(
                        "axis '{}' on cube '{}' has no column for the supplied coordinate",
                        axis.name(),
                        self.name
                    )))
                }
            }
        }
        Ok(ColumnIdSet(ids))
    }

    /// Address a cell by explicit column ids; axes not covered fall back to
    /// their default column. Ids are matched by membership rather than by
    /// their packed axis bits, since reference axes borrow ids from their
    /// source axis.
    pub fn bind_ids(&self, ids: &[i64]) -> Result<ColumnIdSet> {
        let mut by_axis: HashMap<usize, i64> = HashMap::new();
        for id in ids {
            let owner = self
                .axes
                .iter()
                .position(|a| a.column_by_id(*id).is_some())
                .ok_or_else(|| {
                    CubeError::illegal_argument(format!(
                        "column {} does not exist on any axis of cube '{}'",
                        id, self.name
                    ))
                })?;
            by_axis.insert(owner, *id);
        }
        let mut out = BTreeSet::new();
        for (i, axis) in self.axes.iter().enumerate() {
            match by_axis.get(&i) {
                Some(id) => {
                    out.insert(*id);
                }
                None => match axis.default_column() {
                    Some(d) => {
                        out.insert(d.id);
                    }
                    None => {
                        return Err(CubeError::illegal_argument(format!(
                            "no column id supplied for axis '{}' of cube '{}'",
                            axis.name(),
                            self.name
                        )))
                    }
                },
            }
        }
        Ok(ColumnIdSet(out))
    }

    pub fn set_cell(&mut self, coord: &Coordinate, value: CellValue) -> Result<()> {
        let key = self.bind_coordinate(coord)?;
        self.cells.insert(key, value);
        Ok(())
    }

    pub fn set_cell_by_ids(&mut self, ids: &[i64], value: CellValue) -> Result<()> {
        let key = self.bind_ids(ids)?;
        self.cells.insert(key, value);
        Ok(())
    }

    pub fn remove_cell(&mut self, coord: &Coordinate) -> Result<Option<CellValue>> {
        let key = self.bind_coordinate(coord)?;
        Ok(self.cells.remove(&key))
    }

    pub fn cell_by_ids(&self, ids: &[i64]) -> Result<Option<&CellValue>> {
        let key = self.bind_ids(ids)?;
        Ok(self.cells.get(&key))
    }

    /// Coordinate → value. Non-rule axes bind exactly one column (default
    /// fallback, else `CoordinateNotFound`). Rule axes iterate every truthy
    /// condition in declared order, honoring a rule-name value in the
    /// coordinate as the starting rule; executions are recorded in a
    /// [`RuleInfo`] attached to `output`. Returns the stored value, else the
    /// cube's default cell value, else `None`.
    pub fn get_cell(
        &self,
        coord: &Coordinate,
        output: &mut Output,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<Option<serde_json::Value>> {
        let by_name = Self::normalize(coord);
        let mut fixed: Vec<i64> = Vec::new();
        let mut rule_axes: Vec<(&Axis, Vec<&Column>)> = Vec::new();

        for axis in &self.axes {
            let key = axis.name().to_lowercase();
            let supplied = by_name.get(key.as_str()).copied();
            if axis.axis_type() == AxisType::Rule {
                let start = match supplied {
                    Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.as_str()),
                    Some(serde_json::Value::Number(n)) => {
                        return Err(CubeError::illegal_argument(format!(
                            "rule axis '{}' must be located by name, not number '{}'",
                            axis.name(),
                            n
                        )))
                    }
                    _ => None,
                };
                let candidates = axis.rule_columns_starting_at(start)?;
                let fired = self.fire_rules(axis, &candidates, coord, evaluator)?;
                rule_axes.push((axis, fired));
            } else {
                let col = match supplied {
                    Some(v) => axis.find_column(v)?,
                    None => axis.default_column(),
                };
                match col {
                    Some(c) => fixed.push(c.id),
                    None => {
                        return Err(CubeError::coordinate_not_found(format!(
                            "axis '{}' on cube '{}' has no column for the supplied coordinate",
                            axis.name(),
                            self.name
                        )))
                    }
                }
            }
        }

        if rule_axes.is_empty() {
            let key: ColumnIdSet = fixed.iter().copied().collect();
            return self.resolve_cell(self.cells.get(&key), coord, evaluator);
        }

        // Cartesian product across rule axes, usually a single axis.
        let mut info = RuleInfo::default();
        let mut last = None;
        let mut combos: Vec<Vec<(&Axis, &Column)>> = vec![Vec::new()];
        for (axis, fired) in &rule_axes {
            let mut next = Vec::new();
            for combo in &combos {
                for col in fired {
                    let mut c = combo.clone();
                    c.push((*axis, *col));
                    next.push(c);
                }
            }
            combos = next;
        }
        for combo in &combos {
            if combo.len() != rule_axes.len() {
                continue;
            }
            let mut ids: BTreeSet<i64> = fixed.iter().copied().collect();
            let mut names = std::collections::BTreeMap::new();
            for (axis, col) in combo {
                ids.insert(col.id);
                names.insert(axis.name().to_string(), rule_label(col));
            }
            let value = self.resolve_cell(self.cells.get(&ColumnIdSet(ids)), coord, evaluator)?;
            info.executed.push(RuleExecution {
                rules: names,
                value: value.clone(),
            });
            info.rules_fired += 1;
            last = value;
        }
        info.attach(output);
        Ok(last)
    }

    /// Evaluate the rule candidates of one axis; the default column fires
    /// only when no condition did.
    fn fire_rules<'a>(
        &self,
        axis: &Axis,
        candidates: &[&'a Column],
        coord: &Coordinate,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<Vec<&'a Column>> {
        let mut fired = Vec::new();
        let mut default = None;
        for col in candidates {
            match &col.value {
                None => default = Some(*col),
                Some(ColumnValue::Rule(expr)) => {
                    let v = evaluator.evaluate(expr, coord, &self.name)?;
                    if is_truthy(&v) {
                        fired.push(*col);
                    }
                }
                Some(other) => {
                    return Err(CubeError::illegal_state(format!(
                        "rule axis '{}' carries non-expression value '{}'",
                        axis.name(),
                        other.to_canonical_string()
                    )))
                }
            }
        }
        if fired.is_empty() {
            if let Some(d) = default {
                fired.push(d);
            }
        }
        Ok(fired)
    }

    fn resolve_cell(
        &self,
        cell: Option<&CellValue>,
        coord: &Coordinate,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<Option<serde_json::Value>> {
        let effective = cell.or(self.default_cell_value.as_ref());
        match effective {
            None => Ok(None),
            Some(CellValue::Json(v)) => Ok(Some(v.clone())),
            Some(CellValue::Cmd(expr)) => evaluator.evaluate(expr, coord, &self.name).map(Some),
        }
    }

    /// Content fingerprint. Stable under axis-name case changes, column
    /// insertion order on SORTED axes, and meta-property read order; changes
    /// whenever a cell value, column set, default flag or axis type does.
    pub fn sha1(&self) -> String {
        let mut h = Sha1::new();
        if let Some(d) = &self.default_cell_value {
            h.update(b"default:");
            h.update(d.to_canonical_string().as_bytes());
        }
        for (k, v) in &self.meta {
            h.update(format!("meta:{}={}", k.to_lowercase(), v).as_bytes());
        }

        let mut axes: Vec<&Axis> = self.axes.iter().collect();
        axes.sort_by_key(|a| a.name().to_lowercase());
        for axis in &axes {
            h.update(
                format!(
                    "axis:{}:{}:{}:{}:{:?}",
                    axis.name().to_lowercase(),
                    axis.axis_type(),
                    axis.value_type(),
                    axis.has_default(),
                    axis.order()
                )
                .as_bytes(),
            );
            for (k, v) in &axis.meta {
                h.update(format!("axismeta:{}={}", k.to_lowercase(), v).as_bytes());
            }
            let mut col_strings: Vec<String> = axis
                .columns()
                .iter()
                .map(|c| {
                    let mut s = format!("col:{}", c.value_string());
                    for (k, v) in &c.meta {
                        s.push_str(&format!(";{}={}", k.to_lowercase(), v));
                    }
                    s
                })
                .collect();
            if axis.order() == ColumnOrder::Sorted {
                col_strings.sort();
            }
            for s in col_strings {
                h.update(s.as_bytes());
            }
        }

        let mut cell_strings: Vec<String> = self
            .cells
            .iter()
            .map(|(ids, value)| {
                let mut tags: Vec<String> = ids
                    .0
                    .iter()
                    .map(|id| {
                        let owner = self
                            .axes
                            .iter()
                            .find_map(|a| a.column_by_id(*id).map(|c| (a, c)));
                        match owner {
                            Some((a, c)) => {
                                format!("{}:{}", a.name().to_lowercase(), c.value_string())
                            }
                            None => id.to_string(),
                        }
                    })
                    .collect();
                tags.sort();
                format!("cell:{}={}", tags.join("|"), value.to_canonical_string())
            })
            .collect();
        cell_strings.sort();
        for s in cell_strings {
            h.update(s.as_bytes());
        }

        hex::encode(h.finalize())
    }
}

fn rule_label(col: &Column) -> String {
    col.column_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| col.value_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::evaluate::LiteralEvaluator;
    use crate::model::app_id::ReleaseStatus;
    use crate::model::value::Scalar;
    use serde_json::json;

    fn test_app() -> ApplicationId {
        ApplicationId::new("acme", "alpha", "1.0.0", ReleaseStatus::Snapshot, "HEAD").unwrap()
    }

    fn coord(pairs: &[(&str, serde_json::Value)]) -> Coordinate {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn two_axis_cube() -> Cube {
        let mut cube = Cube::new("rates", test_app()).unwrap();
        cube.add_axis(
            "age",
            AxisType::Discrete,
            AxisValueType::Long,
            ColumnOrder::Sorted,
            false,
        )
        .unwrap();
        cube.add_axis(
            "state",
            AxisType::Discrete,
            AxisValueType::String,
            ColumnOrder::Display,
            true,
        )
        .unwrap();
        for v in [18, 65] {
            cube.add_column("age", Some(ColumnValue::Scalar(Scalar::Long(v)))).unwrap();
        }
        cube.add_column("state", Some(ColumnValue::Scalar(Scalar::Str("OH".into()))))
            .unwrap();
        cube
    }

    #[test]
    fn cell_round_trip_with_case_insensitive_coordinates() {
        let mut cube = two_axis_cube();
        cube.set_cell(
            &coord(&[("AGE", json!(18)), ("State", json!("oh"))]),
            CellValue::Json(json!(1.5)),
        )
        .unwrap();

        let mut out = Output::new();
        let got = cube
            .get_cell(
                &coord(&[("age", json!(18)), ("state", json!("OH"))]),
                &mut out,
                &LiteralEvaluator,
            )
            .unwrap();
        assert_eq!(got, Some(json!(1.5)));
    }

    #[test]
    fn missing_binding_without_default_is_coordinate_not_found() {
        let cube = two_axis_cube();
        let mut out = Output::new();
        let err = cube
            .get_cell(
                &coord(&[("age", json!(40)), ("state", json!("OH"))]),
                &mut out,
                &LiteralEvaluator,
            )
            .unwrap_err();
        assert!(matches!(err, CubeError::CoordinateNotFound(_)));
    }

    #[test]
    fn default_column_and_default_cell_fallbacks() {
        let mut cube = two_axis_cube();
        cube.default_cell_value = Some(CellValue::Json(json!("dflt")));
        let mut out = Output::new();
        // state "TX" binds the default column; no stored cell → default value.
        let got = cube
            .get_cell(
                &coord(&[("age", json!(18)), ("state", json!("TX"))]),
                &mut out,
                &LiteralEvaluator,
            )
            .unwrap();
        assert_eq!(got, Some(json!("dflt")));
    }

    #[test]
    fn missing_axis_key_uses_default_column() {
        let mut cube = two_axis_cube();
        cube.set_cell(&coord(&[("age", json!(65))]), CellValue::Json(json!(9)))
            .unwrap();
        let mut out = Output::new();
        let got = cube
            .get_cell(&coord(&[("age", json!(65))]), &mut out, &LiteralEvaluator)
            .unwrap();
        assert_eq!(got, Some(json!(9)));
    }

    #[test]
    fn rule_axis_fires_truthy_conditions_in_order() {
        let mut cube = Cube::new("ruled", test_app()).unwrap();
        cube.add_axis(
            "conditions",
            AxisType::Rule,
            AxisValueType::Expression,
            ColumnOrder::Display,
            false,
        )
        .unwrap();
        let a = cube
            .add_column_with_name(
                "conditions",
                Some(ColumnValue::Rule(Expression::from_source("true"))),
                Some("first"),
            )
            .unwrap();
        let b = cube
            .add_column_with_name(
                "conditions",
                Some(ColumnValue::Rule(Expression::from_source("false"))),
                Some("second"),
            )
            .unwrap();
        let c = cube
            .add_column_with_name(
                "conditions",
                Some(ColumnValue::Rule(Expression::from_source("true"))),
                Some("third"),
            )
            .unwrap();
        cube.set_cell_by_ids(&[a], CellValue::Json(json!("A"))).unwrap();
        cube.set_cell_by_ids(&[b], CellValue::Json(json!("B"))).unwrap();
        cube.set_cell_by_ids(&[c], CellValue::Json(json!("C"))).unwrap();

        let mut out = Output::new();
        let last = cube
            .get_cell(&Coordinate::new(), &mut out, &LiteralEvaluator)
            .unwrap();
        assert_eq!(last, Some(json!("C")));

        let info: RuleInfo =
            serde_json::from_value(out.get(crate::logic::evaluate::RULE_INFO_KEY).unwrap().clone())
                .unwrap();
        assert_eq!(info.rules_fired, 2);
        let fired: Vec<&str> = info
            .executed
            .iter()
            .map(|e| e.rules.get("conditions").unwrap().as_str())
            .collect();
        assert_eq!(fired, vec!["first", "third"]);
    }

    #[test]
    fn rule_start_skips_earlier_rules() {
        let mut cube = Cube::new("ruled", test_app()).unwrap();
        cube.add_axis(
            "conditions",
            AxisType::Rule,
            AxisValueType::Expression,
            ColumnOrder::Display,
            false,
        )
        .unwrap();
        for name in ["first", "second"] {
            let id = cube
                .add_column_with_name(
                    "conditions",
                    Some(ColumnValue::Rule(Expression::from_source("true"))),
                    Some(name),
                )
                .unwrap();
            cube.set_cell_by_ids(&[id], CellValue::Json(json!(name))).unwrap();
        }
        let mut out = Output::new();
        cube.get_cell(
            &coord(&[("conditions", json!("second"))]),
            &mut out,
            &LiteralEvaluator,
        )
        .unwrap();
        let info: RuleInfo =
            serde_json::from_value(out.get(crate::logic::evaluate::RULE_INFO_KEY).unwrap().clone())
                .unwrap();
        assert_eq!(info.rules_fired, 1);
        assert_eq!(info.executed[0].rules.get("conditions").unwrap(), "second");
    }

    #[test]
    fn sha1_stability_and_instability() {
        let make = |state_name: &str, cell: serde_json::Value| {
            let mut cube = Cube::new("rates", test_app()).unwrap();
            cube.add_axis(
                state_name,
                AxisType::Discrete,
                AxisValueType::String,
                ColumnOrder::Display,
                false,
            )
            .unwrap();
            cube.add_column(
                state_name,
                Some(ColumnValue::Scalar(Scalar::Str("OH".into()))),
            )
            .unwrap();
            cube.set_cell(&coord(&[(state_name, json!("OH"))]), CellValue::Json(cell))
                .unwrap();
            cube
        };

        // Stable under axis rename case change.
        assert_eq!(
            make("state", json!(1)).sha1(),
            make("STATE", json!(1)).sha1()
        );
        // Unstable when a cell value changes.
        assert_ne!(make("state", json!(1)).sha1(), make("state", json!(2)).sha1());

        // Stable under insertion order on a SORTED axis.
        let sorted = |values: &[i64]| {
            let mut cube = Cube::new("n", test_app()).unwrap();
            cube.add_axis(
                "age",
                AxisType::Discrete,
                AxisValueType::Long,
                ColumnOrder::Sorted,
                false,
            )
            .unwrap();
            for v in values {
                cube.add_column("age", Some(ColumnValue::Scalar(Scalar::Long(*v)))).unwrap();
            }
            cube.sha1()
        };
        assert_eq!(sorted(&[1, 2, 3]), sorted(&[3, 1, 2]));

        // Unstable when the default flag flips.
        let with_default = |has_default: bool| {
            let mut cube = Cube::new("n", test_app()).unwrap();
            cube.add_axis(
                "age",
                AxisType::Discrete,
                AxisValueType::Long,
                ColumnOrder::Sorted,
                has_default,
            )
            .unwrap();
            cube.sha1()
        };
        assert_ne!(with_default(true), with_default(false));
    }

    #[test]
    fn deleting_a_column_drops_its_cells() {
        let mut cube = two_axis_cube();
        cube.set_cell(
            &coord(&[("age", json!(18)), ("state", json!("OH"))]),
            CellValue::Json(json!(1)),
        )
        .unwrap();
        cube.set_cell(
            &coord(&[("age", json!(65)), ("state", json!("OH"))]),
            CellValue::Json(json!(2)),
        )
        .unwrap();
        assert_eq!(cube.num_cells(), 2);
        cube.delete_column("age", &json!(18)).unwrap();
        assert_eq!(cube.num_cells(), 1);
    }

    #[test]
    fn bind_ids_fills_defaults_and_validates() {
        let mut cube = two_axis_cube();
        let age18 = cube.axis("age").unwrap().columns()[0].id;
        // state axis has a default column; omitting it binds the default.
        cube.set_cell_by_ids(&[age18], CellValue::Json(json!(7))).unwrap();
        assert_eq!(
            cube.cell_by_ids(&[age18]).unwrap(),
            Some(&CellValue::Json(json!(7)))
        );
        // Unknown column id is rejected.
        assert!(cube.set_cell_by_ids(&[123456], CellValue::Json(json!(0))).is_err());
    }
}
