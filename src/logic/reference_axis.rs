use crate::error::{CubeError, Result};
use crate::logic::evaluate::Coordinate;
use crate::model::axis::TransformRef;
use crate::model::column::Column;
use crate::model::cube::{CellValue, Cube};
use crate::model::format;
use crate::model::value::{AxisType, AxisValueType, ColumnValue};
use crate::store::registry::Registry;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

const METHOD_AXIS: &str = "method";

/// Materialize every reference axis of `cube`: resolve the source axis
/// (chaining transparently through further reference axes), copy its columns
/// with ids preserved, apply the optional transform, and merge local
/// meta-properties over the source's. `visit` detects reference cycles.
pub(crate) fn resolve_references<'a>(
    reg: &'a Registry,
    cube: &'a mut Cube,
    visit: &'a mut HashSet<String>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let ref_axes: Vec<String> = cube
            .axes()
            .iter()
            .filter(|a| a.is_reference())
            .map(|a| a.name().to_string())
            .collect();

        for axis_name in ref_axes {
            let spec = cube
                .axis(&axis_name)
                .and_then(|a| a.reference.clone())
                .expect("axis was a reference moments ago");

            let visit_key = format!(
                "{}|{}|{}",
                spec.source.app.cache_key(),
                spec.source.cube.to_lowercase(),
                spec.source.axis.to_lowercase()
            );
            if !visit.insert(visit_key.clone()) {
                return Err(CubeError::illegal_state(format!(
                    "reference axis '{}' on cube '{}' forms a cycle through {} '{}'.'{}'",
                    axis_name,
                    cube.name(),
                    spec.source.app,
                    spec.source.cube,
                    spec.source.axis
                )));
            }

            let source_cube = reg
                .get_cube_tracked(&spec.source.app, &spec.source.cube, visit)
                .await?
                .ok_or_else(|| {
                    CubeError::illegal_state(format!(
                        "reference axis '{}' on cube '{}': source cube '{}' not found in {}",
                        axis_name,
                        cube.name(),
                        spec.source.cube,
                        spec.source.app
                    ))
                })?;
            let source_axis = source_cube.axis(&spec.source.axis).ok_or_else(|| {
                CubeError::illegal_state(format!(
                    "reference axis '{}' on cube '{}': source cube '{}' has no axis '{}'",
                    axis_name,
                    cube.name(),
                    spec.source.cube,
                    spec.source.axis
                ))
            })?;

            // Ids are preserved from the source so downstream cell keys stay
            // stable across break-reference.
            let mut columns: Vec<Column> =
                source_axis.columns().iter().map(|c| (*c).clone()).collect();

            if let Some(tx) = &spec.transform {
                columns = apply_transform(
                    reg,
                    tx,
                    columns,
                    source_axis.axis_type(),
                    source_axis.value_type(),
                    visit,
                )
                .await?;
            }

            let shape = source_axis.clone();
            let axis = cube.axis_mut(&axis_name).expect("axis exists");
            axis.adopt_reference_shape(&shape);
            let mut merged = shape.meta.clone();
            merged.extend(axis.meta.clone());
            axis.meta = merged;
            axis.set_columns_raw(columns)?;
            // Stack discipline: a completed resolution leaves the path, so
            // sibling axes may point at the same source without tripping the
            // cycle check.
            visit.remove(&visit_key);
        }
        Ok(())
    })
}

/// Invoke the transform cube's `method` rule column, passing the copied
/// column list; its return value replaces the columns.
async fn apply_transform(
    reg: &Registry,
    tx: &TransformRef,
    columns: Vec<Column>,
    axis_type: AxisType,
    value_type: AxisValueType,
    visit: &mut HashSet<String>,
) -> Result<Vec<Column>> {
    let transform_cube = reg
        .get_cube_tracked(&tx.app, &tx.cube, visit)
        .await?
        .ok_or_else(|| {
            CubeError::illegal_state(format!(
                "transform cube '{}' not found in {}",
                tx.cube, tx.app
            ))
        })?;
    let method_axis = transform_cube.axis(METHOD_AXIS).ok_or_else(|| {
        CubeError::illegal_state(format!(
            "transform cube '{}' has no '{}' axis",
            tx.cube, METHOD_AXIS
        ))
    })?;
    let method_col = method_axis
        .column_by_name(&tx.method)
        .or_else(|| {
            method_axis
                .find_column(&serde_json::json!(tx.method))
                .ok()
                .flatten()
        })
        .filter(|c| !c.is_default())
        .ok_or_else(|| {
            CubeError::illegal_state(format!(
                "transform cube '{}' has no '{}' column named '{}'",
                tx.cube, METHOD_AXIS, tx.method
            ))
        })?;

    let mut input = Coordinate::new();
    input.insert(METHOD_AXIS.into(), serde_json::json!(tx.method));
    input.insert(
        "columns".into(),
        serde_json::Value::Array(
            columns
                .iter()
                .filter_map(|c| c.value.as_ref().map(format::encode_column_value))
                .collect(),
        ),
    );

    let transformed = match transform_cube.cell_by_ids(&[method_col.id])? {
        Some(CellValue::Cmd(expr)) => reg.evaluator().evaluate(expr, &input, transform_cube.name())?,
        Some(CellValue::Json(v)) => v.clone(),
        None => match &method_col.value {
            Some(ColumnValue::Rule(expr)) => {
                reg.evaluator().evaluate(expr, &input, transform_cube.name())?
            }
            _ => {
                return Err(CubeError::illegal_state(format!(
                    "transform method '{}' on cube '{}' has neither a cell nor a rule body",
                    tx.method, tx.cube
                )))
            }
        },
    };

    decode_transformed(&transformed, &columns, axis_type, value_type, &tx.cube)
}

fn decode_transformed(
    out: &serde_json::Value,
    source: &[Column],
    axis_type: AxisType,
    value_type: AxisValueType,
    transform_cube: &str,
) -> Result<Vec<Column>> {
    let items = out.as_array().ok_or_else(|| {
        CubeError::illegal_state(format!(
            "transform cube '{}' returned '{}' instead of a column list",
            transform_cube, out
        ))
    })?;
    let max_id = source.iter().map(|c| c.id).max().unwrap_or(0);
    let mut columns = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let (id, raw) = match item.as_object() {
            Some(obj) if obj.contains_key("value") => {
                let id = obj.get("id").and_then(|v| v.as_i64());
                (id, obj.get("value").expect("checked").clone())
            }
            _ => (None, item.clone()),
        };
        // Reuse the source column id at the same position when the transform
        // is a per-column rewrite; append fresh ids past the source range
        // otherwise.
        let id = id
            .or_else(|| source.get(i).map(|c| c.id))
            .unwrap_or(max_id + 1 + i as i64);
        let value = format::decode_column_value(axis_type, value_type, &raw, transform_cube)?;
        let mut col = Column::new(id, Some(value), i as i32);
        if let Some(src) = source.get(i) {
            col.meta = src.meta.clone();
        }
        columns.push(col);
    }
    Ok(columns)
}

/// Materialize the current columns of a reference axis into an ordinary axis
/// and drop the reference meta-properties; cells are unchanged.
pub fn break_axis_reference(cube: &mut Cube, axis_name: &str) -> Result<()> {
    let cube_name = cube.name().to_string();
    let axis = cube.axis_mut(axis_name).ok_or_else(|| {
        CubeError::illegal_argument(format!(
            "axis '{}' does not exist on cube '{}'",
            axis_name, cube_name
        ))
    })?;
    if !axis.is_reference() {
        return Err(CubeError::illegal_argument(format!(
            "axis '{}' on cube '{}' is not a reference axis",
            axis_name, cube_name
        )));
    }
    axis.break_reference();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::evaluate::{ExpressionEvaluator, Output};
    use crate::model::app_id::{ApplicationId, ReleaseStatus, HEAD};
    use crate::model::axis::{AxisRef, ReferenceSpec};
    use crate::model::value::{ColumnOrder, Expression, Scalar};
    use crate::store::memory::MemoryPersister;
    use crate::store::traits::Persister;
    use std::sync::Arc;

    fn app(name: &str) -> ApplicationId {
        ApplicationId::new("acme", name, "1.0.0", ReleaseStatus::Snapshot, HEAD).unwrap()
    }

    fn ages_cube(app_id: &ApplicationId) -> Cube {
        let mut cube = Cube::new("ages", app_id.clone()).unwrap();
        cube.add_axis(
            "age",
            AxisType::Discrete,
            AxisValueType::Long,
            ColumnOrder::Sorted,
            false,
        )
        .unwrap();
        for v in [1, 2, 3] {
            cube.add_column("age", Some(ColumnValue::Scalar(Scalar::Long(v)))).unwrap();
        }
        cube
    }

    fn referencing_cube(name: &str, app_id: &ApplicationId, source: &ApplicationId) -> Cube {
        let mut cube = Cube::new(name, app_id.clone()).unwrap();
        cube.add_axis(
            "age",
            AxisType::Discrete,
            AxisValueType::Long,
            ColumnOrder::Sorted,
            false,
        )
        .unwrap();
        cube.axis_mut("age").unwrap().reference = Some(ReferenceSpec {
            source: AxisRef {
                app: source.clone(),
                cube: "ages".into(),
                axis: "age".into(),
            },
            transform: None,
        });
        cube
    }

    #[tokio::test]
    async fn reference_axis_borrows_columns_with_ids_preserved() {
        let persister = Arc::new(MemoryPersister::new());
        let library = app("library");
        let consumer = app("consumer");
        persister.update_cube(&library, &ages_cube(&library), "t").await.unwrap();
        persister
            .update_cube(&consumer, &referencing_cube("pointing", &consumer, &library), "t")
            .await
            .unwrap();

        let reg = Registry::with_default_evaluator(persister.clone());
        let resolved = reg.get_cube(&consumer, "pointing").await.unwrap().unwrap();
        let source = reg.get_cube(&library, "ages").await.unwrap().unwrap();

        let resolved_ids: Vec<i64> =
            resolved.axis("age").unwrap().columns().iter().map(|c| c.id).collect();
        let source_ids: Vec<i64> =
            source.axis("age").unwrap().columns().iter().map(|c| c.id).collect();
        assert_eq!(resolved_ids, source_ids);
    }

    #[tokio::test]
    async fn chained_references_resolve_transparently() {
        let persister = Arc::new(MemoryPersister::new());
        let library = app("library");
        let middle = app("middle");
        let consumer = app("consumer");
        persister.update_cube(&library, &ages_cube(&library), "t").await.unwrap();
        // middle/ages references library/ages; consumer references middle.
        persister
            .update_cube(&middle, &referencing_cube("ages", &middle, &library), "t")
            .await
            .unwrap();
        persister
            .update_cube(&consumer, &referencing_cube("pointing", &consumer, &middle), "t")
            .await
            .unwrap();

        let reg = Registry::with_default_evaluator(persister);
        let resolved = reg.get_cube(&consumer, "pointing").await.unwrap().unwrap();
        assert_eq!(resolved.axis("age").unwrap().size(), 3);
    }

    #[tokio::test]
    async fn reference_cycles_are_an_illegal_state() {
        let persister = Arc::new(MemoryPersister::new());
        let a = app("appa");
        let b = app("appb");
        // a/ages references b/ages which references a/ages.
        persister
            .update_cube(&a, &referencing_cube("ages", &a, &b), "t")
            .await
            .unwrap();
        persister
            .update_cube(&b, &referencing_cube("ages", &b, &a), "t")
            .await
            .unwrap();

        let reg = Registry::with_default_evaluator(persister);
        let err = reg.get_cube(&a, "ages").await.unwrap_err();
        assert!(matches!(err, CubeError::IllegalState(_)));
    }

    #[tokio::test]
    async fn missing_source_is_an_illegal_state_naming_the_cube() {
        let persister = Arc::new(MemoryPersister::new());
        let library = app("library");
        let consumer = app("consumer");
        persister
            .update_cube(&consumer, &referencing_cube("pointing", &consumer, &library), "t")
            .await
            .unwrap();
        let reg = Registry::with_default_evaluator(persister);
        match reg.get_cube(&consumer, "pointing").await.unwrap_err() {
            CubeError::IllegalState(msg) => assert!(msg.contains("ages")),
            other => panic!("expected IllegalState, got {:?}", other),
        }
    }

    /// Doubles every incoming column value; stands in for a rule engine.
    struct DoublingEvaluator;

    impl ExpressionEvaluator for DoublingEvaluator {
        fn evaluate(
            &self,
            _expr: &Expression,
            input: &Coordinate,
            _cube_name: &str,
        ) -> crate::error::Result<serde_json::Value> {
            let columns = input
                .get("columns")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            Ok(serde_json::Value::Array(
                columns
                    .iter()
                    .map(|v| serde_json::json!(v.as_i64().unwrap_or(0) * 2))
                    .collect(),
            ))
        }
    }

    fn transform_cube(app_id: &ApplicationId) -> Cube {
        let mut cube = Cube::new("doubler", app_id.clone()).unwrap();
        cube.add_axis(
            METHOD_AXIS,
            AxisType::Rule,
            AxisValueType::Expression,
            ColumnOrder::Display,
            false,
        )
        .unwrap();
        cube.add_column_with_name(
            METHOD_AXIS,
            Some(ColumnValue::Rule(Expression::from_source("double"))),
            Some("double"),
        )
        .unwrap();
        cube
    }

    #[tokio::test]
    async fn transform_rewrites_columns_and_cells_round_trip() {
        let persister = Arc::new(MemoryPersister::new());
        let library = app("library");
        let consumer = app("consumer");
        persister.update_cube(&library, &ages_cube(&library), "t").await.unwrap();
        persister.update_cube(&library, &transform_cube(&library), "t").await.unwrap();

        let mut pointing = referencing_cube("pointing", &consumer, &library);
        pointing.axis_mut("age").unwrap().reference.as_mut().unwrap().transform =
            Some(TransformRef {
                app: library.clone(),
                cube: "doubler".into(),
                method: "double".into(),
            });
        persister.update_cube(&consumer, &pointing, "t").await.unwrap();

        let reg = Registry::new(persister.clone(), Arc::new(DoublingEvaluator));
        let resolved = reg.get_cube(&consumer, "pointing").await.unwrap().unwrap();
        let values: Vec<String> = resolved
            .axis("age")
            .unwrap()
            .columns()
            .iter()
            .map(|c| c.value_string())
            .collect();
        assert_eq!(values, vec!["2", "4", "6"]);

        // Cell set at age=4 on the transformed axis round-trips, including
        // through serialization, and the reference flag survives.
        let mut editable = (*resolved).clone();
        let mut coord = Coordinate::new();
        coord.insert("age".into(), serde_json::json!(4));
        editable
            .set_cell(&coord, CellValue::Json(serde_json::json!("young")))
            .unwrap();
        let mut out = Output::new();
        let got = editable.get_cell(&coord, &mut out, reg.evaluator()).unwrap();
        assert_eq!(got, Some(serde_json::json!("young")));

        let json = format::to_json(&editable, false);
        let back = format::from_json(&json, consumer.clone()).unwrap();
        assert!(back.axis("age").unwrap().is_reference());
        assert_eq!(back.num_cells(), 1);
        let mut out = Output::new();
        let got = back.get_cell(&coord, &mut out, reg.evaluator()).unwrap();
        assert_eq!(got, Some(serde_json::json!("young")));
    }

    #[tokio::test]
    async fn break_reference_materializes_columns() {
        let persister = Arc::new(MemoryPersister::new());
        let library = app("library");
        let consumer = app("consumer");
        persister.update_cube(&library, &ages_cube(&library), "t").await.unwrap();
        persister
            .update_cube(&consumer, &referencing_cube("pointing", &consumer, &library), "t")
            .await
            .unwrap();
        let reg = Registry::with_default_evaluator(persister);
        let resolved = reg.get_cube(&consumer, "pointing").await.unwrap().unwrap();

        let mut broken = (*resolved).clone();
        break_axis_reference(&mut broken, "age").unwrap();
        assert!(!broken.axis("age").unwrap().is_reference());
        assert_eq!(broken.axis("age").unwrap().size(), 3);
        // Serialized form no longer carries reference meta.
        let json = format::to_json(&broken, false);
        assert!(json["axes"][0].get("metaProperties").is_none());
    }
}
