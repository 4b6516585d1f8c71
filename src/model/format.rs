use crate::error::{CubeError, Result};
use crate::model::app_id::{ApplicationId, ReleaseStatus};
use crate::model::axis::{Axis, AxisRef, ReferenceSpec, TransformRef};
use crate::model::column::{Column, MetaMap};
use crate::model::cube::{CellValue, Cube};
use crate::model::value::{
    parse_date, parse_point, AxisType, AxisValueType, ColumnOrder, ColumnValue, Expression, Range,
    RangeSet, Scalar, SetElement,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const REF_TENANT: &str = "referenceTenant";
const REF_APP: &str = "referenceApp";
const REF_VERSION: &str = "referenceVersion";
const REF_STATUS: &str = "referenceStatus";
const REF_BRANCH: &str = "referenceBranch";
const REF_CUBE: &str = "referenceCubeName";
const REF_AXIS: &str = "referenceAxisName";
const TX_TENANT: &str = "transformTenant";
const TX_APP: &str = "transformApp";
const TX_VERSION: &str = "transformVersion";
const TX_STATUS: &str = "transformStatus";
const TX_BRANCH: &str = "transformBranch";
const TX_CUBE: &str = "transformCubeName";
const TX_METHOD: &str = "transformMethodName";
const IS_REF: &str = "isRef";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CubeDto {
    ncube: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_cell_value: Option<serde_json::Value>,
    axes: Vec<AxisDto>,
    cells: Vec<CellDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta_properties: Option<MetaMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index_format: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AxisDto {
    name: String,
    #[serde(rename = "type")]
    axis_type: String,
    value_type: String,
    has_default: bool,
    preferred_order: String,
    id: u16,
    columns: Vec<ColumnDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta_properties: Option<MetaMap>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnDto {
    id: i64,
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta_properties: Option<MetaMap>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellDto {
    id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    cell_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<bool>,
}

/// Serialize a cube to its wire shape. `index_format` selects the indexed
/// cell-id encoding (`{colId: axisName}`) over the plain id list.
pub fn to_json(cube: &Cube, index_format: bool) -> serde_json::Value {
    let axes = cube.axes().iter().map(axis_to_dto).collect();
    let cells = cube
        .cells()
        .iter()
        .map(|(ids, value)| {
            let id = if index_format {
                let mut map = serde_json::Map::new();
                for col_id in &ids.0 {
                    let axis_name = cube
                        .axes()
                        .iter()
                        .find(|a| a.column_by_id(*col_id).is_some())
                        .map(|a| a.name().to_string())
                        .unwrap_or_default();
                    map.insert(col_id.to_string(), serde_json::Value::String(axis_name));
                }
                serde_json::Value::Object(map)
            } else {
                serde_json::Value::Array(
                    ids.0.iter().map(|i| serde_json::json!(i)).collect(),
                )
            };
            cell_to_dto(id, value)
        })
        .collect();

    let dto = CubeDto {
        ncube: cube.name().to_string(),
        default_cell_value: cube.default_cell_value.as_ref().map(default_cell_to_json),
        axes,
        cells,
        sha1: Some(cube.sha1()),
        meta_properties: if cube.meta.is_empty() {
            None
        } else {
            Some(cube.meta.clone())
        },
        index_format: if index_format { Some(true) } else { None },
    };
    serde_json::to_value(dto).expect("cube dto serializes")
}

/// Rebuild a cube from its wire shape. The application coordinate is not part
/// of the wire contract, so the caller supplies it.
pub fn from_json(value: &serde_json::Value, app_id: ApplicationId) -> Result<Cube> {
    let dto: CubeDto = serde_json::from_value(value.clone())
        .map_err(|e| CubeError::illegal_argument(format!("malformed cube json: {}", e)))?;
    let mut cube = Cube::new(dto.ncube, app_id)?;
    cube.default_cell_value = dto
        .default_cell_value
        .as_ref()
        .map(default_cell_from_json)
        .transpose()?;
    if let Some(meta) = dto.meta_properties {
        cube.meta = meta;
    }
    for axis_dto in dto.axes {
        cube.attach_axis(axis_from_dto(axis_dto)?)?;
    }
    for cell in dto.cells {
        let ids = decode_cell_ids(&cell.id)?;
        let value = cell_value_from_dto(&cell)?;
        cube.set_cell_by_ids(&ids, value)?;
    }
    Ok(cube)
}

fn axis_to_dto(axis: &Axis) -> AxisDto {
    let mut meta = axis.meta.clone();
    if let Some(spec) = &axis.reference {
        meta.insert(IS_REF.into(), serde_json::json!(true));
        meta.insert(REF_TENANT.into(), serde_json::json!(spec.source.app.tenant));
        meta.insert(REF_APP.into(), serde_json::json!(spec.source.app.app));
        meta.insert(REF_VERSION.into(), serde_json::json!(spec.source.app.version));
        meta.insert(
            REF_STATUS.into(),
            serde_json::json!(spec.source.app.status.to_string()),
        );
        meta.insert(REF_BRANCH.into(), serde_json::json!(spec.source.app.branch));
        meta.insert(REF_CUBE.into(), serde_json::json!(spec.source.cube));
        meta.insert(REF_AXIS.into(), serde_json::json!(spec.source.axis));
        if let Some(tx) = &spec.transform {
            meta.insert(TX_TENANT.into(), serde_json::json!(tx.app.tenant));
            meta.insert(TX_APP.into(), serde_json::json!(tx.app.app));
            meta.insert(TX_VERSION.into(), serde_json::json!(tx.app.version));
            meta.insert(TX_STATUS.into(), serde_json::json!(tx.app.status.to_string()));
            meta.insert(TX_BRANCH.into(), serde_json::json!(tx.app.branch));
            meta.insert(TX_CUBE.into(), serde_json::json!(tx.cube));
            meta.insert(TX_METHOD.into(), serde_json::json!(tx.method));
        }
    }
    AxisDto {
        name: axis.name().to_string(),
        axis_type: axis.axis_type().to_string(),
        value_type: axis.value_type().to_string(),
        has_default: axis.has_default(),
        preferred_order: match axis.order() {
            ColumnOrder::Sorted => "SORTED".into(),
            ColumnOrder::Display => "DISPLAY".into(),
        },
        id: axis.id(),
        columns: axis
            .columns()
            .iter()
            .map(|c| ColumnDto {
                id: c.id,
                value: c.value.as_ref().map(encode_column_value),
                display_order: if c.is_default() {
                    None
                } else {
                    Some(c.display_order)
                },
                meta_properties: if c.meta.is_empty() {
                    None
                } else {
                    Some(c.meta.clone())
                },
            })
            .collect(),
        meta_properties: if meta.is_empty() { None } else { Some(meta) },
    }
}

fn axis_from_dto(dto: AxisDto) -> Result<Axis> {
    let axis_type = AxisType::parse(&dto.axis_type)?;
    let value_type = AxisValueType::parse(&dto.value_type)?;
    let order = match dto.preferred_order.to_ascii_uppercase().as_str() {
        "SORTED" => ColumnOrder::Sorted,
        "DISPLAY" => ColumnOrder::Display,
        other => {
            return Err(CubeError::illegal_argument(format!(
                "'{}' is not a column order",
                other
            )))
        }
    };
    let mut axis = Axis::new(dto.id, &dto.name, axis_type, value_type, order, false)?;

    let mut meta = dto.meta_properties.unwrap_or_default();
    if meta.remove(IS_REF).is_some_and(|v| v.as_bool() == Some(true)) {
        axis.reference = Some(reference_from_meta(&mut meta, &dto.name)?);
    }
    axis.meta = meta;

    let mut columns = Vec::with_capacity(dto.columns.len());
    for col in dto.columns {
        let value = col
            .value
            .as_ref()
            .map(|v| decode_column_value(axis.axis_type(), axis.value_type(), v, &dto.name))
            .transpose()?;
        let mut built = Column::new(col.id, value, col.display_order.unwrap_or(0));
        if let Some(m) = col.meta_properties {
            built.meta = m;
        }
        columns.push(built);
    }
    axis.set_columns_raw(columns)?;
    if dto.has_default && axis.default_column().is_none() {
        axis.add_column(None)?;
    }
    Ok(axis)
}

fn reference_from_meta(meta: &mut MetaMap, axis_name: &str) -> Result<ReferenceSpec> {
    let has_transform = meta.contains_key(TX_CUBE);
    let mut take = |key: &str| -> Result<String> {
        meta.remove(key)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| {
                CubeError::illegal_state(format!(
                    "reference axis '{}' is missing meta-property '{}'",
                    axis_name, key
                ))
            })
    };
    let source_app = ApplicationId::new(
        take(REF_TENANT)?,
        take(REF_APP)?,
        take(REF_VERSION)?,
        ReleaseStatus::parse(&take(REF_STATUS)?)?,
        take(REF_BRANCH)?,
    )?;
    let source = AxisRef {
        app: source_app,
        cube: take(REF_CUBE)?,
        axis: take(REF_AXIS)?,
    };
    let transform = if has_transform {
        let app = ApplicationId::new(
            take(TX_TENANT)?,
            take(TX_APP)?,
            take(TX_VERSION)?,
            ReleaseStatus::parse(&take(TX_STATUS)?)?,
            take(TX_BRANCH)?,
        )?;
        Some(TransformRef {
            app,
            cube: take(TX_CUBE)?,
            method: take(TX_METHOD)?,
        })
    } else {
        None
    };
    Ok(ReferenceSpec { source, transform })
}

pub fn encode_column_value(v: &ColumnValue) -> serde_json::Value {
    match v {
        ColumnValue::Scalar(s) => encode_scalar(s),
        ColumnValue::Range(r) => {
            serde_json::json!([encode_scalar(&r.low), encode_scalar(&r.high)])
        }
        ColumnValue::Set(set) => serde_json::Value::Array(
            set.elements
                .iter()
                .map(|e| match e {
                    SetElement::Value(s) => encode_scalar(s),
                    SetElement::Range(r) => {
                        serde_json::json!([encode_scalar(&r.low), encode_scalar(&r.high)])
                    }
                })
                .collect(),
        ),
        ColumnValue::LatLon(p) => serde_json::json!(p.to_canonical_string()),
        ColumnValue::Point3(p) => serde_json::json!(p.to_canonical_string()),
        ColumnValue::Rule(e) => serde_json::json!(e.to_canonical_string()),
    }
}

fn encode_scalar(s: &Scalar) -> serde_json::Value {
    match s {
        Scalar::Long(v) => serde_json::json!(v),
        Scalar::Double(v) => serde_json::json!(v),
        Scalar::Decimal(d) => serde_json::json!(d.to_string()),
        Scalar::Str(v) => serde_json::json!(v),
        Scalar::Date(d) => serde_json::json!(d.to_rfc3339()),
    }
}

pub fn decode_column_value(
    axis_type: AxisType,
    value_type: AxisValueType,
    v: &serde_json::Value,
    axis: &str,
) -> Result<ColumnValue> {
    match axis_type {
        AxisType::Rule => match v {
            serde_json::Value::String(s) => Ok(ColumnValue::Rule(Expression::parse(s))),
            _ => Err(CubeError::illegal_argument(format!(
                "rule column on axis '{}' must be a string expression",
                axis
            ))),
        },
        AxisType::Range => decode_range(value_type, v, axis).map(ColumnValue::Range),
        AxisType::Set => {
            let items = v.as_array().ok_or_else(|| {
                CubeError::illegal_argument(format!("set column on axis '{}' must be an array", axis))
            })?;
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                if item.is_array() {
                    elements.push(SetElement::Range(decode_range(value_type, item, axis)?));
                } else {
                    elements.push(SetElement::Value(decode_scalar(value_type, item, axis)?));
                }
            }
            Ok(ColumnValue::Set(RangeSet::new(elements)?))
        }
        AxisType::Nearest if value_type == AxisValueType::Comparable => match v {
            serde_json::Value::String(s) => parse_point(s, axis),
            _ => decode_scalar(value_type, v, axis).map(ColumnValue::Scalar),
        },
        AxisType::Discrete | AxisType::Nearest => {
            decode_scalar(value_type, v, axis).map(ColumnValue::Scalar)
        }
    }
}

fn decode_range(
    value_type: AxisValueType,
    v: &serde_json::Value,
    axis: &str,
) -> Result<Range> {
    let bounds = v.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
        CubeError::illegal_argument(format!(
            "range column on axis '{}' must be a two-element array",
            axis
        ))
    })?;
    Range::new(
        decode_scalar(value_type, &bounds[0], axis)?,
        decode_scalar(value_type, &bounds[1], axis)?,
    )
}

fn decode_scalar(
    value_type: AxisValueType,
    v: &serde_json::Value,
    axis: &str,
) -> Result<Scalar> {
    let bad = || {
        CubeError::illegal_argument(format!(
            "unable to decode '{}' as {} on axis '{}'",
            v, value_type, axis
        ))
    };
    match v {
        serde_json::Value::Number(n) => match value_type {
            AxisValueType::Long => n.as_i64().map(Scalar::Long).ok_or_else(bad),
            AxisValueType::Double | AxisValueType::Comparable => {
                n.as_f64().map(Scalar::Double).ok_or_else(bad)
            }
            AxisValueType::BigDecimal => Decimal::from_str(&n.to_string())
                .map(Scalar::Decimal)
                .map_err(|_| bad()),
            _ => Err(bad()),
        },
        serde_json::Value::String(s) => match value_type {
            AxisValueType::String => Ok(Scalar::Str(s.clone())),
            AxisValueType::Date => parse_date(s).map(Scalar::Date).ok_or_else(bad),
            AxisValueType::Long => s.parse::<i64>().map(Scalar::Long).map_err(|_| bad()),
            AxisValueType::Double => s.parse::<f64>().map(Scalar::Double).map_err(|_| bad()),
            AxisValueType::BigDecimal => Decimal::from_str(s)
                .map(Scalar::Decimal)
                .map_err(|_| bad()),
            AxisValueType::Comparable => {
                if let Some(d) = parse_date(s) {
                    Ok(Scalar::Date(d))
                } else {
                    Ok(Scalar::Str(s.clone()))
                }
            }
            _ => Err(bad()),
        },
        _ => Err(bad()),
    }
}

fn cell_to_dto(id: serde_json::Value, value: &CellValue) -> CellDto {
    match value {
        CellValue::Json(v) => CellDto {
            id,
            value: Some(v.clone()),
            cell_type: None,
            url: None,
            cache: None,
        },
        CellValue::Cmd(e) => CellDto {
            id,
            value: e.cmd.as_ref().map(|c| serde_json::json!(c)),
            cell_type: Some("exp".into()),
            url: e.url.clone(),
            cache: if e.cacheable { Some(true) } else { None },
        },
    }
}

fn cell_value_from_dto(cell: &CellDto) -> Result<CellValue> {
    if cell.cell_type.as_deref() == Some("exp") || cell.url.is_some() {
        Ok(CellValue::Cmd(Expression {
            cmd: cell.value.as_ref().and_then(|v| v.as_str().map(String::from)),
            url: cell.url.clone(),
            cacheable: cell.cache.unwrap_or(false),
        }))
    } else {
        Ok(CellValue::Json(
            cell.value.clone().unwrap_or(serde_json::Value::Null),
        ))
    }
}

fn default_cell_to_json(value: &CellValue) -> serde_json::Value {
    match value {
        CellValue::Json(v) => v.clone(),
        CellValue::Cmd(e) => serde_json::json!({
            "type": "exp",
            "value": e.cmd,
            "url": e.url,
            "cache": e.cacheable,
        }),
    }
}

fn default_cell_from_json(v: &serde_json::Value) -> Result<CellValue> {
    if let Some(obj) = v.as_object() {
        if obj.get("type").and_then(|t| t.as_str()) == Some("exp") {
            return Ok(CellValue::Cmd(Expression {
                cmd: obj.get("value").and_then(|c| c.as_str().map(String::from)),
                url: obj.get("url").and_then(|u| u.as_str().map(String::from)),
                cacheable: obj.get("cache").and_then(|c| c.as_bool()).unwrap_or(false),
            }));
        }
    }
    Ok(CellValue::Json(v.clone()))
}

fn decode_cell_ids(id: &serde_json::Value) -> Result<Vec<i64>> {
    match id {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|i| {
                i.as_i64().ok_or_else(|| {
                    CubeError::illegal_argument(format!("cell id '{}' is not an integer", i))
                })
            })
            .collect(),
        serde_json::Value::Object(map) => map
            .keys()
            .map(|k| {
                k.parse::<i64>().map_err(|_| {
                    CubeError::illegal_argument(format!("cell id '{}' is not an integer", k))
                })
            })
            .collect(),
        other => Err(CubeError::illegal_argument(format!(
            "cell id '{}' must be a list or an indexed map",
            other
        ))),
    }
}
