use crate::model::value::ColumnValue;
use std::collections::BTreeMap;

/// Meta-properties hang off cubes, axes and columns alike. BTreeMap keeps
/// iteration order stable for fingerprinting.
pub type MetaMap = BTreeMap<String, serde_json::Value>;

/// Meta-property key carrying a column's display name (required on rule
/// columns, optional elsewhere).
pub const NAME_META: &str = "name";

const SEQ_BITS: u32 = 48;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;

/// Pack `(axis_id: 16 bits, sequence: 48 bits)` into a column id. Ids are
/// globally unique inside a cube and survive serialization.
pub fn pack_column_id(axis_id: u16, seq: i64) -> i64 {
    ((axis_id as i64) << SEQ_BITS) | (seq & SEQ_MASK)
}

/// The axis a column id belongs to.
pub fn axis_of_column_id(id: i64) -> u16 {
    (id >> SEQ_BITS) as u16
}

pub fn sequence_of_column_id(id: i64) -> i64 {
    id & SEQ_MASK
}

/// An axis partition. `value == None` marks the default column, which always
/// sorts last (`display_order == i32::MAX`).
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: i64,
    pub value: Option<ColumnValue>,
    pub display_order: i32,
    pub meta: MetaMap,
}

impl Column {
    pub fn new(id: i64, value: Option<ColumnValue>, display_order: i32) -> Self {
        let display_order = if value.is_none() {
            i32::MAX
        } else {
            display_order
        };
        Column {
            id,
            value,
            display_order,
            meta: MetaMap::new(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.value.is_none()
    }

    /// Display name from meta-properties (rule columns are addressed by it).
    pub fn column_name(&self) -> Option<&str> {
        self.meta.get(NAME_META).and_then(|v| v.as_str())
    }

    pub fn set_column_name(&mut self, name: impl Into<String>) {
        self.meta
            .insert(NAME_META.to_string(), serde_json::Value::String(name.into()));
    }

    pub fn value_string(&self) -> String {
        match &self.value {
            Some(v) => v.to_canonical_string(),
            None => "default".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::Scalar;

    #[test]
    fn id_packing_round_trips() {
        let id = pack_column_id(7, 1_000_042);
        assert_eq!(axis_of_column_id(id), 7);
        assert_eq!(sequence_of_column_id(id), 1_000_042);
        assert!(id > 0);
    }

    #[test]
    fn default_column_display_order_is_pinned_last() {
        let c = Column::new(1, None, 3);
        assert!(c.is_default());
        assert_eq!(c.display_order, i32::MAX);
        let c = Column::new(2, Some(ColumnValue::Scalar(Scalar::Long(9))), 3);
        assert_eq!(c.display_order, 3);
    }

    #[test]
    fn column_name_reads_meta() {
        let mut c = Column::new(1, Some(ColumnValue::Scalar(Scalar::Long(1))), 0);
        assert!(c.column_name().is_none());
        c.set_column_name("init");
        assert_eq!(c.column_name(), Some("init"));
    }
}
