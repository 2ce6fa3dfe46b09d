//! The STAT table.

use types::{Fixed, MajorMinor, Tag};

use crate::write::{write_count, OffsetLen, TableWrite, TableWriter};

/// The style attributes table.
#[derive(Clone, Debug, Default)]
pub struct Stat {
    pub design_axes: Vec<AxisRecord>,
    pub axis_values: Vec<AxisValue>,
    pub elided_fallback_name_id: u16,
}

#[derive(Clone, Debug)]
pub struct AxisRecord {
    pub axis_tag: Tag,
    pub axis_name_id: u16,
    pub axis_ordering: u16,
}

/// Flag bits shared by all axis value formats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AxisValueFlags(u16);

impl AxisValueFlags {
    pub const OLDER_SIBLING_FONT_ATTRIBUTE: AxisValueFlags = AxisValueFlags(0x0001);
    pub const ELIDABLE_AXIS_VALUE_NAME: AxisValueFlags = AxisValueFlags(0x0002);

    pub fn empty() -> Self {
        AxisValueFlags(0)
    }

    pub fn to_bits(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for AxisValueFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        AxisValueFlags(self.0 | rhs.0)
    }
}

/// An axis value record, formats 1 through 4.
#[derive(Clone, Debug)]
pub enum AxisValue {
    Format1 {
        axis_index: u16,
        flags: AxisValueFlags,
        value_name_id: u16,
        value: Fixed,
    },
    Format2 {
        axis_index: u16,
        flags: AxisValueFlags,
        value_name_id: u16,
        nominal_value: Fixed,
        range_min_value: Fixed,
        range_max_value: Fixed,
    },
    Format3 {
        axis_index: u16,
        flags: AxisValueFlags,
        value_name_id: u16,
        value: Fixed,
        linked_value: Fixed,
    },
    Format4 {
        flags: AxisValueFlags,
        value_name_id: u16,
        axis_values: Vec<(u16, Fixed)>,
    },
}

impl Stat {
    fn compute_version(&self) -> MajorMinor {
        if self
            .axis_values
            .iter()
            .any(|value| matches!(value, AxisValue::Format4 { .. }))
        {
            MajorMinor::VERSION_1_2
        } else {
            MajorMinor::VERSION_1_1
        }
    }
}

impl TableWrite for Stat {
    fn write(&self, writer: &mut TableWriter) {
        self.compute_version().write(writer);
        // designAxisSize
        8u16.write(writer);
        write_count(self.design_axes.len(), writer);
        let axes = DesignAxesArray(&self.design_axes);
        writer.write_offset_nullable(
            (!self.design_axes.is_empty()).then_some(&axes as &dyn TableWrite),
            OffsetLen::Offset32,
        );
        write_count(self.axis_values.len(), writer);
        let values = AxisValueArray(&self.axis_values);
        writer.write_offset_nullable(
            (!self.axis_values.is_empty()).then_some(&values as &dyn TableWrite),
            OffsetLen::Offset32,
        );
        self.elided_fallback_name_id.write(writer);
    }
}

struct DesignAxesArray<'a>(&'a [AxisRecord]);

impl TableWrite for DesignAxesArray<'_> {
    fn write(&self, writer: &mut TableWriter) {
        for axis in self.0 {
            axis.axis_tag.write(writer);
            axis.axis_name_id.write(writer);
            axis.axis_ordering.write(writer);
        }
    }
}

/// The axis value offsets array; value offsets are relative to this table.
struct AxisValueArray<'a>(&'a [AxisValue]);

impl TableWrite for AxisValueArray<'_> {
    fn write(&self, writer: &mut TableWriter) {
        for value in self.0 {
            writer.write_offset(value, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for AxisValue {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            AxisValue::Format1 {
                axis_index,
                flags,
                value_name_id,
                value,
            } => {
                1u16.write(writer);
                axis_index.write(writer);
                flags.to_bits().write(writer);
                value_name_id.write(writer);
                value.write(writer);
            }
            AxisValue::Format2 {
                axis_index,
                flags,
                value_name_id,
                nominal_value,
                range_min_value,
                range_max_value,
            } => {
                2u16.write(writer);
                axis_index.write(writer);
                flags.to_bits().write(writer);
                value_name_id.write(writer);
                nominal_value.write(writer);
                range_min_value.write(writer);
                range_max_value.write(writer);
            }
            AxisValue::Format3 {
                axis_index,
                flags,
                value_name_id,
                value,
                linked_value,
            } => {
                3u16.write(writer);
                axis_index.write(writer);
                flags.to_bits().write(writer);
                value_name_id.write(writer);
                value.write(writer);
                linked_value.write(writer);
            }
            AxisValue::Format4 {
                flags,
                value_name_id,
                axis_values,
            } => {
                4u16.write(writer);
                write_count(axis_values.len(), writer);
                flags.to_bits().write(writer);
                value_name_id.write(writer);
                for (axis_index, value) in axis_values {
                    axis_index.write(writer);
                    value.write(writer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::dump_table;

    #[test]
    fn version_bumps_for_format_4() {
        let mut stat = Stat {
            design_axes: vec![AxisRecord {
                axis_tag: Tag::new(b"wght"),
                axis_name_id: 256,
                axis_ordering: 0,
            }],
            axis_values: vec![AxisValue::Format1 {
                axis_index: 0,
                flags: AxisValueFlags::ELIDABLE_AXIS_VALUE_NAME,
                value_name_id: 257,
                value: Fixed::from_f64(400.0),
            }],
            elided_fallback_name_id: 2,
        };
        assert_eq!(stat.compute_version(), MajorMinor::VERSION_1_1);
        stat.axis_values.push(AxisValue::Format4 {
            flags: AxisValueFlags::empty(),
            value_name_id: 258,
            axis_values: vec![(0, Fixed::from_f64(700.0))],
        });
        assert_eq!(stat.compute_version(), MajorMinor::VERSION_1_2);
        let bytes = dump_table(&stat).unwrap();
        assert_eq!(&bytes[..4], &[0, 1, 0, 2]);
    }
}
