//! The BASE table.

use types::{MajorMinor, Tag};

use crate::write::{write_count, OffsetLen, TableWrite, TableWriter};

/// The baseline table.
#[derive(Clone, Debug, Default)]
pub struct Base {
    pub horiz_axis: Option<Axis>,
    pub vert_axis: Option<Axis>,
}

/// Baseline data for one writing direction.
#[derive(Clone, Debug, Default)]
pub struct Axis {
    pub base_tag_list: Option<BaseTagList>,
    pub base_script_list: BaseScriptList,
}

/// The baseline tags an axis defines values for, sorted ascending.
#[derive(Clone, Debug, Default)]
pub struct BaseTagList {
    pub baseline_tags: Vec<Tag>,
}

#[derive(Clone, Debug, Default)]
pub struct BaseScriptList {
    pub base_script_records: Vec<BaseScriptRecord>,
}

#[derive(Clone, Debug)]
pub struct BaseScriptRecord {
    pub base_script_tag: Tag,
    pub base_script: BaseScript,
}

#[derive(Clone, Debug, Default)]
pub struct BaseScript {
    pub base_values: Option<BaseValues>,
}

/// Per-script baseline coordinates, parallel to the axis tag list.
#[derive(Clone, Debug, Default)]
pub struct BaseValues {
    pub default_baseline_index: u16,
    pub base_coords: Vec<BaseCoord>,
}

/// A single baseline coordinate (format 1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BaseCoord {
    pub coordinate: i16,
}

impl TableWrite for Base {
    fn write(&self, writer: &mut TableWriter) {
        MajorMinor::VERSION_1_0.write(writer);
        writer.write_offset_nullable(
            self.horiz_axis.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        writer.write_offset_nullable(
            self.vert_axis.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
    }
}

impl TableWrite for Axis {
    fn write(&self, writer: &mut TableWriter) {
        writer.write_offset_nullable(
            self.base_tag_list.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        writer.write_offset(&self.base_script_list, OffsetLen::Offset16);
    }
}

impl TableWrite for BaseTagList {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.baseline_tags.len(), writer);
        self.baseline_tags.write(writer);
    }
}

impl TableWrite for BaseScriptList {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.base_script_records.len(), writer);
        for record in &self.base_script_records {
            record.base_script_tag.write(writer);
            writer.write_offset(&record.base_script, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for BaseScript {
    fn write(&self, writer: &mut TableWriter) {
        writer.write_offset_nullable(
            self.base_values.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        // defaultMinMaxOffset, baseLangSysCount
        0u16.write(writer);
        0u16.write(writer);
    }
}

impl TableWrite for BaseValues {
    fn write(&self, writer: &mut TableWriter) {
        self.default_baseline_index.write(writer);
        write_count(self.base_coords.len(), writer);
        for coord in &self.base_coords {
            writer.write_offset(coord, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for BaseCoord {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        self.coordinate.write(writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::dump_table;

    #[test]
    fn horizontal_axis_only() {
        let base = Base {
            horiz_axis: Some(Axis {
                base_tag_list: Some(BaseTagList {
                    baseline_tags: vec![Tag::new(b"ideo"), Tag::new(b"romn")],
                }),
                base_script_list: BaseScriptList {
                    base_script_records: vec![BaseScriptRecord {
                        base_script_tag: Tag::new(b"latn"),
                        base_script: BaseScript {
                            base_values: Some(BaseValues {
                                default_baseline_index: 1,
                                base_coords: vec![
                                    BaseCoord { coordinate: -120 },
                                    BaseCoord { coordinate: 0 },
                                ],
                            }),
                        },
                    }],
                },
            }),
            vert_axis: None,
        };
        let bytes = dump_table(&base).unwrap();
        // version, horizAxisOffset, null vertAxisOffset
        assert_eq!(&bytes[..8], &[0, 1, 0, 0, 0, 8, 0, 0]);
    }
}
