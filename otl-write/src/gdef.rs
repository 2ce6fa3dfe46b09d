//! The GDEF table.

use types::MajorMinor;

use crate::layout::{ClassDef, CoverageTable};
use crate::write::{write_count, OffsetLen, TableWrite, TableWriter};

/// The glyph definition table.
#[derive(Clone, Debug, Default)]
pub struct Gdef {
    pub glyph_class_def: Option<ClassDef>,
    pub attach_list: Option<AttachList>,
    pub lig_caret_list: Option<LigCaretList>,
    pub mark_attach_class_def: Option<ClassDef>,
    pub mark_glyph_sets: Option<MarkGlyphSets>,
}

impl Gdef {
    pub fn is_empty(&self) -> bool {
        self.glyph_class_def.is_none()
            && self.attach_list.is_none()
            && self.lig_caret_list.is_none()
            && self.mark_attach_class_def.is_none()
            && self.mark_glyph_sets.is_none()
    }

    fn compute_version(&self) -> MajorMinor {
        if self.mark_glyph_sets.is_some() {
            MajorMinor::VERSION_1_2
        } else {
            MajorMinor::VERSION_1_0
        }
    }
}

impl TableWrite for Gdef {
    fn write(&self, writer: &mut TableWriter) {
        let version = self.compute_version();
        version.write(writer);
        writer.write_offset_nullable(
            self.glyph_class_def.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        writer.write_offset_nullable(
            self.attach_list.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        writer.write_offset_nullable(
            self.lig_caret_list.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        writer.write_offset_nullable(
            self.mark_attach_class_def
                .as_ref()
                .map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        if version == MajorMinor::VERSION_1_2 {
            writer.write_offset_nullable(
                self.mark_glyph_sets.as_ref().map(|x| x as &dyn TableWrite),
                OffsetLen::Offset16,
            );
        }
    }
}

/// Attachment point indices per covered glyph.
#[derive(Clone, Debug, Default)]
pub struct AttachList {
    pub coverage: CoverageTable,
    pub attach_points: Vec<AttachPoint>,
}

#[derive(Clone, Debug, Default)]
pub struct AttachPoint {
    pub point_indices: Vec<u16>,
}

impl TableWrite for AttachList {
    fn write(&self, writer: &mut TableWriter) {
        writer.write_offset(&self.coverage, OffsetLen::Offset16);
        write_count(self.attach_points.len(), writer);
        for point in &self.attach_points {
            writer.write_offset(point, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for AttachPoint {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.point_indices.len(), writer);
        self.point_indices.write(writer);
    }
}

/// Ligature caret positions per covered glyph.
#[derive(Clone, Debug, Default)]
pub struct LigCaretList {
    pub coverage: CoverageTable,
    pub lig_glyphs: Vec<LigGlyph>,
}

#[derive(Clone, Debug, Default)]
pub struct LigGlyph {
    pub caret_values: Vec<CaretValue>,
}

/// A single ligature caret, by coordinate or by contour point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaretValue {
    Coordinate(i16),
    PointIndex(u16),
}

impl TableWrite for LigCaretList {
    fn write(&self, writer: &mut TableWriter) {
        writer.write_offset(&self.coverage, OffsetLen::Offset16);
        write_count(self.lig_glyphs.len(), writer);
        for glyph in &self.lig_glyphs {
            writer.write_offset(glyph, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for LigGlyph {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.caret_values.len(), writer);
        for caret in &self.caret_values {
            writer.write_offset(caret, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for CaretValue {
    fn write(&self, writer: &mut TableWriter) {
        match *self {
            CaretValue::Coordinate(coordinate) => {
                1u16.write(writer);
                coordinate.write(writer);
            }
            CaretValue::PointIndex(point) => {
                2u16.write(writer);
                point.write(writer);
            }
        }
    }
}

/// The mark glyph sets referenced by `UseMarkFilteringSet`.
#[derive(Clone, Debug, Default)]
pub struct MarkGlyphSets {
    pub coverages: Vec<CoverageTable>,
}

impl TableWrite for MarkGlyphSets {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        write_count(self.coverages.len(), writer);
        for coverage in &self.coverages {
            writer.write_offset(coverage, OffsetLen::Offset32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::dump_table;
    use types::GlyphId16;

    #[test]
    fn version_tracks_mark_glyph_sets() {
        let mut gdef = Gdef::default();
        assert_eq!(gdef.compute_version(), MajorMinor::VERSION_1_0);
        gdef.mark_glyph_sets = Some(MarkGlyphSets {
            coverages: vec![[GlyphId16::new(4)].into_iter().collect()],
        });
        assert_eq!(gdef.compute_version(), MajorMinor::VERSION_1_2);
        let bytes = dump_table(&gdef).unwrap();
        // version 1.2 header carries five offsets
        assert_eq!(&bytes[..4], &[0, 1, 0, 2]);
        assert_eq!(bytes.len(), 4 + 10 + 8 + 6);
    }

    #[test]
    fn caret_value_bytes() {
        assert_eq!(
            dump_table(&CaretValue::Coordinate(-20)).unwrap(),
            [0, 1, 0xFF, 0xEC]
        );
        assert_eq!(
            dump_table(&CaretValue::PointIndex(7)).unwrap(),
            [0, 2, 0, 7]
        );
    }
}
