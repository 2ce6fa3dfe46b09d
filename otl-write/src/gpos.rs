//! The GPOS table and its subtables.

use types::{GlyphId16, MajorMinor};

use crate::layout::{
    subtable_type, table_newtype, ChainedSequenceContextFormat3, ClassDef, CoverageTable,
    FeatureList, Lookup, LookupList, ScriptList, SequenceContextFormat3,
};
use crate::write::{write_count, OffsetLen, TableWrite, TableWriter};

/// The glyph positioning table.
#[derive(Clone, Debug, Default)]
pub struct Gpos {
    pub script_list: ScriptList,
    pub feature_list: FeatureList,
    pub lookup_list: PositionLookupList,
}

/// A GPOS lookup list table.
pub type PositionLookupList = LookupList<PositionLookup>;

/// A lookup in the GPOS table.
#[derive(Clone, Debug)]
pub enum PositionLookup {
    Single(Lookup<SinglePos>),
    Pair(Lookup<PairPos>),
    Cursive(Lookup<CursivePosFormat1>),
    MarkToBase(Lookup<MarkBasePosFormat1>),
    MarkToLig(Lookup<MarkLigPosFormat1>),
    MarkToMark(Lookup<MarkMarkPosFormat1>),
    Contextual(Lookup<PositionSequenceContext>),
    ChainContextual(Lookup<PositionChainContext>),
}

impl TableWrite for Gpos {
    fn write(&self, writer: &mut TableWriter) {
        MajorMinor::VERSION_1_0.write(writer);
        writer.write_offset(&self.script_list, OffsetLen::Offset16);
        writer.write_offset(&self.feature_list, OffsetLen::Offset16);
        writer.write_offset(&self.lookup_list, OffsetLen::Offset16);
    }
}

impl PositionLookup {
    /// Toggle extension wrapping; applied uniformly to the whole lookup.
    pub fn set_use_extension(&mut self, value: bool) {
        match self {
            PositionLookup::Single(lookup) => lookup.use_extension = value,
            PositionLookup::Pair(lookup) => lookup.use_extension = value,
            PositionLookup::Cursive(lookup) => lookup.use_extension = value,
            PositionLookup::MarkToBase(lookup) => lookup.use_extension = value,
            PositionLookup::MarkToLig(lookup) => lookup.use_extension = value,
            PositionLookup::MarkToMark(lookup) => lookup.use_extension = value,
            PositionLookup::Contextual(lookup) => lookup.use_extension = value,
            PositionLookup::ChainContextual(lookup) => lookup.use_extension = value,
        }
    }
}

impl TableWrite for PositionLookup {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            PositionLookup::Single(lookup) => lookup.write(writer),
            PositionLookup::Pair(lookup) => lookup.write(writer),
            PositionLookup::Cursive(lookup) => lookup.write(writer),
            PositionLookup::MarkToBase(lookup) => lookup.write(writer),
            PositionLookup::MarkToLig(lookup) => lookup.write(writer),
            PositionLookup::MarkToMark(lookup) => lookup.write(writer),
            PositionLookup::Contextual(lookup) => lookup.write(writer),
            PositionLookup::ChainContextual(lookup) => lookup.write(writer),
        }
    }
}

/// The fields present in a [ValueRecord].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueFormat(u16);

impl ValueFormat {
    pub const X_PLACEMENT: ValueFormat = ValueFormat(0x0001);
    pub const Y_PLACEMENT: ValueFormat = ValueFormat(0x0002);
    pub const X_ADVANCE: ValueFormat = ValueFormat(0x0004);
    pub const Y_ADVANCE: ValueFormat = ValueFormat(0x0008);

    pub fn empty() -> Self {
        ValueFormat(0)
    }

    pub fn to_bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ValueFormat) -> bool {
        self.0 & other.0 == other.0
    }

    /// The encoded size in bytes of a record with these fields.
    pub fn encoded_size(self) -> usize {
        self.0.count_ones() as usize * 2
    }
}

impl std::ops::BitOr for ValueFormat {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        ValueFormat(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ValueFormat {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

/// A positioning adjustment.
///
/// Fields left `None` are absent from the encoded record unless an explicit
/// format forces them to be written as zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ValueRecord {
    pub x_placement: Option<i16>,
    pub y_placement: Option<i16>,
    pub x_advance: Option<i16>,
    pub y_advance: Option<i16>,
}

impl ValueRecord {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_x_advance(x_advance: i16) -> Self {
        ValueRecord {
            x_advance: Some(x_advance),
            ..Default::default()
        }
    }

    /// The format describing the populated fields.
    pub fn format(&self) -> ValueFormat {
        let mut format = ValueFormat::empty();
        if self.x_placement.is_some() {
            format |= ValueFormat::X_PLACEMENT;
        }
        if self.y_placement.is_some() {
            format |= ValueFormat::Y_PLACEMENT;
        }
        if self.x_advance.is_some() {
            format |= ValueFormat::X_ADVANCE;
        }
        if self.y_advance.is_some() {
            format |= ValueFormat::Y_ADVANCE;
        }
        format
    }

    /// Write the fields selected by `format`, defaulting absent ones to 0.
    pub fn write_with_format(&self, format: ValueFormat, writer: &mut TableWriter) {
        if format.contains(ValueFormat::X_PLACEMENT) {
            self.x_placement.unwrap_or_default().write(writer);
        }
        if format.contains(ValueFormat::Y_PLACEMENT) {
            self.y_placement.unwrap_or_default().write(writer);
        }
        if format.contains(ValueFormat::X_ADVANCE) {
            self.x_advance.unwrap_or_default().write(writer);
        }
        if format.contains(ValueFormat::Y_ADVANCE) {
            self.y_advance.unwrap_or_default().write(writer);
        }
    }
}

/// An anchor point on a glyph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnchorTable {
    Format1 { x: i16, y: i16 },
    Format2 { x: i16, y: i16, anchor_point: u16 },
    /// Device-adjusted anchor; the device offsets are written null.
    Format3 { x: i16, y: i16 },
}

impl TableWrite for AnchorTable {
    fn write(&self, writer: &mut TableWriter) {
        match *self {
            AnchorTable::Format1 { x, y } => {
                1u16.write(writer);
                x.write(writer);
                y.write(writer);
            }
            AnchorTable::Format2 { x, y, anchor_point } => {
                2u16.write(writer);
                x.write(writer);
                y.write(writer);
                anchor_point.write(writer);
            }
            AnchorTable::Format3 { x, y } => {
                3u16.write(writer);
                x.write(writer);
                y.write(writer);
                writer.write_offset_nullable(None, OffsetLen::Offset16);
                writer.write_offset_nullable(None, OffsetLen::Offset16);
            }
        }
    }
}

/// A single adjustment (type 1) subtable.
#[derive(Clone, Debug)]
pub enum SinglePos {
    Format1(SinglePosFormat1),
    Format2(SinglePosFormat2),
}

#[derive(Clone, Debug)]
pub struct SinglePosFormat1 {
    pub coverage: CoverageTable,
    pub value: ValueRecord,
}

#[derive(Clone, Debug)]
pub struct SinglePosFormat2 {
    pub coverage: CoverageTable,
    pub value_format: ValueFormat,
    pub values: Vec<ValueRecord>,
}

impl SinglePos {
    /// One value applied to every covered glyph.
    pub fn format_1(coverage: CoverageTable, value: ValueRecord) -> Self {
        SinglePos::Format1(SinglePosFormat1 { coverage, value })
    }

    /// A value per covered glyph; the format is the union of all records.
    pub fn format_2(coverage: CoverageTable, values: Vec<ValueRecord>) -> Self {
        let value_format = values
            .iter()
            .fold(ValueFormat::empty(), |acc, val| acc | val.format());
        SinglePos::Format2(SinglePosFormat2 {
            coverage,
            value_format,
            values,
        })
    }
}

impl TableWrite for SinglePos {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            SinglePos::Format1(table) => {
                1u16.write(writer);
                writer.write_offset(&table.coverage, OffsetLen::Offset16);
                let format = table.value.format();
                format.to_bits().write(writer);
                table.value.write_with_format(format, writer);
            }
            SinglePos::Format2(table) => {
                2u16.write(writer);
                writer.write_offset(&table.coverage, OffsetLen::Offset16);
                table.value_format.to_bits().write(writer);
                write_count(table.values.len(), writer);
                for value in &table.values {
                    value.write_with_format(table.value_format, writer);
                }
            }
        }
    }
}

/// A pair adjustment (type 2) subtable.
#[derive(Clone, Debug)]
pub enum PairPos {
    Format1(PairPosFormat1),
    Format2(PairPosFormat2),
}

/// Enumerated glyph pairs.
#[derive(Clone, Debug)]
pub struct PairPosFormat1 {
    pub coverage: CoverageTable,
    pub value_format1: ValueFormat,
    pub value_format2: ValueFormat,
    pub pair_sets: Vec<PairSet>,
}

#[derive(Clone, Debug, Default)]
pub struct PairSet {
    pub pair_value_records: Vec<PairValueRecord>,
}

#[derive(Clone, Debug)]
pub struct PairValueRecord {
    pub second_glyph: GlyphId16,
    pub value_record1: ValueRecord,
    pub value_record2: ValueRecord,
}

/// A class matrix.
#[derive(Clone, Debug)]
pub struct PairPosFormat2 {
    pub coverage: CoverageTable,
    pub value_format1: ValueFormat,
    pub value_format2: ValueFormat,
    pub class_def1: ClassDef,
    pub class_def2: ClassDef,
    pub class1_count: u16,
    pub class2_count: u16,
    pub class1_records: Vec<Class1Record>,
}

#[derive(Clone, Debug, Default)]
pub struct Class1Record {
    pub class2_records: Vec<Class2Record>,
}

#[derive(Clone, Debug, Default)]
pub struct Class2Record {
    pub value_record1: ValueRecord,
    pub value_record2: ValueRecord,
}

impl PairPos {
    pub fn format_1(coverage: CoverageTable, pair_sets: Vec<PairSet>) -> Self {
        let (value_format1, value_format2) = pair_sets
            .iter()
            .flat_map(|set| set.pair_value_records.iter())
            .fold(
                (ValueFormat::empty(), ValueFormat::empty()),
                |(acc1, acc2), rec| {
                    (
                        acc1 | rec.value_record1.format(),
                        acc2 | rec.value_record2.format(),
                    )
                },
            );
        PairPos::Format1(PairPosFormat1 {
            coverage,
            value_format1,
            value_format2,
            pair_sets,
        })
    }

    pub fn format_2(
        coverage: CoverageTable,
        class_def1: ClassDef,
        class_def2: ClassDef,
        class1_records: Vec<Class1Record>,
    ) -> Self {
        let (value_format1, value_format2) = class1_records
            .iter()
            .flat_map(|rec| rec.class2_records.iter())
            .fold(
                (ValueFormat::empty(), ValueFormat::empty()),
                |(acc1, acc2), rec| {
                    (
                        acc1 | rec.value_record1.format(),
                        acc2 | rec.value_record2.format(),
                    )
                },
            );
        let class1_count = class1_records.len() as u16;
        let class2_count = class1_records
            .first()
            .map(|rec| rec.class2_records.len() as u16)
            .unwrap_or_default();
        PairPos::Format2(PairPosFormat2 {
            coverage,
            value_format1,
            value_format2,
            class_def1,
            class_def2,
            class1_count,
            class2_count,
            class1_records,
        })
    }
}

impl TableWrite for PairPos {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            PairPos::Format1(table) => {
                1u16.write(writer);
                writer.write_offset(&table.coverage, OffsetLen::Offset16);
                table.value_format1.to_bits().write(writer);
                table.value_format2.to_bits().write(writer);
                write_count(table.pair_sets.len(), writer);
                for set in &table.pair_sets {
                    writer.write_offset(
                        &PairSetWithFormat {
                            pair_set: set,
                            value_format1: table.value_format1,
                            value_format2: table.value_format2,
                        },
                        OffsetLen::Offset16,
                    );
                }
            }
            PairPos::Format2(table) => {
                2u16.write(writer);
                writer.write_offset(&table.coverage, OffsetLen::Offset16);
                table.value_format1.to_bits().write(writer);
                table.value_format2.to_bits().write(writer);
                writer.write_offset(&table.class_def1, OffsetLen::Offset16);
                writer.write_offset(&table.class_def2, OffsetLen::Offset16);
                table.class1_count.write(writer);
                table.class2_count.write(writer);
                for class1 in &table.class1_records {
                    for class2 in &class1.class2_records {
                        class2
                            .value_record1
                            .write_with_format(table.value_format1, writer);
                        class2
                            .value_record2
                            .write_with_format(table.value_format2, writer);
                    }
                }
            }
        }
    }
}

/// Pair sets need their parent's value formats to know which fields to encode.
struct PairSetWithFormat<'a> {
    pair_set: &'a PairSet,
    value_format1: ValueFormat,
    value_format2: ValueFormat,
}

impl TableWrite for PairSetWithFormat<'_> {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.pair_set.pair_value_records.len(), writer);
        for record in &self.pair_set.pair_value_records {
            record.second_glyph.write(writer);
            record
                .value_record1
                .write_with_format(self.value_format1, writer);
            record
                .value_record2
                .write_with_format(self.value_format2, writer);
        }
    }
}

/// A cursive attachment (type 3) subtable.
#[derive(Clone, Debug, Default)]
pub struct CursivePosFormat1 {
    pub coverage: CoverageTable,
    pub entry_exit_records: Vec<EntryExitRecord>,
}

#[derive(Clone, Debug, Default)]
pub struct EntryExitRecord {
    pub entry_anchor: Option<AnchorTable>,
    pub exit_anchor: Option<AnchorTable>,
}

impl TableWrite for CursivePosFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.coverage, OffsetLen::Offset16);
        write_count(self.entry_exit_records.len(), writer);
        // anchor offsets are relative to the subtable, not the record
        for record in &self.entry_exit_records {
            writer.write_offset_nullable(
                record.entry_anchor.as_ref().map(|x| x as &dyn TableWrite),
                OffsetLen::Offset16,
            );
            writer.write_offset_nullable(
                record.exit_anchor.as_ref().map(|x| x as &dyn TableWrite),
                OffsetLen::Offset16,
            );
        }
    }
}

/// A mark array with per-mark class and anchor.
#[derive(Clone, Debug, Default)]
pub struct MarkArray {
    pub mark_records: Vec<MarkRecord>,
}

#[derive(Clone, Debug)]
pub struct MarkRecord {
    pub mark_class: u16,
    pub mark_anchor: AnchorTable,
}

impl MarkArray {
    pub fn new(mark_records: Vec<MarkRecord>) -> Self {
        MarkArray { mark_records }
    }
}

impl TableWrite for MarkArray {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.mark_records.len(), writer);
        for record in &self.mark_records {
            record.mark_class.write(writer);
            writer.write_offset(&record.mark_anchor, OffsetLen::Offset16);
        }
    }
}

/// An anchor matrix: one row per glyph, one column per mark class.
///
/// Shared by the base array, mark2 array, and ligature component records.
#[derive(Clone, Debug, Default)]
pub struct AnchorMatrix {
    pub rows: Vec<Vec<Option<AnchorTable>>>,
}

impl TableWrite for AnchorMatrix {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.rows.len(), writer);
        for row in &self.rows {
            for anchor in row {
                writer.write_offset_nullable(
                    anchor.as_ref().map(|x| x as &dyn TableWrite),
                    OffsetLen::Offset16,
                );
            }
        }
    }
}

/// A mark-to-base attachment (type 4) subtable.
#[derive(Clone, Debug, Default)]
pub struct MarkBasePosFormat1 {
    pub mark_coverage: CoverageTable,
    pub base_coverage: CoverageTable,
    pub mark_class_count: u16,
    pub mark_array: MarkArray,
    pub base_array: AnchorMatrix,
}

impl TableWrite for MarkBasePosFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.mark_coverage, OffsetLen::Offset16);
        writer.write_offset(&self.base_coverage, OffsetLen::Offset16);
        self.mark_class_count.write(writer);
        writer.write_offset(&self.mark_array, OffsetLen::Offset16);
        writer.write_offset(&self.base_array, OffsetLen::Offset16);
    }
}

/// A mark-to-ligature attachment (type 5) subtable.
#[derive(Clone, Debug, Default)]
pub struct MarkLigPosFormat1 {
    pub mark_coverage: CoverageTable,
    pub ligature_coverage: CoverageTable,
    pub mark_class_count: u16,
    pub mark_array: MarkArray,
    pub ligature_array: LigatureArray,
}

/// One attach table per ligature glyph.
#[derive(Clone, Debug, Default)]
pub struct LigatureArray {
    pub ligature_attaches: Vec<AnchorMatrix>,
}

impl TableWrite for MarkLigPosFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.mark_coverage, OffsetLen::Offset16);
        writer.write_offset(&self.ligature_coverage, OffsetLen::Offset16);
        self.mark_class_count.write(writer);
        writer.write_offset(&self.mark_array, OffsetLen::Offset16);
        writer.write_offset(&self.ligature_array, OffsetLen::Offset16);
    }
}

impl TableWrite for LigatureArray {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.ligature_attaches.len(), writer);
        for attach in &self.ligature_attaches {
            writer.write_offset(attach, OffsetLen::Offset16);
        }
    }
}

/// A mark-to-mark attachment (type 6) subtable.
#[derive(Clone, Debug, Default)]
pub struct MarkMarkPosFormat1 {
    pub mark1_coverage: CoverageTable,
    pub mark2_coverage: CoverageTable,
    pub mark_class_count: u16,
    pub mark1_array: MarkArray,
    pub mark2_array: AnchorMatrix,
}

impl TableWrite for MarkMarkPosFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.mark1_coverage, OffsetLen::Offset16);
        writer.write_offset(&self.mark2_coverage, OffsetLen::Offset16);
        self.mark_class_count.write(writer);
        writer.write_offset(&self.mark1_array, OffsetLen::Offset16);
        writer.write_offset(&self.mark2_array, OffsetLen::Offset16);
    }
}

table_newtype!(PositionSequenceContext, SequenceContextFormat3);
table_newtype!(PositionChainContext, ChainedSequenceContextFormat3);

subtable_type!(gpos, SinglePos, 1);
subtable_type!(gpos, PairPos, 2);
subtable_type!(gpos, CursivePosFormat1, 3);
subtable_type!(gpos, MarkBasePosFormat1, 4);
subtable_type!(gpos, MarkLigPosFormat1, 5);
subtable_type!(gpos, MarkMarkPosFormat1, 6);
subtable_type!(gpos, PositionSequenceContext, 7);
subtable_type!(gpos, PositionChainContext, 8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::dump_table;

    #[test]
    fn value_record_format() {
        let record = ValueRecord::with_x_advance(-50);
        assert_eq!(record.format(), ValueFormat::X_ADVANCE);
        assert_eq!(record.format().encoded_size(), 2);

        let record = ValueRecord {
            x_placement: Some(1),
            y_placement: Some(2),
            x_advance: Some(3),
            y_advance: Some(4),
        };
        assert_eq!(record.format().to_bits(), 0x000F);
    }

    #[test]
    fn single_pos_format_1_bytes() {
        let coverage = [GlyphId16::new(7)].into_iter().collect();
        let table = SinglePos::format_1(coverage, ValueRecord::with_x_advance(120));
        let bytes = dump_table(&table).unwrap();
        assert_eq!(
            bytes,
            [0, 1, 0, 8, 0, 4, 0, 120, /* coverage */ 0, 1, 0, 1, 0, 7]
        );
    }

    #[test]
    fn anchor_format_2_bytes() {
        let anchor = AnchorTable::Format2 {
            x: -10,
            y: 250,
            anchor_point: 3,
        };
        let bytes = dump_table(&anchor).unwrap();
        assert_eq!(bytes, [0, 2, 0xFF, 0xF6, 0, 250, 0, 3]);
    }

    #[test]
    fn pair_set_uses_union_format() {
        let pair_sets = vec![PairSet {
            pair_value_records: vec![PairValueRecord {
                second_glyph: GlyphId16::new(4),
                value_record1: ValueRecord::with_x_advance(-30),
                value_record2: ValueRecord::default(),
            }],
        }];
        let coverage = [GlyphId16::new(2)].into_iter().collect();
        let PairPos::Format1(table) = PairPos::format_1(coverage, pair_sets) else {
            panic!("expected format 1");
        };
        assert_eq!(table.value_format1, ValueFormat::X_ADVANCE);
        assert!(table.value_format2.is_empty());
    }
}
