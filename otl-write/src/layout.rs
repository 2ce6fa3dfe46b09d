//! OpenType layout: shared structures for GSUB and GPOS.

use std::collections::BTreeMap;

use types::{GlyphId16, Tag, Uint24};

use crate::write::{write_count, OffsetLen, TableWrite, TableWriter};

/// The lookup flag word shared by all lookup kinds.
///
/// The high byte carries the mark-attachment class filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LookupFlag(u16);

impl LookupFlag {
    pub const RIGHT_TO_LEFT: LookupFlag = LookupFlag(0x0001);
    pub const IGNORE_BASE_GLYPHS: LookupFlag = LookupFlag(0x0002);
    pub const IGNORE_LIGATURES: LookupFlag = LookupFlag(0x0004);
    pub const IGNORE_MARKS: LookupFlag = LookupFlag(0x0008);
    pub const USE_MARK_FILTERING_SET: LookupFlag = LookupFlag(0x0010);

    pub fn empty() -> Self {
        LookupFlag(0)
    }

    pub fn from_bits_truncate(bits: u16) -> Self {
        // low five flag bits plus the mark attachment class byte
        LookupFlag(bits & 0xFF1F)
    }

    pub fn to_bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: LookupFlag) -> bool {
        self.0 & other.0 == other.0
    }

    /// The mark attachment class filter, if any.
    pub fn mark_attachment_class(self) -> Option<u16> {
        match self.0 >> 8 {
            0 => None,
            class => Some(class),
        }
    }

    pub fn set_mark_attachment_class(&mut self, class: u16) {
        debug_assert!(class <= 0xFF);
        self.0 = (self.0 & 0x00FF) | (class << 8);
    }
}

impl std::ops::BitOr for LookupFlag {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        LookupFlag(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LookupFlag {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

/// The numeric lookup type for a layout subtable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupType {
    Gsub(u16),
    Gpos(u16),
}

impl LookupType {
    pub const GSUB_EXT_TYPE: u16 = 7;
    pub const GPOS_EXT_TYPE: u16 = 9;

    pub fn to_raw(self) -> u16 {
        match self {
            LookupType::Gsub(val) | LookupType::Gpos(val) => val,
        }
    }

    /// The extension lookup type for this table.
    pub fn promote(self) -> Self {
        match self {
            LookupType::Gsub(_) => LookupType::Gsub(Self::GSUB_EXT_TYPE),
            LookupType::Gpos(_) => LookupType::Gpos(Self::GPOS_EXT_TYPE),
        }
    }
}

/// A utility trait attaching the numeric lookup type to subtable types.
pub trait LookupSubtable {
    /// The lookup type of this layout subtable.
    const TYPE: LookupType;
}

/// A macro to implement the [LookupSubtable] trait.
macro_rules! subtable_type {
    (gsub, $ty:ty, $val:expr) => {
        impl $crate::layout::LookupSubtable for $ty {
            const TYPE: $crate::layout::LookupType = $crate::layout::LookupType::Gsub($val);
        }
    };
    (gpos, $ty:ty, $val:expr) => {
        impl $crate::layout::LookupSubtable for $ty {
            const TYPE: $crate::layout::LookupType = $crate::layout::LookupType::Gpos($val);
        }
    };
}

/// A macro to define a newtype around a shared table, so that the same
/// structure (sequence/chain contexts) can carry different lookup types in
/// GSUB and GPOS.
macro_rules! table_newtype {
    ($name:ident, $inner:ident) => {
        #[derive(Clone, Debug, Default)]
        pub struct $name(pub $inner);

        impl std::ops::Deref for $name {
            type Target = $inner;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl $crate::write::TableWrite for $name {
            fn write(&self, writer: &mut $crate::write::TableWriter) {
                self.0.write(writer)
            }
        }

        impl From<$inner> for $name {
            fn from(src: $inner) -> $name {
                $name(src)
            }
        }
    };
}

pub(crate) use subtable_type;
pub(crate) use table_newtype;

/// A lookup table, generic over the subtable kind.
#[derive(Clone, Debug, Default)]
pub struct Lookup<T> {
    pub lookup_flag: LookupFlag,
    pub subtables: Vec<T>,
    pub mark_filtering_set: Option<u16>,
    /// If set, each subtable is written behind a type 7/9 extension record.
    pub use_extension: bool,
}

impl<T> Lookup<T> {
    pub fn new(lookup_flag: LookupFlag, subtables: Vec<T>, mark_filtering_set: Option<u16>) -> Self {
        Lookup {
            lookup_flag,
            subtables,
            mark_filtering_set,
            use_extension: false,
        }
    }
}

impl<T: LookupSubtable + TableWrite> TableWrite for Lookup<T> {
    fn write(&self, writer: &mut TableWriter) {
        let type_ = if self.use_extension {
            T::TYPE.promote()
        } else {
            T::TYPE
        };
        type_.to_raw().write(writer);
        let mut flag = self.lookup_flag;
        if self.mark_filtering_set.is_some() {
            flag |= LookupFlag::USE_MARK_FILTERING_SET;
        }
        flag.to_bits().write(writer);
        write_count(self.subtables.len(), writer);
        for subtable in &self.subtables {
            if self.use_extension {
                writer.write_offset(&ExtensionSubtable(subtable), OffsetLen::Offset16);
            } else {
                writer.write_offset(subtable, OffsetLen::Offset16);
            }
        }
        if let Some(set) = self.mark_filtering_set {
            set.write(writer);
        }
    }
}

/// An extension record lifting a subtable behind a 32-bit offset.
struct ExtensionSubtable<'a, T>(&'a T);

impl<T: LookupSubtable + TableWrite> TableWrite for ExtensionSubtable<'_, T> {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        T::TYPE.to_raw().write(writer);
        writer.write_offset(self.0, OffsetLen::Offset32);
    }
}

/// The list of lookups for one table, in final index order.
#[derive(Clone, Debug)]
pub struct LookupList<T> {
    pub lookups: Vec<T>,
}

impl<T> Default for LookupList<T> {
    fn default() -> Self {
        LookupList {
            lookups: Vec::new(),
        }
    }
}

impl<T> LookupList<T> {
    pub fn new(lookups: Vec<T>) -> Self {
        LookupList { lookups }
    }
}

impl<T: TableWrite> TableWrite for LookupList<T> {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.lookups.len(), writer);
        for lookup in &self.lookups {
            writer.write_offset(lookup, OffsetLen::Offset16);
        }
    }
}

/// One lookup applied at a position in a context rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SequenceLookupRecord {
    pub sequence_index: u16,
    pub lookup_list_index: u16,
}

impl TableWrite for SequenceLookupRecord {
    fn write(&self, writer: &mut TableWriter) {
        self.sequence_index.write(writer);
        self.lookup_list_index.write(writer);
    }
}

/// A coverage-based (format 3) sequence context.
#[derive(Clone, Debug, Default)]
pub struct SequenceContextFormat3 {
    pub coverages: Vec<CoverageTable>,
    pub seq_lookup_records: Vec<SequenceLookupRecord>,
}

impl TableWrite for SequenceContextFormat3 {
    fn write(&self, writer: &mut TableWriter) {
        3u16.write(writer);
        write_count(self.coverages.len(), writer);
        write_count(self.seq_lookup_records.len(), writer);
        for coverage in &self.coverages {
            writer.write_offset(coverage, OffsetLen::Offset16);
        }
        self.seq_lookup_records.write(writer);
    }
}

/// A coverage-based (format 3) chained sequence context.
///
/// Backtrack coverages are stored closest-first, i.e. already reversed from
/// the authored order.
#[derive(Clone, Debug, Default)]
pub struct ChainedSequenceContextFormat3 {
    pub backtrack_coverages: Vec<CoverageTable>,
    pub input_coverages: Vec<CoverageTable>,
    pub lookahead_coverages: Vec<CoverageTable>,
    pub seq_lookup_records: Vec<SequenceLookupRecord>,
}

impl TableWrite for ChainedSequenceContextFormat3 {
    fn write(&self, writer: &mut TableWriter) {
        3u16.write(writer);
        write_count(self.backtrack_coverages.len(), writer);
        for coverage in &self.backtrack_coverages {
            writer.write_offset(coverage, OffsetLen::Offset16);
        }
        write_count(self.input_coverages.len(), writer);
        for coverage in &self.input_coverages {
            writer.write_offset(coverage, OffsetLen::Offset16);
        }
        write_count(self.lookahead_coverages.len(), writer);
        for coverage in &self.lookahead_coverages {
            writer.write_offset(coverage, OffsetLen::Offset16);
        }
        write_count(self.seq_lookup_records.len(), writer);
        self.seq_lookup_records.write(writer);
    }
}

/// Set of glyphs a subtable applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CoverageTable {
    Format1(CoverageFormat1),
    Format2(CoverageFormat2),
}

impl Default for CoverageTable {
    fn default() -> Self {
        CoverageTable::Format1(CoverageFormat1 {
            glyph_array: Vec::new(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CoverageFormat1 {
    pub glyph_array: Vec<GlyphId16>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CoverageFormat2 {
    pub range_records: Vec<RangeRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RangeRecord {
    pub start_glyph_id: GlyphId16,
    pub end_glyph_id: GlyphId16,
    pub start_coverage_index: u16,
}

impl CoverageTable {
    pub fn iter(&self) -> impl Iterator<Item = GlyphId16> + '_ {
        let (one, two) = match self {
            Self::Format1(table) => (Some(table.glyph_array.iter().copied()), None),
            Self::Format2(table) => (
                None,
                Some(table.range_records.iter().flat_map(|rcd| {
                    (rcd.start_glyph_id.to_u16()..=rcd.end_glyph_id.to_u16()).map(GlyphId16::new)
                })),
            ),
        };
        one.into_iter().flatten().chain(two.into_iter().flatten())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Format1(table) => table.glyph_array.len(),
            Self::Format2(table) => table
                .range_records
                .iter()
                .map(|rcd| {
                    rcd.end_glyph_id
                        .to_u16()
                        .saturating_sub(rcd.start_glyph_id.to_u16()) as usize
                        + 1
                })
                .sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TableWrite for CoverageTable {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            Self::Format1(table) => {
                1u16.write(writer);
                write_count(table.glyph_array.len(), writer);
                table.glyph_array.write(writer);
            }
            Self::Format2(table) => {
                2u16.write(writer);
                write_count(table.range_records.len(), writer);
                for record in &table.range_records {
                    record.start_glyph_id.write(writer);
                    record.end_glyph_id.write(writer);
                    record.start_coverage_index.write(writer);
                }
            }
        }
    }
}

/// A builder for [CoverageTable]s.
///
/// This will choose the best format for the included glyphs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverageTableBuilder {
    // invariant: is always sorted
    glyphs: Vec<GlyphId16>,
}

impl FromIterator<GlyphId16> for CoverageTableBuilder {
    fn from_iter<T: IntoIterator<Item = GlyphId16>>(iter: T) -> Self {
        CoverageTableBuilder::from_glyphs(iter.into_iter().collect())
    }
}

impl FromIterator<GlyphId16> for CoverageTable {
    fn from_iter<T: IntoIterator<Item = GlyphId16>>(iter: T) -> Self {
        iter.into_iter().collect::<CoverageTableBuilder>().build()
    }
}

impl CoverageTableBuilder {
    /// Create a new builder from a vec of `GlyphId16`.
    pub fn from_glyphs(mut glyphs: Vec<GlyphId16>) -> Self {
        glyphs.sort_unstable();
        glyphs.dedup();
        CoverageTableBuilder { glyphs }
    }

    /// Add a glyph, returning its coverage index.
    ///
    /// If the glyph is already present this returns the current index.
    pub fn add(&mut self, glyph: GlyphId16) -> u16 {
        match self.glyphs.binary_search(&glyph) {
            Ok(ix) => ix as u16,
            Err(ix) => {
                self.glyphs.insert(ix, glyph);
                ix.try_into().unwrap()
            }
        }
    }

    /// Convert into the appropriate [CoverageTable] variant.
    pub fn build(self) -> CoverageTable {
        let format2_len = 4 + iter_ranges(&self.glyphs).count() * 6;
        let format1_len = 4 + self.glyphs.len() * 2;
        if format2_len < format1_len {
            CoverageTable::Format2(CoverageFormat2 {
                range_records: iter_ranges(&self.glyphs).collect(),
            })
        } else {
            CoverageTable::Format1(CoverageFormat1 {
                glyph_array: self.glyphs,
            })
        }
    }
}

/// Iterate range records for a sorted glyph array.
fn iter_ranges(glyphs: &[GlyphId16]) -> impl Iterator<Item = RangeRecord> + '_ {
    let mut cur_range = glyphs.first().copied().map(|g| (g, g));
    let mut len = 0u16;
    let mut iter = glyphs.iter().skip(1).copied();

    #[allow(clippy::while_let_on_iterator)]
    std::iter::from_fn(move || {
        while let Some(glyph) = iter.next() {
            match cur_range {
                None => return None,
                Some((a, b)) if are_sequential(b, glyph) => cur_range = Some((a, glyph)),
                Some((a, b)) => {
                    let result = RangeRecord {
                        start_glyph_id: a,
                        end_glyph_id: b,
                        start_coverage_index: len,
                    };
                    cur_range = Some((glyph, glyph));
                    len += 1 + b.to_u16().saturating_sub(a.to_u16());
                    return Some(result);
                }
            }
        }
        cur_range
            .take()
            .map(|(start_glyph_id, end_glyph_id)| RangeRecord {
                start_glyph_id,
                end_glyph_id,
                start_coverage_index: len,
            })
    })
}

fn are_sequential(gid1: GlyphId16, gid2: GlyphId16) -> bool {
    gid2.to_u16().saturating_sub(gid1.to_u16()) == 1
}

/// Glyph class assignments; glyphs not listed are class 0.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClassDef {
    Format1 {
        start_glyph_id: GlyphId16,
        class_value_array: Vec<u16>,
    },
    Format2 {
        class_range_records: Vec<ClassRangeRecord>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassRangeRecord {
    pub start_glyph_id: GlyphId16,
    pub end_glyph_id: GlyphId16,
    pub class: u16,
}

impl ClassDef {
    /// Return the class for the provided glyph (0 if unassigned).
    pub fn get(&self, glyph: GlyphId16) -> u16 {
        match self {
            ClassDef::Format1 {
                start_glyph_id,
                class_value_array,
            } => glyph
                .to_u16()
                .checked_sub(start_glyph_id.to_u16())
                .and_then(|idx| class_value_array.get(idx as usize))
                .copied()
                .unwrap_or(0),
            ClassDef::Format2 {
                class_range_records,
            } => class_range_records
                .iter()
                .find_map(|rec| {
                    (rec.start_glyph_id <= glyph && glyph <= rec.end_glyph_id).then_some(rec.class)
                })
                .unwrap_or(0),
        }
    }
}

impl TableWrite for ClassDef {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            Self::Format1 {
                start_glyph_id,
                class_value_array,
            } => {
                1u16.write(writer);
                start_glyph_id.write(writer);
                write_count(class_value_array.len(), writer);
                class_value_array.write(writer);
            }
            Self::Format2 {
                class_range_records,
            } => {
                2u16.write(writer);
                write_count(class_range_records.len(), writer);
                for record in class_range_records {
                    record.start_glyph_id.write(writer);
                    record.end_glyph_id.write(writer);
                    record.class.write(writer);
                }
            }
        }
    }
}

/// A builder for [ClassDef] tables.
///
/// This will choose the best format for the included glyphs; class 0 entries
/// are implicit and dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassDefBuilder {
    pub items: BTreeMap<GlyphId16, u16>,
}

impl FromIterator<(GlyphId16, u16)> for ClassDefBuilder {
    fn from_iter<T: IntoIterator<Item = (GlyphId16, u16)>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().filter(|(_, cls)| *cls != 0).collect(),
        }
    }
}

impl ClassDefBuilder {
    fn prefer_format_1(&self) -> bool {
        let first = self.items.keys().next().map(|g| g.to_u16());
        let last = self.items.keys().next_back().map(|g| g.to_u16());
        let len_format1 = 3 + (last.unwrap_or_default() - first.unwrap_or_default()) as usize;
        let len_format2 = 4 + iter_class_ranges(&self.items).count() * 6;
        len_format1 < len_format2
    }

    pub fn build(&self) -> ClassDef {
        if self.prefer_format_1() {
            let first = self.items.keys().next().map(|g| g.to_u16()).unwrap_or(0);
            let last = self.items.keys().next_back().map(|g| g.to_u16());
            let class_value_array = (first..=last.unwrap_or_default())
                .map(|g| self.items.get(&GlyphId16::new(g)).copied().unwrap_or(0))
                .collect();
            ClassDef::Format1 {
                start_glyph_id: self
                    .items
                    .keys()
                    .next()
                    .copied()
                    .unwrap_or(GlyphId16::NOTDEF),
                class_value_array,
            }
        } else {
            ClassDef::Format2 {
                class_range_records: iter_class_ranges(&self.items).collect(),
            }
        }
    }
}

fn iter_class_ranges(
    values: &BTreeMap<GlyphId16, u16>,
) -> impl Iterator<Item = ClassRangeRecord> + '_ {
    let mut iter = values.iter();
    let mut prev = None;

    #[allow(clippy::while_let_on_iterator)]
    std::iter::from_fn(move || {
        while let Some((gid, class)) = iter.next() {
            match prev.take() {
                None => prev = Some((*gid, *gid, *class)),
                Some((start, end, pclass)) if are_sequential(end, *gid) && pclass == *class => {
                    prev = Some((start, *gid, pclass))
                }
                Some((start_glyph_id, end_glyph_id, class_)) => {
                    prev = Some((*gid, *gid, *class));
                    return Some(ClassRangeRecord {
                        start_glyph_id,
                        end_glyph_id,
                        class: class_,
                    });
                }
            }
        }
        prev.take()
            .map(|(start_glyph_id, end_glyph_id, class)| ClassRangeRecord {
                start_glyph_id,
                end_glyph_id,
                class,
            })
    })
}

/// The list of scripts for one table, sorted by tag.
#[derive(Clone, Debug, Default)]
pub struct ScriptList {
    pub script_records: Vec<ScriptRecord>,
}

#[derive(Clone, Debug)]
pub struct ScriptRecord {
    pub script_tag: Tag,
    pub script: Script,
}

#[derive(Clone, Debug, Default)]
pub struct Script {
    pub default_lang_sys: Option<LangSys>,
    pub lang_sys_records: Vec<LangSysRecord>,
}

#[derive(Clone, Debug)]
pub struct LangSysRecord {
    pub lang_sys_tag: Tag,
    pub lang_sys: LangSys,
}

#[derive(Clone, Debug)]
pub struct LangSys {
    pub required_feature_index: u16,
    pub feature_indices: Vec<u16>,
}

impl Default for LangSys {
    fn default() -> Self {
        LangSys {
            required_feature_index: 0xFFFF,
            feature_indices: Vec::new(),
        }
    }
}

impl TableWrite for ScriptList {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.script_records.len(), writer);
        for record in &self.script_records {
            record.script_tag.write(writer);
            writer.write_offset(&record.script, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for Script {
    fn write(&self, writer: &mut TableWriter) {
        writer.write_offset_nullable(
            self.default_lang_sys.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        write_count(self.lang_sys_records.len(), writer);
        for record in &self.lang_sys_records {
            record.lang_sys_tag.write(writer);
            writer.write_offset(&record.lang_sys, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for LangSys {
    fn write(&self, writer: &mut TableWriter) {
        // lookupOrderOffset, reserved
        0u16.write(writer);
        self.required_feature_index.write(writer);
        write_count(self.feature_indices.len(), writer);
        self.feature_indices.write(writer);
    }
}

/// The list of features for one table, in final index order.
#[derive(Clone, Debug, Default)]
pub struct FeatureList {
    pub feature_records: Vec<FeatureRecord>,
}

#[derive(Clone, Debug)]
pub struct FeatureRecord {
    pub feature_tag: Tag,
    pub feature: Feature,
}

#[derive(Clone, Debug, Default)]
pub struct Feature {
    pub feature_params: Option<FeatureParams>,
    pub lookup_list_indices: Vec<u16>,
}

impl TableWrite for FeatureList {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.feature_records.len(), writer);
        for record in &self.feature_records {
            record.feature_tag.write(writer);
            writer.write_offset(&record.feature, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for Feature {
    fn write(&self, writer: &mut TableWriter) {
        writer.write_offset_nullable(
            self.feature_params.as_ref().map(|x| x as &dyn TableWrite),
            OffsetLen::Offset16,
        );
        write_count(self.lookup_list_indices.len(), writer);
        self.lookup_list_indices.write(writer);
    }
}

/// Parameter payloads carried by `size`, `ss##` and `cv##` features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeatureParams {
    Size(SizeParams),
    StylisticSet(StylisticSetParams),
    CharacterVariant(CharacterVariantParams),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeParams {
    /// Design size in decipoints.
    pub design_size: u16,
    pub identifier: u16,
    pub name_entry: u16,
    pub range_start: u16,
    pub range_end: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StylisticSetParams {
    pub ui_name_id: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacterVariantParams {
    pub feat_ui_label_name_id: u16,
    pub feat_ui_tooltip_text_name_id: u16,
    pub sample_text_name_id: u16,
    pub num_named_parameters: u16,
    pub first_param_ui_label_name_id: u16,
    /// Unicode values for the variant characters.
    pub characters: Vec<u32>,
}

impl TableWrite for FeatureParams {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            FeatureParams::Size(params) => {
                params.design_size.write(writer);
                params.identifier.write(writer);
                params.name_entry.write(writer);
                params.range_start.write(writer);
                params.range_end.write(writer);
            }
            FeatureParams::StylisticSet(params) => {
                0u16.write(writer);
                params.ui_name_id.write(writer);
            }
            FeatureParams::CharacterVariant(params) => {
                0u16.write(writer);
                params.feat_ui_label_name_id.write(writer);
                params.feat_ui_tooltip_text_name_id.write(writer);
                params.sample_text_name_id.write(writer);
                params.num_named_parameters.write(writer);
                params.first_param_ui_label_name_id.write(writer);
                write_count(params.characters.len(), writer);
                for chr in &params.characters {
                    Uint24::new(*chr).write(writer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::dump_table;

    fn make_glyph_vec<const N: usize>(gids: [u16; N]) -> Vec<GlyphId16> {
        gids.into_iter().map(GlyphId16::new).collect()
    }

    #[test]
    fn coverage_builder_sorts_and_dedups() {
        let coverage = make_glyph_vec([1u16, 2, 9, 3, 6, 9])
            .into_iter()
            .collect::<CoverageTableBuilder>();
        assert_eq!(coverage.glyphs, make_glyph_vec([1, 2, 3, 6, 9]));
    }

    #[test]
    fn coverage_format_choice() {
        // a dense run compresses to one range
        let coverage: CoverageTable = make_glyph_vec([4u16, 5, 6, 7, 8, 9, 10]).into_iter().collect();
        assert!(matches!(&coverage, CoverageTable::Format2(t) if t.range_records.len() == 1));

        // scattered glyphs stay a glyph list
        let coverage: CoverageTable = make_glyph_vec([2u16, 20, 40, 60]).into_iter().collect();
        assert!(matches!(coverage, CoverageTable::Format1(_)));
    }

    #[test]
    fn coverage_format_2_bytes() {
        let coverage: CoverageTable = make_glyph_vec([4u16, 5, 6, 7]).into_iter().collect();
        let bytes = dump_table(&coverage).unwrap();
        assert_eq!(bytes, [0, 2, 0, 1, 0, 4, 0, 7, 0, 0]);
    }

    #[test]
    fn classdef_builder_zero_implicit() {
        let builder: ClassDefBuilder = [(4u16, 0u16), (5, 1)]
            .map(|(gid, cls)| (GlyphId16::new(gid), cls))
            .into_iter()
            .collect();
        let classdef = builder.build();
        assert_eq!(classdef.get(GlyphId16::new(4)), 0);
        assert_eq!(classdef.get(GlyphId16::new(5)), 1);
        assert_eq!(classdef.get(GlyphId16::new(100)), 0);
    }

    #[test]
    fn lookup_flag_bits() {
        let mut flag = LookupFlag::RIGHT_TO_LEFT | LookupFlag::IGNORE_MARKS;
        flag.set_mark_attachment_class(3);
        assert_eq!(flag.to_bits(), 0x0309);
        assert_eq!(flag.mark_attachment_class(), Some(3));
        assert_eq!(LookupFlag::from_bits_truncate(0xFFFF).to_bits(), 0xFF1F);
    }

    #[test]
    fn lang_sys_bytes() {
        let lang_sys = LangSys {
            required_feature_index: 0xFFFF,
            feature_indices: vec![0, 2],
        };
        let bytes = dump_table(&lang_sys).unwrap();
        assert_eq!(bytes, [0, 0, 0xFF, 0xFF, 0, 2, 0, 0, 0, 2]);
    }
}
