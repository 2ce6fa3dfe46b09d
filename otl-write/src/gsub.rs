//! The GSUB table and its subtables.

use types::{GlyphId16, MajorMinor};

use crate::layout::{
    subtable_type, table_newtype, ChainedSequenceContextFormat3, CoverageTable, FeatureList,
    Lookup, LookupList, ScriptList,
};
use crate::write::{write_count, OffsetLen, TableWrite, TableWriter};

/// The glyph substitution table.
#[derive(Clone, Debug, Default)]
pub struct Gsub {
    pub script_list: ScriptList,
    pub feature_list: FeatureList,
    pub lookup_list: SubstitutionLookupList,
}

/// A GSUB lookup list table.
pub type SubstitutionLookupList = LookupList<SubstitutionLookup>;

/// A lookup in the GSUB table.
#[derive(Clone, Debug)]
pub enum SubstitutionLookup {
    Single(Lookup<SingleSubst>),
    Multiple(Lookup<MultipleSubstFormat1>),
    Alternate(Lookup<AlternateSubstFormat1>),
    Ligature(Lookup<LigatureSubstFormat1>),
    ChainContextual(Lookup<SubstitutionChainContext>),
    Reverse(Lookup<ReverseChainSingleSubstFormat1>),
}

impl TableWrite for Gsub {
    fn write(&self, writer: &mut TableWriter) {
        MajorMinor::VERSION_1_0.write(writer);
        writer.write_offset(&self.script_list, OffsetLen::Offset16);
        writer.write_offset(&self.feature_list, OffsetLen::Offset16);
        writer.write_offset(&self.lookup_list, OffsetLen::Offset16);
    }
}

impl SubstitutionLookup {
    /// Toggle extension wrapping; applied uniformly to the whole lookup.
    pub fn set_use_extension(&mut self, value: bool) {
        match self {
            SubstitutionLookup::Single(lookup) => lookup.use_extension = value,
            SubstitutionLookup::Multiple(lookup) => lookup.use_extension = value,
            SubstitutionLookup::Alternate(lookup) => lookup.use_extension = value,
            SubstitutionLookup::Ligature(lookup) => lookup.use_extension = value,
            SubstitutionLookup::ChainContextual(lookup) => lookup.use_extension = value,
            SubstitutionLookup::Reverse(lookup) => lookup.use_extension = value,
        }
    }
}

impl TableWrite for SubstitutionLookup {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            SubstitutionLookup::Single(lookup) => lookup.write(writer),
            SubstitutionLookup::Multiple(lookup) => lookup.write(writer),
            SubstitutionLookup::Alternate(lookup) => lookup.write(writer),
            SubstitutionLookup::Ligature(lookup) => lookup.write(writer),
            SubstitutionLookup::ChainContextual(lookup) => lookup.write(writer),
            SubstitutionLookup::Reverse(lookup) => lookup.write(writer),
        }
    }
}

/// A single substitution (type 1) subtable.
#[derive(Clone, Debug)]
pub enum SingleSubst {
    Format1(SingleSubstFormat1),
    Format2(SingleSubstFormat2),
}

impl SingleSubst {
    /// A subtable mapping each covered glyph to glyph id + delta.
    pub fn format_1(coverage: CoverageTable, delta_glyph_id: i16) -> Self {
        SingleSubst::Format1(SingleSubstFormat1 {
            coverage,
            delta_glyph_id,
        })
    }

    /// A subtable listing a substitute per covered glyph.
    pub fn format_2(coverage: CoverageTable, substitute_glyph_ids: Vec<GlyphId16>) -> Self {
        SingleSubst::Format2(SingleSubstFormat2 {
            coverage,
            substitute_glyph_ids,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SingleSubstFormat1 {
    pub coverage: CoverageTable,
    pub delta_glyph_id: i16,
}

#[derive(Clone, Debug)]
pub struct SingleSubstFormat2 {
    pub coverage: CoverageTable,
    pub substitute_glyph_ids: Vec<GlyphId16>,
}

impl TableWrite for SingleSubst {
    fn write(&self, writer: &mut TableWriter) {
        match self {
            SingleSubst::Format1(table) => {
                1u16.write(writer);
                writer.write_offset(&table.coverage, OffsetLen::Offset16);
                table.delta_glyph_id.write(writer);
            }
            SingleSubst::Format2(table) => {
                2u16.write(writer);
                writer.write_offset(&table.coverage, OffsetLen::Offset16);
                write_count(table.substitute_glyph_ids.len(), writer);
                table.substitute_glyph_ids.write(writer);
            }
        }
    }
}

/// A multiple substitution (type 2) subtable.
#[derive(Clone, Debug, Default)]
pub struct MultipleSubstFormat1 {
    pub coverage: CoverageTable,
    pub sequences: Vec<Sequence>,
}

/// The replacement sequence for one covered glyph.
#[derive(Clone, Debug, Default)]
pub struct Sequence {
    pub substitute_glyph_ids: Vec<GlyphId16>,
}

impl Sequence {
    pub fn new(substitute_glyph_ids: Vec<GlyphId16>) -> Self {
        Sequence {
            substitute_glyph_ids,
        }
    }
}

impl TableWrite for MultipleSubstFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.coverage, OffsetLen::Offset16);
        write_count(self.sequences.len(), writer);
        for sequence in &self.sequences {
            writer.write_offset(sequence, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for Sequence {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.substitute_glyph_ids.len(), writer);
        self.substitute_glyph_ids.write(writer);
    }
}

/// An alternate substitution (type 3) subtable.
#[derive(Clone, Debug, Default)]
pub struct AlternateSubstFormat1 {
    pub coverage: CoverageTable,
    pub alternate_sets: Vec<AlternateSet>,
}

/// The alternates for one covered glyph, in authoring order.
#[derive(Clone, Debug, Default)]
pub struct AlternateSet {
    pub alternate_glyph_ids: Vec<GlyphId16>,
}

impl AlternateSet {
    pub fn new(alternate_glyph_ids: Vec<GlyphId16>) -> Self {
        AlternateSet {
            alternate_glyph_ids,
        }
    }
}

impl TableWrite for AlternateSubstFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.coverage, OffsetLen::Offset16);
        write_count(self.alternate_sets.len(), writer);
        for set in &self.alternate_sets {
            writer.write_offset(set, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for AlternateSet {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.alternate_glyph_ids.len(), writer);
        self.alternate_glyph_ids.write(writer);
    }
}

/// A ligature substitution (type 4) subtable.
#[derive(Clone, Debug, Default)]
pub struct LigatureSubstFormat1 {
    pub coverage: CoverageTable,
    pub ligature_sets: Vec<LigatureSet>,
}

/// All ligatures beginning with one covered glyph, longest pattern first.
#[derive(Clone, Debug, Default)]
pub struct LigatureSet {
    pub ligatures: Vec<Ligature>,
}

/// One ligature: the components after the first glyph, and the result.
#[derive(Clone, Debug)]
pub struct Ligature {
    pub ligature_glyph: GlyphId16,
    pub component_glyph_ids: Vec<GlyphId16>,
}

impl LigatureSet {
    pub fn new(ligatures: Vec<Ligature>) -> Self {
        LigatureSet { ligatures }
    }
}

impl Ligature {
    pub fn new(ligature_glyph: GlyphId16, component_glyph_ids: Vec<GlyphId16>) -> Self {
        Ligature {
            ligature_glyph,
            component_glyph_ids,
        }
    }
}

impl TableWrite for LigatureSubstFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.coverage, OffsetLen::Offset16);
        write_count(self.ligature_sets.len(), writer);
        for set in &self.ligature_sets {
            writer.write_offset(set, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for LigatureSet {
    fn write(&self, writer: &mut TableWriter) {
        write_count(self.ligatures.len(), writer);
        for ligature in &self.ligatures {
            writer.write_offset(ligature, OffsetLen::Offset16);
        }
    }
}

impl TableWrite for Ligature {
    fn write(&self, writer: &mut TableWriter) {
        self.ligature_glyph.write(writer);
        // component count includes the first (covered) glyph
        write_count(self.component_glyph_ids.len() + 1, writer);
        self.component_glyph_ids.write(writer);
    }
}

/// A reverse chaining contextual single substitution (type 8) subtable.
///
/// The substitute array parallels the input coverage in glyph id order.
#[derive(Clone, Debug, Default)]
pub struct ReverseChainSingleSubstFormat1 {
    pub backtrack_coverages: Vec<CoverageTable>,
    pub coverage: CoverageTable,
    pub lookahead_coverages: Vec<CoverageTable>,
    pub substitute_glyph_ids: Vec<GlyphId16>,
}

impl TableWrite for ReverseChainSingleSubstFormat1 {
    fn write(&self, writer: &mut TableWriter) {
        1u16.write(writer);
        writer.write_offset(&self.coverage, OffsetLen::Offset16);
        write_count(self.backtrack_coverages.len(), writer);
        for coverage in &self.backtrack_coverages {
            writer.write_offset(coverage, OffsetLen::Offset16);
        }
        write_count(self.lookahead_coverages.len(), writer);
        for coverage in &self.lookahead_coverages {
            writer.write_offset(coverage, OffsetLen::Offset16);
        }
        write_count(self.substitute_glyph_ids.len(), writer);
        self.substitute_glyph_ids.write(writer);
    }
}

table_newtype!(SubstitutionChainContext, ChainedSequenceContextFormat3);

subtable_type!(gsub, SingleSubst, 1);
subtable_type!(gsub, MultipleSubstFormat1, 2);
subtable_type!(gsub, AlternateSubstFormat1, 3);
subtable_type!(gsub, LigatureSubstFormat1, 4);
subtable_type!(gsub, SubstitutionChainContext, 6);
subtable_type!(gsub, ReverseChainSingleSubstFormat1, 8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LookupFlag;
    use crate::write::dump_table;

    fn gids<const N: usize>(raw: [u16; N]) -> Vec<GlyphId16> {
        raw.into_iter().map(GlyphId16::new).collect()
    }

    #[test]
    fn single_subst_format_1_bytes() {
        let table = SingleSubst::format_1(gids([2, 3, 4]).into_iter().collect(), 26);
        let bytes = dump_table(&table).unwrap();
        // format, coverage offset, delta | coverage format 1
        assert_eq!(
            bytes,
            [0, 1, 0, 6, 0, 26, /* coverage */ 0, 1, 0, 3, 0, 2, 0, 3, 0, 4]
        );
    }

    #[test]
    fn extension_wrapped_lookup() {
        let mut lookup = Lookup::new(
            LookupFlag::empty(),
            vec![SingleSubst::format_1(gids([2]).into_iter().collect(), 1)],
            None,
        );
        lookup.use_extension = true;
        let bytes = dump_table(&lookup).unwrap();
        // lookup type is the extension type
        assert_eq!(&bytes[..2], &[0, 7]);
        // extension record: format 1, wrapped type 1, 32-bit offset
        let ext = &bytes[8..16];
        assert_eq!(ext, [0, 1, 0, 1, 0, 0, 0, 8]);
    }

    #[test]
    fn ligature_component_count() {
        let lig = Ligature::new(GlyphId16::new(90), gids([31, 41]));
        let bytes = dump_table(&lig).unwrap();
        assert_eq!(bytes, [0, 90, 0, 3, 0, 31, 0, 41]);
    }
}
