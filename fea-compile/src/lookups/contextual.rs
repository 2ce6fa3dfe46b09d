//! Chain-context subtables and their label plumbing.

use otl_write::layout::{
    ChainedSequenceContextFormat3, CoverageTable, SequenceContextFormat3, SequenceLookupRecord,
};

use crate::common::{GlyphSet, Label};
use crate::diagnostics::{CompileError, DiagSink};
use crate::lookups::LabelMap;
use crate::pattern::ClassRec;

/// A compiled contextual subtable whose sub-lookups are still labels.
///
/// Coverage positions are kept in authored (left-to-right) order; the
/// backtrack sequence is reversed to closest-first when lowering.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChainSubtable {
    pub backtrack: Vec<GlyphSet>,
    pub input: Vec<GlyphSet>,
    pub lookahead: Vec<GlyphSet>,
    /// (input sequence index, lookup) pairs, in position order.
    pub records: Vec<(u16, Label)>,
}

impl ChainSubtable {
    pub fn new(
        backtrack: &[ClassRec],
        input: &[ClassRec],
        lookahead: &[ClassRec],
    ) -> ChainSubtable {
        let to_set = |rec: &ClassRec| rec.gids().collect::<GlyphSet>();
        ChainSubtable {
            backtrack: backtrack.iter().map(to_set).collect(),
            input: input.iter().map(to_set).collect(),
            lookahead: lookahead.iter().map(to_set).collect(),
            records: Vec::new(),
        }
    }

    /// `true` if this rule carries context outside the input run.
    pub fn is_chain(&self) -> bool {
        !self.backtrack.is_empty() || !self.lookahead.is_empty()
    }

    fn coverages(sets: &[GlyphSet]) -> Vec<CoverageTable> {
        sets.iter().map(|set| set.iter().collect()).collect()
    }

    fn resolve_records(
        &self,
        labels: &LabelMap,
        sink: &mut DiagSink,
    ) -> Vec<SequenceLookupRecord> {
        self.records
            .iter()
            .filter_map(|(sequence_index, label)| match labels.resolve(label) {
                Some((_, lookup_list_index)) => Some(SequenceLookupRecord {
                    sequence_index: *sequence_index,
                    lookup_list_index,
                }),
                None => {
                    sink.fatal(CompileError::UnresolvedLookupRef(
                        format!("{label:?}").into(),
                    ));
                    None
                }
            })
            .collect()
    }

    /// Lower into a chained (type 6/8 format 3) subtable.
    pub fn lower_chain(
        &self,
        labels: &LabelMap,
        sink: &mut DiagSink,
    ) -> ChainedSequenceContextFormat3 {
        let mut backtrack = Self::coverages(&self.backtrack);
        backtrack.reverse();
        ChainedSequenceContextFormat3 {
            backtrack_coverages: backtrack,
            input_coverages: Self::coverages(&self.input),
            lookahead_coverages: Self::coverages(&self.lookahead),
            seq_lookup_records: self.resolve_records(labels, sink),
        }
    }

    /// Lower into a plain (type 7 format 3) subtable.
    pub fn lower_plain(&self, labels: &LabelMap, sink: &mut DiagSink) -> SequenceContextFormat3 {
        debug_assert!(!self.is_chain());
        SequenceContextFormat3 {
            coverages: Self::coverages(&self.input),
            seq_lookup_records: self.resolve_records(labels, sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookups::{AllLookups, CompiledLookup, GsubLookup};
    use font_types::GlyphId16;
    use otl_write::layout::LookupFlag;

    fn rec(gids: &[u16]) -> ClassRec {
        ClassRec::class(gids.iter().copied().map(GlyphId16::new))
    }

    #[test]
    fn backtrack_reversed_on_lowering() {
        let mut subtable =
            ChainSubtable::new(&[rec(&[1]), rec(&[2])], &[rec(&[3])], &[rec(&[4])]);
        subtable.records.push((0, Label::Named(0)));

        let mut lookups = AllLookups::default();
        lookups.gsub.push(CompiledLookup {
            label: Label::Named(0),
            flags: LookupFlag::empty(),
            mark_set: None,
            use_extension: false,
            body: GsubLookup::Single(Vec::new()),
        });
        let labels = LabelMap::new(&lookups);
        let mut sink = DiagSink::default();
        let lowered = subtable.lower_chain(&labels, &mut sink);
        // authored "1 2 | 3 | 4" writes backtrack closest-first: 2 then 1
        let first: Vec<_> = lowered.backtrack_coverages[0].iter().collect();
        assert_eq!(first, vec![GlyphId16::new(2)]);
        assert_eq!(lowered.seq_lookup_records[0].lookup_list_index, 0);
        assert!(!sink.had_error());
    }
}
