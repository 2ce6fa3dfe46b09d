//! Compiling accumulated rules into GPOS subtables.

use std::collections::BTreeMap;

use font_types::GlyphId16;
use indexmap::IndexMap;
use smol_str::SmolStr;

use otl_write::gpos::{
    AnchorMatrix, AnchorTable, Class1Record, Class2Record, CursivePosFormat1, EntryExitRecord,
    LigatureArray, MarkArray, MarkBasePosFormat1, MarkLigPosFormat1, MarkMarkPosFormat1,
    MarkRecord, PairPos, PairSet, PairValueRecord, PositionChainContext, PositionLookup,
    PositionSequenceContext, SinglePos, ValueRecord,
};
use otl_write::layout::{ClassDefBuilder, CoverageTable, Lookup, LookupFlag};

use crate::common::GlyphSet;
use crate::diagnostics::{CompileError, DiagSink};
use crate::lookups::{
    AnonLookups, ChainSubtable, CompiledLookup, FilterSetId, GposLookup, LabelMap, LookupAccum,
    LookupKind, Rule,
};
use crate::pattern::ClassRec;
use crate::registry::Registry;

pub(crate) fn compile(
    accum: LookupAccum,
    anon: &mut AnonLookups,
    registry: &Registry,
    sink: &mut DiagSink,
) -> Option<GposLookup> {
    match accum.kind {
        LookupKind::SinglePos => compile_single(accum, sink),
        LookupKind::PairPos => compile_pair(accum, sink),
        LookupKind::CursivePos => compile_cursive(accum, sink),
        LookupKind::MarkToBasePos => compile_mark_attach(accum, registry, sink, AttachKind::Base),
        LookupKind::MarkToLigPos => compile_mark_to_lig(accum, registry, sink),
        LookupKind::MarkToMarkPos => compile_mark_attach(accum, registry, sink, AttachKind::Mark),
        LookupKind::ContextPos | LookupKind::ChainPos => compile_context(accum, anon, sink),
        _ => unreachable!("GSUB kind in GPOS compile"),
    }
}

/// Single adjustment: format 1 when every covered glyph takes the same
/// record, else format 2.
fn compile_single(accum: LookupAccum, sink: &mut DiagSink) -> Option<GposLookup> {
    let mut items: BTreeMap<GlyphId16, ValueRecord> = BTreeMap::new();
    for rule in &accum.rules {
        let Some(rec) = rule.targ.classes.first() else {
            continue;
        };
        let record = rec
            .metrics
            .as_ref()
            .map(|metrics| metrics.build())
            .unwrap_or_default();
        for gid in rec.gids() {
            match items.get(&gid) {
                Some(prev) if *prev != record => {
                    sink.error(CompileError::DuplicateRule(format!(
                        "glyph {} already positioned in this lookup",
                        gid.to_u16()
                    )));
                }
                _ => {
                    items.insert(gid, record);
                }
            }
        }
    }
    if items.is_empty() {
        return None;
    }
    let first = *items.values().next().unwrap();
    let coverage: CoverageTable = items.keys().copied().collect();
    let subtable = if items.values().all(|record| *record == first) {
        SinglePos::format_1(coverage, first)
    } else {
        SinglePos::format_2(coverage, items.into_values().collect())
    };
    Some(GposLookup::Single(vec![subtable]))
}

/// A pair rule's two value records, taken from its two positions.
fn pair_records(rule: &Rule) -> (ValueRecord, ValueRecord) {
    let record = |rec: Option<&ClassRec>| {
        rec.and_then(|rec| rec.metrics.as_ref())
            .map(|metrics| metrics.build())
            .unwrap_or_default()
    };
    (
        record(rule.targ.classes.first()),
        record(rule.targ.classes.get(1)),
    )
}

/// Pair adjustment: enumerated pairs become format 1, class rules become
/// format 2 matrices. An explicit `subtable;` splits the class rules.
fn compile_pair(accum: LookupAccum, sink: &mut DiagSink) -> Option<GposLookup> {
    let mut pairs: BTreeMap<GlyphId16, BTreeMap<GlyphId16, (ValueRecord, ValueRecord)>> =
        BTreeMap::new();
    // each entry is one format-2 subtable's class rows
    let mut class_segments: Vec<IndexMap<GlyphSet, IndexMap<GlyphSet, (ValueRecord, ValueRecord)>>> =
        vec![IndexMap::new()];

    for (index, rule) in accum.rules.iter().enumerate() {
        if accum.breaks.contains(&index) && !class_segments.last().unwrap().is_empty() {
            class_segments.push(IndexMap::new());
        }
        let (first, second) = match (rule.targ.classes.first(), rule.targ.classes.get(1)) {
            (Some(first), Some(second)) => (first, second),
            _ => continue,
        };
        let (value1, value2) = pair_records(rule);
        let enumerated = rule.targ.enumerate || (first.is_glyph() && second.is_glyph());
        if enumerated {
            for g1 in first.gids() {
                for g2 in second.gids() {
                    // the first rule for a specific pair wins
                    match pairs.entry(g1).or_default().entry(g2) {
                        std::collections::btree_map::Entry::Occupied(_) => {
                            sink.note(CompileError::DuplicateRule(format!(
                                "pair ({}, {}) positioned more than once",
                                g1.to_u16(),
                                g2.to_u16()
                            )));
                        }
                        std::collections::btree_map::Entry::Vacant(slot) => {
                            slot.insert((value1, value2));
                        }
                    }
                }
            }
        } else {
            let set1: GlyphSet = first.gids().collect();
            let set2: GlyphSet = second.gids().collect();
            class_segments
                .last_mut()
                .unwrap()
                .entry(set1)
                .or_default()
                .insert(set2, (value1, value2));
        }
    }

    let mut subtables = Vec::new();
    if !pairs.is_empty() {
        let coverage: CoverageTable = pairs.keys().copied().collect();
        let pair_sets = pairs
            .into_values()
            .map(|seconds| PairSet {
                pair_value_records: seconds
                    .into_iter()
                    .map(|(second_glyph, (value_record1, value_record2))| PairValueRecord {
                        second_glyph,
                        value_record1,
                        value_record2,
                    })
                    .collect(),
            })
            .collect();
        subtables.push(PairPos::format_1(coverage, pair_sets));
    }
    for segment in class_segments.into_iter().filter(|seg| !seg.is_empty()) {
        subtables.push(build_class_pair_subtable(segment));
    }
    (!subtables.is_empty()).then_some(GposLookup::Pair(subtables))
}

/// One class matrix: class 1 indices follow first-use order starting at 0
/// (class 0 doubles as the first row), class 2 starts at 1 with column 0
/// left empty.
fn build_class_pair_subtable(
    items: IndexMap<GlyphSet, IndexMap<GlyphSet, (ValueRecord, ValueRecord)>>,
) -> PairPos {
    let mut class2_ids: IndexMap<GlyphSet, u16> = IndexMap::new();
    for seconds in items.values() {
        for set in seconds.keys() {
            let next = class2_ids.len() as u16 + 1;
            class2_ids.entry(set.clone()).or_insert(next);
        }
    }
    let class2_count = class2_ids.len() + 1;

    let class_def1: ClassDefBuilder = items
        .keys()
        .enumerate()
        .flat_map(|(index, set)| set.iter().map(move |gid| (gid, index as u16)))
        .collect();
    let class_def2: ClassDefBuilder = class2_ids
        .iter()
        .flat_map(|(set, index)| set.iter().map(move |gid| (gid, *index)))
        .collect();

    let coverage: CoverageTable = items.keys().flat_map(GlyphSet::iter).collect();
    let class1_records = items
        .values()
        .map(|seconds| {
            let mut class2_records = vec![Class2Record::default(); class2_count];
            for (set, records) in seconds {
                let index = class2_ids[set] as usize;
                class2_records[index] = Class2Record {
                    value_record1: records.0,
                    value_record2: records.1,
                };
            }
            Class1Record { class2_records }
        })
        .collect();
    PairPos::format_2(
        coverage,
        class_def1.build(),
        class_def2.build(),
        class1_records,
    )
}

/// Cursive attachment: entry and exit anchors per covered glyph.
fn compile_cursive(accum: LookupAccum, sink: &mut DiagSink) -> Option<GposLookup> {
    let mut items: BTreeMap<GlyphId16, EntryExitRecord> = BTreeMap::new();
    for rule in &accum.rules {
        let Some(rec) = rule.targ.classes.first() else {
            continue;
        };
        let record = EntryExitRecord {
            entry_anchor: rule.entry_exit[0].as_ref().map(|anchor| anchor.build()),
            exit_anchor: rule.entry_exit[1].as_ref().map(|anchor| anchor.build()),
        };
        for gid in rec.gids() {
            if items.insert(gid, record.clone()).is_some() {
                sink.error(CompileError::DuplicateRule(format!(
                    "glyph {} has more than one entry/exit rule",
                    gid.to_u16()
                )));
            }
        }
    }
    if items.is_empty() {
        return None;
    }
    Some(GposLookup::Cursive(vec![CursivePosFormat1 {
        coverage: items.keys().copied().collect(),
        entry_exit_records: items.into_values().collect(),
    }]))
}

/// The mark glyphs of a lookup: class indices in first-use order, one
/// anchor per glyph drawn from the mark class definition.
#[derive(Default)]
struct MarkList {
    glyphs: BTreeMap<GlyphId16, (u16, AnchorTable)>,
    classes: IndexMap<SmolStr, u16>,
}

impl MarkList {
    /// Register a mark class use, adding every member glyph.
    fn add_class(
        &mut self,
        name: &SmolStr,
        registry: &Registry,
        sink: &mut DiagSink,
    ) -> Option<u16> {
        if let Some(id) = self.classes.get(name) {
            return Some(*id);
        }
        let Some(class) = registry.mark_class(name) else {
            sink.error(CompileError::UnknownGlyph(name.clone()));
            return None;
        };
        let id = self.classes.len() as u16;
        self.classes.insert(name.clone(), id);
        for (rec, anchor) in &class.members {
            let anchor = anchor.build();
            for gid in rec.gids() {
                if let Some((prev, _)) = self.glyphs.insert(gid, (id, anchor)) {
                    if prev != id {
                        sink.error(CompileError::ContextViolation(format!(
                            "glyph {} belongs to more than one mark class in this lookup",
                            gid.to_u16()
                        )));
                    }
                }
            }
        }
        Some(id)
    }

    fn class_count(&self) -> u16 {
        self.classes.len() as u16
    }

    fn build(self) -> (CoverageTable, MarkArray) {
        let coverage = self.glyphs.keys().copied().collect();
        let array = MarkArray::new(
            self.glyphs
                .into_values()
                .map(|(mark_class, mark_anchor)| MarkRecord {
                    mark_class,
                    mark_anchor,
                })
                .collect(),
        );
        (coverage, array)
    }
}

enum AttachKind {
    Base,
    Mark,
}

/// Mark-to-base and mark-to-mark share everything but the subtable type.
fn compile_mark_attach(
    accum: LookupAccum,
    registry: &Registry,
    sink: &mut DiagSink,
    kind: AttachKind,
) -> Option<GposLookup> {
    let mut marks = MarkList::default();
    let mut bases: BTreeMap<GlyphId16, Vec<(u16, AnchorTable)>> = BTreeMap::new();
    for rule in &accum.rules {
        let Some(rec) = rule.targ.classes.first() else {
            continue;
        };
        for anchor in &rec.anchor_info {
            let Some(name) = anchor.mark_class_name.as_ref() else {
                continue;
            };
            let Some(class) = marks.add_class(name, registry, sink) else {
                continue;
            };
            for gid in rec.gids() {
                bases.entry(gid).or_default().push((class, anchor.build()));
            }
        }
    }
    if bases.is_empty() {
        return None;
    }
    let class_count = marks.class_count();
    let base_coverage: CoverageTable = bases.keys().copied().collect();
    let rows = bases
        .into_values()
        .map(|anchors| {
            let mut row = vec![None; class_count as usize];
            for (class, anchor) in anchors {
                row[class as usize] = Some(anchor);
            }
            row
        })
        .collect();
    let (mark_coverage, mark_array) = marks.build();
    let lookup = match kind {
        AttachKind::Base => GposLookup::MarkToBase(vec![MarkBasePosFormat1 {
            mark_coverage,
            base_coverage,
            mark_class_count: class_count,
            mark_array,
            base_array: AnchorMatrix { rows },
        }]),
        AttachKind::Mark => GposLookup::MarkToMark(vec![MarkMarkPosFormat1 {
            mark1_coverage: mark_coverage,
            mark2_coverage: base_coverage,
            mark_class_count: class_count,
            mark1_array: mark_array,
            mark2_array: AnchorMatrix { rows },
        }]),
    };
    Some(lookup)
}

/// Mark-to-ligature: anchors are grouped per ligature component.
fn compile_mark_to_lig(
    accum: LookupAccum,
    registry: &Registry,
    sink: &mut DiagSink,
) -> Option<GposLookup> {
    let mut marks = MarkList::default();
    let mut ligatures: BTreeMap<GlyphId16, BTreeMap<u16, Vec<(u16, AnchorTable)>>> =
        BTreeMap::new();
    for rule in &accum.rules {
        let Some(rec) = rule.targ.classes.first() else {
            continue;
        };
        for anchor in &rec.anchor_info {
            let Some(name) = anchor.mark_class_name.as_ref() else {
                continue;
            };
            let Some(class) = marks.add_class(name, registry, sink) else {
                continue;
            };
            for gid in rec.gids() {
                ligatures
                    .entry(gid)
                    .or_default()
                    .entry(anchor.component_index)
                    .or_default()
                    .push((class, anchor.build()));
            }
        }
    }
    if ligatures.is_empty() {
        return None;
    }
    let class_count = marks.class_count();
    let ligature_coverage: CoverageTable = ligatures.keys().copied().collect();
    let ligature_attaches = ligatures
        .into_values()
        .map(|components| {
            let component_count = components
                .keys()
                .next_back()
                .map(|last| *last as usize + 1)
                .unwrap_or_default();
            let mut rows = vec![vec![None; class_count as usize]; component_count];
            for (component, anchors) in components {
                for (class, anchor) in anchors {
                    rows[component as usize][class as usize] = Some(anchor);
                }
            }
            AnchorMatrix { rows }
        })
        .collect();
    let (mark_coverage, mark_array) = marks.build();
    Some(GposLookup::MarkToLig(vec![MarkLigPosFormat1 {
        mark_coverage,
        ligature_coverage,
        mark_class_count: class_count,
        mark_array,
        ligature_array: LigatureArray { ligature_attaches },
    }]))
}

/// Contextual positioning: inline value records synthesize an anonymous
/// single adjustment lookup; explicit references emit records directly.
fn compile_context(
    accum: LookupAccum,
    anon: &mut AnonLookups,
    sink: &mut DiagSink,
) -> Option<GposLookup> {
    let mut subtables = Vec::new();
    for rule in &accum.rules {
        let (backtrack, input, lookahead) = rule.targ.partition();
        let mut subtable = ChainSubtable::new(backtrack, input, lookahead);
        if rule.targ.ignore_clause {
            subtables.push(subtable);
            continue;
        }
        if rule.targ.lookup_node {
            for (index, rec) in input.iter().enumerate() {
                for label in &rec.lookup_labels {
                    subtable.records.push((index as u16, label.clone()));
                }
            }
        } else {
            for (index, rec) in input.iter().enumerate() {
                let Some(metrics) = rec.metrics.as_ref() else {
                    continue;
                };
                let record = metrics.build();
                let parent = accum.parent_feat_tag.unwrap_or(accum.feature);
                let gids: Vec<_> = rec.gids().collect();
                let Some(target) = anon.find_or_create(
                    LookupKind::SinglePos,
                    accum.flags,
                    accum.mark_set,
                    parent,
                    |existing| {
                        existing.rules.iter().all(|prev| {
                            let prev_rec = prev.targ.classes.first();
                            let prev_record = prev_rec
                                .and_then(|rec| rec.metrics.as_ref())
                                .map(|metrics| metrics.build())
                                .unwrap_or_default();
                            prev_record == record
                                || prev_rec.is_none_or(|prev_rec| {
                                    !gids.iter().any(|gid| prev_rec.gids().any(|p| p == *gid))
                                })
                        })
                    },
                    sink,
                ) else {
                    continue;
                };
                let mut anon_rec = rec.clone();
                anon_rec.role = Default::default();
                let mut pat = crate::pattern::GPat::single(anon_rec);
                pat.assign_roles();
                target.rules.push(Rule {
                    targ: pat,
                    repl: None,
                    entry_exit: Default::default(),
                });
                subtable.records.push((index as u16, target.label.reference()));
            }
        }
        subtables.push(subtable);
    }
    if subtables.is_empty() {
        return None;
    }
    let lookup = if accum.kind == LookupKind::ChainPos
        || subtables.iter().any(ChainSubtable::is_chain)
    {
        GposLookup::Chain(subtables)
    } else {
        GposLookup::Context(subtables)
    };
    Some(lookup)
}

fn make_lookup<T>(
    flags: LookupFlag,
    mark_set: Option<FilterSetId>,
    use_extension: bool,
    subtables: Vec<T>,
) -> Lookup<T> {
    let mut lookup = Lookup::new(flags, subtables, mark_set);
    lookup.use_extension = use_extension;
    lookup
}

/// Rewrite labels into lookup indices and produce the final lookup.
pub(crate) fn lower(
    lookup: CompiledLookup<GposLookup>,
    labels: &LabelMap,
    sink: &mut DiagSink,
) -> PositionLookup {
    let CompiledLookup {
        flags,
        mark_set,
        use_extension,
        body,
        ..
    } = lookup;
    match body {
        GposLookup::Single(subs) => {
            PositionLookup::Single(make_lookup(flags, mark_set, use_extension, subs))
        }
        GposLookup::Pair(subs) => {
            PositionLookup::Pair(make_lookup(flags, mark_set, use_extension, subs))
        }
        GposLookup::Cursive(subs) => {
            PositionLookup::Cursive(make_lookup(flags, mark_set, use_extension, subs))
        }
        GposLookup::MarkToBase(subs) => {
            PositionLookup::MarkToBase(make_lookup(flags, mark_set, use_extension, subs))
        }
        GposLookup::MarkToLig(subs) => {
            PositionLookup::MarkToLig(make_lookup(flags, mark_set, use_extension, subs))
        }
        GposLookup::MarkToMark(subs) => {
            PositionLookup::MarkToMark(make_lookup(flags, mark_set, use_extension, subs))
        }
        GposLookup::Context(chains) => {
            let subs = chains
                .iter()
                .map(|chain| PositionSequenceContext(chain.lower_plain(labels, sink)))
                .collect();
            PositionLookup::Contextual(make_lookup(flags, mark_set, use_extension, subs))
        }
        GposLookup::Chain(chains) => {
            let subs = chains
                .iter()
                .map(|chain| PositionChainContext(chain.lower_chain(labels, sink)))
                .collect();
            PositionLookup::ChainContextual(make_lookup(flags, mark_set, use_extension, subs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsInfo;
    use crate::pattern::GPat;

    fn gid(raw: u16) -> GlyphId16 {
        GlyphId16::new(raw)
    }

    fn pos_rule(gids: &[u16], metrics: MetricsInfo) -> Rule {
        let mut rec = ClassRec::class(gids.iter().copied().map(GlyphId16::new));
        rec.metrics = Some(metrics);
        Rule {
            targ: GPat::single(rec),
            repl: None,
            entry_exit: Default::default(),
        }
    }

    #[test]
    fn single_pos_same_record_is_format_1() {
        let mut accum = LookupAccum::new(LookupKind::SinglePos, LookupFlag::empty(), None);
        accum.rules = vec![pos_rule(&[1, 2, 3], MetricsInfo::x_advance(-40))];
        let mut sink = DiagSink::default();
        let Some(GposLookup::Single(subs)) = compile_single(accum, &mut sink) else {
            panic!("expected single pos")
        };
        assert!(matches!(&subs[0], SinglePos::Format1(_)));
    }

    #[test]
    fn single_pos_mixed_records_is_format_2() {
        let mut accum = LookupAccum::new(LookupKind::SinglePos, LookupFlag::empty(), None);
        accum.rules = vec![
            pos_rule(&[1], MetricsInfo::x_advance(-40)),
            pos_rule(&[2], MetricsInfo::x_advance(10)),
        ];
        let mut sink = DiagSink::default();
        let Some(GposLookup::Single(subs)) = compile_single(accum, &mut sink) else {
            panic!("expected single pos")
        };
        assert!(matches!(&subs[0], SinglePos::Format2(_)));
    }

    #[test]
    fn pair_pos_classes_build_format_2() {
        let mut accum = LookupAccum::new(LookupKind::PairPos, LookupFlag::empty(), None);
        let mut first = ClassRec::class([gid(1), gid(2)]);
        first.metrics = Some(MetricsInfo::x_advance(-30));
        let second = ClassRec::class([gid(5), gid(6)]);
        accum.rules = vec![Rule {
            targ: GPat::new(vec![first, second]),
            repl: None,
            entry_exit: Default::default(),
        }];
        let mut sink = DiagSink::default();
        let Some(GposLookup::Pair(subs)) = compile_pair(accum, &mut sink) else {
            panic!("expected pair pos")
        };
        let PairPos::Format2(table) = &subs[0] else {
            panic!("expected format 2")
        };
        assert_eq!(table.class1_count, 1);
        // one real class plus the empty class 0 column
        assert_eq!(table.class2_count, 2);
        assert_eq!(
            table.class1_records[0].class2_records[1]
                .value_record1
                .x_advance,
            Some(-30)
        );
    }

    #[test]
    fn enumerated_pairs_first_rule_wins() {
        let mut accum = LookupAccum::new(LookupKind::PairPos, LookupFlag::empty(), None);
        let mk = |gids1: &[u16], value: i16, enumerate: bool| {
            let mut first = if gids1.len() == 1 && !enumerate {
                ClassRec::glyph(gid(gids1[0]))
            } else {
                ClassRec::class(gids1.iter().copied().map(GlyphId16::new))
            };
            first.metrics = Some(MetricsInfo::x_advance(value));
            let mut pat = GPat::new(vec![first, ClassRec::glyph(gid(9))]);
            pat.enumerate = enumerate;
            Rule {
                targ: pat,
                repl: None,
                entry_exit: Default::default(),
            }
        };
        // pos A B 100; enum pos @A B -50;
        accum.rules = vec![mk(&[1], 100, false), mk(&[1, 2], -50, true)];
        let mut sink = DiagSink::default();
        let Some(GposLookup::Pair(subs)) = compile_pair(accum, &mut sink) else {
            panic!("expected pair pos")
        };
        let PairPos::Format1(table) = &subs[0] else {
            panic!("expected format 1")
        };
        let first_set = &table.pair_sets[0].pair_value_records[0];
        assert_eq!(first_set.value_record1.x_advance, Some(100));
        let second_set = &table.pair_sets[1].pair_value_records[0];
        assert_eq!(second_set.value_record1.x_advance, Some(-50));
    }
}
