//! Compiling accumulated rules into GSUB subtables.

use font_types::GlyphId16;

use otl_write::gsub::{
    AlternateSet, AlternateSubstFormat1, Ligature, LigatureSet, LigatureSubstFormat1,
    MultipleSubstFormat1, ReverseChainSingleSubstFormat1, Sequence, SingleSubst,
    SubstitutionChainContext, SubstitutionLookup,
};
use otl_write::layout::{CoverageTable, Lookup, LookupFlag};

use crate::common::GlyphSet;
use crate::diagnostics::{CompileError, DiagSink};
use crate::lookups::{
    AnonLookups, ChainSubtable, CompiledLookup, FilterSetId, GsubLookup, LabelMap, LookupAccum,
    LookupKind, Rule,
};
use crate::pattern::ClassRec;

/// The subtable size ceiling that forces an automatic break.
const MAX_SUBTABLE_SIZE: usize = 0xFFFF;

pub(crate) fn compile(
    accum: LookupAccum,
    anon: &mut AnonLookups,
    sink: &mut DiagSink,
) -> Option<GsubLookup> {
    match accum.kind {
        LookupKind::SingleSub => compile_single(accum),
        LookupKind::MultipleSub => compile_seq_sets(accum, sink, false),
        LookupKind::AlternateSub => compile_seq_sets(accum, sink, true),
        LookupKind::LigatureSub => compile_ligature(accum, sink),
        LookupKind::ChainSub => compile_chain(accum, anon, sink),
        LookupKind::ReverseSub => compile_reverse(accum, sink),
        _ => unreachable!("GPOS kind in GSUB compile"),
    }
}

/// Single substitution: format 1 when one delta fits every pair.
fn compile_single(accum: LookupAccum) -> Option<GsubLookup> {
    if accum.singles.is_empty() {
        return None;
    }
    let delta = accum
        .singles
        .iter()
        .map(|(targ, repl)| repl.to_u16() as i32 - targ.to_u16() as i32)
        .reduce(|acc, val| if acc == val { acc } else { i32::MAX })
        .and_then(|delta| i16::try_from(delta).ok());

    let coverage: CoverageTable = accum.singles.keys().copied().collect();
    let subtable = match delta {
        Some(delta) => SingleSubst::format_1(coverage, delta),
        None => {
            let replacements = accum.singles.values().copied().collect();
            SingleSubst::format_2(coverage, replacements)
        }
    };
    Some(GsubLookup::Single(vec![subtable]))
}

/// Multiple and alternate substitutions share their shape: rules sorted by
/// target, one sequence/set per covered glyph, and an automatic subtable
/// break when the next rule would push the encoded size past 16 bits.
fn compile_seq_sets(
    accum: LookupAccum,
    sink: &mut DiagSink,
    alternate: bool,
) -> Option<GsubLookup> {
    let mut rules: Vec<(GlyphId16, Vec<GlyphId16>)> = Vec::new();
    for rule in &accum.rules {
        let Some(targ) = rule.targ.classes.first().and_then(ClassRec::first_gid) else {
            continue;
        };
        // a multiple substitution replaces with a sequence of positions;
        // an alternate offers the members of one choice class
        let repl: Vec<_> = if alternate {
            rule.repl
                .iter()
                .flat_map(|pat| pat.classes.first())
                .flat_map(|rec| rec.gids())
                .collect()
        } else {
            rule.repl
                .iter()
                .flat_map(|pat| pat.classes.iter())
                .filter_map(ClassRec::first_gid)
                .collect()
        };
        if rules.iter().any(|(existing, _)| *existing == targ) {
            sink.fatal(CompileError::DuplicateRule(format!(
                "glyph {} has more than one replacement",
                targ.to_u16()
            )));
            return None;
        }
        rules.push((targ, repl));
    }
    if rules.is_empty() {
        return None;
    }
    rules.sort_by_key(|(targ, _)| *targ);

    // format(2) + coverage offset(2) + count(2) + empty coverage header(4)
    const BASE_SIZE: usize = 10;
    let mut subtables = Vec::new();
    let mut current: Vec<(GlyphId16, Vec<GlyphId16>)> = Vec::new();
    let mut size = BASE_SIZE;
    for (targ, repl) in rules {
        // sequence offset + sequence table + coverage glyph
        let increment = 2 + (2 + 2 * repl.len()) + 2;
        if size + increment > MAX_SUBTABLE_SIZE && !current.is_empty() {
            subtables.push(std::mem::take(&mut current));
            size = BASE_SIZE;
        }
        size += increment;
        current.push((targ, repl));
    }
    subtables.push(current);
    if subtables.len() > 1 {
        sink.note(CompileError::OffsetOverflow);
    }

    let lookup = if alternate {
        GsubLookup::Alternate(
            subtables
                .into_iter()
                .map(|rules| AlternateSubstFormat1 {
                    coverage: rules.iter().map(|(targ, _)| *targ).collect(),
                    alternate_sets: rules
                        .into_iter()
                        .map(|(_, repl)| AlternateSet::new(repl))
                        .collect(),
                })
                .collect(),
        )
    } else {
        GsubLookup::Multiple(
            subtables
                .into_iter()
                .map(|rules| MultipleSubstFormat1 {
                    coverage: rules.iter().map(|(targ, _)| *targ).collect(),
                    sequences: rules
                        .into_iter()
                        .map(|(_, repl)| Sequence::new(repl))
                        .collect(),
                })
                .collect(),
        )
    };
    Some(lookup)
}

/// Ligature substitution: expand class positions to the Cartesian product,
/// sort, drop exact duplicates with a note, and group by first glyph.
fn compile_ligature(accum: LookupAccum, sink: &mut DiagSink) -> Option<GsubLookup> {
    let mut expanded: Vec<(Vec<GlyphId16>, GlyphId16)> = Vec::new();
    for rule in &accum.rules {
        let Some(repl) = rule
            .repl
            .as_ref()
            .and_then(|pat| pat.classes.first())
            .and_then(ClassRec::first_gid)
        else {
            continue;
        };
        // the first expansion keeps the authored replacement, the rest are
        // clones of it
        for tuple in rule.targ.cross_product() {
            expanded.push((tuple, repl));
        }
    }
    if expanded.is_empty() {
        return None;
    }

    // first glyph ascending, longer patterns first, then remaining glyphs
    expanded.sort_by(|(a, _), (b, _)| {
        a[0].cmp(&b[0])
            .then(b.len().cmp(&a.len()))
            .then_with(|| a[1..].cmp(&b[1..]))
    });

    let mut rules: Vec<(Vec<GlyphId16>, GlyphId16)> = Vec::new();
    for (pattern, repl) in expanded {
        match rules.last() {
            Some((prev, prev_repl)) if *prev == pattern => {
                if *prev_repl == repl {
                    sink.note(CompileError::DuplicateRule(format!(
                        "duplicate ligature pattern starting with glyph {}",
                        pattern[0].to_u16()
                    )));
                } else {
                    sink.fatal(CompileError::DuplicateRule(format!(
                        "ligature pattern starting with glyph {} has conflicting replacements",
                        pattern[0].to_u16()
                    )));
                    return None;
                }
            }
            _ => rules.push((pattern, repl)),
        }
    }

    let mut ligature_sets: Vec<LigatureSet> = Vec::new();
    let mut coverage_glyphs: Vec<GlyphId16> = Vec::new();
    for (pattern, repl) in rules {
        let ligature = Ligature::new(repl, pattern[1..].to_vec());
        if coverage_glyphs.last() == Some(&pattern[0]) {
            ligature_sets.last_mut().unwrap().ligatures.push(ligature);
        } else {
            coverage_glyphs.push(pattern[0]);
            ligature_sets.push(LigatureSet::new(vec![ligature]));
        }
    }
    Some(GsubLookup::Ligature(vec![LigatureSubstFormat1 {
        coverage: coverage_glyphs.into_iter().collect(),
        ligature_sets,
    }]))
}

/// Chain context: one subtable per rule; inline replacements synthesize an
/// anonymous sub-lookup, explicit references emit one record per label.
fn compile_chain(
    accum: LookupAccum,
    anon: &mut AnonLookups,
    sink: &mut DiagSink,
) -> Option<GsubLookup> {
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
        } else if let Some(repl) = &rule.repl {
            let marked: Vec<(usize, &ClassRec)> = input
                .iter()
                .enumerate()
                .filter(|(_, rec)| rec.role.marked)
                .collect();
            if let Some(record) =
                synthesize_anon(&accum, &marked, repl, anon, sink)
            {
                subtable.records.push(record);
            }
        }
        subtables.push(subtable);
    }
    (!subtables.is_empty()).then_some(GsubLookup::Chain(subtables))
}

/// Create (or extend) the anonymous lookup carrying an inline replacement,
/// returning the record to plant at the marked position.
fn synthesize_anon(
    accum: &LookupAccum,
    marked: &[(usize, &ClassRec)],
    repl: &crate::pattern::GPat,
    anon: &mut AnonLookups,
    sink: &mut DiagSink,
) -> Option<(u16, crate::common::Label)> {
    let parent = accum.parent_feat_tag.unwrap_or(accum.feature);
    let repl_rec = repl.classes.first()?;
    let first_index = marked.first()?.0 as u16;

    if marked.len() == 1 {
        // single substitution under the context
        let targ = marked[0].1;
        let pairs = single_pairs(targ, repl_rec);
        let target = anon.find_or_create(
            LookupKind::SingleSub,
            accum.flags,
            accum.mark_set,
            parent,
            |existing| {
                pairs.iter().all(|(targ, repl)| {
                    existing.singles.get(targ).is_none_or(|prev| prev == repl)
                })
            },
            sink,
        )?;
        target.singles.extend(pairs);
        Some((first_index, target.label.reference()))
    } else {
        // a run of marked glyphs replaced by one glyph: a ligature
        let sequence: Vec<GlyphSet> = marked
            .iter()
            .map(|(_, rec)| rec.gids().collect())
            .collect();
        let target = anon.find_or_create(
            LookupKind::LigatureSub,
            accum.flags,
            accum.mark_set,
            parent,
            |existing| !ligature_conflicts(existing, &sequence, repl_rec.first_gid()),
            sink,
        )?;
        let mut targ_pat = crate::pattern::GPat::new(
            marked.iter().map(|(_, rec)| (*rec).clone()).collect(),
        );
        for rec in &mut targ_pat.classes {
            rec.role.marked = false;
        }
        targ_pat.assign_roles();
        target.rules.push(Rule {
            targ: targ_pat,
            repl: Some(crate::pattern::GPat::single(repl_rec.clone())),
            entry_exit: Default::default(),
        });
        Some((first_index, target.label.reference()))
    }
}

/// The (target, replacement) pairs implied by one marked position.
fn single_pairs(targ: &ClassRec, repl: &ClassRec) -> Vec<(GlyphId16, GlyphId16)> {
    if repl.len() == 1 {
        let repl = repl.first_gid().unwrap();
        targ.gids().map(|gid| (gid, repl)).collect()
    } else {
        targ.gids().zip(repl.gids()).collect()
    }
}

/// Conflict test for appending a rule to an anonymous ligature lookup:
/// the same sequence with a different replacement, or one sequence being a
/// prefix of another.
fn ligature_conflicts(
    existing: &LookupAccum,
    sequence: &[GlyphSet],
    repl: Option<GlyphId16>,
) -> bool {
    existing.rules.iter().any(|rule| {
        let prev: Vec<GlyphSet> = rule
            .targ
            .classes
            .iter()
            .map(|rec| rec.gids().collect())
            .collect();
        let shared = prev.len().min(sequence.len());
        if prev[..shared] != sequence[..shared] {
            return false;
        }
        if prev.len() != sequence.len() {
            // one is a prefix of the other
            return true;
        }
        let prev_repl = rule
            .repl
            .as_ref()
            .and_then(|pat| pat.classes.first())
            .and_then(ClassRec::first_gid);
        prev_repl != repl
    })
}

/// Reverse chain: exactly one input position; substitutes stay aligned with
/// the coverage by sorting the entries by glyph id.
fn compile_reverse(accum: LookupAccum, sink: &mut DiagSink) -> Option<GsubLookup> {
    let mut subtables = Vec::new();
    for rule in &accum.rules {
        let (backtrack, input, lookahead) = rule.targ.partition();
        if input.len() != 1 {
            sink.error(CompileError::ContextViolation(
                "reverse chain rules take exactly one input position".into(),
            ));
            continue;
        }
        let mut input_rec = input[0].clone();
        input_rec.sort();
        let mut substitutes = Vec::with_capacity(input_rec.len());
        let mut ok = true;
        for entry in &input_rec.glyphs {
            match entry.substitute {
                Some(substitute) => substitutes.push(substitute),
                None => {
                    sink.error(CompileError::PatternShapeMismatch(
                        "reverse chain replacement does not cover the target class".into(),
                    ));
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            continue;
        }
        let to_coverage =
            |rec: &ClassRec| -> CoverageTable { rec.gids().collect::<GlyphSet>().iter().collect() };
        subtables.push(ReverseChainSingleSubstFormat1 {
            backtrack_coverages: backtrack.iter().rev().map(to_coverage).collect(),
            coverage: input_rec.gids().collect(),
            lookahead_coverages: lookahead.iter().map(to_coverage).collect(),
            substitute_glyph_ids: substitutes,
        });
    }
    (!subtables.is_empty()).then_some(GsubLookup::Reverse(subtables))
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
    lookup: CompiledLookup<GsubLookup>,
    labels: &LabelMap,
    sink: &mut DiagSink,
) -> SubstitutionLookup {
    let CompiledLookup {
        flags,
        mark_set,
        use_extension,
        body,
        ..
    } = lookup;
    match body {
        GsubLookup::Single(subs) => {
            SubstitutionLookup::Single(make_lookup(flags, mark_set, use_extension, subs))
        }
        GsubLookup::Multiple(subs) => {
            SubstitutionLookup::Multiple(make_lookup(flags, mark_set, use_extension, subs))
        }
        GsubLookup::Alternate(subs) => {
            SubstitutionLookup::Alternate(make_lookup(flags, mark_set, use_extension, subs))
        }
        GsubLookup::Ligature(subs) => {
            SubstitutionLookup::Ligature(make_lookup(flags, mark_set, use_extension, subs))
        }
        GsubLookup::Chain(chains) => {
            let subs = chains
                .iter()
                .map(|chain| SubstitutionChainContext(chain.lower_chain(labels, sink)))
                .collect();
            SubstitutionLookup::ChainContextual(make_lookup(flags, mark_set, use_extension, subs))
        }
        GsubLookup::Reverse(subs) => {
            SubstitutionLookup::Reverse(make_lookup(flags, mark_set, use_extension, subs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::GPat;

    fn gid(raw: u16) -> GlyphId16 {
        GlyphId16::new(raw)
    }

    fn accum_with_rules(kind: LookupKind, rules: Vec<Rule>) -> LookupAccum {
        let mut accum = LookupAccum::new(kind, LookupFlag::empty(), None);
        accum.rules = rules;
        accum
    }

    #[test]
    fn single_constant_delta_is_format_1() {
        let mut accum = LookupAccum::new(LookupKind::SingleSub, LookupFlag::empty(), None);
        accum.singles = [(1u16, 27u16), (2, 28), (3, 29)]
            .map(|(a, b)| (gid(a), gid(b)))
            .into();
        let Some(GsubLookup::Single(subs)) = compile_single(accum) else {
            panic!("expected single lookup")
        };
        assert!(matches!(
            &subs[0],
            SingleSubst::Format1(table) if table.delta_glyph_id == 26
        ));
    }

    #[test]
    fn single_mixed_delta_is_format_2() {
        let mut accum = LookupAccum::new(LookupKind::SingleSub, LookupFlag::empty(), None);
        accum.singles = [(1u16, 27u16), (2, 50)].map(|(a, b)| (gid(a), gid(b))).into();
        let Some(GsubLookup::Single(subs)) = compile_single(accum) else {
            panic!("expected single lookup")
        };
        assert!(matches!(&subs[0], SingleSubst::Format2(_)));
    }

    #[test]
    fn ligature_cross_product_and_sort() {
        // sub [f f_i] i by f_ii  →  (f i) and (f_i i), sorted by first gid
        let rule = Rule {
            targ: GPat::new(vec![
                ClassRec::class([gid(10), gid(30)]),
                ClassRec::glyph(gid(20)),
            ]),
            repl: Some(GPat::single(ClassRec::glyph(gid(99)))),
            entry_exit: Default::default(),
        };
        let accum = accum_with_rules(LookupKind::LigatureSub, vec![rule]);
        let mut sink = DiagSink::default();
        let Some(GsubLookup::Ligature(subs)) = compile_ligature(accum, &mut sink) else {
            panic!("expected ligature lookup")
        };
        let table = &subs[0];
        let covered: Vec<_> = table.coverage.iter().collect();
        assert_eq!(covered, vec![gid(10), gid(30)]);
        assert_eq!(table.ligature_sets.len(), 2);
        assert_eq!(table.ligature_sets[0].ligatures[0].ligature_glyph, gid(99));
        assert_eq!(
            table.ligature_sets[0].ligatures[0].component_glyph_ids,
            vec![gid(20)]
        );
    }

    #[test]
    fn ligature_longest_first_within_set() {
        let mk_rule = |targ: &[u16], repl: u16| Rule {
            targ: GPat::new(targ.iter().map(|g| ClassRec::glyph(gid(*g))).collect()),
            repl: Some(GPat::single(ClassRec::glyph(gid(repl)))),
            entry_exit: Default::default(),
        };
        let accum = accum_with_rules(
            LookupKind::LigatureSub,
            vec![mk_rule(&[1, 2], 50), mk_rule(&[1, 2, 3], 51)],
        );
        let mut sink = DiagSink::default();
        let Some(GsubLookup::Ligature(subs)) = compile_ligature(accum, &mut sink) else {
            panic!("expected ligature lookup")
        };
        let set = &subs[0].ligature_sets[0];
        assert_eq!(set.ligatures[0].component_glyph_ids.len(), 2);
        assert_eq!(set.ligatures[1].component_glyph_ids.len(), 1);
    }

    #[test]
    fn duplicate_ligature_same_replacement_is_a_note() {
        let mk_rule = |repl: u16| Rule {
            targ: GPat::new(vec![ClassRec::glyph(gid(1)), ClassRec::glyph(gid(2))]),
            repl: Some(GPat::single(ClassRec::glyph(gid(repl)))),
            entry_exit: Default::default(),
        };
        let accum =
            accum_with_rules(LookupKind::LigatureSub, vec![mk_rule(50), mk_rule(50)]);
        let mut sink = DiagSink::default();
        let result = compile_ligature(accum, &mut sink);
        assert!(result.is_some());
        assert!(!sink.had_error());
        assert_eq!(sink.diagnostics.len(), 1);

        let accum =
            accum_with_rules(LookupKind::LigatureSub, vec![mk_rule(50), mk_rule(51)]);
        let mut sink = DiagSink::default();
        assert!(compile_ligature(accum, &mut sink).is_none());
        assert!(sink.is_fatal());
    }

    #[test]
    fn multiple_sub_auto_breaks_at_boundary() {
        // craft enough rules that the running size crosses 0xFFFF exactly
        // once; each rule adds 2 + (2 + 2*3) + 2 = 12 bytes over a 10 byte base
        let rules: Vec<Rule> = (0..5600u16)
            .map(|i| Rule {
                targ: GPat::single(ClassRec::glyph(gid(i + 1))),
                repl: Some(GPat::new(vec![
                    ClassRec::glyph(gid(1)),
                    ClassRec::glyph(gid(2)),
                    ClassRec::glyph(gid(3)),
                ])),
                entry_exit: Default::default(),
            })
            .collect();
        let accum = accum_with_rules(LookupKind::MultipleSub, rules);
        let mut sink = DiagSink::default();
        let Some(GsubLookup::Multiple(subs)) = compile_seq_sets(accum, &mut sink, false) else {
            panic!("expected multiple lookup")
        };
        assert_eq!(subs.len(), 2);
        // (0xFFFF - 10) / 12 = 5460 rules fit in the first subtable
        assert_eq!(subs[0].sequences.len(), 5460);
        assert_eq!(subs[1].sequences.len(), 5600 - 5460);
    }
}
