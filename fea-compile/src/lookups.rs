//! Lookup accumulation and compilation.
//!
//! While the driver walks the feature file it fills a [`LookupAccum`] with
//! rules; when the lookup closes, the kind-specific compiler turns the
//! accumulated rules into immutable subtables. Contextual subtables keep
//! their sub-lookup references as [`Label`]s until every lookup is known,
//! at which point labels are rewritten into lookup list indices.

mod contextual;
mod gpos;
mod gsub;

use std::collections::{BTreeMap, HashMap};

use font_types::{GlyphId16, Tag};
use indexmap::IndexMap;

use otl_write::gpos::{Gpos, PositionLookup};
use otl_write::gsub::{Gsub, SubstitutionLookup};
use otl_write::layout::{
    Feature, FeatureList, FeatureParams, FeatureRecord, LangSys, LangSysRecord, LookupFlag,
    LookupList, Script, ScriptList, ScriptRecord,
};

use crate::common::{Label, FIRST_ANON_LABEL, MAX_ANON_LABEL};
use crate::diagnostics::{CompileError, DiagSink};
use crate::metrics::AnchorMarkInfo;
use crate::pattern::GPat;
use crate::registry::Registry;
use crate::tags;

pub(crate) use contextual::ChainSubtable;

pub(crate) type FilterSetId = u16;

/// Which table a lookup belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableTag {
    Gsub,
    Gpos,
}

/// The lookup kinds a rule can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookupKind {
    SingleSub,
    MultipleSub,
    AlternateSub,
    LigatureSub,
    ChainSub,
    ReverseSub,
    SinglePos,
    PairPos,
    CursivePos,
    MarkToBasePos,
    MarkToLigPos,
    MarkToMarkPos,
    ContextPos,
    ChainPos,
}

impl LookupKind {
    pub fn table(self) -> TableTag {
        match self {
            LookupKind::SingleSub
            | LookupKind::MultipleSub
            | LookupKind::AlternateSub
            | LookupKind::LigatureSub
            | LookupKind::ChainSub
            | LookupKind::ReverseSub => TableTag::Gsub,
            _ => TableTag::Gpos,
        }
    }
}

/// One accumulated rule: a target pattern and its payload.
#[derive(Clone, Debug, Default)]
pub(crate) struct Rule {
    pub targ: GPat,
    pub repl: Option<GPat>,
    /// Cursive entry/exit anchors.
    pub entry_exit: [Option<AnchorMarkInfo>; 2],
}

/// The transient unit the driver fills between lookup begin and end.
#[derive(Clone, Debug)]
pub(crate) struct LookupAccum {
    pub script: Tag,
    pub language: Tag,
    pub feature: Tag,
    pub kind: LookupKind,
    pub flags: LookupFlag,
    pub mark_set: Option<FilterSetId>,
    pub label: Label,
    pub use_extension: bool,
    pub rules: Vec<Rule>,
    /// Rule indices preceded by an explicit `subtable;` break.
    pub breaks: Vec<usize>,
    /// Deduplicating map used only for single substitutions.
    pub singles: BTreeMap<GlyphId16, GlyphId16>,
    /// For anonymous lookups, the feature that spawned them.
    pub parent_feat_tag: Option<Tag>,
}

impl LookupAccum {
    pub fn new(kind: LookupKind, flags: LookupFlag, mark_set: Option<FilterSetId>) -> Self {
        LookupAccum {
            script: tags::TAG_UNDEF,
            language: tags::TAG_UNDEF,
            feature: tags::TAG_UNDEF,
            kind,
            flags,
            mark_set,
            label: Label::Undefined,
            use_extension: false,
            rules: Vec::new(),
            breaks: Vec::new(),
            singles: BTreeMap::new(),
            parent_feat_tag: None,
        }
    }
}

/// A compiled GSUB lookup; chain subtables still carry labels.
#[derive(Clone, Debug)]
pub(crate) enum GsubLookup {
    Single(Vec<otl_write::gsub::SingleSubst>),
    Multiple(Vec<otl_write::gsub::MultipleSubstFormat1>),
    Alternate(Vec<otl_write::gsub::AlternateSubstFormat1>),
    Ligature(Vec<otl_write::gsub::LigatureSubstFormat1>),
    Chain(Vec<ChainSubtable>),
    Reverse(Vec<otl_write::gsub::ReverseChainSingleSubstFormat1>),
}

/// A compiled GPOS lookup; context subtables still carry labels.
#[derive(Clone, Debug)]
pub(crate) enum GposLookup {
    Single(Vec<otl_write::gpos::SinglePos>),
    Pair(Vec<otl_write::gpos::PairPos>),
    Cursive(Vec<otl_write::gpos::CursivePosFormat1>),
    MarkToBase(Vec<otl_write::gpos::MarkBasePosFormat1>),
    MarkToLig(Vec<otl_write::gpos::MarkLigPosFormat1>),
    MarkToMark(Vec<otl_write::gpos::MarkMarkPosFormat1>),
    Context(Vec<ChainSubtable>),
    Chain(Vec<ChainSubtable>),
}

/// A compiled lookup with the wrapper data the LookupList needs.
#[derive(Clone, Debug)]
pub(crate) struct CompiledLookup<T> {
    pub label: Label,
    pub flags: LookupFlag,
    pub mark_set: Option<FilterSetId>,
    pub use_extension: bool,
    pub body: T,
}

/// Every lookup compiled so far, in final index order per table.
#[derive(Debug, Default)]
pub(crate) struct AllLookups {
    pub gsub: Vec<CompiledLookup<GsubLookup>>,
    pub gpos: Vec<CompiledLookup<GposLookup>>,
}

impl AllLookups {
    /// Compile a closed accumulator and append the result.
    ///
    /// Returns the label of the new lookup, or `None` if the accumulator
    /// produced nothing (empty, or all rules were skipped).
    pub fn close(
        &mut self,
        accum: LookupAccum,
        anon: &mut AnonLookups,
        registry: &Registry,
        sink: &mut DiagSink,
    ) -> Option<Label> {
        let label = accum.label.clone();
        let flags = accum.flags;
        let mark_set = accum.mark_set;
        let use_extension = accum.use_extension;
        match accum.kind.table() {
            TableTag::Gsub => {
                let body = gsub::compile(accum, anon, sink)?;
                self.gsub.push(CompiledLookup {
                    label: label.clone(),
                    flags,
                    mark_set,
                    use_extension,
                    body,
                });
            }
            TableTag::Gpos => {
                let body = gpos::compile(accum, anon, registry, sink)?;
                self.gpos.push(CompiledLookup {
                    label: label.clone(),
                    flags,
                    mark_set,
                    use_extension,
                    body,
                });
            }
        }
        Some(label)
    }

    /// Iterate the single- and alternate-substitution pairs of a lookup,
    /// for the aalt harvest.
    pub fn harvest_alternates(&self, label: &Label) -> Vec<(GlyphId16, Vec<GlyphId16>)> {
        let label = label.definition();
        let Some(lookup) = self.gsub.iter().find(|lookup| &lookup.label == label) else {
            return Vec::new();
        };
        match &lookup.body {
            GsubLookup::Single(subtables) => subtables
                .iter()
                .flat_map(|sub| match sub {
                    otl_write::gsub::SingleSubst::Format1(table) => table
                        .coverage
                        .iter()
                        .map(|gid| {
                            let repl =
                                GlyphId16::new((gid.to_u16() as i32 + table.delta_glyph_id as i32) as u16);
                            (gid, vec![repl])
                        })
                        .collect::<Vec<_>>(),
                    otl_write::gsub::SingleSubst::Format2(table) => table
                        .coverage
                        .iter()
                        .zip(table.substitute_glyph_ids.iter())
                        .map(|(gid, repl)| (gid, vec![*repl]))
                        .collect(),
                })
                .collect(),
            GsubLookup::Alternate(subtables) => subtables
                .iter()
                .flat_map(|sub| {
                    sub.coverage
                        .iter()
                        .zip(sub.alternate_sets.iter())
                        .map(|(gid, set)| (gid, set.alternate_glyph_ids.clone()))
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The deferred anonymous accumulators synthesized from contextual rules.
#[derive(Debug, Default)]
pub(crate) struct AnonLookups {
    next_label: u16,
    pub accums: Vec<LookupAccum>,
}

impl AnonLookups {
    /// Hand out the next anonymous label.
    pub fn alloc_label(&mut self, sink: &mut DiagSink) -> Option<Label> {
        let raw = match self.next_label.checked_add(FIRST_ANON_LABEL) {
            Some(raw) if raw <= MAX_ANON_LABEL => raw,
            _ => {
                sink.fatal(CompileError::LabelRangeExhausted);
                return None;
            }
        };
        self.next_label += 1;
        Some(Label::Anonymous(raw))
    }

    /// Find an anonymous lookup the rule can join, or start a new one.
    ///
    /// Only the most recently created accumulator is a candidate, and only
    /// when its kind, flags, filter set and parent feature all match and
    /// the new rule does not conflict with what it already holds.
    pub fn find_or_create(
        &mut self,
        kind: LookupKind,
        flags: LookupFlag,
        mark_set: Option<FilterSetId>,
        parent_feat_tag: Tag,
        can_add: impl FnOnce(&LookupAccum) -> bool,
        sink: &mut DiagSink,
    ) -> Option<&mut LookupAccum> {
        let compatible = self.accums.last().is_some_and(|accum| {
            accum.kind == kind
                && accum.flags == flags
                && accum.mark_set == mark_set
                && accum.parent_feat_tag == Some(parent_feat_tag)
                && can_add(accum)
        });
        if !compatible {
            let label = self.alloc_label(sink)?;
            let mut accum = LookupAccum::new(kind, flags, mark_set);
            accum.label = label;
            accum.parent_feat_tag = Some(parent_feat_tag);
            self.accums.push(accum);
        }
        self.accums.last_mut()
    }
}

/// A (script, language, feature) registration target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct FeatureKey {
    pub script: Tag,
    pub language: Tag,
    pub feature: Tag,
}

/// Assembles the script/feature/lookup lists for one table.
///
/// Scripts sort by tag ascending with `dflt` language systems first;
/// features keep authoring order, deduplicated by (tag, lookup set).
pub(crate) struct PosSubBuilder {
    scripts: BTreeMap<Tag, BTreeMap<Tag, LangSys>>,
    features: IndexMap<(Tag, Vec<u16>), u16>,
    params: HashMap<u16, FeatureParams>,
}

impl PosSubBuilder {
    pub fn new() -> Self {
        PosSubBuilder {
            scripts: Default::default(),
            features: Default::default(),
            params: Default::default(),
        }
    }

    pub fn add(
        &mut self,
        key: FeatureKey,
        lookups: Vec<u16>,
        params: Option<FeatureParams>,
        required: bool,
    ) {
        let next = self.features.len() as u16;
        let idx = *self.features.entry((key.feature, lookups)).or_insert(next);
        if let Some(params) = params {
            self.params.insert(idx, params);
        }
        let lang_sys = self
            .scripts
            .entry(key.script)
            .or_default()
            .entry(key.language)
            .or_default();
        if required {
            lang_sys.required_feature_index = idx;
        } else if !lang_sys.feature_indices.contains(&idx) {
            lang_sys.feature_indices.push(idx);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn build_lists(self) -> (ScriptList, FeatureList) {
        let mut feature_records = vec![
            FeatureRecord {
                feature_tag: tags::TAG_UNDEF,
                feature: Feature::default(),
            };
            self.features.len()
        ];
        for ((tag, lookups), idx) in self.features {
            feature_records[idx as usize] = FeatureRecord {
                feature_tag: tag,
                feature: Feature {
                    feature_params: self.params.get(&idx).cloned(),
                    lookup_list_indices: lookups,
                },
            };
        }

        let script_records = self
            .scripts
            .into_iter()
            .map(|(script_tag, langs)| {
                let mut script = Script::default();
                for (lang_tag, lang_sys) in langs {
                    if lang_tag == tags::LANG_DFLT {
                        script.default_lang_sys = Some(lang_sys);
                    } else {
                        script.lang_sys_records.push(LangSysRecord {
                            lang_sys_tag: lang_tag,
                            lang_sys,
                        });
                    }
                }
                ScriptRecord { script_tag, script }
            })
            .collect();

        (
            ScriptList { script_records },
            FeatureList { feature_records },
        )
    }
}

/// The label → lookup index maps for both tables.
#[derive(Debug, Default)]
pub(crate) struct LabelMap {
    map: HashMap<Label, (TableTag, u16)>,
}

impl LabelMap {
    pub fn new(lookups: &AllLookups) -> Self {
        let mut map = HashMap::new();
        for (idx, lookup) in lookups.gsub.iter().enumerate() {
            map.insert(lookup.label.clone(), (TableTag::Gsub, idx as u16));
        }
        for (idx, lookup) in lookups.gpos.iter().enumerate() {
            map.insert(lookup.label.clone(), (TableTag::Gpos, idx as u16));
        }
        LabelMap { map }
    }

    pub fn resolve(&self, label: &Label) -> Option<(TableTag, u16)> {
        self.map.get(label.definition()).copied()
    }
}

impl AllLookups {
    /// Lower every compiled lookup into its final form, rewriting labels
    /// into lookup list indices.
    pub fn into_lookup_lists(
        self,
        labels: &LabelMap,
        sink: &mut DiagSink,
    ) -> (LookupList<SubstitutionLookup>, LookupList<PositionLookup>) {
        let gsub = self
            .gsub
            .into_iter()
            .map(|lookup| gsub::lower(lookup, labels, sink))
            .collect();
        let gpos = self
            .gpos
            .into_iter()
            .map(|lookup| gpos::lower(lookup, labels, sink))
            .collect();
        (LookupList::new(gsub), LookupList::new(gpos))
    }
}

/// Build the final GSUB table object.
pub(crate) fn assemble_gsub(
    builder: PosSubBuilder,
    lookup_list: LookupList<SubstitutionLookup>,
) -> Option<Gsub> {
    if builder.is_empty() && lookup_list.lookups.is_empty() {
        return None;
    }
    let (script_list, feature_list) = builder.build_lists();
    Some(Gsub {
        script_list,
        feature_list,
        lookup_list,
    })
}

/// Build the final GPOS table object.
pub(crate) fn assemble_gpos(
    builder: PosSubBuilder,
    lookup_list: LookupList<PositionLookup>,
) -> Option<Gpos> {
    if builder.is_empty() && lookup_list.lookups.is_empty() {
        return None;
    }
    let (script_list, feature_list) = builder.build_lists();
    Some(Gpos {
        script_list,
        feature_list,
        lookup_list,
    })
}
