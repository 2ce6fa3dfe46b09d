//! The feature-file driver: a state machine over statement callbacks.
//!
//! The host walks its parse tree and calls one method per statement; the
//! driver tracks the current feature/script/language/lookup context,
//! validates each rule against its lookup kind, and fills accumulators
//! that compile into subtables when the lookup closes.

use std::collections::{HashMap, HashSet};

use font_types::{GlyphId16, Tag};
use indexmap::IndexMap;
use smol_str::SmolStr;

use otl_write::layout::{
    CharacterVariantParams, FeatureParams, LookupFlag, SizeParams, StylisticSetParams,
};

use crate::common::{GlyphSet, Label, MAX_NAMED_LABEL};
use crate::diagnostics::{CompileError, DiagSink, Diagnostic};
use crate::lookups::{
    assemble_gpos, assemble_gsub, AllLookups, AnonLookups, FeatureKey, FilterSetId, LabelMap,
    LookupAccum, LookupKind, PosSubBuilder, Rule, TableTag,
};
use crate::metrics::{AnchorMarkInfo, MetricsInfo};
use crate::pattern::{expand_range, ClassRec, GPat};
use crate::registry::Registry;
use crate::tables::{
    AxisLocation, BaseScriptStatement, HeadValues, HheaValues, NameSpec, Os2Values,
    StatAxisStatement, StatStatements, StatValueStatement, Tables, VheaValues, VmtxOverrides,
};
use crate::tags;

/// The glyph inventory the host must supply.
pub trait GlyphResolver {
    /// Resolve a glyph name; `None` if the font has no such glyph.
    fn gid_of_name(&self, name: &str) -> Option<GlyphId16>;
    /// Resolve a CID.
    fn gid_of_cid(&self, cid: u32) -> Option<GlyphId16>;
    fn h_advance(&self, gid: GlyphId16) -> i16;
    fn v_advance(&self, gid: GlyphId16) -> i16;
    fn glyph_count(&self) -> u16;
}

/// Global flags: facts about the whole file.
#[derive(Clone, Copy, Debug, Default)]
struct GFlags {
    seen_feature: bool,
    seen_lang_sys: bool,
    seen_gdef_gc: bool,
    seen_non_dflt_script_lang: bool,
    seen_old_dflt: bool,
}

/// Per-feature flags, reset when a feature block opens.
#[derive(Clone, Copy, Debug, Default)]
struct FFlags {
    seen_script_lang: bool,
}

/// What the `aalt` feature block recorded, for the post-pass fold.
#[derive(Debug, Default)]
struct AaltState {
    /// Feature tags referenced with `feature XXXX;`, in authoring order.
    features: Vec<Tag>,
    /// Alternates authored directly inside the aalt block.
    rules: Vec<(GlyphId16, Vec<GlyphId16>)>,
    /// The language systems the block was registered for.
    language_systems: Vec<(Tag, Tag)>,
}

/// The result of a successful compile.
#[derive(Debug, Default)]
pub struct Compilation {
    pub gsub: Option<Vec<u8>>,
    pub gpos: Option<Vec<u8>>,
    pub gdef: Option<Vec<u8>>,
    pub base: Option<Vec<u8>>,
    pub stat: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub head: Option<HeadValues>,
    pub hhea: Option<HheaValues>,
    pub vhea: Option<VheaValues>,
    pub os2: Option<Os2Values>,
    pub vmtx: VmtxOverrides,
    /// Notes and warnings from a compile that still succeeded.
    pub diagnostics: Vec<Diagnostic>,
}

/// The compiler driver. One instance is one compile.
pub struct Compiler<'a> {
    glyphs: &'a dyn GlyphResolver,
    sink: DiagSink,
    registry: Registry,
    tables: Tables,
    lookups: AllLookups,
    anon: AnonLookups,
    /// (script, language, feature) → lookup labels, in authoring order.
    features: IndexMap<FeatureKey, Vec<Label>>,
    /// Keys flagged with the `required` keyword on a language statement.
    required_features: HashSet<FeatureKey>,
    feature_params: HashMap<Tag, FeatureParams>,
    default_lang_systems: Vec<(Tag, Tag)>,
    cur_language_systems: Vec<(Tag, Tag)>,
    cur_feature: Option<Tag>,
    cur_script: Tag,
    cur_language: Tag,
    lookup_flags: LookupFlag,
    mark_set: Option<FilterSetId>,
    accum: Option<LookupAccum>,
    /// Set while inside a `lookup NAME { … }` block.
    named_block: Option<NamedBlock>,
    named_labels: IndexMap<SmolStr, Label>,
    next_named_label: u16,
    gflags: GFlags,
    fflags: FFlags,
    aalt: Option<AaltState>,
}

#[derive(Clone, Debug)]
struct NamedBlock {
    name: SmolStr,
    label: Label,
    use_extension: bool,
    /// The kind of the first rule; later rules must match.
    kind: Option<LookupKind>,
}

impl<'a> Compiler<'a> {
    pub fn new(glyphs: &'a dyn GlyphResolver) -> Self {
        Compiler {
            glyphs,
            sink: DiagSink::default(),
            registry: Registry::default(),
            tables: Tables::default(),
            lookups: AllLookups::default(),
            anon: AnonLookups::default(),
            features: IndexMap::new(),
            required_features: HashSet::new(),
            feature_params: HashMap::new(),
            default_lang_systems: Vec::new(),
            cur_language_systems: Vec::new(),
            cur_feature: None,
            cur_script: tags::SCRIPT_DFLT,
            cur_language: tags::LANG_DFLT,
            lookup_flags: LookupFlag::empty(),
            mark_set: None,
            accum: None,
            named_block: None,
            named_labels: IndexMap::new(),
            next_named_label: 0,
            gflags: GFlags::default(),
            fflags: FFlags::default(),
            aalt: None,
        }
    }

    /// Update the source position attached to subsequent diagnostics.
    pub fn set_position(&mut self, file: &str, line: u32, column: u32) {
        self.sink.position = crate::diagnostics::SourcePosition {
            file: file.into(),
            line,
            column,
        };
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.sink.diagnostics
    }

    /// `true` once an error or fatal diagnostic has been reported.
    pub fn had_error(&self) -> bool {
        self.sink.had_error()
    }

    // ------------------------------------------------------------------
    // pattern building

    /// Resolve a glyph name into a one-glyph position.
    pub fn glyph(&mut self, name: &str) -> ClassRec {
        match self.glyphs.gid_of_name(name) {
            Some(gid) => ClassRec::glyph(gid),
            None => {
                self.sink.error(CompileError::UnknownGlyph(name.into()));
                ClassRec::default()
            }
        }
    }

    /// Resolve a CID into a one-glyph position.
    pub fn cid(&mut self, cid: u32) -> ClassRec {
        match self.glyphs.gid_of_cid(cid) {
            Some(gid) => ClassRec::glyph(gid),
            None => {
                self.sink
                    .error(CompileError::UnknownGlyph(format!("\\{cid}").into()));
                ClassRec::default()
            }
        }
    }

    /// Expand a glyph range into a class position.
    pub fn glyph_range(&mut self, start: &str, end: &str) -> ClassRec {
        let mut gids = Vec::new();
        let mut missing = Vec::new();
        let result = expand_range(start, end, |name| match self.glyphs.gid_of_name(name) {
            Some(gid) => gids.push(gid),
            None => missing.push(SmolStr::from(name)),
        });
        if let Err(err) = result {
            self.sink.error(err);
            return ClassRec::default();
        }
        for name in missing {
            self.sink.error(CompileError::UnknownGlyph(name));
        }
        ClassRec::class(gids)
    }

    /// Look up a named glyph class.
    pub fn named_class(&mut self, name: &str) -> ClassRec {
        match self.registry.glyph_class(name) {
            Some(rec) => rec.clone(),
            None => {
                self.sink
                    .error(CompileError::UnknownGlyph(name.into()));
                ClassRec::default()
            }
        }
    }

    /// Look up a named anchor definition.
    pub fn named_anchor(&mut self, name: &str) -> Option<AnchorMarkInfo> {
        let anchor = self.registry.anchor(name).cloned();
        if anchor.is_none() {
            self.sink.error(CompileError::UnknownGlyph(name.into()));
        }
        anchor
    }

    /// Look up a named value record.
    pub fn named_value_record(&mut self, name: &str) -> Option<MetricsInfo> {
        let metrics = self.registry.value_record(name).cloned();
        if metrics.is_none() {
            self.sink.error(CompileError::UnknownGlyph(name.into()));
        }
        metrics
    }

    // ------------------------------------------------------------------
    // top-level definitions

    pub fn language_system(&mut self, script: Tag, language: Tag) {
        if self.gflags.seen_feature {
            self.sink.error(CompileError::ContextViolation(
                "languagesystem must precede all feature blocks".into(),
            ));
            return;
        }
        self.gflags.seen_lang_sys = true;
        if script != tags::SCRIPT_DFLT || language != tags::LANG_DFLT {
            self.gflags.seen_non_dflt_script_lang = true;
        }
        if !self.default_lang_systems.contains(&(script, language)) {
            self.default_lang_systems.push((script, language));
        }
    }

    pub fn glyph_class_assign(&mut self, name: &str, rec: ClassRec) {
        if let Err(err) = self.registry.define_glyph_class(name.into(), rec) {
            self.sink.error(err);
        }
    }

    pub fn anchor_def(&mut self, name: &str, x: i16, y: i16, contour_point: Option<u16>) {
        let anchor = match contour_point {
            Some(point) => AnchorMarkInfo::contour(x, y, point),
            None => AnchorMarkInfo::coord(x, y),
        };
        if let Err(err) = self.registry.define_anchor(name.into(), anchor) {
            self.sink.error(err);
        }
    }

    pub fn value_record_def(&mut self, name: &str, values: Vec<i16>) {
        match MetricsInfo::new(values) {
            Ok(metrics) => {
                if let Err(err) = self.registry.define_value_record(name.into(), metrics) {
                    self.sink.error(err);
                }
            }
            Err(err) => self.sink.error(err),
        }
    }

    /// `markClass <glyphs> <anchor> @NAME;`
    pub fn mark_class(&mut self, name: &str, rec: ClassRec, anchor: AnchorMarkInfo) {
        if let Err(err) = self
            .registry
            .add_mark_class_members(name.into(), rec, anchor)
        {
            self.sink.error(err);
        }
    }

    // ------------------------------------------------------------------
    // feature blocks and the script/language state machine

    pub fn feature_begin(&mut self, tag: Tag) {
        if self.cur_feature.is_some() {
            self.sink.error(CompileError::ContextViolation(
                "feature blocks cannot nest".into(),
            ));
            return;
        }
        self.gflags.seen_feature = true;
        self.fflags = FFlags::default();
        self.cur_feature = Some(tag);
        self.cur_script = tags::SCRIPT_DFLT;
        self.cur_language = tags::LANG_DFLT;
        self.lookup_flags = LookupFlag::empty();
        self.mark_set = None;
        self.cur_language_systems =
            if self.gflags.seen_lang_sys && !self.default_lang_systems.is_empty() {
                self.default_lang_systems.clone()
            } else {
                vec![(tags::SCRIPT_DFLT, tags::LANG_DFLT)]
            };
        if tag == tags::AALT {
            self.aalt = Some(AaltState {
                language_systems: self.cur_language_systems.clone(),
                ..Default::default()
            });
        }
        // make sure the feature appears in authoring order even if a later
        // statement registers the first lookup
        for (script, language) in self.cur_language_systems.clone() {
            self.features
                .entry(FeatureKey {
                    script,
                    language,
                    feature: tag,
                })
                .or_default();
        }
    }

    pub fn feature_end(&mut self) {
        if self.cur_feature.is_none() {
            self.sink.error(CompileError::ContextViolation(
                "feature end without a feature".into(),
            ));
            return;
        }
        if self.named_block.is_some() {
            self.sink.error(CompileError::ContextViolation(
                "lookup block left open at feature end".into(),
            ));
            self.named_block = None;
        }
        self.close_accum();
        self.cur_feature = None;
        self.cur_language_systems.clear();
        self.lookup_flags = LookupFlag::empty();
        self.mark_set = None;
    }

    /// `feature XXXX;` inside the aalt block.
    pub fn aalt_feature_ref(&mut self, tag: Tag) {
        match self.aalt.as_mut() {
            Some(aalt) if self.cur_feature == Some(tags::AALT) => aalt.features.push(tag),
            _ => self.sink.error(CompileError::ContextViolation(
                "feature references are only allowed inside aalt".into(),
            )),
        }
    }

    pub fn script(&mut self, tag: Tag) {
        let Some(feature) = self.cur_feature else {
            self.sink.error(CompileError::ContextViolation(
                "script statements are only allowed inside a feature".into(),
            ));
            return;
        };
        if feature == tags::AALT || feature == tags::SIZE {
            self.sink.error(CompileError::ContextViolation(format!(
                "script statements are not allowed in '{feature}'"
            )));
            return;
        }
        self.close_accum();
        self.fflags.seen_script_lang = true;
        if tag != tags::SCRIPT_DFLT {
            self.gflags.seen_non_dflt_script_lang = true;
        }
        self.cur_script = tag;
        self.cur_language = tags::LANG_DFLT;
        self.cur_language_systems = vec![(tag, tags::LANG_DFLT)];
    }

    /// `language L [exclude_dflt|include_dflt] [required];`
    pub fn language(&mut self, tag: Tag, exclude_dflt: bool, required: bool) {
        let Some(feature) = self.cur_feature else {
            self.sink.error(CompileError::ContextViolation(
                "language statements are only allowed inside a feature".into(),
            ));
            return;
        };
        // the old dialect used the reserved script tag as a language
        let tag = if tag == Tag::new(b"DFLT") {
            if !self.gflags.seen_old_dflt {
                self.gflags.seen_old_dflt = true;
                self.sink.warning(CompileError::SyntaxIncompatibility(
                    "language 'DFLT' corrected to 'dflt'".into(),
                ));
            }
            tags::LANG_DFLT
        } else {
            tag
        };
        self.close_accum();
        self.fflags.seen_script_lang = true;
        if tag != tags::LANG_DFLT {
            self.gflags.seen_non_dflt_script_lang = true;
        }
        self.cur_language = tag;
        let key = FeatureKey {
            script: self.cur_script,
            language: tag,
            feature,
        };
        // replay the script's default-language lookups unless excluded
        let replayed = if tag != tags::LANG_DFLT && !exclude_dflt {
            self.features
                .get(&FeatureKey {
                    language: tags::LANG_DFLT,
                    ..key
                })
                .cloned()
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let entry = self.features.entry(key).or_default();
        for label in replayed {
            if !entry.contains(&label) {
                entry.push(label);
            }
        }
        if required {
            self.required_features.insert(key);
        }
        self.cur_language_systems = vec![(self.cur_script, tag)];
    }

    /// `lookupflag 0;` or a rebuilt flag word with its class references.
    pub fn lookup_flag(
        &mut self,
        flags: LookupFlag,
        mark_attach: Option<ClassRec>,
        filter_set: Option<ClassRec>,
    ) {
        self.close_accum();
        let mut flags = flags;
        if let Some(rec) = mark_attach {
            let set: GlyphSet = rec.gids().collect();
            match self.tables.gdef.mark_attach_class_id(set) {
                Some(id) => flags.set_mark_attachment_class(id),
                None => self.sink.error(CompileError::ContextViolation(
                    "more than 15 mark attachment classes".into(),
                )),
            }
        }
        self.mark_set = filter_set.map(|rec| {
            flags |= LookupFlag::USE_MARK_FILTERING_SET;
            let set: GlyphSet = rec.gids().collect();
            self.tables.gdef.mark_filter_set_id(set)
        });
        self.lookup_flags = flags;
    }

    pub fn lookup_flag_bits(&mut self, bits: u16) {
        self.close_accum();
        self.lookup_flags = LookupFlag::from_bits_truncate(bits);
        self.mark_set = None;
    }

    /// `subtable;`
    pub fn subtable_break(&mut self) {
        match self.accum.as_mut() {
            Some(accum) if accum.kind == LookupKind::PairPos => {
                accum.breaks.push(accum.rules.len());
            }
            _ => self.sink.warning(CompileError::ContextViolation(
                "subtable breaks only apply to class pair positioning".into(),
            )),
        }
    }

    pub fn lookup_begin(&mut self, name: &str, use_extension: bool) {
        if self.cur_feature == Some(tags::AALT) {
            self.sink.error(CompileError::ContextViolation(
                "lookups are not allowed in aalt".into(),
            ));
            return;
        }
        if self.named_block.is_some() {
            self.sink.error(CompileError::ContextViolation(
                "lookup blocks cannot nest".into(),
            ));
            return;
        }
        self.close_accum();
        if self.named_labels.contains_key(name) {
            self.sink
                .error(CompileError::DuplicateDefinition(name.into()));
            return;
        }
        if self.next_named_label > MAX_NAMED_LABEL {
            self.sink.fatal(CompileError::LabelRangeExhausted);
            return;
        }
        let label = Label::Named(self.next_named_label);
        self.next_named_label += 1;
        self.named_labels.insert(name.into(), label.clone());
        if self.cur_feature.is_none() {
            self.lookup_flags = LookupFlag::empty();
            self.mark_set = None;
        }
        self.named_block = Some(NamedBlock {
            name: name.into(),
            label,
            use_extension,
            kind: None,
        });
    }

    pub fn lookup_end(&mut self, name: &str) {
        let Some(block) = self.named_block.take() else {
            self.sink.error(CompileError::ContextViolation(
                "lookup end without a lookup block".into(),
            ));
            return;
        };
        if block.name != name {
            self.sink.error(CompileError::ContextViolation(format!(
                "lookup block '{}' closed as '{}'",
                block.name, name
            )));
        }
        self.close_accum();
        if self.cur_feature.is_none() {
            self.lookup_flags = LookupFlag::empty();
            self.mark_set = None;
        }
    }

    /// `lookup NAME;` — reference a previously defined lookup.
    pub fn lookup_ref(&mut self, name: &str) {
        let Some(label) = self.named_labels.get(name).cloned() else {
            self.sink
                .fatal(CompileError::UnresolvedLookupRef(name.into()));
            return;
        };
        self.close_accum();
        if self.cur_feature.is_some() {
            self.register_lookup(label.reference());
        } else {
            self.sink.warning(CompileError::ContextViolation(
                "lookup reference outside a feature does nothing".into(),
            ));
        }
    }

    // ------------------------------------------------------------------
    // rules

    /// A substitution statement.
    ///
    /// `kind` is the lookup kind the statement's shape calls for; `targ`
    /// roles are assigned here from the mark flags.
    pub fn sub(&mut self, mut targ: GPat, repl: Option<GPat>, kind: LookupKind) {
        debug_assert_eq!(kind.table(), TableTag::Gsub);
        targ.assign_roles();
        if !self.validate_sub(&targ, repl.as_ref(), kind) {
            return;
        }
        if kind == LookupKind::ReverseSub {
            // attach each replacement to its target glyph, so sorting the
            // input class keeps the substitute array aligned
            self.attach_reverse_substitutes(&mut targ, repl.as_ref());
        }
        self.prep_rule(kind, targ, repl, Default::default());
    }

    fn attach_reverse_substitutes(&mut self, targ: &mut GPat, repl: Option<&GPat>) {
        let Some(repl_rec) = repl.and_then(|pat| pat.classes.first()) else {
            return;
        };
        let Some(input) = targ.classes.iter_mut().find(|rec| rec.role.input) else {
            return;
        };
        if repl_rec.len() == 1 {
            let gid = repl_rec.first_gid();
            for entry in &mut input.glyphs {
                entry.substitute = gid;
            }
        } else if repl_rec.len() == input.len() {
            let substitutes: Vec<_> = repl_rec.gids().collect();
            for (entry, substitute) in input.glyphs.iter_mut().zip(substitutes) {
                entry.substitute = Some(substitute);
            }
        } else {
            self.sink.error(CompileError::PatternShapeMismatch(
                "reverse chain replacement class length does not match the target".into(),
            ));
        }
    }

    /// `ignore sub` — a contextual rule with no replacement records.
    pub fn ignore_sub(&mut self, mut targ: GPat) {
        targ.ignore_clause = true;
        targ.assign_roles();
        self.prep_rule(LookupKind::ChainSub, targ, None, Default::default());
    }

    /// A positioning statement.
    pub fn pos(&mut self, mut targ: GPat, enumerate: bool, kind: LookupKind) {
        debug_assert_eq!(kind.table(), TableTag::Gpos);
        targ.enumerate = enumerate;
        targ.assign_roles();
        if !self.validate_pos(&targ, kind) {
            return;
        }
        self.seal_position_mark_classes(&targ);
        self.prep_rule(kind, targ, None, Default::default());
    }

    /// `ignore pos`.
    pub fn ignore_pos(&mut self, mut targ: GPat) {
        targ.ignore_clause = true;
        targ.assign_roles();
        self.prep_rule(LookupKind::ChainPos, targ, None, Default::default());
    }

    /// `pos cursive <glyphs> <entry anchor> <exit anchor>;`
    pub fn pos_cursive(
        &mut self,
        rec: ClassRec,
        entry: Option<AnchorMarkInfo>,
        exit: Option<AnchorMarkInfo>,
    ) {
        let targ = GPat::single(rec);
        self.prep_rule(LookupKind::CursivePos, targ, None, [entry, exit]);
    }

    fn seal_position_mark_classes(&mut self, targ: &GPat) {
        for rec in &targ.classes {
            for anchor in &rec.anchor_info {
                if let Some(name) = anchor.mark_class_name.clone() {
                    self.registry.seal_mark_class(&name);
                }
            }
            if let Some(name) = rec.mark_class_name.clone() {
                self.registry.seal_mark_class(&name);
            }
        }
    }

    fn validate_sub(&mut self, targ: &GPat, repl: Option<&GPat>, kind: LookupKind) -> bool {
        let report = |this: &mut Self, msg: &str| {
            this.sink
                .error(CompileError::PatternShapeMismatch(msg.into()));
            false
        };
        match kind {
            LookupKind::SingleSub => {
                let Some((t, r)) = targ.classes.first().zip(repl.and_then(|r| r.classes.first()))
                else {
                    return report(self, "single substitution takes one target and one replacement");
                };
                if r.len() > 1 && t.len() != r.len() {
                    return report(self, "replacement class length does not match target class");
                }
            }
            LookupKind::MultipleSub => {
                if targ.len() != 1 || repl.is_none_or(|r| r.is_empty()) {
                    return report(self, "multiple substitution takes one target glyph");
                }
            }
            LookupKind::AlternateSub => {
                if targ.len() != 1
                    || targ.classes[0].len() != 1
                    || repl.is_none_or(|r| r.len() != 1)
                {
                    return report(self, "alternate substitution takes one target glyph and one choice class");
                }
            }
            LookupKind::LigatureSub => {
                if targ.len() < 2 || repl.is_none_or(|r| r.len() != 1 || r.classes[0].len() != 1) {
                    return report(self, "ligature substitution takes a sequence and one replacement glyph");
                }
            }
            LookupKind::ChainSub => {
                if !targ.has_marked && repl.is_some() {
                    return report(self, "contextual substitution requires marked glyphs");
                }
            }
            LookupKind::ReverseSub => {
                let input: Vec<_> = targ.classes.iter().filter(|rec| rec.role.input).collect();
                if input.len() != 1 {
                    self.sink.error(CompileError::ContextViolation(
                        "reverse chain substitution takes exactly one input position".into(),
                    ));
                    return false;
                }
            }
            _ => {}
        }
        true
    }

    fn validate_pos(&mut self, targ: &GPat, kind: LookupKind) -> bool {
        match kind {
            LookupKind::PairPos if targ.len() != 2 => {
                self.sink.error(CompileError::PatternShapeMismatch(
                    "pair positioning takes exactly two positions".into(),
                ));
                false
            }
            LookupKind::MarkToBasePos | LookupKind::MarkToLigPos | LookupKind::MarkToMarkPos
                if targ
                    .classes
                    .first()
                    .is_none_or(|rec| rec.anchor_info.is_empty()) =>
            {
                self.sink.error(CompileError::PatternShapeMismatch(
                    "attachment positioning requires base anchors".into(),
                ));
                false
            }
            _ => true,
        }
    }

    /// Route a validated rule into the right accumulator, closing the
    /// current one if the table or kind changed.
    fn prep_rule(
        &mut self,
        kind: LookupKind,
        targ: GPat,
        repl: Option<GPat>,
        entry_exit: [Option<AnchorMarkInfo>; 2],
    ) {
        // after an error, rule emission is a no-op but the walk continues
        if self.sink.had_error() {
            return;
        }
        if let Some(block) = &mut self.named_block {
            match block.kind {
                None => block.kind = Some(kind),
                Some(existing) if existing != kind => {
                    self.sink.error(CompileError::ContextViolation(
                        "all rules in a named lookup must be of the same type".into(),
                    ));
                    return;
                }
                _ => {}
            }
        }
        if self
            .accum
            .as_ref()
            .is_some_and(|accum| accum.kind != kind)
        {
            self.close_accum();
        }
        if self.accum.is_none() {
            let mut accum = LookupAccum::new(kind, self.lookup_flags, self.mark_set);
            accum.script = self.cur_script;
            accum.language = self.cur_language;
            accum.feature = self.cur_feature.unwrap_or(tags::TAG_STANDALONE);
            match &self.named_block {
                Some(block) => {
                    accum.label = block.label.clone();
                    accum.use_extension = block.use_extension;
                }
                None => {
                    let Some(label) = self.anon.alloc_label(&mut self.sink) else {
                        return;
                    };
                    accum.label = label;
                }
            }
            self.accum = Some(accum);
        }
        let mut accum = self.accum.take().unwrap();

        if kind == LookupKind::SingleSub {
            // singles dedup through a map rather than a rule list
            self.add_single_sub_rule(&mut accum, &targ, repl.as_ref());
        } else {
            accum.rules.push(Rule {
                targ,
                repl,
                entry_exit,
            });
        }
        self.accum = Some(accum);
    }

    fn add_single_sub_rule(&mut self, accum: &mut LookupAccum, targ: &GPat, repl: Option<&GPat>) {
        let (Some(t), Some(r)) = (
            targ.classes.first(),
            repl.and_then(|r| r.classes.first()),
        ) else {
            return;
        };
        let pairs: Vec<(GlyphId16, GlyphId16)> = if r.len() == 1 {
            let repl_gid = r.first_gid().unwrap_or(crate::common::GID_UNDEF);
            t.gids().map(|gid| (gid, repl_gid)).collect()
        } else {
            t.gids().zip(r.gids()).collect()
        };
        let vrt2 = accum.feature == tags::VRT2;
        for (targ_gid, repl_gid) in pairs {
            match accum.singles.get(&targ_gid) {
                Some(prev) if *prev != repl_gid => {
                    self.sink.error(CompileError::DuplicateRule(format!(
                        "glyph {} already substituted in this lookup",
                        targ_gid.to_u16()
                    )));
                    return;
                }
                Some(_) => {
                    self.sink.note(CompileError::DuplicateRule(format!(
                        "duplicate substitution of glyph {}",
                        targ_gid.to_u16()
                    )));
                }
                None => {
                    accum.singles.insert(targ_gid, repl_gid);
                    if vrt2 {
                        // vrt2 seeds vertical advances from the horizontal
                        // metrics
                        let advance = -self.glyphs.h_advance(targ_gid);
                        self.tables
                            .vmtx
                            .advances_y
                            .entry(targ_gid)
                            .or_insert(advance);
                    }
                }
            }
        }
    }

    /// Close the open accumulator, compiling it and registering its label
    /// with the active feature.
    fn close_accum(&mut self) {
        let Some(accum) = self.accum.take() else {
            return;
        };
        let in_feature = self.cur_feature.is_some();
        if let Some(label) =
            self.lookups
                .close(accum, &mut self.anon, &self.registry, &mut self.sink)
        {
            if in_feature {
                self.register_lookup(label);
            }
        }
    }

    fn register_lookup(&mut self, label: Label) {
        let Some(feature) = self.cur_feature else {
            return;
        };
        for (script, language) in self.cur_language_systems.clone() {
            let key = FeatureKey {
                script,
                language,
                feature,
            };
            let entry = self.features.entry(key).or_default();
            if !entry.contains(&label) {
                entry.push(label.clone());
            }
        }
    }

    /// An alternate authored directly inside the aalt block.
    pub fn aalt_rule(&mut self, targ: ClassRec, alts: ClassRec) {
        let aalt = match self.aalt.as_mut() {
            Some(aalt) if self.cur_feature == Some(tags::AALT) => aalt,
            _ => {
                self.sink.error(CompileError::ContextViolation(
                    "alternates outside the aalt feature".into(),
                ));
                return;
            }
        };
        if targ.len() == alts.len() {
            for (t, a) in targ.gids().zip(alts.gids()) {
                aalt.rules.push((t, vec![a]));
            }
        } else if targ.len() == 1 {
            let Some(t) = targ.first_gid() else { return };
            aalt.rules.push((t, alts.gids().collect()));
        } else {
            self.sink.error(CompileError::PatternShapeMismatch(
                "aalt alternates must pair one target with its choices".into(),
            ));
        }
    }

    // ------------------------------------------------------------------
    // feature parameters

    /// `featureNames { … }` — only valid in a stylistic set feature.
    pub fn feature_names(&mut self, specs: Vec<NameSpec>) {
        let Some(feature) = self.cur_feature else {
            return self.sink.fatal(CompileError::FeatureParamMisuse(
                "featureNames outside a feature".into(),
            ));
        };
        if !tags::is_stylistic_set(feature) {
            return self.sink.fatal(CompileError::FeatureParamMisuse(format!(
                "featureNames is only allowed in ss01-ss99, not '{feature}'"
            )));
        }
        if self.fflags.seen_script_lang {
            self.sink.warning(CompileError::ContextViolation(
                "featureNames should precede script and language statements".into(),
            ));
        }
        let ui_name_id = self.tables.name.add_group(specs);
        self.feature_params.insert(
            feature,
            FeatureParams::StylisticSet(StylisticSetParams { ui_name_id }),
        );
    }

    /// `cvParameters { … }` — only valid in a character variant feature.
    pub fn cv_params(
        &mut self,
        ui_label: Vec<NameSpec>,
        tooltip: Vec<NameSpec>,
        sample_text: Vec<NameSpec>,
        param_labels: Vec<Vec<NameSpec>>,
        characters: Vec<u32>,
    ) {
        let Some(feature) = self.cur_feature else {
            return self.sink.fatal(CompileError::FeatureParamMisuse(
                "cvParameters outside a feature".into(),
            ));
        };
        if !tags::is_character_variant(feature) {
            return self.sink.fatal(CompileError::FeatureParamMisuse(format!(
                "cvParameters is only allowed in cv01-cv99, not '{feature}'"
            )));
        }
        let mut add_group = |specs: Vec<NameSpec>| {
            if specs.is_empty() {
                0
            } else {
                self.tables.name.add_group(specs)
            }
        };
        let feat_ui_label_name_id = add_group(ui_label);
        let feat_ui_tooltip_text_name_id = add_group(tooltip);
        let sample_text_name_id = add_group(sample_text);
        let num_named_parameters = param_labels.len() as u16;
        let mut first_param_ui_label_name_id = 0;
        for (index, labels) in param_labels.into_iter().enumerate() {
            let id = self.tables.name.add_group(labels);
            if index == 0 {
                first_param_ui_label_name_id = id;
            }
        }
        self.feature_params.insert(
            feature,
            FeatureParams::CharacterVariant(CharacterVariantParams {
                feat_ui_label_name_id,
                feat_ui_tooltip_text_name_id,
                sample_text_name_id,
                num_named_parameters,
                first_param_ui_label_name_id,
                characters,
            }),
        );
    }

    /// The `size` feature's parameters; menu names follow separately.
    pub fn size_params(
        &mut self,
        design_size: u16,
        identifier: u16,
        range_start: u16,
        range_end: u16,
    ) {
        if self.cur_feature != Some(tags::SIZE) {
            return self.sink.fatal(CompileError::FeatureParamMisuse(
                "size parameters outside the size feature".into(),
            ));
        }
        self.feature_params.insert(
            tags::SIZE,
            FeatureParams::Size(SizeParams {
                design_size,
                identifier,
                name_entry: 0,
                range_start,
                range_end,
            }),
        );
    }

    /// `sizemenuname` rows; allocates the shared menu name id.
    pub fn size_menu_name(&mut self, specs: Vec<NameSpec>) {
        let name_entry = self.tables.name.add_group(specs);
        match self.feature_params.get_mut(&tags::SIZE) {
            Some(FeatureParams::Size(params)) => params.name_entry = name_entry,
            _ => self.sink.fatal(CompileError::FeatureParamMisuse(
                "sizemenuname requires size parameters".into(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // table statements

    pub fn gdef_glyph_class_def(
        &mut self,
        simple: ClassRec,
        ligature: ClassRec,
        mark: ClassRec,
        component: ClassRec,
    ) {
        if self.gflags.seen_gdef_gc {
            self.sink.error(CompileError::DuplicateDefinition(
                "GlyphClassDef".into(),
            ));
            return;
        }
        self.gflags.seen_gdef_gc = true;
        self.tables.gdef.glyph_classes = Some([
            simple.gids().collect(),
            ligature.gids().collect(),
            mark.gids().collect(),
            component.gids().collect(),
        ]);
    }

    pub fn gdef_attach(&mut self, rec: ClassRec, points: Vec<u16>) {
        for gid in rec.gids() {
            self.tables
                .gdef
                .attach_points
                .entry(gid)
                .or_default()
                .extend(points.iter().copied());
        }
    }

    pub fn gdef_lig_caret_coords(&mut self, rec: ClassRec, coords: Vec<i16>) {
        for gid in rec.gids() {
            self.tables.gdef.carets.insert(
                gid,
                coords
                    .iter()
                    .map(|coord| otl_write::gdef::CaretValue::Coordinate(*coord))
                    .collect(),
            );
        }
    }

    pub fn gdef_lig_caret_points(&mut self, rec: ClassRec, points: Vec<u16>) {
        for gid in rec.gids() {
            self.tables.gdef.carets.insert(
                gid,
                points
                    .iter()
                    .map(|point| otl_write::gdef::CaretValue::PointIndex(*point))
                    .collect(),
            );
        }
    }

    pub fn base_tag_list(&mut self, vertical: bool, tags: Vec<Tag>) {
        let mut tags = tags;
        tags.sort_unstable();
        if vertical {
            self.tables.base.vert_tags = tags;
        } else {
            self.tables.base.horiz_tags = tags;
        }
    }

    pub fn base_script(
        &mut self,
        vertical: bool,
        script: Tag,
        default_baseline: Tag,
        coords: Vec<i16>,
    ) {
        let statement = BaseScriptStatement {
            script,
            default_baseline,
            coords,
        };
        if vertical {
            self.tables.base.vert_scripts.push(statement);
        } else {
            self.tables.base.horiz_scripts.push(statement);
        }
    }

    pub fn stat_design_axis(&mut self, tag: Tag, ordering: u16, names: Vec<NameSpec>) {
        let name_id = self.tables.name.add_group(names);
        self.tables
            .stat
            .get_or_insert_with(StatStatements::default)
            .axes
            .push(StatAxisStatement {
                tag,
                ordering,
                name_id,
            });
    }

    pub fn stat_axis_value(
        &mut self,
        flags: otl_write::stat::AxisValueFlags,
        location: AxisLocation,
        names: Vec<NameSpec>,
    ) {
        let name_id = self.tables.name.add_group(names);
        self.tables
            .stat
            .get_or_insert_with(StatStatements::default)
            .values
            .push(StatValueStatement {
                flags,
                name_id,
                location,
            });
    }

    pub fn stat_elided_fallback_name(&mut self, specs: Vec<NameSpec>) {
        let name_id = self.tables.name.add_group(specs);
        self.tables
            .stat
            .get_or_insert_with(StatStatements::default)
            .elided_fallback_name_id = Some(name_id);
    }

    pub fn stat_elided_fallback_name_id(&mut self, name_id: u16) {
        self.tables
            .stat
            .get_or_insert_with(StatStatements::default)
            .elided_fallback_name_id = Some(name_id);
    }

    pub fn name_record(&mut self, name_id: u16, spec: NameSpec) {
        self.tables.name.add(name_id, spec);
    }

    pub fn head_statement(&mut self, values: HeadValues) {
        self.tables.head = Some(values);
    }

    pub fn hhea_statement(&mut self, values: HheaValues) {
        self.tables.hhea = Some(values);
    }

    pub fn vhea_statement(&mut self, values: VheaValues) {
        self.tables.vhea = Some(values);
    }

    pub fn os2_statement(&mut self, values: Os2Values) {
        self.tables.os2 = Some(values);
    }

    pub fn vmtx_advance(&mut self, rec: ClassRec, advance: i16) {
        for gid in rec.gids() {
            self.tables.vmtx.advances_y.insert(gid, advance);
        }
    }

    pub fn vmtx_origin(&mut self, rec: ClassRec, origin: i16) {
        for gid in rec.gids() {
            self.tables.vmtx.origins_y.insert(gid, origin);
        }
    }

    // ------------------------------------------------------------------
    // the build pass

    /// Finish the compile: fold aalt, finalize anonymous lookups, resolve
    /// labels, lay out and serialize every table.
    pub fn build(mut self) -> Result<Compilation, Vec<Diagnostic>> {
        self.close_accum();
        self.fold_aalt();
        self.finalize_anon_lookups();
        log::debug!(
            "compiling {} features, {} gsub / {} gpos lookups{}",
            self.features.len(),
            self.lookups.gsub.len(),
            self.lookups.gpos.len(),
            if self.gflags.seen_non_dflt_script_lang {
                " (non-default language systems)"
            } else {
                ""
            }
        );

        if self.sink.is_fatal() || self.sink.had_error() {
            return Err(self.sink.diagnostics);
        }

        let labels = LabelMap::new(&self.lookups);
        let mut gsub_features = PosSubBuilder::new();
        let mut gpos_features = PosSubBuilder::new();
        for (key, feature_labels) in &self.features {
            let mut gsub_indices = Vec::new();
            let mut gpos_indices = Vec::new();
            for label in feature_labels {
                match labels.resolve(label) {
                    Some((TableTag::Gsub, index)) => gsub_indices.push(index),
                    Some((TableTag::Gpos, index)) => gpos_indices.push(index),
                    None => {
                        // a defined-but-empty named block resolves to
                        // nothing; anything else is a dangling reference
                        let defined = self
                            .named_labels
                            .values()
                            .any(|named| named == label.definition());
                        if !defined {
                            self.sink.fatal(CompileError::UnresolvedLookupRef(
                                format!("{label:?}").into(),
                            ));
                        }
                    }
                }
            }
            let params = self.feature_params.get(&key.feature).cloned();
            let required = self.required_features.contains(key);
            // the size feature has params but no lookups; keep it anyway
            if !gsub_indices.is_empty() {
                gsub_features.add(*key, gsub_indices, params.clone(), required);
            }
            if !gpos_indices.is_empty() || (params.is_some() && key.feature == tags::SIZE) {
                gpos_features.add(*key, gpos_indices, params, required);
            }
        }

        let (gsub_lookups, gpos_lookups) = self.lookups.into_lookup_lists(&labels, &mut self.sink);
        if self.sink.is_fatal() {
            return Err(self.sink.diagnostics);
        }

        let gsub = assemble_gsub(gsub_features, gsub_lookups)
            .and_then(|mut table| dump_gsub(&mut table, &mut self.sink));
        let gpos = assemble_gpos(gpos_features, gpos_lookups)
            .and_then(|mut table| dump_gpos(&mut table, &mut self.sink));

        // validate feature-param name references
        for params in self.feature_params.values() {
            for name_id in referenced_name_ids(params) {
                if name_id >= 256 && !self.tables.name.has_windows_default(name_id) {
                    self.sink
                        .fatal(CompileError::NameTableMissingDefault(name_id));
                }
            }
        }

        let default_marks: GlyphSet = self
            .registry
            .mark_classes()
            .flat_map(|(_, class)| class.gids().collect::<Vec<_>>())
            .collect();
        let gdef = self.tables.gdef.build(&default_marks, &mut self.sink);
        let base = self.tables.base.build(&mut self.sink);
        let stat = self
            .tables
            .stat
            .as_ref()
            .and_then(|stat| stat.build(&mut self.sink));
        let name = self.tables.name.build();

        if self.sink.had_error() {
            return Err(self.sink.diagnostics);
        }
        Ok(Compilation {
            gsub,
            gpos,
            gdef,
            base,
            stat,
            name,
            head: self.tables.head,
            hhea: self.tables.hhea,
            vhea: self.tables.vhea,
            os2: self.tables.os2,
            vmtx: self.tables.vmtx,
            diagnostics: self.sink.diagnostics,
        })
    }

    /// Harvest single and alternate substitutions from the features aalt
    /// references, merge them per target, and synthesize the aalt lookup.
    fn fold_aalt(&mut self) {
        let Some(aalt) = self.aalt.take() else {
            return;
        };
        let mut alternates: IndexMap<GlyphId16, Vec<GlyphId16>> = IndexMap::new();
        let mut merge = |target: GlyphId16, alts: &[GlyphId16]| {
            let entry = alternates.entry(target).or_default();
            for alt in alts {
                if !entry.contains(alt) {
                    entry.push(*alt);
                }
            }
        };
        for (target, alts) in &aalt.rules {
            merge(*target, alts);
        }
        for feature in &aalt.features {
            let mut harvested_labels = Vec::new();
            for (key, labels) in &self.features {
                if key.feature == *feature {
                    for label in labels {
                        if !harvested_labels.contains(label) {
                            harvested_labels.push(label.clone());
                        }
                    }
                }
            }
            for label in harvested_labels {
                for (target, alts) in self.lookups.harvest_alternates(&label) {
                    merge(target, &alts);
                }
            }
        }
        if alternates.is_empty() {
            return;
        }

        let single_only = alternates.values().all(|alts| alts.len() == 1);
        let kind = if single_only {
            LookupKind::SingleSub
        } else {
            LookupKind::AlternateSub
        };
        let Some(label) = self.anon.alloc_label(&mut self.sink) else {
            return;
        };
        let mut accum = LookupAccum::new(kind, LookupFlag::empty(), None);
        accum.label = label.clone();
        accum.feature = tags::AALT;
        if single_only {
            accum.singles = alternates
                .into_iter()
                .map(|(target, alts)| (target, alts[0]))
                .collect();
        } else {
            accum.rules = alternates
                .into_iter()
                .map(|(target, alts)| Rule {
                    targ: GPat::single(ClassRec::glyph(target)),
                    repl: Some(GPat::single(ClassRec::class(alts))),
                    entry_exit: Default::default(),
                })
                .collect();
        }
        if self
            .lookups
            .close(accum, &mut self.anon, &self.registry, &mut self.sink)
            .is_some()
        {
            for (script, language) in aalt.language_systems {
                let key = FeatureKey {
                    script,
                    language,
                    feature: tags::AALT,
                };
                self.features.entry(key).or_default().push(label.clone());
            }
        }
    }

    /// Compile the anonymous accumulators queued by contextual rules.
    fn finalize_anon_lookups(&mut self) {
        let accums = std::mem::take(&mut self.anon.accums);
        for accum in accums {
            self.lookups
                .close(accum, &mut self.anon, &self.registry, &mut self.sink);
        }
        debug_assert!(
            self.anon.accums.is_empty(),
            "anonymous lookups cannot synthesize further lookups"
        );
    }
}

/// The name ids a feature-param payload references.
fn referenced_name_ids(params: &FeatureParams) -> Vec<u16> {
    match params {
        FeatureParams::Size(params) => vec![params.name_entry],
        FeatureParams::StylisticSet(params) => vec![params.ui_name_id],
        FeatureParams::CharacterVariant(params) => vec![
            params.feat_ui_label_name_id,
            params.feat_ui_tooltip_text_name_id,
            params.sample_text_name_id,
            params.first_param_ui_label_name_id,
        ],
    }
}

/// Serialize GSUB; on a 16-bit overflow, wrap every lookup's subtables in
/// extension records and try once more.
fn dump_gsub(table: &mut otl_write::gsub::Gsub, sink: &mut DiagSink) -> Option<Vec<u8>> {
    match otl_write::dump_table(&*table) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.is_extension_recoverable() => {
            sink.note(CompileError::OffsetOverflow);
            for lookup in &mut table.lookup_list.lookups {
                lookup.set_use_extension(true);
            }
            dump_or_fatal(&*table, sink)
        }
        Err(_) => {
            sink.fatal(CompileError::OffsetOverflow);
            None
        }
    }
}

/// As [`dump_gsub`], for GPOS.
fn dump_gpos(table: &mut otl_write::gpos::Gpos, sink: &mut DiagSink) -> Option<Vec<u8>> {
    match otl_write::dump_table(&*table) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.is_extension_recoverable() => {
            sink.note(CompileError::OffsetOverflow);
            for lookup in &mut table.lookup_list.lookups {
                lookup.set_use_extension(true);
            }
            dump_or_fatal(&*table, sink)
        }
        Err(_) => {
            sink.fatal(CompileError::OffsetOverflow);
            None
        }
    }
}

fn dump_or_fatal<T: otl_write::TableWrite>(table: &T, sink: &mut DiagSink) -> Option<Vec<u8>> {
    match otl_write::dump_table(table) {
        Ok(bytes) => Some(bytes),
        Err(_) => {
            sink.fatal(CompileError::OffsetOverflow);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use crate::lookups::GsubLookup;
    use otl_write::gsub::SingleSubst;

    /// A small inventory: names are "g1".."g99", gid matches the number.
    struct TestGlyphs;

    impl GlyphResolver for TestGlyphs {
        fn gid_of_name(&self, name: &str) -> Option<GlyphId16> {
            name.strip_prefix('g')
                .and_then(|raw| raw.parse().ok())
                .filter(|gid| *gid < 100)
                .map(GlyphId16::new)
        }

        fn gid_of_cid(&self, cid: u32) -> Option<GlyphId16> {
            (cid < 100).then(|| GlyphId16::new(cid as u16))
        }

        fn h_advance(&self, _gid: GlyphId16) -> i16 {
            600
        }

        fn v_advance(&self, _gid: GlyphId16) -> i16 {
            -1000
        }

        fn glyph_count(&self) -> u16 {
            100
        }
    }

    fn gid(raw: u16) -> GlyphId16 {
        GlyphId16::new(raw)
    }

    fn single_sub(compiler: &mut Compiler, targ: &str, repl: &str) {
        let targ = GPat::single(compiler.glyph(targ));
        let repl = GPat::single(compiler.glyph(repl));
        compiler.sub(targ, Some(repl), LookupKind::SingleSub);
    }

    #[test]
    fn unknown_glyph_reports_error() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.glyph("no_such_glyph");
        assert!(compiler.had_error());
        assert!(matches!(
            compiler.diagnostics()[0].error,
            CompileError::UnknownGlyph(_)
        ));
    }

    #[test]
    fn rules_after_error_are_not_emitted() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("test"));
        compiler.glyph("missing");
        single_sub(&mut compiler, "g1", "g2");
        compiler.feature_end();
        assert!(compiler.lookups.gsub.is_empty());
    }

    fn tag(raw: &str) -> Tag {
        Tag::new(raw.as_bytes().try_into().unwrap())
    }

    #[test]
    fn language_replays_default_lookups() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.language_system(tags::SCRIPT_DFLT, tags::LANG_DFLT);
        compiler.feature_begin(tag("test"));
        single_sub(&mut compiler, "g1", "g2");
        compiler.language(tag("TRK "), false, false);
        compiler.feature_end();

        let dflt_key = FeatureKey {
            script: tags::SCRIPT_DFLT,
            language: tags::LANG_DFLT,
            feature: tag("test"),
        };
        let trk_key = FeatureKey {
            language: tag("TRK "),
            ..dflt_key
        };
        assert_eq!(len(&compiler, &dflt_key), 1);
        assert_eq!(len(&compiler, &trk_key), 1);
    }

    #[test]
    fn exclude_dflt_suppresses_replay() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("test"));
        single_sub(&mut compiler, "g1", "g2");
        compiler.language(tag("TRK "), true, false);
        compiler.feature_end();

        let trk_key = FeatureKey {
            script: tags::SCRIPT_DFLT,
            language: tag("TRK "),
            feature: tag("test"),
        };
        assert_eq!(len(&compiler, &trk_key), 0);
    }

    fn len(compiler: &Compiler, key: &FeatureKey) -> usize {
        compiler.features.get(key).map(Vec::len).unwrap_or_default()
    }

    #[test]
    fn old_dflt_language_is_corrected_once() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("test"));
        single_sub(&mut compiler, "g1", "g2");
        compiler.language(tag("DFLT"), false, false);
        compiler.language(tag("DFLT"), false, false);
        compiler.feature_end();
        let warnings = compiler
            .diagnostics()
            .iter()
            .filter(|diag| diag.severity == Severity::Warning)
            .count();
        assert_eq!(warnings, 1);
        assert_eq!(compiler.cur_language, tags::LANG_DFLT);
    }

    #[test]
    fn chain_rule_synthesizes_anonymous_single() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("test"));
        // sub g1 g2' g3 by g4;
        let mut marked = compiler.glyph("g2");
        marked.role.marked = true;
        let targ = GPat::new(vec![compiler.glyph("g1"), marked, compiler.glyph("g3")]);
        let repl = GPat::single(compiler.glyph("g4"));
        compiler.sub(targ, Some(repl), LookupKind::ChainSub);
        compiler.feature_end();
        compiler.finalize_anon_lookups();

        assert_eq!(compiler.lookups.gsub.len(), 2);
        let GsubLookup::Chain(subtables) = &compiler.lookups.gsub[0].body else {
            panic!("expected chain lookup");
        };
        assert_eq!(subtables[0].backtrack.len(), 1);
        assert_eq!(subtables[0].input.len(), 1);
        assert_eq!(subtables[0].lookahead.len(), 1);
        let (index, label) = &subtables[0].records[0];
        assert_eq!(*index, 0);
        assert!(label.is_reference());

        // the anonymous lookup is a single substitution g2 → g4 inheriting
        // the parent feature
        let anon = &compiler.lookups.gsub[1];
        assert!(matches!(anon.label, Label::Anonymous(_)));
        let GsubLookup::Single(subs) = &anon.body else {
            panic!("expected anonymous single lookup");
        };
        assert!(matches!(
            &subs[0],
            SingleSubst::Format1(table) if table.delta_glyph_id == 2
        ));
        // the record resolves to the anonymous lookup's final index
        let labels = LabelMap::new(&compiler.lookups);
        assert_eq!(labels.resolve(label), Some((TableTag::Gsub, 1)));
    }

    #[test]
    fn compatible_chain_rules_share_one_anonymous_lookup() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("test"));
        for (targ, repl) in [("g2", "g4"), ("g5", "g6")] {
            let mut marked = compiler.glyph(targ);
            marked.role.marked = true;
            let pat = GPat::new(vec![compiler.glyph("g1"), marked]);
            let repl = GPat::single(compiler.glyph(repl));
            compiler.sub(pat, Some(repl), LookupKind::ChainSub);
        }
        compiler.feature_end();
        compiler.finalize_anon_lookups();
        // one chain lookup, one shared anonymous single lookup
        assert_eq!(compiler.lookups.gsub.len(), 2);

        // a conflicting mapping for g2 forces a second anonymous lookup
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("test"));
        for (targ, repl) in [("g2", "g4"), ("g2", "g6")] {
            let mut marked = compiler.glyph(targ);
            marked.role.marked = true;
            let pat = GPat::new(vec![compiler.glyph("g1"), marked]);
            let repl = GPat::single(compiler.glyph(repl));
            compiler.sub(pat, Some(repl), LookupKind::ChainSub);
        }
        compiler.feature_end();
        compiler.finalize_anon_lookups();
        assert_eq!(compiler.lookups.gsub.len(), 3);
    }

    #[test]
    fn aalt_folds_matching_alternates_into_single() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tags::AALT);
        compiler.aalt_feature_ref(tag("smcp"));
        compiler.aalt_feature_ref(tag("c2sc"));
        compiler.feature_end();
        compiler.feature_begin(tag("smcp"));
        single_sub(&mut compiler, "g1", "g10");
        compiler.feature_end();
        compiler.feature_begin(tag("c2sc"));
        single_sub(&mut compiler, "g1", "g10");
        compiler.feature_end();
        compiler.fold_aalt();

        // both features map g1 to the same glyph, so aalt dedups to a
        // single substitution
        let aalt = compiler.lookups.gsub.last().unwrap();
        let GsubLookup::Single(subs) = &aalt.body else {
            panic!("expected single aalt lookup");
        };
        assert!(matches!(&subs[0], SingleSubst::Format1(table) if table.delta_glyph_id == 9));
        let key = FeatureKey {
            script: tags::SCRIPT_DFLT,
            language: tags::LANG_DFLT,
            feature: tags::AALT,
        };
        assert_eq!(len(&compiler, &key), 1);
    }

    #[test]
    fn aalt_mixed_alternates_preserve_feature_order() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tags::AALT);
        compiler.aalt_feature_ref(tag("smcp"));
        compiler.aalt_feature_ref(tag("c2sc"));
        compiler.feature_end();
        compiler.feature_begin(tag("smcp"));
        single_sub(&mut compiler, "g1", "g11");
        compiler.feature_end();
        compiler.feature_begin(tag("c2sc"));
        single_sub(&mut compiler, "g1", "g12");
        compiler.feature_end();
        compiler.fold_aalt();

        let aalt = compiler.lookups.gsub.last().unwrap();
        let GsubLookup::Alternate(subs) = &aalt.body else {
            panic!("expected alternate aalt lookup");
        };
        // smcp was listed first, so its alternate comes first
        assert_eq!(
            subs[0].alternate_sets[0].alternate_glyph_ids,
            vec![gid(11), gid(12)]
        );
    }

    #[test]
    fn named_lookup_reference_registers_existing_label() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.lookup_begin("SMCP", false);
        single_sub(&mut compiler, "g1", "g2");
        compiler.lookup_end("SMCP");

        compiler.feature_begin(tag("smcp"));
        compiler.lookup_ref("SMCP");
        compiler.feature_end();

        let key = FeatureKey {
            script: tags::SCRIPT_DFLT,
            language: tags::LANG_DFLT,
            feature: tag("smcp"),
        };
        let labels = &compiler.features[&key];
        assert_eq!(labels.len(), 1);
        assert!(labels[0].is_reference());
        assert_eq!(labels[0].definition(), &Label::Named(0));
    }

    #[test]
    fn undefined_lookup_reference_is_fatal() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("smcp"));
        compiler.lookup_ref("NOPE");
        compiler.feature_end();
        assert!(compiler.sink.is_fatal());
    }

    #[test]
    fn vrt2_seeds_vertical_advances() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tags::VRT2);
        single_sub(&mut compiler, "g1", "g2");
        compiler.feature_end();
        assert_eq!(compiler.tables.vmtx.advances_y.get(&gid(1)), Some(&-600));
    }

    #[test]
    fn feature_names_outside_stylistic_set_is_fatal() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("liga"));
        compiler.feature_names(vec![NameSpec::windows("Fancy")]);
        assert!(compiler.sink.is_fatal());
    }

    #[test]
    fn stylistic_set_params_round_trip() {
        let glyphs = TestGlyphs;
        let mut compiler = Compiler::new(&glyphs);
        compiler.feature_begin(tag("ss01"));
        compiler.feature_names(vec![NameSpec::windows("Fancy")]);
        single_sub(&mut compiler, "g1", "g2");
        compiler.feature_end();
        let compilation = compiler.build().unwrap();
        assert!(compilation.gsub.is_some());
        assert!(compilation.name.is_some());
    }
}
