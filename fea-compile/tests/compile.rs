//! End-to-end tests: drive the compiler API and check the emitted bytes.

use pretty_assertions::assert_eq;

use fea_compile::{
    tag, ClassRec, Compiler, GPat, GlyphId16, GlyphResolver, LookupKind, MetricsInfo,
};

/// A synthetic inventory: "gN" resolves to glyph id N.
struct NumberedGlyphs(u16);

impl GlyphResolver for NumberedGlyphs {
    fn gid_of_name(&self, name: &str) -> Option<GlyphId16> {
        name.strip_prefix('g')
            .and_then(|raw| raw.parse().ok())
            .filter(|gid| *gid < self.0)
            .map(GlyphId16::new)
    }

    fn gid_of_cid(&self, cid: u32) -> Option<GlyphId16> {
        u16::try_from(cid)
            .ok()
            .filter(|cid| *cid < self.0)
            .map(GlyphId16::new)
    }

    fn h_advance(&self, _gid: GlyphId16) -> i16 {
        600
    }

    fn v_advance(&self, _gid: GlyphId16) -> i16 {
        -1000
    }

    fn glyph_count(&self) -> u16 {
        self.0
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

#[test]
fn constant_delta_single_substitution() {
    // feature test { sub [g2 g3 g4] by [g12 g13 g14]; } test;
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    compiler.feature_begin(tag!("test"));
    let targ = GPat::single(ClassRec::class([2u16, 3, 4].map(GlyphId16::new)));
    let repl = GPat::single(ClassRec::class([12u16, 13, 14].map(GlyphId16::new)));
    compiler.sub(targ, Some(repl), LookupKind::SingleSub);
    compiler.feature_end();
    let gsub = compiler.build().unwrap().gsub.unwrap();

    // the layout is deterministic: header, script/feature/lookup lists,
    // then their children in discovery order
    assert_eq!(
        gsub,
        vec![
            0, 1, 0, 0, // version 1.0
            0, 10, 0, 18, 0, 26, // list offsets
            // ScriptList: one DFLT record
            0, 1, b'D', b'F', b'L', b'T', 0, 20,
            // FeatureList: one 'test' record
            0, 1, b't', b'e', b's', b't', 0, 16,
            // LookupList: one lookup
            0, 1, 0, 14,
            // Script: default LangSys only
            0, 18, 0, 0,
            // Feature: no params, one lookup index
            0, 0, 0, 1, 0, 0,
            // Lookup: type 1, no flags, one subtable
            0, 1, 0, 0, 0, 1, 0, 16,
            // LangSys: no required feature, feature index 0
            0, 0, 0xFF, 0xFF, 0, 1, 0, 0,
            // SingleSubst format 1, delta = 12 - 2
            0, 1, 0, 6, 0, 10,
            // Coverage format 1: g2 g3 g4
            0, 1, 0, 3, 0, 2, 0, 3, 0, 4,
        ]
    );
}

#[test]
fn mixed_delta_single_falls_to_format_2() {
    // sub g2 by g12; sub g3 by g30; — deltas differ
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    compiler.feature_begin(tag!("test"));
    for (targ, repl) in [("g2", "g12"), ("g3", "g30")] {
        let targ = GPat::single(compiler.glyph(targ));
        let repl = GPat::single(compiler.glyph(repl));
        compiler.sub(targ, Some(repl), LookupKind::SingleSub);
    }
    compiler.feature_end();
    let gsub = compiler.build().unwrap().gsub.unwrap();

    // the subtable sits at the same position as in the format 1 case
    assert_eq!(read_u16(&gsub, 56), 2);
    // glyph count and substitute array
    assert_eq!(read_u16(&gsub, 60), 2);
    assert_eq!(read_u16(&gsub, 62), 12);
    assert_eq!(read_u16(&gsub, 64), 30);
}

#[test]
fn ligature_with_cross_product() {
    // sub [g10 g30] g20 by g99;
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    compiler.feature_begin(tag!("liga"));
    let targ = GPat::new(vec![
        ClassRec::class([10u16, 30].map(GlyphId16::new)),
        ClassRec::glyph(GlyphId16::new(20)),
    ]);
    let repl = GPat::single(ClassRec::glyph(GlyphId16::new(99)));
    compiler.sub(targ, Some(repl), LookupKind::LigatureSub);
    compiler.feature_end();
    let gsub = compiler.build().unwrap().gsub.unwrap();

    // lookup type 4
    assert_eq!(read_u16(&gsub, 40), 4);
    // subtable: format 1, two ligature sets (one per first glyph)
    let subtable = 40 + read_u16(&gsub, 46) as usize;
    assert_eq!(read_u16(&gsub, subtable), 1);
    assert_eq!(read_u16(&gsub, subtable + 4), 2);
}

#[test]
fn chain_context_emits_anonymous_lookup() {
    // sub g1 g2' g3 by g4;
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    compiler.feature_begin(tag!("calt"));
    let mut marked = compiler.glyph("g2");
    marked.role.marked = true;
    let targ = GPat::new(vec![compiler.glyph("g1"), marked, compiler.glyph("g3")]);
    let repl = GPat::single(compiler.glyph("g4"));
    compiler.sub(targ, Some(repl), LookupKind::ChainSub);
    compiler.feature_end();
    let gsub = compiler.build().unwrap().gsub.unwrap();

    // two lookups: the chain lookup and the synthesized single lookup
    let lookup_list = read_u16(&gsub, 8) as usize;
    assert_eq!(read_u16(&gsub, lookup_list), 2);
    let chain_lookup = lookup_list + read_u16(&gsub, lookup_list + 2) as usize;
    let anon_lookup = lookup_list + read_u16(&gsub, lookup_list + 4) as usize;
    assert_eq!(read_u16(&gsub, chain_lookup), 6);
    assert_eq!(read_u16(&gsub, anon_lookup), 1);

    // the chain subtable's lookup record points at lookup index 1
    let subtable = chain_lookup + read_u16(&gsub, chain_lookup + 6) as usize;
    assert_eq!(read_u16(&gsub, subtable), 3); // format 3
    assert_eq!(read_u16(&gsub, subtable + 2), 1); // backtrack count
    // skip backtrack offsets: input count, input offsets, lookahead count
    let input_count = read_u16(&gsub, subtable + 6) as usize;
    assert_eq!(input_count, 1);
    let lookahead_at = subtable + 8 + input_count * 2;
    assert_eq!(read_u16(&gsub, lookahead_at), 1);
    let records_at = lookahead_at + 2 + 2;
    assert_eq!(read_u16(&gsub, records_at), 1); // one record
    assert_eq!(read_u16(&gsub, records_at + 2), 0); // sequence index
    assert_eq!(read_u16(&gsub, records_at + 4), 1); // lookup index
}

#[test]
fn required_language_sets_required_feature_index() {
    // feature test { sub g1 by g2; language TRK required; } test;
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    compiler.feature_begin(tag!("test"));
    let targ = GPat::single(compiler.glyph("g1"));
    let repl = GPat::single(compiler.glyph("g2"));
    compiler.sub(targ, Some(repl), LookupKind::SingleSub);
    compiler.language(tag!("TRK "), false, true);
    compiler.feature_end();
    let gsub = compiler.build().unwrap().gsub.unwrap();

    let script_list = read_u16(&gsub, 4) as usize;
    let script = script_list + read_u16(&gsub, script_list + 6) as usize;
    // the default language system lists the feature the ordinary way
    let default_lang_sys = script + read_u16(&gsub, script) as usize;
    assert_eq!(read_u16(&gsub, default_lang_sys + 2), 0xFFFF);
    assert_eq!(read_u16(&gsub, default_lang_sys + 4), 1);
    // the TRK language system carries it in the required slot instead
    assert_eq!(read_u16(&gsub, script + 2), 1);
    assert_eq!(&gsub[script + 4..script + 8], b"TRK ");
    let lang_sys = script + read_u16(&gsub, script + 8) as usize;
    assert_eq!(read_u16(&gsub, lang_sys + 2), 0);
    assert_eq!(read_u16(&gsub, lang_sys + 4), 0);
}

#[test]
fn pair_positioning_emits_gpos() {
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    compiler.feature_begin(tag!("kern"));
    let mut first = compiler.glyph("g5");
    first.metrics = Some(MetricsInfo::x_advance(-35));
    let targ = GPat::new(vec![first, compiler.glyph("g6")]);
    compiler.pos(targ, false, LookupKind::PairPos);
    compiler.feature_end();
    let compilation = compiler.build().unwrap();
    assert!(compilation.gsub.is_none());
    let gpos = compilation.gpos.unwrap();

    // GPOS header and a type 2 lookup
    assert_eq!(&gpos[..4], &[0, 1, 0, 0]);
    assert_eq!(read_u16(&gpos, 40), 2);
}

#[test]
fn overflowing_lookups_are_extension_wrapped() {
    // eight lookups, each covering 8000 scattered (even) glyphs: the later
    // subtables cannot reach their coverage tables through 16-bit offsets,
    // so every lookup is promoted
    let glyphs = NumberedGlyphs(65000);
    let mut compiler = Compiler::new(&glyphs);
    compiler.feature_begin(tag!("test"));
    for chunk in 0..8u16 {
        let name = format!("L{chunk}");
        compiler.lookup_begin(&name, false);
        // shift each lookup's glyph set so no two coverages deduplicate
        let gids: Vec<GlyphId16> = (0..8000u16)
            .map(|i| GlyphId16::new(2 + chunk * 2 + i * 2))
            .collect();
        let repl: Vec<GlyphId16> = gids
            .iter()
            .map(|gid| GlyphId16::new(gid.to_u16() + 1))
            .collect();
        let targ = GPat::single(ClassRec::class(gids));
        let repl = GPat::single(ClassRec::class(repl));
        compiler.sub(targ, Some(repl), LookupKind::SingleSub);
        compiler.lookup_end(&name);
    }
    compiler.feature_end();
    let compilation = compiler.build().unwrap();
    let gsub = compilation.gsub.unwrap();

    // every lookup reports the extension type
    let lookup_list = read_u16(&gsub, 8) as usize;
    let count = read_u16(&gsub, lookup_list) as usize;
    assert_eq!(count, 8);
    for i in 0..count {
        let lookup = lookup_list + read_u16(&gsub, lookup_list + 2 + i * 2) as usize;
        assert_eq!(read_u16(&gsub, lookup), 7, "lookup {i} not extension");
        // the extension record wraps a type 1 subtable behind a 32-bit
        // offset
        let ext = lookup + read_u16(&gsub, lookup + 6) as usize;
        assert_eq!(read_u16(&gsub, ext), 1);
        assert_eq!(read_u16(&gsub, ext + 2), 1);
    }
}

#[test]
fn mark_to_base_attachment() {
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    // markClass g30 <anchor 0 550> @TOP;
    let mark_rec = compiler.glyph("g30");
    compiler.mark_class(
        "TOP",
        mark_rec,
        fea_compile::AnchorMarkInfo::coord(0, 550),
    );
    compiler.feature_begin(tag!("mark"));
    // pos base g10 <anchor 250 450> mark @TOP;
    let mut base = compiler.glyph("g10");
    let mut anchor = fea_compile::AnchorMarkInfo::coord(250, 450);
    anchor.mark_class_name = Some("TOP".into());
    base.anchor_info.push(anchor);
    compiler.pos(GPat::single(base), false, LookupKind::MarkToBasePos);
    compiler.feature_end();
    let compilation = compiler.build().unwrap();
    let gpos = compilation.gpos.unwrap();
    // lookup type 4
    assert_eq!(read_u16(&gpos, 40), 4);
    // nothing else asked for GDEF, so none is emitted
    assert!(compilation.gdef.is_none());
}

#[test]
fn mark_class_is_sealed_after_use() {
    let glyphs = NumberedGlyphs(100);
    let mut compiler = Compiler::new(&glyphs);
    let mark_rec = compiler.glyph("g30");
    compiler.mark_class("TOP", mark_rec, fea_compile::AnchorMarkInfo::coord(0, 550));
    compiler.feature_begin(tag!("mark"));
    let mut base = compiler.glyph("g10");
    let mut anchor = fea_compile::AnchorMarkInfo::coord(250, 450);
    anchor.mark_class_name = Some("TOP".into());
    base.anchor_info.push(anchor);
    compiler.pos(GPat::single(base), false, LookupKind::MarkToBasePos);
    // adding to the class after use is an error
    let more = compiler.glyph("g31");
    compiler.mark_class("TOP", more, fea_compile::AnchorMarkInfo::coord(0, 500));
    compiler.feature_end();
    assert!(compiler.build().is_err());
}
