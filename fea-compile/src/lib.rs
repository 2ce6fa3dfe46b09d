//! Compiling OpenType feature rules into layout tables.
//!
//! This crate is the middle layer of a feature-file compiler: it consumes
//! statement callbacks from a host parser (see [`Compiler`]), interprets
//! them through the feature/script/language state machine, and emits the
//! binary GSUB and GPOS tables along with GDEF, BASE, STAT and name.
//!
//! The host supplies the glyph inventory through [`GlyphResolver`]; glyph
//! names in patterns resolve against it as statements arrive. Source
//! positions for diagnostics are supplied via [`Compiler::set_position`].
//!
//! ```
//! use fea_compile::{Compiler, GlyphResolver, LookupKind, GPat};
//! # struct TwoGlyphs;
//! # impl GlyphResolver for TwoGlyphs {
//! #     fn gid_of_name(&self, name: &str) -> Option<fea_compile::GlyphId16> {
//! #         match name {
//! #             "A" => Some(fea_compile::GlyphId16::new(1)),
//! #             "A.sc" => Some(fea_compile::GlyphId16::new(2)),
//! #             _ => None,
//! #         }
//! #     }
//! #     fn gid_of_cid(&self, _: u32) -> Option<fea_compile::GlyphId16> { None }
//! #     fn h_advance(&self, _: fea_compile::GlyphId16) -> i16 { 600 }
//! #     fn v_advance(&self, _: fea_compile::GlyphId16) -> i16 { -1000 }
//! #     fn glyph_count(&self) -> u16 { 3 }
//! # }
//! let glyphs = TwoGlyphs;
//! let mut compiler = Compiler::new(&glyphs);
//! compiler.feature_begin(fea_compile::tag!("smcp"));
//! let targ = GPat::single(compiler.glyph("A"));
//! let repl = GPat::single(compiler.glyph("A.sc"));
//! compiler.sub(targ, Some(repl), LookupKind::SingleSub);
//! compiler.feature_end();
//! let compilation = compiler.build().unwrap();
//! assert!(compilation.gsub.is_some());
//! ```

mod common;
mod diagnostics;
mod driver;
mod lookups;
mod metrics;
mod pattern;
mod registry;
mod tables;
pub mod tags;

pub use common::{GlyphSet, Label, GID_UNDEF};
pub use diagnostics::{CompileError, Diagnostic, Severity, SourcePosition};
pub use driver::{Compilation, Compiler, GlyphResolver};
pub use lookups::{LookupKind, TableTag};
pub use metrics::{AnchorMarkInfo, MetricsInfo};
pub use pattern::{ClassRec, CrossProduct, GPat, GlyphEntry, Role};
pub use registry::MarkClass;
pub use tables::{
    AxisLocation, BaseScriptStatement, HeadValues, HheaValues, NameSpec, Os2Values, VheaValues,
    VmtxOverrides,
};

pub use font_types::{GlyphId16, Tag};
pub use otl_write::layout::LookupFlag;
pub use otl_write::stat::AxisValueFlags;

/// Make a [`Tag`] from a literal.
#[macro_export]
macro_rules! tag {
    ($raw:literal) => {
        $crate::Tag::new($raw.as_bytes().try_into().unwrap())
    };
}
