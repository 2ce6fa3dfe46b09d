//! Statement collectors for the tables a feature file can populate.
//!
//! GDEF, BASE, STAT and name compile to bytes here; head/hhea/vhea/OS2/vmtx
//! statements are collected into plain values for the host to merge into
//! its own table writers.

use std::collections::BTreeMap;

use font_types::{Fixed, GlyphId16, Tag};
use smol_str::SmolStr;

use otl_write::base::{
    Axis, Base, BaseCoord, BaseScript, BaseScriptList, BaseScriptRecord, BaseTagList, BaseValues,
};
use otl_write::gdef::{
    AttachList, AttachPoint, CaretValue, Gdef, LigCaretList, LigGlyph, MarkGlyphSets,
};
use otl_write::layout::ClassDefBuilder;
use otl_write::name::{Name, NameRecord, WIN_PLATFORM};
use otl_write::stat::{AxisRecord, AxisValue, AxisValueFlags, Stat};

use crate::common::GlyphSet;
use crate::diagnostics::{CompileError, DiagSink};

/// One name string as authored: platform ids plus the raw (escaped) text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameSpec {
    pub platform_id: u16,
    pub encoding_id: u16,
    pub language_id: u16,
    pub string: SmolStr,
}

impl NameSpec {
    pub fn windows(string: impl Into<SmolStr>) -> Self {
        NameSpec {
            platform_id: WIN_PLATFORM,
            encoding_id: 1,
            language_id: 0x0409,
            string: string.into(),
        }
    }

    fn to_record(&self, name_id: u16) -> NameRecord {
        NameRecord {
            platform_id: self.platform_id,
            encoding_id: self.encoding_id,
            language_id: self.language_id,
            name_id,
            string: decode_escapes(self.platform_id, self.string.trim_matches('"')),
        }
    }
}

/// Decode `\XXXX` (Windows, UTF-16 code unit) or `\XX` (Mac, single byte)
/// escapes in a name string.
fn decode_escapes(platform: u16, s: &str) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    if platform == WIN_PLATFORM {
        let mut units = Vec::with_capacity(s.len());
        let mut rest = s;
        while let Some(pos) = rest.find('\\') {
            units.extend(rest[..pos].encode_utf16());
            if let Some(code) = rest.get(pos + 1..pos + 5) {
                units.push(u16::from_str_radix(code, 16).unwrap_or(b'?' as u16));
                rest = &rest[pos + 5..];
            } else {
                rest = &rest[pos + 1..];
            }
        }
        units.extend(rest.encode_utf16());
        String::from_utf16_lossy(&units)
    } else {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(pos) = rest.find('\\') {
            out.push_str(&rest[..pos]);
            if let Some(code) = rest.get(pos + 1..pos + 3) {
                out.push(u8::from_str_radix(code, 16).unwrap_or(b'?') as char);
                rest = &rest[pos + 3..];
            } else {
                rest = &rest[pos + 1..];
            }
        }
        out.push_str(rest);
        out
    }
}

/// Accumulates name rows and hands out compiler-assigned name ids.
#[derive(Clone, Debug, Default)]
pub(crate) struct NameBuilder {
    records: Vec<(u16, NameSpec)>,
    next_id: u16,
}

impl NameBuilder {
    const FIRST_ASSIGNED_ID: u16 = 256;

    pub fn add(&mut self, name_id: u16, spec: NameSpec) {
        // explicit rows must not collide with later assigned ids
        if name_id >= Self::FIRST_ASSIGNED_ID {
            self.next_id = self.next_id.max(name_id + 1);
        }
        self.records.push((name_id, spec));
    }

    /// Add a group of specs under a fresh name id.
    pub fn add_group(&mut self, specs: impl IntoIterator<Item = NameSpec>) -> u16 {
        let id = self.next_id.max(Self::FIRST_ASSIGNED_ID);
        self.next_id = id + 1;
        for spec in specs {
            self.records.push((id, spec));
        }
        id
    }

    /// `true` if the id resolves to a Windows default (3/1/0x409) row.
    pub fn has_windows_default(&self, name_id: u16) -> bool {
        self.records.iter().any(|(id, spec)| {
            *id == name_id
                && spec.platform_id == WIN_PLATFORM
                && spec.encoding_id == 1
                && spec.language_id == 0x0409
        })
    }

    pub fn build(&self) -> Option<Vec<u8>> {
        if self.records.is_empty() {
            return None;
        }
        let name = Name {
            name_records: self
                .records
                .iter()
                .map(|(id, spec)| spec.to_record(*id))
                .collect(),
        };
        Some(name.build())
    }
}

/// GDEF statements plus the classes lookupflag usage registers.
#[derive(Clone, Debug, Default)]
pub(crate) struct GdefStatements {
    /// The four authored glyph classes: simple, ligature, mark, component.
    pub glyph_classes: Option<[GlyphSet; 4]>,
    pub attach_points: BTreeMap<GlyphId16, Vec<u16>>,
    pub carets: BTreeMap<GlyphId16, Vec<CaretValue>>,
    /// Mark attachment classes, ids 1-based by position.
    pub mark_attach_classes: Vec<GlyphSet>,
    /// Mark filtering sets, ids 0-based by position.
    pub mark_filter_sets: Vec<GlyphSet>,
}

impl GdefStatements {
    /// Register a mark attachment class, reusing an identical one.
    ///
    /// At most 15 classes fit in the flag byte.
    pub fn mark_attach_class_id(&mut self, set: GlyphSet) -> Option<u16> {
        if let Some(pos) = self.mark_attach_classes.iter().position(|c| *c == set) {
            return Some(pos as u16 + 1);
        }
        if self.mark_attach_classes.len() >= 15 {
            return None;
        }
        self.mark_attach_classes.push(set);
        Some(self.mark_attach_classes.len() as u16)
    }

    /// Register a mark filtering set, reusing an identical one.
    pub fn mark_filter_set_id(&mut self, set: GlyphSet) -> u16 {
        if let Some(pos) = self.mark_filter_sets.iter().position(|c| *c == set) {
            return pos as u16;
        }
        self.mark_filter_sets.push(set);
        self.mark_filter_sets.len() as u16 - 1
    }

    /// Build the table; `default_marks` is consulted when no glyph classes
    /// were authored but the table is otherwise needed.
    pub fn build(&self, default_marks: &GlyphSet, sink: &mut DiagSink) -> Option<Vec<u8>> {
        let mut gdef = Gdef::default();

        let class_glyphs: Option<[GlyphSet; 4]> = match &self.glyph_classes {
            Some(classes) => Some(classes.clone()),
            None if self.is_otherwise_needed() && !default_marks.is_empty() => {
                // synthesize mark class membership from mark classes
                Some([
                    GlyphSet::default(),
                    GlyphSet::default(),
                    default_marks.clone(),
                    GlyphSet::default(),
                ])
            }
            None => None,
        };
        if let Some(classes) = class_glyphs {
            let builder: ClassDefBuilder = classes
                .iter()
                .enumerate()
                .flat_map(|(index, set)| set.iter().map(move |gid| (gid, index as u16 + 1)))
                .collect();
            gdef.glyph_class_def = Some(builder.build());
        }

        if !self.attach_points.is_empty() {
            gdef.attach_list = Some(AttachList {
                coverage: self.attach_points.keys().copied().collect(),
                attach_points: self
                    .attach_points
                    .values()
                    .map(|points| {
                        let mut point_indices = points.clone();
                        point_indices.sort_unstable();
                        point_indices.dedup();
                        AttachPoint { point_indices }
                    })
                    .collect(),
            });
        }

        if !self.carets.is_empty() {
            gdef.lig_caret_list = Some(LigCaretList {
                coverage: self.carets.keys().copied().collect(),
                lig_glyphs: self
                    .carets
                    .values()
                    .map(|carets| LigGlyph {
                        caret_values: carets.clone(),
                    })
                    .collect(),
            });
        }

        if !self.mark_attach_classes.is_empty() {
            let builder: ClassDefBuilder = self
                .mark_attach_classes
                .iter()
                .enumerate()
                .flat_map(|(index, set)| set.iter().map(move |gid| (gid, index as u16 + 1)))
                .collect();
            gdef.mark_attach_class_def = Some(builder.build());
        }

        if !self.mark_filter_sets.is_empty() {
            gdef.mark_glyph_sets = Some(MarkGlyphSets {
                coverages: self
                    .mark_filter_sets
                    .iter()
                    .map(|set| set.iter().collect())
                    .collect(),
            });
        }

        if gdef.is_empty() {
            return None;
        }
        match otl_write::dump_table(&gdef) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                sink.fatal(CompileError::OffsetOverflow);
                None
            }
        }
    }

    fn is_otherwise_needed(&self) -> bool {
        !self.attach_points.is_empty()
            || !self.carets.is_empty()
            || !self.mark_attach_classes.is_empty()
            || !self.mark_filter_sets.is_empty()
    }
}

/// One `basescript` row: the script, its default baseline, and coordinates
/// parallel to the axis tag list.
#[derive(Clone, Debug)]
pub struct BaseScriptStatement {
    pub script: Tag,
    pub default_baseline: Tag,
    pub coords: Vec<i16>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct BaseStatements {
    pub horiz_tags: Vec<Tag>,
    pub horiz_scripts: Vec<BaseScriptStatement>,
    pub vert_tags: Vec<Tag>,
    pub vert_scripts: Vec<BaseScriptStatement>,
}

impl BaseStatements {
    fn axis(tags: &[Tag], scripts: &[BaseScriptStatement], sink: &mut DiagSink) -> Option<Axis> {
        if tags.is_empty() && scripts.is_empty() {
            return None;
        }
        let base_script_records = scripts
            .iter()
            .map(|stmt| {
                let default_baseline_index = match tags
                    .iter()
                    .position(|tag| *tag == stmt.default_baseline)
                {
                    Some(index) => index as u16,
                    None => {
                        sink.error(CompileError::ContextViolation(format!(
                            "baseline tag '{}' is not in the tag list",
                            stmt.default_baseline
                        )));
                        0
                    }
                };
                BaseScriptRecord {
                    base_script_tag: stmt.script,
                    base_script: BaseScript {
                        base_values: Some(BaseValues {
                            default_baseline_index,
                            base_coords: stmt
                                .coords
                                .iter()
                                .map(|coordinate| BaseCoord {
                                    coordinate: *coordinate,
                                })
                                .collect(),
                        }),
                    },
                }
            })
            .collect();
        Some(Axis {
            base_tag_list: Some(BaseTagList {
                baseline_tags: tags.to_vec(),
            }),
            base_script_list: BaseScriptList {
                base_script_records,
            },
        })
    }

    pub fn build(&self, sink: &mut DiagSink) -> Option<Vec<u8>> {
        let base = Base {
            horiz_axis: Self::axis(&self.horiz_tags, &self.horiz_scripts, sink),
            vert_axis: Self::axis(&self.vert_tags, &self.vert_scripts, sink),
        };
        if base.horiz_axis.is_none() && base.vert_axis.is_none() {
            return None;
        }
        match otl_write::dump_table(&base) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                sink.fatal(CompileError::OffsetOverflow);
                None
            }
        }
    }
}

/// Where an axis value record sits, matching the four formats.
#[derive(Clone, Debug)]
pub enum AxisLocation {
    One { tag: Tag, value: Fixed },
    Two { tag: Tag, nominal: Fixed, min: Fixed, max: Fixed },
    Three { tag: Tag, value: Fixed, linked: Fixed },
    Four(Vec<(Tag, Fixed)>),
}

#[derive(Clone, Debug)]
pub(crate) struct StatAxisStatement {
    pub tag: Tag,
    pub ordering: u16,
    pub name_id: u16,
}

#[derive(Clone, Debug)]
pub(crate) struct StatValueStatement {
    pub flags: AxisValueFlags,
    pub name_id: u16,
    pub location: AxisLocation,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StatStatements {
    pub axes: Vec<StatAxisStatement>,
    pub values: Vec<StatValueStatement>,
    pub elided_fallback_name_id: Option<u16>,
}

impl StatStatements {
    fn axis_index(&self, tag: Tag, sink: &mut DiagSink) -> u16 {
        match self.axes.iter().position(|axis| axis.tag == tag) {
            Some(index) => index as u16,
            None => {
                sink.error(CompileError::ContextViolation(format!(
                    "axis value names unknown axis '{tag}'"
                )));
                0
            }
        }
    }

    pub fn build(&self, sink: &mut DiagSink) -> Option<Vec<u8>> {
        if self.axes.is_empty() && self.values.is_empty() {
            return None;
        }
        let design_axes = self
            .axes
            .iter()
            .map(|axis| AxisRecord {
                axis_tag: axis.tag,
                axis_name_id: axis.name_id,
                axis_ordering: axis.ordering,
            })
            .collect();
        let axis_values = self
            .values
            .iter()
            .map(|value| match &value.location {
                AxisLocation::One { tag, value: v } => AxisValue::Format1 {
                    axis_index: self.axis_index(*tag, sink),
                    flags: value.flags,
                    value_name_id: value.name_id,
                    value: *v,
                },
                AxisLocation::Two { tag, nominal, min, max } => AxisValue::Format2 {
                    axis_index: self.axis_index(*tag, sink),
                    flags: value.flags,
                    value_name_id: value.name_id,
                    nominal_value: *nominal,
                    range_min_value: *min,
                    range_max_value: *max,
                },
                AxisLocation::Three { tag, value: v, linked } => AxisValue::Format3 {
                    axis_index: self.axis_index(*tag, sink),
                    flags: value.flags,
                    value_name_id: value.name_id,
                    value: *v,
                    linked_value: *linked,
                },
                AxisLocation::Four(locations) => AxisValue::Format4 {
                    flags: value.flags,
                    value_name_id: value.name_id,
                    axis_values: locations
                        .iter()
                        .map(|(tag, v)| (self.axis_index(*tag, sink), *v))
                        .collect(),
                },
            })
            .collect();
        let stat = Stat {
            design_axes,
            axis_values,
            elided_fallback_name_id: self.elided_fallback_name_id.unwrap_or(2),
        };
        match otl_write::dump_table(&stat) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                sink.fatal(CompileError::OffsetOverflow);
                None
            }
        }
    }
}

/// head/hhea/vhea/OS2 values a feature file can set; merged by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeadValues {
    pub font_revision: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HheaValues {
    pub caret_offset: i16,
    pub ascender: i16,
    pub descender: i16,
    pub line_gap: i16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VheaValues {
    pub vert_typo_ascender: i16,
    pub vert_typo_descender: i16,
    pub vert_typo_line_gap: i16,
}

/// OS/2 selector values, including the unicode/codepage range bits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Os2Values {
    pub fs_type: u16,
    pub panose: [u8; 10],
    pub unicode_range: u128,
    pub code_page_range: u64,
    pub typo_ascender: i16,
    pub typo_descender: i16,
    pub typo_line_gap: i16,
    pub x_height: i16,
    pub cap_height: i16,
    pub win_ascent: u16,
    pub win_descent: u16,
    pub width_class: u16,
    pub weight_class: u16,
    pub family_class: i16,
    pub vendor_id: SmolStr,
    pub lower_op_size: Option<u16>,
    pub upper_op_size: Option<u16>,
}

impl Os2Values {
    /// The OS/2 code page bit for a Windows code page number.
    pub fn bit_for_code_page(page: u16) -> Option<u8> {
        CODEPAGE_TO_BIT
            .iter()
            .find_map(|(p, bit)| (*p == page).then_some(*bit))
    }
}

static CODEPAGE_TO_BIT: &[(u16, u8)] = &[
    (437, 63),
    (708, 61),
    (737, 60),
    (775, 59),
    (850, 62),
    (852, 58),
    (855, 57),
    (857, 56),
    (860, 55),
    (861, 54),
    (862, 53),
    (863, 52),
    (864, 51),
    (865, 50),
    (866, 49),
    (869, 48),
    (874, 16),
    (932, 17),
    (936, 18),
    (949, 19),
    (950, 20),
    (1250, 1),
    (1251, 2),
    (1252, 0),
    (1253, 3),
    (1254, 4),
    (1255, 5),
    (1256, 6),
    (1257, 7),
    (1258, 8),
    (1361, 21),
];

/// Per-glyph vertical metric overrides from vmtx statements and `vrt2`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmtxOverrides {
    pub origins_y: BTreeMap<GlyphId16, i16>,
    pub advances_y: BTreeMap<GlyphId16, i16>,
}

/// Everything the table statements accumulate.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub head: Option<HeadValues>,
    pub hhea: Option<HheaValues>,
    pub vhea: Option<VheaValues>,
    pub os2: Option<Os2Values>,
    pub vmtx: VmtxOverrides,
    pub name: NameBuilder,
    pub gdef: GdefStatements,
    pub base: BaseStatements,
    pub stat: Option<StatStatements>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use otl_write::name::MAC_PLATFORM;

    #[test]
    fn escape_decoding() {
        assert_eq!(decode_escapes(WIN_PLATFORM, "caf\\00e9"), "café");
        assert_eq!(decode_escapes(MAC_PLATFORM, "caf\\65"), "cafe");
        assert_eq!(decode_escapes(WIN_PLATFORM, "plain"), "plain");
    }

    #[test]
    fn name_ids_assigned_from_256() {
        let mut builder = NameBuilder::default();
        let first = builder.add_group([NameSpec::windows("Fancy")]);
        let second = builder.add_group([NameSpec::windows("Fancier")]);
        assert_eq!((first, second), (256, 257));
        assert!(builder.has_windows_default(first));
        assert!(!builder.has_windows_default(300));
    }

    #[test]
    fn mark_attach_classes_are_capped() {
        let mut gdef = GdefStatements::default();
        for i in 0..15u16 {
            let set: GlyphSet = [GlyphId16::new(i + 1)].into_iter().collect();
            assert_eq!(gdef.mark_attach_class_id(set), Some(i + 1));
        }
        // the same set is reused rather than re-registered
        let set: GlyphSet = [GlyphId16::new(3)].into_iter().collect();
        assert_eq!(gdef.mark_attach_class_id(set), Some(3));
        let overflow: GlyphSet = [GlyphId16::new(99)].into_iter().collect();
        assert_eq!(gdef.mark_attach_class_id(overflow), None);
    }

    #[test]
    fn gdef_default_classes_from_marks() {
        let mut gdef = GdefStatements::default();
        let filter: GlyphSet = [GlyphId16::new(20)].into_iter().collect();
        gdef.mark_filter_set_id(filter);
        let marks: GlyphSet = [GlyphId16::new(20), GlyphId16::new(21)].into_iter().collect();
        let mut sink = DiagSink::default();
        let bytes = gdef.build(&marks, &mut sink).unwrap();
        // version 1.2 since mark glyph sets are present, and a synthesized
        // glyph class def
        assert_eq!(&bytes[..4], &[0, 1, 0, 2]);
        assert_ne!(&bytes[4..6], &[0, 0]);
    }
}
