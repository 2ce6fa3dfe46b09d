//! Glyph patterns: the sequences of glyph classes that rules are made of.

use font_types::GlyphId16;
use smol_str::SmolStr;

use crate::common::Label;
use crate::diagnostics::CompileError;
use crate::metrics::{AnchorMarkInfo, MetricsInfo};

/// One glyph slot in a pattern position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlyphEntry {
    pub gid: GlyphId16,
    /// The replacement aligned with this glyph, for reverse chain rules.
    ///
    /// Keeping it on the entry means sorting the position by glyph id keeps
    /// the substitute array aligned.
    pub substitute: Option<GlyphId16>,
}

impl GlyphEntry {
    pub fn new(gid: GlyphId16) -> Self {
        GlyphEntry {
            gid,
            substitute: None,
        }
    }
}

/// The role a position plays in its pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Role {
    /// Marked with `'` in the source.
    pub marked: bool,
    /// Authored as a class, even if it has a single member.
    pub gclass: bool,
    pub backtrack: bool,
    pub input: bool,
    pub lookahead: bool,
    /// A base/ligature/mark2 position in an attachment rule.
    pub base_node: bool,
    /// A mark-class position in an attachment rule.
    pub mark_node: bool,
    /// Set once the class participated in a position rule.
    pub used_mark_class: bool,
}

/// One position in a pattern: an ordered glyph sequence plus metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassRec {
    pub glyphs: Vec<GlyphEntry>,
    /// Inline lookup references attached to this position.
    pub lookup_labels: Vec<Label>,
    /// The value record for positioning rules.
    pub metrics: Option<MetricsInfo>,
    /// Anchors attached to this position (base/component anchors).
    pub anchor_info: Vec<AnchorMarkInfo>,
    /// Set if this position is a mark class reference.
    pub mark_class_name: Option<SmolStr>,
    pub role: Role,
}

impl ClassRec {
    pub fn glyph(gid: GlyphId16) -> Self {
        ClassRec {
            glyphs: vec![GlyphEntry::new(gid)],
            ..Default::default()
        }
    }

    pub fn class(gids: impl IntoIterator<Item = GlyphId16>) -> Self {
        let mut rec = ClassRec {
            glyphs: gids.into_iter().map(GlyphEntry::new).collect(),
            ..Default::default()
        };
        rec.role.gclass = true;
        rec
    }

    /// A single glyph not authored as a class.
    pub fn is_glyph(&self) -> bool {
        self.glyphs.len() == 1 && !self.role.gclass
    }

    pub fn is_class(&self) -> bool {
        self.glyphs.len() > 1 || self.role.gclass
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn gids(&self) -> impl Iterator<Item = GlyphId16> + '_ {
        self.glyphs.iter().map(|entry| entry.gid)
    }

    pub fn first_gid(&self) -> Option<GlyphId16> {
        self.glyphs.first().map(|entry| entry.gid)
    }

    /// Append a glyph. Fails once the class has been used by a position rule.
    pub fn add_glyph(&mut self, gid: GlyphId16) -> Result<(), CompileError> {
        if self.role.used_mark_class {
            return Err(CompileError::MarkClassSealed(
                self.mark_class_name.clone().unwrap_or_default(),
            ));
        }
        self.glyphs.push(GlyphEntry::new(gid));
        Ok(())
    }

    /// Append another position's glyphs.
    pub fn concat(&mut self, other: &ClassRec) {
        self.glyphs.extend(other.glyphs.iter().copied());
    }

    /// Stable sort by glyph id; per-glyph payloads travel with their glyph.
    pub fn sort(&mut self) {
        self.glyphs.sort_by_key(|entry| entry.gid);
    }

    /// Remove duplicate glyph ids after sorting, returning the removed ids
    /// so the caller can warn about each one.
    pub fn make_unique(&mut self) -> Vec<GlyphId16> {
        self.sort();
        let mut removed = Vec::new();
        let mut seen: Option<GlyphId16> = None;
        self.glyphs.retain(|entry| {
            if seen == Some(entry.gid) {
                removed.push(entry.gid);
                false
            } else {
                seen = Some(entry.gid);
                true
            }
        });
        removed
    }
}

/// A pattern: an ordered sequence of positions with sequence-level flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GPat {
    pub classes: Vec<ClassRec>,
    pub has_marked: bool,
    /// This pattern came from an `ignore sub/pos` statement.
    pub ignore_clause: bool,
    /// Some position carries an inline lookup reference.
    pub lookup_node: bool,
    /// `enum pos`: expand classes to specific pairs.
    pub enumerate: bool,
}

impl GPat {
    pub fn new(classes: Vec<ClassRec>) -> Self {
        GPat {
            classes,
            ..Default::default()
        }
    }

    pub fn single(rec: ClassRec) -> Self {
        GPat::new(vec![rec])
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Assign contextual roles from the mark flags.
    ///
    /// Unmarked positions before the first marked one are backtrack, marked
    /// ones (and anything between them) are input, the rest is lookahead.
    /// A pattern with no marks is all input.
    pub fn assign_roles(&mut self) {
        self.has_marked = self.classes.iter().any(|rec| rec.role.marked);
        self.lookup_node = self.classes.iter().any(|rec| !rec.lookup_labels.is_empty());
        if !self.has_marked {
            for rec in &mut self.classes {
                rec.role.input = true;
            }
            return;
        }
        let first = self
            .classes
            .iter()
            .position(|rec| rec.role.marked)
            .unwrap();
        let last = self
            .classes
            .iter()
            .rposition(|rec| rec.role.marked)
            .unwrap();
        for (i, rec) in self.classes.iter_mut().enumerate() {
            rec.role.backtrack = i < first;
            rec.role.input = i >= first && i <= last;
            rec.role.lookahead = i > last;
        }
    }

    /// Split into (backtrack, input, lookahead) by role bits.
    pub fn partition(&self) -> (&[ClassRec], &[ClassRec], &[ClassRec]) {
        let input_start = self
            .classes
            .iter()
            .position(|rec| !rec.role.backtrack)
            .unwrap_or(self.classes.len());
        let input_end = input_start
            + self.classes[input_start..]
                .iter()
                .position(|rec| rec.role.lookahead)
                .unwrap_or(self.classes.len() - input_start);
        (
            &self.classes[..input_start],
            &self.classes[input_start..input_end],
            &self.classes[input_end..],
        )
    }

    /// A lazy iterator over the Cartesian product of the positions.
    ///
    /// Tuples are yielded in lexicographic index order; the first tuple is
    /// all first glyphs. The iterator is finite and not restartable.
    pub fn cross_product(&self) -> CrossProduct<'_> {
        CrossProduct::new(&self.classes)
    }
}

/// See [`GPat::cross_product`].
pub struct CrossProduct<'a> {
    classes: &'a [ClassRec],
    indices: Vec<usize>,
    done: bool,
}

impl<'a> CrossProduct<'a> {
    fn new(classes: &'a [ClassRec]) -> Self {
        CrossProduct {
            classes,
            indices: vec![0; classes.len()],
            done: classes.is_empty() || classes.iter().any(ClassRec::is_empty),
        }
    }
}

impl Iterator for CrossProduct<'_> {
    type Item = Vec<GlyphId16>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let tuple = self
            .indices
            .iter()
            .zip(self.classes)
            .map(|(ix, rec)| rec.glyphs[*ix].gid)
            .collect();
        // advance like an odometer, last position fastest
        for (ix, rec) in self.indices.iter_mut().zip(self.classes).rev() {
            *ix += 1;
            if *ix < rec.len() {
                return Some(tuple);
            }
            *ix = 0;
        }
        self.done = true;
        Some(tuple)
    }
}

/// Expand a glyph name range like `A-Z` or `cid.01-cid.42`.
///
/// The endpoints must differ in exactly one field: a single letter of the
/// same case, or one contiguous run of decimal digits. The callback receives
/// each generated name in order; the caller is responsible for checking the
/// names against the glyph inventory.
pub fn expand_range(
    start: &str,
    end: &str,
    mut out: impl FnMut(&str),
) -> Result<(), CompileError> {
    let malformed = |reason: &str| CompileError::InvalidGlyphRange {
        start: start.into(),
        end: end.into(),
        reason: reason.into(),
    };
    if start.len() != end.len() {
        return Err(malformed("endpoints must have equal length"));
    }
    let diff = diff_field(start, end);
    let one = &start[diff.clone()];
    let two = &end[diff.clone()];

    if one.len() == 1 && one.bytes().all(|b| b.is_ascii_alphabetic()) {
        let (a, b) = (one.as_bytes()[0], two.as_bytes()[0]);
        if !b.is_ascii_alphabetic() || a.is_ascii_uppercase() != b.is_ascii_uppercase() {
            return Err(malformed("letter endpoints must share case"));
        }
        if a >= b {
            return Err(malformed("end must be greater than start"));
        }
        let mut template = start.to_string();
        for chr in a..=b {
            // single ascii byte replacing a single ascii byte
            unsafe { template.as_bytes_mut()[diff.start] = chr };
            out(&template);
        }
        return Ok(());
    }

    match (one.parse::<u32>(), two.parse::<u32>()) {
        (Ok(lo), Ok(hi)) if lo < hi => {
            let width = diff.len();
            let mut template = start.to_string();
            for val in lo..=hi {
                template.replace_range(diff.clone(), &format!("{val:0width$}"));
                out(&template);
            }
            Ok(())
        }
        _ => Err(malformed(
            "endpoints must differ by one letter or one ascending digit run",
        )),
    }
}

/// The single differing field between two equal-length names, with digit
/// runs expanded to include adjacent digits on either side.
fn diff_field(one: &str, two: &str) -> std::ops::Range<usize> {
    let front = one
        .bytes()
        .zip(two.bytes())
        .take_while(|(a, b)| a == b)
        .count();
    let back = one
        .bytes()
        .rev()
        .zip(two.bytes().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let back = one.len() - back;
    if back < front {
        return 0..0;
    }
    let mut front = front;
    while front > 0 && one.as_bytes()[front - 1].is_ascii_digit() {
        front -= 1;
    }
    let mut back = back;
    while one
        .as_bytes()
        .get(back)
        .is_some_and(u8::is_ascii_digit)
    {
        back += 1;
    }
    front..back
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(raw: u16) -> GlyphId16 {
        GlyphId16::new(raw)
    }

    #[test]
    fn glyph_vs_class() {
        let rec = ClassRec::glyph(gid(4));
        assert!(rec.is_glyph());
        assert!(!rec.is_class());

        // a single-member class authored as a class is still a class
        let rec = ClassRec::class([gid(4)]);
        assert!(!rec.is_glyph());
        assert!(rec.is_class());

        let rec = ClassRec::class([gid(4), gid(5)]);
        assert!(rec.is_class());
    }

    #[test]
    fn sealed_class_rejects_glyphs() {
        let mut rec = ClassRec::class([gid(1)]);
        rec.role.used_mark_class = true;
        assert!(matches!(
            rec.add_glyph(gid(2)),
            Err(CompileError::MarkClassSealed(_))
        ));
    }

    #[test]
    fn make_unique_reports_duplicates() {
        let mut rec = ClassRec::class([gid(9), gid(2), gid(9), gid(2), gid(5)]);
        let removed = rec.make_unique();
        assert_eq!(rec.gids().collect::<Vec<_>>(), vec![gid(2), gid(5), gid(9)]);
        assert_eq!(removed, vec![gid(2), gid(9)]);
    }

    #[test]
    fn role_assignment() {
        let mut pat = GPat::new(vec![
            ClassRec::glyph(gid(1)),
            {
                let mut rec = ClassRec::glyph(gid(2));
                rec.role.marked = true;
                rec
            },
            ClassRec::glyph(gid(3)),
        ]);
        pat.assign_roles();
        assert!(pat.has_marked);
        let (backtrack, input, lookahead) = pat.partition();
        assert_eq!(backtrack.len(), 1);
        assert_eq!(input.len(), 1);
        assert_eq!(lookahead.len(), 1);
        assert_eq!(input[0].first_gid(), Some(gid(2)));
    }

    #[test]
    fn unmarked_pattern_is_all_input() {
        let mut pat = GPat::new(vec![ClassRec::glyph(gid(1)), ClassRec::glyph(gid(2))]);
        pat.assign_roles();
        let (backtrack, input, lookahead) = pat.partition();
        assert!(backtrack.is_empty());
        assert_eq!(input.len(), 2);
        assert!(lookahead.is_empty());
    }

    #[test]
    fn cross_product_order() {
        let pat = GPat::new(vec![
            ClassRec::class([gid(1), gid(2)]),
            ClassRec::glyph(gid(7)),
            ClassRec::class([gid(8), gid(9)]),
        ]);
        let tuples: Vec<_> = pat.cross_product().collect();
        assert_eq!(
            tuples,
            vec![
                vec![gid(1), gid(7), gid(8)],
                vec![gid(1), gid(7), gid(9)],
                vec![gid(2), gid(7), gid(8)],
                vec![gid(2), gid(7), gid(9)],
            ]
        );
    }

    #[test]
    fn range_alpha() {
        let mut names = Vec::new();
        expand_range("A.sc", "D.sc", |name| names.push(name.to_string())).unwrap();
        assert_eq!(names, ["A.sc", "B.sc", "C.sc", "D.sc"]);
    }

    #[test]
    fn range_numeric_zero_padded() {
        let mut names = Vec::new();
        expand_range("g.08", "g.11", |name| names.push(name.to_string())).unwrap();
        assert_eq!(names, ["g.08", "g.09", "g.10", "g.11"]);
    }

    #[test]
    fn range_rejects_malformed() {
        let reject = |a: &str, b: &str| {
            assert!(
                expand_range(a, b, |_| ()).is_err(),
                "expected {a}-{b} to be rejected"
            )
        };
        reject("A", "AA");
        reject("Z", "A");
        reject("a", "Z");
        reject("f_x_i", "g_y_i");
        reject("g.11", "g.08");
    }
}
