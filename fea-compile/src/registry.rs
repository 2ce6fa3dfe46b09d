//! Named objects defined at the top of a feature file.
//!
//! Four disjoint namespaces: glyph classes, anchors, value records, and mark
//! classes. Redefinition is an error everywhere except mark classes, which
//! accumulate members until a position rule uses them.

use indexmap::IndexMap;
use smol_str::SmolStr;
use std::collections::HashMap;

use crate::diagnostics::CompileError;
use crate::metrics::{AnchorMarkInfo, MetricsInfo};
use crate::pattern::ClassRec;

/// A named mark class: glyphs where each carries its own anchor.
#[derive(Clone, Debug, Default)]
pub struct MarkClass {
    /// Accumulated members; parallel per-glyph anchors.
    pub members: Vec<(ClassRec, AnchorMarkInfo)>,
    /// Set once the class participated in a position rule.
    pub used: bool,
}

impl MarkClass {
    pub fn gids(&self) -> impl Iterator<Item = font_types::GlyphId16> + '_ {
        self.members.iter().flat_map(|(rec, _)| rec.gids())
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    glyph_classes: HashMap<SmolStr, ClassRec>,
    anchors: HashMap<SmolStr, AnchorMarkInfo>,
    value_records: HashMap<SmolStr, MetricsInfo>,
    // insertion order doubles as the authoring-order class index
    mark_classes: IndexMap<SmolStr, MarkClass>,
}

impl Registry {
    pub fn define_glyph_class(&mut self, name: SmolStr, rec: ClassRec) -> Result<(), CompileError> {
        match self.glyph_classes.insert(name.clone(), rec) {
            Some(_) => Err(CompileError::DuplicateDefinition(name)),
            None => Ok(()),
        }
    }

    pub fn glyph_class(&self, name: &str) -> Option<&ClassRec> {
        self.glyph_classes.get(name)
    }

    pub fn define_anchor(
        &mut self,
        name: SmolStr,
        anchor: AnchorMarkInfo,
    ) -> Result<(), CompileError> {
        match self.anchors.insert(name.clone(), anchor) {
            Some(_) => Err(CompileError::DuplicateDefinition(name)),
            None => Ok(()),
        }
    }

    pub fn anchor(&self, name: &str) -> Option<&AnchorMarkInfo> {
        self.anchors.get(name)
    }

    pub fn define_value_record(
        &mut self,
        name: SmolStr,
        metrics: MetricsInfo,
    ) -> Result<(), CompileError> {
        match self.value_records.insert(name.clone(), metrics) {
            Some(_) => Err(CompileError::DuplicateDefinition(name)),
            None => Ok(()),
        }
    }

    pub fn value_record(&self, name: &str) -> Option<&MetricsInfo> {
        self.value_records.get(name)
    }

    /// Add members to a mark class, creating it on first mention.
    ///
    /// Fails once the class has been used by a position rule.
    pub fn add_mark_class_members(
        &mut self,
        name: SmolStr,
        rec: ClassRec,
        mut anchor: AnchorMarkInfo,
    ) -> Result<(), CompileError> {
        if self.mark_classes.get(&name).is_some_and(|class| class.used) {
            return Err(CompileError::MarkClassSealed(name));
        }
        let index = self
            .mark_classes
            .get_index_of(&name)
            .unwrap_or(self.mark_classes.len()) as u16;
        anchor.mark_class_name = Some(name.clone());
        anchor.mark_class_index = index;
        self.mark_classes
            .entry(name)
            .or_default()
            .members
            .push((rec, anchor));
        Ok(())
    }

    pub fn mark_class(&self, name: &str) -> Option<&MarkClass> {
        self.mark_classes.get(name)
    }

    /// Seal a mark class against further members.
    pub fn seal_mark_class(&mut self, name: &str) {
        if let Some(class) = self.mark_classes.get_mut(name) {
            class.used = true;
        }
    }

    pub fn mark_classes(&self) -> impl Iterator<Item = (&SmolStr, &MarkClass)> {
        self.mark_classes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use font_types::GlyphId16;

    fn rec(raw: u16) -> ClassRec {
        ClassRec::glyph(GlyphId16::new(raw))
    }

    #[test]
    fn duplicate_class_rejected() {
        let mut registry = Registry::default();
        registry.define_glyph_class("upper".into(), rec(1)).unwrap();
        assert!(matches!(
            registry.define_glyph_class("upper".into(), rec(2)),
            Err(CompileError::DuplicateDefinition(_))
        ));
        // other namespaces are unaffected
        registry
            .define_value_record("upper".into(), MetricsInfo::x_advance(1))
            .unwrap();
    }

    #[test]
    fn mark_classes_accumulate_until_used() {
        let mut registry = Registry::default();
        let anchor = AnchorMarkInfo::coord(0, 0);
        registry
            .add_mark_class_members("TOP".into(), rec(10), anchor.clone())
            .unwrap();
        registry
            .add_mark_class_members("TOP".into(), rec(11), anchor.clone())
            .unwrap();
        assert_eq!(registry.mark_class("TOP").unwrap().members.len(), 2);

        registry.seal_mark_class("TOP");
        assert!(matches!(
            registry.add_mark_class_members("TOP".into(), rec(12), anchor),
            Err(CompileError::MarkClassSealed(_))
        ));
    }
}
