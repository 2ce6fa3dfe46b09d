//! Value records and anchors as authored in a feature file.

use smol_str::SmolStr;

use otl_write::gpos::{AnchorTable, ValueRecord};

use crate::diagnostics::CompileError;

/// A positioning value record: 1, 2, 4 or 10 signed 16-bit metrics.
///
/// The counts correspond to advance-only, placement+advance, full XY
/// placement and advance, and the full form with device table slots (the
/// device slots are recorded but not emitted).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MetricsInfo {
    values: Vec<i16>,
}

impl MetricsInfo {
    pub fn new(values: Vec<i16>) -> Result<Self, CompileError> {
        match values.len() {
            1 | 2 | 4 | 10 => Ok(MetricsInfo { values }),
            n => Err(CompileError::PatternShapeMismatch(format!(
                "value record must have 1, 2, 4 or 10 metrics, not {n}"
            ))),
        }
    }

    pub fn x_advance(advance: i16) -> Self {
        MetricsInfo {
            values: vec![advance],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0)
    }

    /// Lower into the encoded value record form.
    pub fn build(&self) -> ValueRecord {
        match self.values.as_slice() {
            [xa] => ValueRecord {
                x_advance: Some(*xa),
                ..Default::default()
            },
            [xp, xa] => ValueRecord {
                x_placement: Some(*xp),
                x_advance: Some(*xa),
                ..Default::default()
            },
            // the 10-value form carries four device slots we do not emit
            [xp, yp, xa, ya, ..] => ValueRecord {
                x_placement: Some(*xp),
                y_placement: Some(*yp),
                x_advance: Some(*xa),
                y_advance: Some(*ya),
            },
            _ => ValueRecord::default(),
        }
    }
}

/// An anchor as authored, with the mark-class bookkeeping that position
/// rules attach to it.
///
/// `contour_point` is only meaningful (and only compared) for format 2;
/// it is normalized away for the other formats so that derived ordering
/// and equality follow the documented key.
#[derive(Clone, Debug)]
pub struct AnchorMarkInfo {
    pub component_index: u16,
    pub mark_class_index: u16,
    pub format: u8,
    pub x: i16,
    pub y: i16,
    pub contour_point: Option<u16>,
    pub mark_class_name: Option<SmolStr>,
}

impl AnchorMarkInfo {
    /// The total order key; the class name is bookkeeping and not part of it.
    fn key(&self) -> (u16, u16, u8, i16, i16, Option<u16>) {
        (
            self.component_index,
            self.mark_class_index,
            self.format,
            self.x,
            self.y,
            self.contour_point,
        )
    }
}

impl PartialEq for AnchorMarkInfo {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AnchorMarkInfo {}

impl std::hash::Hash for AnchorMarkInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialOrd for AnchorMarkInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AnchorMarkInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl AnchorMarkInfo {
    pub fn coord(x: i16, y: i16) -> Self {
        AnchorMarkInfo {
            format: 1,
            x,
            y,
            contour_point: None,
            mark_class_index: 0,
            component_index: 0,
            mark_class_name: None,
        }
    }

    pub fn contour(x: i16, y: i16, point: u16) -> Self {
        AnchorMarkInfo {
            format: 2,
            x,
            y,
            contour_point: Some(point),
            ..Self::coord(x, y)
        }
    }

    pub fn device(x: i16, y: i16) -> Self {
        AnchorMarkInfo {
            format: 3,
            ..Self::coord(x, y)
        }
    }

    /// Lower into the encoded anchor table form.
    pub fn build(&self) -> AnchorTable {
        match (self.format, self.contour_point) {
            (2, Some(point)) => AnchorTable::Format2 {
                x: self.x,
                y: self.y,
                anchor_point: point,
            },
            (3, _) => AnchorTable::Format3 {
                x: self.x,
                y: self.y,
            },
            _ => AnchorTable::Format1 {
                x: self.x,
                y: self.y,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_count_validation() {
        assert!(MetricsInfo::new(vec![1]).is_ok());
        assert!(MetricsInfo::new(vec![1, 2]).is_ok());
        assert!(MetricsInfo::new(vec![1, 2, 3, 4]).is_ok());
        assert!(MetricsInfo::new(vec![0; 10]).is_ok());
        assert!(MetricsInfo::new(vec![1, 2, 3]).is_err());
    }

    #[test]
    fn metrics_lowering() {
        let record = MetricsInfo::new(vec![10, -20, 30, 40]).unwrap().build();
        assert_eq!(record.x_placement, Some(10));
        assert_eq!(record.y_placement, Some(-20));
        assert_eq!(record.x_advance, Some(30));
        assert_eq!(record.y_advance, Some(40));

        let record = MetricsInfo::x_advance(-15).build();
        assert_eq!(record.x_advance, Some(-15));
        assert_eq!(record.x_placement, None);
    }

    #[test]
    fn anchor_ordering_key() {
        let a = AnchorMarkInfo {
            component_index: 0,
            mark_class_index: 1,
            ..AnchorMarkInfo::coord(5, 5)
        };
        let b = AnchorMarkInfo {
            component_index: 1,
            mark_class_index: 0,
            ..AnchorMarkInfo::coord(0, 0)
        };
        // component index dominates
        assert!(a < b);
        // contour point only distinguishes format 2 anchors
        assert_eq!(AnchorMarkInfo::coord(1, 2), AnchorMarkInfo::coord(1, 2));
        assert_ne!(
            AnchorMarkInfo::contour(1, 2, 3),
            AnchorMarkInfo::contour(1, 2, 4)
        );
    }
}
