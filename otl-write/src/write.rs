//! The table writer: big-endian serialization with offset resolution.

use std::collections::{HashMap, VecDeque};

use font_types::Scalar;

use crate::error::Error;

/// A type that can be written out as part of an OpenType table.
///
/// Implementations write their fixed-width fields directly and register
/// subtables via [`TableWriter::write_offset`]; the writer takes care of
/// assigning final positions and patching the offset fields.
pub trait TableWrite {
    /// Write this table's data and offsets into the writer.
    fn write(&self, writer: &mut TableWriter);
}

/// Serialize a table and everything it references.
///
/// Subtables with identical content are stored once and shared. Positions
/// are assigned in breadth-first order from the root, so a table's children
/// land after it and offsets are always positive. Returns an error if any
/// offset does not fit its encoded width.
pub fn dump_table<T: TableWrite + ?Sized>(table: &T) -> Result<Vec<u8>, Error> {
    let mut writer = TableWriter::default();
    let root = writer.add_table(table);
    writer.store.serialize(root)
}

/// Manages a collection of tables while they are serialized.
///
/// Tables are written depth-first: when a table registers an offset, the
/// child is serialized immediately and replaced by an object id. Identical
/// children share an id.
#[derive(Debug, Default)]
pub struct TableWriter {
    store: ObjectStore,
    stack: Vec<TableData>,
}

impl TableWriter {
    fn add_table(&mut self, table: &(impl TableWrite + ?Sized)) -> ObjectId {
        self.stack.push(TableData::default());
        table.write(self);
        let data = self.stack.pop().unwrap();
        self.store.add(data)
    }

    /// Write raw big-endian bytes into the current table.
    #[inline]
    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.stack
            .last_mut()
            .expect("write outside any table")
            .write_bytes(bytes)
    }

    /// Record an offset to another table.
    ///
    /// `width` is the encoded size in bytes: 2 for an `Offset16`, 4 for an
    /// `Offset32`. The child table is serialized immediately; the offset
    /// field is filled with the child's final position when the root is
    /// packed.
    pub fn write_offset(&mut self, obj: &dyn TableWrite, width: OffsetLen) {
        let id = self.add_table(obj);
        let data = self.stack.last_mut().unwrap();
        data.add_offset(id, width);
    }

    /// Record an offset that may be null.
    ///
    /// A `None` writes zero bytes in place of the offset.
    pub fn write_offset_nullable(&mut self, obj: Option<&dyn TableWrite>, width: OffsetLen) {
        match obj {
            Some(obj) => self.write_offset(obj, width),
            None => self.write_slice(&[0u8; 4][..width as usize]),
        }
    }
}

/// An identifier for a unique table in the object store.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, Hash, PartialEq, Eq)]
struct ObjectId(u32);

/// The encoded width of an offset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OffsetLen {
    Offset16 = 2,
    Offset32 = 4,
}

impl OffsetLen {
    /// The maximum value representable at this width.
    pub const fn max_value(self) -> u32 {
        match self {
            Self::Offset16 => u16::MAX as u32,
            Self::Offset32 => u32::MAX,
        }
    }
}

impl std::fmt::Display for OffsetLen {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Offset16 => write!(f, "Offset16"),
            Self::Offset32 => write!(f, "Offset32"),
        }
    }
}

/// The encoded data for one table, with the offsets it contains.
#[derive(Debug, Default, Clone, Hash, PartialEq, Eq)]
struct TableData {
    bytes: Vec<u8>,
    offsets: Vec<OffsetRecord>,
}

/// The position and width of an offset field, and the table it points to.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct OffsetRecord {
    pos: u32,
    width: OffsetLen,
    object: ObjectId,
}

impl TableData {
    fn add_offset(&mut self, object: ObjectId, width: OffsetLen) {
        self.offsets.push(OffsetRecord {
            pos: self.bytes.len() as u32,
            width,
            object,
        });
        self.write_bytes(&[0u8; 4][..width as usize]);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes)
    }
}

/// Unique tables, in first-seen order; duplicate tables share an id.
#[derive(Debug, Default)]
struct ObjectStore {
    ids: HashMap<TableData, ObjectId>,
    objects: Vec<TableData>,
}

impl ObjectStore {
    fn add(&mut self, data: TableData) -> ObjectId {
        if let Some(id) = self.ids.get(&data) {
            return *id;
        }
        let id = ObjectId(self.objects.len() as u32);
        self.ids.insert(data.clone(), id);
        self.objects.push(data);
        id
    }

    fn get(&self, id: ObjectId) -> &TableData {
        &self.objects[id.0 as usize]
    }

    /// Assign positions and patch offsets, returning the final bytes.
    ///
    /// Placement is breadth-first from the root: the root table first, then
    /// its children in field order, then their children, and so on. A table
    /// referenced from several parents is placed at its first discovery.
    ///
    /// Tables reached through a 32-bit offset (extension payloads) are
    /// deferred: each such subtree is placed contiguously after the main
    /// region, so the 16-bit offsets inside it stay within reach no matter
    /// how large its siblings grow.
    fn serialize(&self, root: ObjectId) -> Result<Vec<u8>, Error> {
        let mut order = Vec::with_capacity(self.objects.len());
        let mut positions = HashMap::new();
        let mut total = 0u32;
        let mut deferred = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(root);
        loop {
            while let Some(id) = queue.pop_front() {
                if positions.contains_key(&id) {
                    continue;
                }
                positions.insert(id, total);
                total += self.get(id).bytes.len() as u32;
                order.push(id);
                for offset in &self.get(id).offsets {
                    match offset.width {
                        OffsetLen::Offset16 => queue.push_back(offset.object),
                        OffsetLen::Offset32 => deferred.push(offset.object),
                    }
                }
            }
            // start the next deferred subtree, if any
            match deferred.iter().position(|id| !positions.contains_key(id)) {
                Some(index) => queue.push_back(deferred.remove(index)),
                None => break,
            }
        }

        let mut out = vec![0u8; total as usize];
        for id in order {
            let data = self.get(id);
            let table_pos = positions[&id];
            let frame = &mut out[table_pos as usize..][..data.bytes.len()];
            frame.copy_from_slice(&data.bytes);
            for offset in &data.offsets {
                let value = i64::from(positions[&offset.object]) - i64::from(table_pos);
                if value < 0 || value > i64::from(offset.width.max_value()) {
                    // negative offsets arise when a deduplicated table was
                    // placed in an earlier subtree; both are overflows
                    return Err(Error::OffsetOverflow {
                        width: offset.width,
                        value: value.unsigned_abs() as u32,
                    });
                }
                let value = value as u32;
                let field = &mut frame[offset.pos as usize..][..offset.width as usize];
                match offset.width {
                    OffsetLen::Offset16 => field.copy_from_slice(&(value as u16).to_be_bytes()),
                    OffsetLen::Offset32 => field.copy_from_slice(&value.to_be_bytes()),
                }
            }
        }
        log::debug!("packed {} bytes", out.len());
        Ok(out)
    }
}

/// Write a 16-bit count field, erroring if the array is too long.
pub(crate) fn write_count(len: usize, writer: &mut TableWriter) {
    let count = u16::try_from(len).expect("array exceeds max length");
    count.write(writer);
}

macro_rules! write_be_bytes {
    ($ty:ty) => {
        impl TableWrite for $ty {
            #[inline]
            fn write(&self, writer: &mut TableWriter) {
                writer.write_slice(self.to_raw().as_ref())
            }
        }
    };
}

//NOTE: deliberately not implemented for raw offset types; offsets always go
//through write_offset so they participate in layout.
write_be_bytes!(u8);
write_be_bytes!(i8);
write_be_bytes!(u16);
write_be_bytes!(i16);
write_be_bytes!(u32);
write_be_bytes!(i32);
write_be_bytes!(types::Uint24);
write_be_bytes!(types::Fixed);
write_be_bytes!(types::F2Dot14);
write_be_bytes!(types::FWord);
write_be_bytes!(types::UfWord);
write_be_bytes!(types::Tag);
write_be_bytes!(types::MajorMinor);
write_be_bytes!(types::GlyphId16);
write_be_bytes!(types::NameId);

impl<T: TableWrite> TableWrite for [T] {
    fn write(&self, writer: &mut TableWriter) {
        self.iter().for_each(|item| item.write(writer))
    }
}

impl<T: TableWrite> TableWrite for Vec<T> {
    fn write(&self, writer: &mut TableWriter) {
        self.as_slice().write(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf(Vec<u8>);

    impl TableWrite for Leaf {
        fn write(&self, writer: &mut TableWriter) {
            writer.write_slice(&self.0);
        }
    }

    struct Parent {
        children: Vec<Leaf>,
    }

    impl TableWrite for Parent {
        fn write(&self, writer: &mut TableWriter) {
            0xBEEFu16.write(writer);
            for child in &self.children {
                writer.write_offset(child, OffsetLen::Offset16);
            }
        }
    }

    #[test]
    fn identical_children_share_storage() {
        let table = Parent {
            children: vec![Leaf(vec![1, 2]), Leaf(vec![1, 2]), Leaf(vec![3, 4])],
        };
        let bytes = dump_table(&table).unwrap();
        // header + three offsets + two unique leaves
        assert_eq!(bytes.len(), 2 + 6 + 2 + 2);
        // first two offsets resolve to the same position
        assert_eq!(bytes[2..4], bytes[4..6]);
        assert_ne!(bytes[2..4], bytes[6..8]);
    }

    #[test]
    fn breadth_first_placement() {
        struct Nested;
        impl TableWrite for Nested {
            fn write(&self, writer: &mut TableWriter) {
                writer.write_offset(&Leaf(vec![0xAA; 2]), OffsetLen::Offset16);
            }
        }
        struct Root;
        impl TableWrite for Root {
            fn write(&self, writer: &mut TableWriter) {
                writer.write_offset(&Nested, OffsetLen::Offset16);
                writer.write_offset(&Leaf(vec![0xBB; 2]), OffsetLen::Offset16);
            }
        }
        let bytes = dump_table(&Root).unwrap();
        // root(4) | Nested(2) | 0xBB leaf(2) | 0xAA leaf(2): siblings come
        // before the nested table's own children
        assert_eq!(bytes, [0, 4, 0, 6, 0, 4, 0xBB, 0xBB, 0xAA, 0xAA]);
    }

    #[test]
    fn overflow_reported() {
        let table = Parent {
            children: (0..1100u16)
                .map(|i| Leaf(i.to_be_bytes().repeat(32)))
                .collect(),
        };
        let err = dump_table(&table).unwrap_err();
        assert!(err.is_extension_recoverable(), "{err}");
    }
}
