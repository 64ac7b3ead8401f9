//! Scope values: the serialized description of where each live interpreter
//! value can be found at an observation point.
//!
//! Values are written to a [CompressedWriteStream] with a one-byte tag per
//! value. Scalar-replaced objects serialize their field lists inline the
//! first time they occur within one serialization pass; re-occurrences (and
//! back-edges in cyclic object graphs) collapse to an [ScopeValue::ObjectId]
//! referring back to the first occurrence. The seen-set lives in
//! [ValueWriter], so object identity is scoped to a single pass and never
//! leaks between safepoints.

use std::collections::HashSet;

use lirpack::{CompressedReadStream, CompressedWriteStream};
use strum::FromRepr;

use crate::target::ClassRef;

const TAG_LOCATION: u8 = 0;
const TAG_CONST_INT: u8 = 1;
const TAG_CONST_OBJECT: u8 = 2;
const TAG_CONST_LONG: u8 = 3;
const TAG_OBJECT: u8 = 4;
const TAG_OBJECT_ID: u8 = 5;

/// Whether a [Location] names a register or a stack slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WhereKind {
    Register(u16),
    /// Frame-relative byte offset.
    Stack(i32),
}

/// How the bits at a location are to be interpreted by a deoptimization or
/// stack walk consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum LocationType {
    Normal,
    Oop,
    NarrowOop,
    Lng,
    Dbl,
    /// An int stored in the low half of a long location.
    IntInLong,
    /// A float stored in the low half of a double location.
    FloatInDouble,
    ReturnAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub where_: WhereKind,
    pub type_: LocationType,
}

impl Location {
    pub fn register(num: u16, type_: LocationType) -> Self {
        Self { where_: WhereKind::Register(num), type_ }
    }

    pub fn stack(offset: i32, type_: LocationType) -> Self {
        Self { where_: WhereKind::Stack(offset), type_ }
    }

    fn write(&self, w: &mut CompressedWriteStream) {
        w.write_byte(self.type_ as u8);
        match self.where_ {
            WhereKind::Register(n) => {
                w.write_bool(true);
                w.write_int(u32::from(n));
            }
            WhereKind::Stack(off) => {
                w.write_bool(false);
                w.write_signed_int(off);
            }
        }
    }

    fn read(r: &mut CompressedReadStream) -> Self {
        let type_ = LocationType::from_repr(r.read_byte()).expect("corrupt location type");
        let where_ = if r.read_bool() {
            WhereKind::Register(r.read_int() as u16)
        } else {
            WhereKind::Stack(r.read_signed_int())
        };
        Self { where_, type_ }
    }
}

/// A scalar-replaced object: its fields are described in place of the object
/// itself. `id` is unique among the objects of one serialization pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectValue {
    pub id: u32,
    pub klass: ClassRef,
    pub fields: Vec<ScopeValue>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeValue {
    Location(Location),
    ConstInt(i32),
    ConstLong(i64),
    ConstObject(u64),
    Object(ObjectValue),
    /// A back-reference to an [ScopeValue::Object] already written in this
    /// pass.
    ObjectId(u32),
}

/// A monitor held at an observation point: who owns it and where its lock
/// record lives. Eliminated monitors were optimized away but must still be
/// re-inflated on deoptimization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorValue {
    pub owner: ScopeValue,
    pub basic_lock: Location,
    pub eliminated: bool,
}

impl MonitorValue {
    pub fn write(&self, w: &mut ValueWriter<'_>) {
        self.owner.write(w);
        self.basic_lock.write(w.stream);
        w.stream.write_bool(self.eliminated);
    }

    pub fn read(r: &mut ValueReader<'_, '_>) -> Self {
        let owner = ScopeValue::read(r);
        let basic_lock = Location::read(r.stream);
        let eliminated = r.stream.read_bool();
        Self { owner, basic_lock, eliminated }
    }
}

/// One serialization pass over a group of scope values. Dropping the writer
/// ends the pass and with it the object-id scope.
pub struct ValueWriter<'a> {
    stream: &'a mut CompressedWriteStream,
    seen: HashSet<u32>,
}

impl<'a> ValueWriter<'a> {
    pub fn new(stream: &'a mut CompressedWriteStream) -> Self {
        Self { stream, seen: HashSet::new() }
    }

    /// The underlying stream, for interleaving non-value data (scope headers)
    /// within the pass.
    pub fn stream(&mut self) -> &mut CompressedWriteStream {
        self.stream
    }

    pub fn write_list(&mut self, values: &[ScopeValue]) {
        self.stream.write_int(values.len() as u32);
        for v in values {
            v.write(self);
        }
    }
}

/// One deserialization pass; resolves [ScopeValue::ObjectId] back-references
/// against the objects decoded so far.
pub struct ValueReader<'a, 'b> {
    stream: &'a mut CompressedReadStream<'b>,
    objects: Vec<ObjectValue>,
}

impl<'a, 'b> ValueReader<'a, 'b> {
    pub fn new(stream: &'a mut CompressedReadStream<'b>) -> Self {
        Self { stream, objects: Vec::new() }
    }

    pub fn read_list(&mut self) -> Vec<ScopeValue> {
        let n = self.stream.read_int() as usize;
        (0..n).map(|_| ScopeValue::read(self)).collect()
    }

    /// The object a back-reference points at.
    pub fn object_by_id(&self, id: u32) -> Option<&ObjectValue> {
        self.objects.iter().find(|o| o.id == id)
    }
}

impl ScopeValue {
    pub fn write(&self, w: &mut ValueWriter<'_>) {
        match self {
            ScopeValue::Location(loc) => {
                w.stream.write_byte(TAG_LOCATION);
                loc.write(w.stream);
            }
            ScopeValue::ConstInt(v) => {
                w.stream.write_byte(TAG_CONST_INT);
                w.stream.write_signed_int(*v);
            }
            ScopeValue::ConstObject(v) => {
                w.stream.write_byte(TAG_CONST_OBJECT);
                w.stream.write_long(*v as i64);
            }
            ScopeValue::ConstLong(v) => {
                w.stream.write_byte(TAG_CONST_LONG);
                w.stream.write_long(*v);
            }
            ScopeValue::Object(obj) => {
                if !w.seen.insert(obj.id) {
                    // Already written in this pass (possibly because the
                    // object graph is cyclic); emit a back-reference.
                    w.stream.write_byte(TAG_OBJECT_ID);
                    w.stream.write_int(obj.id);
                    return;
                }
                w.stream.write_byte(TAG_OBJECT);
                w.stream.write_int(obj.id);
                w.stream.write_long(obj.klass.0 as i64);
                w.stream.write_int(obj.fields.len() as u32);
                for f in &obj.fields {
                    f.write(w);
                }
            }
            ScopeValue::ObjectId(id) => {
                w.stream.write_byte(TAG_OBJECT_ID);
                w.stream.write_int(*id);
            }
        }
    }

    pub fn read(r: &mut ValueReader<'_, '_>) -> Self {
        match r.stream.read_byte() {
            TAG_LOCATION => ScopeValue::Location(Location::read(r.stream)),
            TAG_CONST_INT => ScopeValue::ConstInt(r.stream.read_signed_int()),
            TAG_CONST_OBJECT => ScopeValue::ConstObject(r.stream.read_long() as u64),
            TAG_CONST_LONG => ScopeValue::ConstLong(r.stream.read_long()),
            TAG_OBJECT => {
                let id = r.stream.read_int();
                let klass = ClassRef(r.stream.read_long() as u64);
                let nfields = r.stream.read_int() as usize;
                let fields = (0..nfields).map(|_| ScopeValue::read(r)).collect();
                let obj = ObjectValue { id, klass, fields };
                r.objects.push(obj.clone());
                ScopeValue::Object(obj)
            }
            TAG_OBJECT_ID => ScopeValue::ObjectId(r.stream.read_int()),
            t => panic!("corrupt scope value tag {t}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(values: &[ScopeValue]) -> Vec<ScopeValue> {
        let mut ws = CompressedWriteStream::new();
        let mut w = ValueWriter::new(&mut ws);
        w.write_list(values);
        let bytes = ws.into_bytes();
        let mut rs = CompressedReadStream::new(&bytes);
        let mut r = ValueReader::new(&mut rs);
        r.read_list()
    }

    #[test]
    fn scalars_roundtrip() {
        let vals = vec![
            ScopeValue::ConstInt(-7),
            ScopeValue::ConstLong(1 << 40),
            ScopeValue::ConstObject(0xdead_beef),
            ScopeValue::Location(Location::register(3, LocationType::Oop)),
            ScopeValue::Location(Location::stack(-16, LocationType::Dbl)),
        ];
        assert_eq!(roundtrip(&vals), vals);
    }

    #[test]
    fn repeated_object_collapses_to_id() {
        let obj = ScopeValue::Object(ObjectValue {
            id: 3,
            klass: ClassRef(9),
            fields: vec![ScopeValue::ConstInt(1)],
        });
        let out = roundtrip(&[obj.clone(), obj.clone()]);
        assert_eq!(out[0], obj);
        assert_eq!(out[1], ScopeValue::ObjectId(3));
    }

    #[test]
    fn cyclic_object_graph_terminates() {
        // An object whose field refers back to itself by id. The writer's
        // per-pass seen-set turns the inner occurrence into a back-reference
        // instead of recursing forever.
        let inner = ScopeValue::Object(ObjectValue {
            id: 7,
            klass: ClassRef(2),
            fields: vec![ScopeValue::ObjectId(7)],
        });
        let out = roundtrip(&[inner.clone()]);
        assert_eq!(out, vec![inner]);
    }

    #[test]
    fn seen_set_does_not_leak_between_passes() {
        let obj = ScopeValue::Object(ObjectValue {
            id: 1,
            klass: ClassRef(4),
            fields: vec![],
        });
        // Two independent passes over the same value must both write the full
        // object, not a dangling back-reference.
        assert_eq!(roundtrip(&[obj.clone()]), vec![obj.clone()]);
        assert_eq!(roundtrip(&[obj.clone()]), vec![obj]);
    }

    #[test]
    fn monitor_roundtrip() {
        let mv = MonitorValue {
            owner: ScopeValue::Location(Location::stack(8, LocationType::Oop)),
            basic_lock: Location::stack(24, LocationType::Normal),
            eliminated: true,
        };
        let mut ws = CompressedWriteStream::new();
        let mut w = ValueWriter::new(&mut ws);
        mv.write(&mut w);
        let bytes = ws.into_bytes();
        let mut rs = CompressedReadStream::new(&bytes);
        let mut r = ValueReader::new(&mut rs);
        assert_eq!(MonitorValue::read(&mut r), mv);
    }

    #[test]
    fn back_reference_resolves_to_decoded_object() {
        let obj = ScopeValue::Object(ObjectValue {
            id: 5,
            klass: ClassRef(1),
            fields: vec![ScopeValue::ConstInt(42)],
        });
        let mut ws = CompressedWriteStream::new();
        let mut w = ValueWriter::new(&mut ws);
        w.write_list(&[obj.clone(), obj]);
        let bytes = ws.into_bytes();
        let mut rs = CompressedReadStream::new(&bytes);
        let mut r = ValueReader::new(&mut rs);
        let out = r.read_list();
        let ScopeValue::ObjectId(id) = out[1] else { panic!("expected back-reference") };
        assert_eq!(r.object_by_id(id).unwrap().fields, vec![ScopeValue::ConstInt(42)]);
    }
}
