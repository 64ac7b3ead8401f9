//! Accumulates the per-method debug-info side tables while code is emitted:
//! a list of pc descriptors plus two compressed byte streams, one for scope
//! descriptions and one for oop maps. Offsets into the streams are recorded
//! in the descriptors, so consumers can seek straight to the record for a pc.

use lirpack::CompressedWriteStream;

use crate::debuginfo::{
    builder::{FrameHeader, ScopeLists},
    scope_value::ValueWriter,
    FrameState, OopMap,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcKind {
    /// Execution can be observed and objects moved here; an oop map exists.
    Safepoint,
    /// Position-only record for profilers and crash reporting; no values, no
    /// oop map.
    NonSafepoint,
}

#[derive(Clone, Copy, Debug)]
pub struct PcDesc {
    pub pc_offset: u32,
    pub kind: PcKind,
    /// Offset of this pc's scope record in the scope stream.
    pub scope_offset: u32,
    /// Offset of this pc's oop map in the oop-map stream; safepoints only.
    pub oop_map_offset: Option<u32>,
}

pub struct DebugInfoRecorder {
    scopes: CompressedWriteStream,
    oop_maps: CompressedWriteStream,
    pcs: Vec<PcDesc>,
}

impl DebugInfoRecorder {
    pub fn new() -> Self {
        Self {
            scopes: CompressedWriteStream::new(),
            oop_maps: CompressedWriteStream::new(),
            pcs: Vec::new(),
        }
    }

    fn write_header(w: &mut CompressedWriteStream, header: &FrameHeader) {
        w.write_long(header.method as i64);
        w.write_int(header.bci);
    }

    /// Record a safepoint: the full scope chain (outermost first, as
    /// delivered by the builder) and the oop map.
    pub fn add_safepoint(&mut self, pc_offset: u32, scopes: &[(FrameHeader, ScopeLists)], oop_map: &OopMap) {
        let scope_offset = self.scopes.position() as u32;
        // One writer per safepoint: object back-references are scoped to this
        // record and never reach across pcs.
        let mut w = ValueWriter::new(&mut self.scopes);
        w.stream().write_int(scopes.len() as u32);
        for (header, lists) in scopes {
            Self::write_header(w.stream(), header);
            w.write_list(&lists.locals);
            w.write_list(&lists.stack);
            w.stream().write_int(lists.monitors.len() as u32);
            for m in &lists.monitors {
                m.write(&mut w);
            }
        }

        let oop_map_offset = self.oop_maps.position() as u32;
        oop_map.write_to(&mut self.oop_maps);

        self.pcs.push(PcDesc {
            pc_offset,
            kind: PcKind::Safepoint,
            scope_offset,
            oop_map_offset: Some(oop_map_offset),
        });
    }

    /// Record a position-only pc: method and bci chain, no values.
    pub fn add_non_safepoint(&mut self, pc_offset: u32, frame: &FrameState) {
        let scope_offset = self.scopes.position() as u32;
        self.scopes.write_int(frame.depth() as u32);
        self.write_position_chain(frame);
        self.pcs.push(PcDesc { pc_offset, kind: PcKind::NonSafepoint, scope_offset, oop_map_offset: None });
    }

    fn write_position_chain(&mut self, frame: &FrameState) {
        if let Some(caller) = &frame.caller {
            self.write_position_chain(caller);
        }
        Self::write_header(
            &mut self.scopes,
            &FrameHeader { method: frame.method.0, bci: frame.bci },
        );
    }

    pub fn pc_count(&self) -> usize {
        self.pcs.len()
    }

    /// Finish recording: the pc descriptors and the two serialized streams.
    pub fn into_tables(self) -> (Vec<PcDesc>, Vec<u8>, Vec<u8>) {
        (self.pcs, self.scopes.into_bytes(), self.oop_maps.into_bytes())
    }
}

impl Default for DebugInfoRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lirpack::CompressedReadStream;

    use super::*;
    use crate::{
        debuginfo::{
            scope_value::{ScopeValue, ValueReader},
            testing,
        },
        target::MethodRef,
    };

    fn one_scope(vals: Vec<ScopeValue>) -> Vec<(FrameHeader, ScopeLists)> {
        vec![(
            FrameHeader { method: 42, bci: 17 },
            ScopeLists { locals: vals, stack: Vec::new(), monitors: Vec::new() },
        )]
    }

    #[test]
    fn safepoint_record_is_seekable() {
        let mut rec = DebugInfoRecorder::new();
        let map = OopMap::new(8, 4, 0);
        rec.add_safepoint(0x10, &one_scope(vec![ScopeValue::ConstInt(5)]), &map);
        rec.add_safepoint(0x30, &one_scope(vec![ScopeValue::ConstInt(6)]), &map);
        let (pcs, scopes, _) = rec.into_tables();
        assert_eq!(pcs.len(), 2);

        // Seek straight to the second record and decode it.
        let mut rs = CompressedReadStream::new(&scopes);
        rs.set_position(pcs[1].scope_offset as usize);
        assert_eq!(rs.read_int(), 1); // depth
        assert_eq!(rs.read_long(), 42);
        assert_eq!(rs.read_int(), 17);
        let mut r = ValueReader::new(&mut rs);
        assert_eq!(r.read_list(), vec![ScopeValue::ConstInt(6)]);
    }

    #[test]
    fn non_safepoint_records_positions_only() {
        let mut rec = DebugInfoRecorder::new();
        let outer = testing::frame(4, &[]);
        let inner = Arc::new(crate::debuginfo::FrameState {
            method: MethodRef(7),
            bci: 2,
            locals: Vec::new(),
            stack: Vec::new(),
            locks: Vec::new(),
            caller: Some(outer),
        });
        rec.add_non_safepoint(0x8, &inner);
        let (pcs, scopes, oop_maps) = rec.into_tables();
        assert_eq!(pcs[0].kind, PcKind::NonSafepoint);
        assert_eq!(pcs[0].oop_map_offset, None);
        assert!(oop_maps.is_empty());

        let mut rs = CompressedReadStream::new(&scopes);
        assert_eq!(rs.read_int(), 2); // inline depth
        assert_eq!(rs.read_long(), 1); // outermost method first
        assert_eq!(rs.read_int(), 4);
        assert_eq!(rs.read_long(), 7);
        assert_eq!(rs.read_int(), 2);
    }
}
