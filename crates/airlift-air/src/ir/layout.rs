//! Size and alignment queries against the fixed AIR data layout.
//!
//! The layout string the module carries is constant for this target, so the
//! rules are hard-coded rather than parsed: 64-bit pointers, natural scalar
//! alignment, and the vector alignment table
//! `v16:16 v24:32 v32:32 v48:64 v64:64 v96:128 v128:128 v192:256 v256:256
//! v512:512 v1024:1024` (bits).

use super::{TypeId, TypeKind, TypeTable};

pub const AIR_DATA_LAYOUT: &str = "e-p:64:64:64-i1:8:8-i8:8:8-i16:16:16-i32:32:32-i64:64:64-\
f32:32:32-f64:64:64-v16:16:16-v24:32:32-v32:32:32-v48:64:64-v64:64:64-v96:128:128-v128:128:128-\
v192:256:256-v256:256:256-v512:512:512-v1024:1024:1024-n8:16:32";

#[derive(Clone, Debug, Default)]
pub struct DataLayout {
    pub string: String,
}

impl DataLayout {
    pub fn air() -> Self {
        DataLayout { string: AIR_DATA_LAYOUT.to_string() }
    }

    /// ABI alignment in bytes.
    pub fn abi_align(&self, types: &TypeTable, ty: TypeId) -> u64 {
        match types.kind(ty) {
            TypeKind::Void => 1,
            TypeKind::Int(bits) => ((*bits as u64 + 7) / 8).next_power_of_two().min(8),
            TypeKind::Half => 2,
            TypeKind::Float => 4,
            TypeKind::Pointer { .. } | TypeKind::Function { .. } => 8,
            TypeKind::Vector { elem, len } => {
                let bits = self.size_of(types, *elem) * 8 * *len as u64;
                match bits {
                    16 => 2,
                    24 | 32 => 4,
                    48 | 64 => 8,
                    96 | 128 => 16,
                    192 | 256 => 32,
                    512 => 64,
                    1024 => 128,
                    other => (other / 8).next_power_of_two(),
                }
            }
            TypeKind::Array { elem, .. } => self.abi_align(types, *elem),
            TypeKind::Struct { fields, packed, .. } => {
                if *packed {
                    1
                } else {
                    fields
                        .iter()
                        .map(|&f| self.abi_align(types, f))
                        .max()
                        .unwrap_or(1)
                }
            }
            TypeKind::Opaque { .. } => 1,
        }
    }

    /// Exact size in bytes, without trailing padding.
    pub fn size_of(&self, types: &TypeTable, ty: TypeId) -> u64 {
        match types.kind(ty) {
            TypeKind::Void | TypeKind::Opaque { .. } => 0,
            TypeKind::Int(bits) => (*bits as u64 + 7) / 8,
            TypeKind::Half => 2,
            TypeKind::Float => 4,
            TypeKind::Pointer { .. } | TypeKind::Function { .. } => 8,
            TypeKind::Vector { elem, len } => self.size_of(types, *elem) * *len as u64,
            TypeKind::Array { elem, len } => self.alloc_size(types, *elem) * len,
            TypeKind::Struct { fields, packed, .. } => {
                let mut offset = 0u64;
                for &field in fields {
                    let align = if *packed { 1 } else { self.abi_align(types, field) };
                    offset = offset.next_multiple_of(align);
                    offset += self.alloc_size(types, field);
                }
                offset
            }
        }
    }

    /// Size rounded up to alignment: the stride of an array of this type.
    pub fn alloc_size(&self, types: &TypeTable, ty: TypeId) -> u64 {
        let size = self.size_of(types, ty);
        size.next_multiple_of(self.abi_align(types, ty))
    }

    /// Byte offsets of each struct field plus the total alloc size.
    pub fn struct_layout(&self, types: &TypeTable, fields: &[TypeId]) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut max_align = 1u64;
        for &field in fields {
            let align = self.abi_align(types, field);
            max_align = max_align.max(align);
            offset = offset.next_multiple_of(align);
            offsets.push(offset);
            offset += self.alloc_size(types, field);
        }
        (offsets, offset.next_multiple_of(max_align))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_alignments_follow_the_layout_table() {
        let mut types = TypeTable::default();
        let layout = DataLayout::air();

        let f32 = types.f32();
        let v3 = types.vec(f32, 3);
        let v4 = types.vec(f32, 4);
        // float3 is 12 bytes but aligns to 16 (v96:128).
        assert_eq!(layout.size_of(&types, v3), 12);
        assert_eq!(layout.abi_align(&types, v3), 16);
        assert_eq!(layout.alloc_size(&types, v3), 16);
        assert_eq!(layout.abi_align(&types, v4), 16);

        let i16t = types.i16();
        let v2h = types.vec(i16t, 2);
        assert_eq!(layout.abi_align(&types, v2h), 4); // v32:32
    }

    #[test]
    fn struct_layout_inserts_padding() {
        let mut types = TypeTable::default();
        let layout = DataLayout::air();

        let i8t = types.i8();
        let i32t = types.i32();
        let fields = vec![i8t, i32t, i8t];
        let (offsets, size) = layout.struct_layout(&types, &fields);
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(size, 12);
    }
}
