//! The type table.
//!
//! Append-only store of every descriptor the evaluator knows about: the
//! ones loaded from debug info and the ones it synthesizes on the fly
//! (pointer types for `&x`, slice types for resliced arrays, fixed-size
//! basic types for built-in results). Synthesized types are interned by
//! printed name so repeated `&x` evaluations share one descriptor.
//!
//! The table is shared behind an `Arc` by every value produced from one
//! target, so interior mutability goes through `parking_lot::RwLock`.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{align_addr, Field, Idx, Kind, TypeData, TypeKind};

pub struct TypeTable {
    types: RwLock<Vec<Arc<TypeData>>>,
    by_name: RwLock<FxHashMap<String, Idx>>,
    /// Runtime type-descriptor address to debug-info type.
    runtime_types: RwLock<FxHashMap<u64, Idx>>,
    runtime_addrs: RwLock<FxHashMap<Idx, u64>>,
    ptr_size: i64,
}

impl TypeTable {
    pub fn new(ptr_size: i64) -> Self {
        Self {
            types: RwLock::new(Vec::new()),
            by_name: RwLock::new(FxHashMap::default()),
            runtime_types: RwLock::new(FxHashMap::default()),
            runtime_addrs: RwLock::new(FxHashMap::default()),
            ptr_size,
        }
    }

    #[inline]
    pub fn ptr_size(&self) -> i64 {
        self.ptr_size
    }

    /// Append a descriptor. Named descriptors become reachable through
    /// [`lookup`](Self::lookup); the first registration of a name wins.
    pub fn insert(&self, data: TypeData) -> Idx {
        let name = data.name.clone();
        let idx = {
            let mut types = self.types.write();
            let idx = Idx::from_raw(types.len() as u32);
            types.push(Arc::new(data));
            idx
        };
        if !name.is_empty() {
            self.by_name.write().entry(name).or_insert(idx);
        }
        idx
    }

    /// Reserve a slot for a type that refers to itself, to be filled by
    /// [`define`](Self::define).
    pub fn reserve(&self, name: impl Into<String>) -> Idx {
        self.insert(TypeData::new(name, 0, 1, TypeKind::Void))
    }

    /// Replace the descriptor at `idx`.
    pub fn define(&self, idx: Idx, data: TypeData) {
        let name = data.name.clone();
        self.types.write()[idx.index()] = Arc::new(data);
        if !name.is_empty() {
            self.by_name.write().entry(name).or_insert(idx);
        }
    }

    /// Get a descriptor.
    ///
    /// Indices are only produced by this table, so an out-of-range index is
    /// a logic error and panics.
    #[inline]
    pub fn get(&self, idx: Idx) -> Arc<TypeData> {
        Arc::clone(&self.types.read()[idx.index()])
    }

    pub fn lookup(&self, name: &str) -> Option<Idx> {
        self.by_name.read().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strip typedefs.
    pub fn resolve_typedef(&self, mut idx: Idx) -> Idx {
        loop {
            match self.get(idx).kind {
                TypeKind::Typedef { target } if target != idx => idx = target,
                _ => return idx,
            }
        }
    }

    #[inline]
    pub fn size(&self, idx: Idx) -> i64 {
        self.get(idx).size
    }

    #[inline]
    pub fn align(&self, idx: Idx) -> i64 {
        self.get(idx).align
    }

    /// Element spacing in an array of `idx`.
    pub fn stride_of(&self, idx: Idx) -> i64 {
        let data = self.get(idx);
        align_addr(data.size, data.align)
    }

    /// Fields of a struct type (after typedef resolution), or empty.
    pub fn fields(&self, idx: Idx) -> Vec<Field> {
        match &self.get(self.resolve_typedef(idx)).kind {
            TypeKind::Struct { fields } => fields.clone(),
            _ => Vec::new(),
        }
    }

    /// Reflection kind of a type, after typedef resolution.
    pub fn kind(&self, idx: Idx) -> Kind {
        let data = self.get(self.resolve_typedef(idx));
        match &data.kind {
            TypeKind::Void => Kind::Invalid,
            TypeKind::Bool => Kind::Bool,
            TypeKind::Int => match (data.name.as_str(), data.size) {
                ("int", _) => Kind::Int,
                (_, 1) => Kind::Int8,
                (_, 2) => Kind::Int16,
                (_, 4) => Kind::Int32,
                _ => Kind::Int64,
            },
            TypeKind::Uint => match (data.name.as_str(), data.size) {
                ("uint", _) => Kind::Uint,
                ("uintptr", _) => Kind::Uintptr,
                (_, 1) => Kind::Uint8,
                (_, 2) => Kind::Uint16,
                (_, 4) => Kind::Uint32,
                _ => Kind::Uint64,
            },
            TypeKind::Float => {
                if data.size == 4 {
                    Kind::Float32
                } else {
                    Kind::Float64
                }
            }
            TypeKind::Complex => {
                if data.size == 8 {
                    Kind::Complex64
                } else {
                    Kind::Complex128
                }
            }
            TypeKind::String => Kind::String,
            TypeKind::UnsafePointer => Kind::UnsafePointer,
            TypeKind::Pointer { pointee, .. } => {
                if matches!(self.get(*pointee).kind, TypeKind::Void) {
                    Kind::UnsafePointer
                } else {
                    Kind::Ptr
                }
            }
            TypeKind::Array { .. } => Kind::Array,
            TypeKind::Slice { .. } => Kind::Slice,
            TypeKind::Struct { .. } => Kind::Struct,
            TypeKind::Map { .. } => Kind::Map,
            TypeKind::Chan { .. } => Kind::Chan,
            TypeKind::Interface { .. } => Kind::Interface,
            TypeKind::Func => Kind::Func,
            TypeKind::Typedef { .. } => Kind::Invalid,
        }
    }

    /// Printed type name. Anonymous types are spelled out structurally.
    pub fn name(&self, idx: Idx) -> String {
        let data = self.get(idx);
        if !data.name.is_empty() {
            return data.name.clone();
        }
        match &data.kind {
            TypeKind::Void => "void".to_string(),
            TypeKind::Pointer { pointee, .. } => format!("*{}", self.name(*pointee)),
            TypeKind::Array { elem, count, .. } => format!("[{count}]{}", self.name(*elem)),
            TypeKind::Slice { elem } => format!("[]{}", self.name(*elem)),
            TypeKind::Map { key, value } => {
                format!("map[{}]{}", self.name(*key), self.name(*value))
            }
            TypeKind::Chan { elem } => format!("chan {}", self.name(*elem)),
            TypeKind::Struct { fields } => {
                let body: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{} {}", f.name, self.name(f.ty)))
                    .collect();
                format!("struct {{ {} }}", body.join("; "))
            }
            TypeKind::Interface { .. } => "interface {}".to_string(),
            TypeKind::Func => "func()".to_string(),
            TypeKind::Typedef { target } => self.name(*target),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::String => "string".to_string(),
            TypeKind::UnsafePointer => "unsafe.Pointer".to_string(),
            TypeKind::Int => format!("int{}", data.size * 8),
            TypeKind::Uint => format!("uint{}", data.size * 8),
            TypeKind::Float => format!("float{}", data.size * 8),
            TypeKind::Complex => format!("complex{}", data.size * 8),
        }
    }

    fn intern(&self, data: TypeData) -> Idx {
        if let Some(idx) = self.lookup(&data.name) {
            if self.get(idx).kind == data.kind {
                return idx;
            }
        }
        self.insert(data)
    }

    /// The pointer type `*T`.
    pub fn pointer_to(&self, pointee: Idx) -> Idx {
        let name = format!("*{}", self.name(pointee));
        self.intern(TypeData::new(
            name,
            self.ptr_size,
            self.ptr_size,
            TypeKind::Pointer {
                pointee,
                c_style: false,
            },
        ))
    }

    /// The slice type `[]T`.
    pub fn slice_of(&self, elem: Idx) -> Idx {
        let name = format!("[]{}", self.name(elem));
        self.intern(TypeData::new(
            name,
            self.ptr_size * 3,
            self.ptr_size,
            TypeKind::Slice { elem },
        ))
    }

    /// The array type `[n]T`.
    pub fn array_of(&self, elem: Idx, count: i64) -> Idx {
        let stride = self.stride_of(elem);
        let name = format!("[{count}]{}", self.name(elem));
        self.intern(TypeData::new(
            name,
            stride * count,
            self.align(elem),
            TypeKind::Array {
                elem,
                count,
                stride,
            },
        ))
    }

    /// A function type spelled `name`, e.g. `func(int) string`. Function
    /// values of this type are not stored anywhere, so the size is 0.
    pub fn func_type(&self, name: &str) -> Idx {
        self.intern(TypeData::new(name, 0, 1, TypeKind::Func))
    }

    /// A fixed-width basic type such as `uint64` or `complex128`.
    ///
    /// `prefix` is one of `int`, `uint`, `float` or `complex`, `bits` the
    /// total width.
    pub fn fixed_basic(&self, prefix: &str, bits: i64) -> Idx {
        let kind = match prefix {
            "int" => TypeKind::Int,
            "uint" => TypeKind::Uint,
            "float" => TypeKind::Float,
            "complex" => TypeKind::Complex,
            _ => TypeKind::Void,
        };
        let size = bits / 8;
        let align = if matches!(kind, TypeKind::Complex) {
            size / 2
        } else {
            size
        };
        self.intern(TypeData::new(format!("{prefix}{bits}"), size, align, kind))
    }

    /// A named basic type (`int`, `uintptr`, `bool`, `string`, ...),
    /// created with target-native sizing if debug info did not provide it.
    pub fn named_basic(&self, name: &str) -> Idx {
        if let Some(idx) = self.lookup(name) {
            return idx;
        }
        let p = self.ptr_size;
        let data = match name {
            "bool" => TypeData::basic(name, TypeKind::Bool, 1),
            "string" => TypeData::new(name, p * 2, p, TypeKind::String),
            "int" => TypeData::basic(name, TypeKind::Int, p),
            "uint" | "uintptr" => TypeData::basic(name, TypeKind::Uint, p),
            "byte" => TypeData::basic(name, TypeKind::Uint, 1),
            "rune" => TypeData::basic(name, TypeKind::Int, 4),
            "unsafe.Pointer" => TypeData::basic(name, TypeKind::UnsafePointer, p),
            "interface {}" => TypeData::new(name, p * 2, p, TypeKind::Interface { empty: true }),
            _ => {
                for prefix in ["complex", "float", "uint", "int"] {
                    if let Some(bits) = name.strip_prefix(prefix).and_then(|b| b.parse().ok()) {
                        return self.fixed_basic(prefix, bits);
                    }
                }
                TypeData::new(name, 0, 1, TypeKind::Void)
            }
        };
        self.insert(data)
    }

    /// Associate a runtime type-descriptor address with a type.
    pub fn register_runtime_type(&self, addr: u64, idx: Idx) {
        self.runtime_types.write().insert(addr, idx);
        self.runtime_addrs.write().entry(idx).or_insert(addr);
    }

    /// Type described by the runtime descriptor at `addr`.
    pub fn runtime_type(&self, addr: u64) -> Option<Idx> {
        self.runtime_types.read().get(&addr).copied()
    }

    /// Runtime descriptor address for a type, following typedefs.
    pub fn runtime_type_addr(&self, idx: Idx) -> Option<u64> {
        let addrs = self.runtime_addrs.read();
        addrs
            .get(&idx)
            .or_else(|| addrs.get(&self.resolve_typedef(idx)))
            .copied()
    }
}

impl std::fmt::Debug for TypeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeTable")
            .field("len", &self.len())
            .field("ptr_size", &self.ptr_size)
            .finish_non_exhaustive()
    }
}
