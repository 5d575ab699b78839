//! Typed target values.
//!
//! A [`Value`] is a view of one runtime object: its address, its declared
//! and resolved types, and, once loaded, its scalar payload and children.
//! Construction never reads more than the fixed header of strings, slices
//! and channels; everything else is read by [`Value::load`] under the
//! bounds of a [`LoadConfig`](crate::LoadConfig).
//!
//! # Shapes
//!
//! | kind | geometry | children when loaded |
//! |---|---|---|
//! | pointer | `len = 1` | the pointee |
//! | string | `base`, `len` (bytes), `stride = 1` | none; payload is `Str` |
//! | slice | `base`, `len`, `cap`, `stride` | the first `max_array_values` elements |
//! | array | `base = addr`, `len = count` | as for slices |
//! | struct | `len = field count` | one per field, named by field |
//! | map | `base` = header, `len` = count | alternating key, value |
//! | interface | | the dynamic value, named `data` |
//! | chan | `base` = channel header | `qcount`, `dataqsiz` |
//!
//! A value with no type is an untyped constant produced by the evaluator;
//! [`Value::nil`] is the literal `nil`.

mod access;
mod compare;
mod load;
mod write;

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests use unwrap to panic on unexpected state")]
mod tests;

use std::fmt;
use std::sync::Arc;

use probe_stack::ensure_sufficient_stack;
use probe_types::{same_type, Idx, Kind, TypeKind, TypeTable};
use rustc_hash::FxHashSet;

pub use compare::compare_op;
pub use load::MapIterator;

use crate::constant::{ConstKind, Constant};
use crate::errors::{
    cannot_convert_constant, is_nil, no_member, not_a_struct, type_conversion, EvalError,
    EvalResult,
};
use crate::flags::ValueFlags;
use crate::memory::{read_int_raw, read_uint_raw, SharedMemory};
use crate::registers::Register;
use crate::target::Target;
use crate::LoadConfig;

/// Address given to values that live in a CPU register.
pub const FAKE_ADDRESS_UNRESOLV: u64 = 0xbeed_0000_0000_0000;

/// Non-finite float payloads, which have no constant representation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FloatSpecial {
    #[default]
    None,
    PosInf,
    NegInf,
    NaN,
}

#[derive(Clone)]
pub struct Value {
    pub name: String,
    pub addr: u64,
    /// Only the address is meaningful; the payload was never requested.
    pub only_addr: bool,
    pub declared_type: Option<Idx>,
    /// `declared_type` with typedefs stripped.
    pub real_type: Option<Idx>,
    pub kind: Kind,
    pub flags: ValueFlags,
    pub value: Option<Constant>,
    pub float_special: FloatSpecial,
    pub children: Vec<Value>,
    pub len: i64,
    pub cap: i64,
    pub base: u64,
    pub stride: i64,
    pub elem_type: Option<Idx>,
    /// Map entries to skip when loading (map reslicing).
    pub map_skip: i64,
    pub loaded: bool,
    pub unreadable: Option<EvalError>,
    pub decl_line: i64,
    /// Closure context of a function value; 0 for plain functions.
    pub closure_addr: u64,
    pub reg: Option<Register>,
    pub mem: SharedMemory,
    pub target: Arc<Target>,
}

impl Value {
    fn blank(name: impl Into<String>, addr: u64, mem: SharedMemory, target: Arc<Target>) -> Self {
        Self {
            name: name.into(),
            addr,
            only_addr: false,
            declared_type: None,
            real_type: None,
            kind: Kind::Invalid,
            flags: ValueFlags::empty(),
            value: None,
            float_special: FloatSpecial::None,
            children: Vec::new(),
            len: 0,
            cap: 0,
            base: 0,
            stride: 0,
            elem_type: None,
            map_skip: 0,
            loaded: false,
            unreadable: None,
            decl_line: 0,
            closure_addr: 0,
            reg: None,
            mem,
            target,
        }
    }

    /// A value of type `ty` at `addr`.
    pub fn new(
        name: impl Into<String>,
        addr: u64,
        ty: Idx,
        mem: SharedMemory,
        target: &Arc<Target>,
    ) -> Self {
        let mut v = Self::blank(name, addr, mem, Arc::clone(target));
        v.set_type(ty);
        v
    }

    /// An untyped constant.
    pub fn constant(c: Constant, mem: SharedMemory, target: &Arc<Target>) -> Self {
        let mut v = Self::blank("", 0, mem, Arc::clone(target));
        v.kind = match c.kind() {
            ConstKind::Bool => Kind::Bool,
            ConstKind::String => Kind::String,
            ConstKind::Int => Kind::Int,
            ConstKind::Float => Kind::Float64,
            ConstKind::Complex => Kind::Complex128,
            ConstKind::Unknown => Kind::Invalid,
        };
        if let Constant::Str(s) = &c {
            v.len = s.len() as i64;
        }
        v.value = Some(c);
        v.flags = ValueFlags::CONSTANT;
        v.loaded = true;
        v
    }

    /// The literal `nil`.
    pub fn nil(mem: SharedMemory, target: &Arc<Target>) -> Self {
        let mut v = Self::blank("nil", 0, Arc::clone(&mem), Arc::clone(target));
        v.kind = Kind::Ptr;
        let mut child = Self::blank("", 0, mem, Arc::clone(target));
        child.only_addr = true;
        v.children = vec![child];
        v.loaded = true;
        v
    }

    /// A CPU register. Registers up to 8 bytes read as `uint64`; wider
    /// ones as a hex string of their bytes.
    pub fn register(
        name: impl Into<String>,
        reg: Register,
        mem: SharedMemory,
        target: &Arc<Target>,
    ) -> Self {
        let mut v = Self::blank(name, FAKE_ADDRESS_UNRESOLV, mem, Arc::clone(target));
        let types = &target.types;
        let wide = reg.size() > 8;
        let ty = types.named_basic(if wide { "string" } else { "uint64" });
        v.declared_type = Some(ty);
        v.real_type = Some(ty);
        v.kind = types.kind(ty);
        if wide {
            v.len = reg.bytes.len() as i64 * 2;
            v.base = FAKE_ADDRESS_UNRESOLV;
            v.stride = 1;
            v.elem_type = Some(types.named_basic("byte"));
        }
        v.flags = ValueFlags::CPU_REGISTER;
        v.reg = Some(reg);
        v
    }

    /// A value of type `ty` sharing this value's memory and target.
    pub fn spawn(&self, name: impl Into<String>, addr: u64, ty: Idx) -> Self {
        Self::new(name, addr, ty, Arc::clone(&self.mem), &self.target)
    }

    /// An untyped constant sharing this value's memory and target.
    pub fn spawn_constant(&self, c: Constant) -> Self {
        Self::constant(c, Arc::clone(&self.mem), &self.target)
    }

    /// Retype the value, recomputing the geometry the type implies.
    pub fn set_type(&mut self, ty: Idx) {
        let target = Arc::clone(&self.target);
        let types = &target.types;
        let real = types.resolve_typedef(ty);
        self.declared_type = Some(ty);
        self.real_type = Some(real);
        self.kind = types.kind(real);
        let ptr_size = types.ptr_size();
        match &types.get(real).kind {
            TypeKind::Pointer { pointee, c_style } => {
                if *c_style && self.kind == Kind::Ptr {
                    self.flags |= ValueFlags::C_PTR;
                    self.elem_type = Some(*pointee);
                    self.stride = types.stride_of(*pointee);
                    if self.addr != 0 {
                        match read_uint_raw(self.mem.as_ref(), self.addr, ptr_size) {
                            Ok(p) => self.base = p,
                            Err(err) => self.unreadable = Some(err.into()),
                        }
                    }
                }
            }
            TypeKind::String => {
                self.stride = 1;
                self.elem_type = Some(types.named_basic("byte"));
                if self.addr != 0 {
                    self.read_string_header(ptr_size);
                }
            }
            TypeKind::Slice { elem } => {
                self.elem_type = Some(*elem);
                self.stride = types.stride_of(*elem);
                if self.addr != 0 {
                    self.read_slice_header(ptr_size);
                }
            }
            TypeKind::Array {
                elem,
                count,
                stride,
            } => {
                self.base = self.addr;
                self.len = *count;
                self.cap = -1;
                self.elem_type = Some(*elem);
                self.stride = *stride;
            }
            TypeKind::Struct { fields } => {
                self.len = fields.len() as i64;
            }
            TypeKind::Chan { .. } | TypeKind::Map { .. } => {
                if self.addr != 0 {
                    match read_uint_raw(self.mem.as_ref(), self.addr, ptr_size) {
                        Ok(p) => self.base = p,
                        Err(err) => self.unreadable = Some(err.into()),
                    }
                }
            }
            _ => {}
        }
    }

    fn read_string_header(&mut self, ptr_size: i64) {
        let mem = self.mem.as_ref();
        let header = read_uint_raw(mem, self.addr, ptr_size)
            .and_then(|base| Ok((base, read_int_raw(mem, self.addr + ptr_size as u64, ptr_size)?)));
        match header {
            Ok((_, len)) if len < 0 => {
                self.unreadable = Some(crate::errors::unreadable("invalid length"));
            }
            Ok((base, len)) => {
                self.base = base;
                self.len = len;
            }
            Err(err) => self.unreadable = Some(err.into()),
        }
    }

    fn read_slice_header(&mut self, ptr_size: i64) {
        let mem = self.mem.as_ref();
        let word = ptr_size as u64;
        let header = read_uint_raw(mem, self.addr, ptr_size).and_then(|base| {
            let len = read_int_raw(mem, self.addr + word, ptr_size)?;
            let cap = read_int_raw(mem, self.addr + 2 * word, ptr_size)?;
            Ok((base, len, cap))
        });
        match header {
            Ok((base, len, cap)) => {
                self.base = base;
                self.len = len;
                self.cap = cap;
            }
            Err(err) => self.unreadable = Some(err.into()),
        }
    }

    #[inline]
    pub fn types(&self) -> &TypeTable {
        &self.target.types
    }

    #[inline]
    pub fn ptr_size(&self) -> i64 {
        self.target.ptr_size()
    }

    /// Whether this is the literal `nil` rather than a typed nil.
    pub fn is_nil_literal(&self) -> bool {
        self.declared_type.is_none() && self.kind == Kind::Ptr && self.addr == 0 && self.name == "nil"
    }

    /// A value fabricated by the evaluator that has neither an address,
    /// a name nor a type.
    pub fn is_fake_placeholder(&self) -> bool {
        self.addr == 0 && self.name.is_empty() && self.declared_type.is_none()
    }

    pub fn type_string(&self) -> String {
        if self.is_nil_literal() {
            return "nil".to_string();
        }
        match self.declared_type {
            Some(ty) => self.types().name(ty),
            None => self.kind.as_str().to_string(),
        }
    }

    /// Name of the resolved type, used as the key of embedded-field walks.
    pub fn real_type_name(&self) -> Option<String> {
        self.real_type.map(|t| self.types().name(t))
    }

    /// Return the error stored by a failed load, if any.
    pub fn check_readable(&self) -> EvalResult<()> {
        match &self.unreadable {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// If this is a pointer, the value it points to; otherwise a copy of
    /// the value itself.
    pub fn maybe_dereference(&self) -> Value {
        if self.unreadable.is_some() {
            return self.clone();
        }
        let Some(real) = self.real_type else {
            return self.clone();
        };
        let TypeKind::Pointer { pointee, .. } = self.types().get(real).kind else {
            return self.clone();
        };
        if self.addr == 0 && self.children.len() == 1 && self.loaded {
            return self.children[0].clone();
        }
        match read_uint_raw(self.mem.as_ref(), self.addr, self.ptr_size()) {
            Ok(ptr) => self.spawn("", ptr, pointee),
            Err(err) => {
                let mut r = self.spawn("", 0, pointee);
                r.unreadable = Some(err.into());
                r
            }
        }
    }

    /// Take the address: a loaded `*T` value with no address of its own
    /// whose only child is `self`.
    #[must_use]
    pub fn pointer_to(mut self) -> Value {
        self.only_addr = true;
        let target = Arc::clone(&self.target);
        let mem = Arc::clone(&self.mem);
        let mut r = Self::blank("", 0, mem, target);
        if let Some(ty) = self.declared_type {
            let ptr_ty = r.types().pointer_to(ty);
            r.declared_type = Some(ptr_ty);
            r.real_type = Some(ptr_ty);
        }
        r.kind = Kind::Ptr;
        r.len = 1;
        r.loaded = true;
        r.children = vec![self];
        r
    }

    /// The member `field` of this struct value.
    pub fn to_field(&self, field: &probe_types::Field) -> EvalResult<Value> {
        if self.unreadable.is_some() {
            return Ok(self.clone());
        }
        if self.addr == 0 {
            return Err(is_nil(&self.name));
        }
        let name = if self.name.is_empty() {
            String::new()
        } else {
            let short = field.name.split('.').nth(1).unwrap_or(&field.name);
            format!("{}.{short}", self.name)
        };
        let addr = self.addr.wrapping_add(field.offset as u64);
        Ok(self.spawn(name, addr, field.ty))
    }

    /// Look up `member` in this value, searching promoted fields of
    /// embedded structs breadth first.
    pub fn struct_member(&mut self, member: &str) -> EvalResult<Value> {
        if self.unreadable.is_some() {
            return Ok(self.clone());
        }
        let vname = self.name.clone();
        if self.loaded && self.flags.contains(ValueFlags::FAKE_ADDRESS) {
            return self
                .children
                .iter()
                .find(|c| c.name == member)
                .cloned()
                .ok_or_else(|| no_member(&vname, member));
        }
        let start = match self.kind {
            Kind::Chan => {
                self.load(&LoadConfig::FULL_VALUE);
                return self
                    .children
                    .iter()
                    .find(|c| c.name == member)
                    .cloned()
                    .ok_or_else(|| no_member(&vname, member));
            }
            Kind::Interface => {
                self.load_interface(0, false, &LoadConfig::FULL_VALUE);
                match self.children.first() {
                    Some(data) => data.clone(),
                    None => self.clone(),
                }
            }
            _ => self.clone(),
        };
        ensure_sufficient_stack(|| Self::search_member(start, &vname, member))
    }

    fn search_member(start: Value, vname: &str, member: &str) -> EvalResult<Value> {
        let mut queue = std::collections::VecDeque::from([start]);
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut first = true;
        while let Some(v) = queue.pop_front() {
            let key = v.real_type_name().unwrap_or_default();
            if !seen.insert(key) {
                continue;
            }
            let mut sv = v.maybe_dereference();
            sv.name.clone_from(&v.name);
            if sv.unreadable.is_some() {
                return Ok(sv);
            }
            let fields = match sv.real_type.map(|t| sv.types().get(t)) {
                Some(data) => match &data.kind {
                    TypeKind::Struct { fields } => Some(fields.clone()),
                    _ => None,
                },
                None => None,
            };
            match fields {
                Some(fields) => {
                    for field in &fields {
                        if field.name == member {
                            return sv.to_field(field);
                        }
                        if !field.embedded {
                            continue;
                        }
                        let mut embedded = sv.to_field(field)?;
                        if field.name.split('.').nth(1) == Some(member) {
                            return Ok(embedded);
                        }
                        embedded.name.clone_from(&sv.name);
                        queue.push_back(embedded);
                    }
                }
                None if first => return Err(not_a_struct(vname, &sv.type_string())),
                None => {}
            }
            first = false;
        }
        Err(no_member(vname, member))
    }

    /// Whether the value is a nil pointer, interface, slice, map, func or
    /// chan.
    pub fn is_nil(&self) -> bool {
        match self.kind {
            Kind::Ptr | Kind::UnsafePointer => match self.children.first() {
                Some(child) => child.addr == 0,
                None => self.maybe_dereference().addr == 0,
            },
            Kind::Interface => self
                .children
                .first()
                .is_some_and(|c| c.addr == 0 && c.kind == Kind::Invalid),
            Kind::Slice | Kind::Map | Kind::Func | Kind::Chan => self.base == 0,
            _ => false,
        }
    }

    /// The value as an index: untyped integer constants, or values of a
    /// signed integer type.
    pub fn as_int(&mut self) -> EvalResult<i64> {
        self.integer_payload("int", Kind::is_signed)?;
        Ok(crate::constant::int64_val(self.value.as_ref().unwrap_or(&Constant::Unknown)).0)
    }

    /// Like [`as_int`](Self::as_int), for unsigned integer types.
    pub fn as_uint(&mut self) -> EvalResult<u64> {
        self.integer_payload("uint", Kind::is_unsigned)?;
        Ok(crate::constant::uint64_val(self.value.as_ref().unwrap_or(&Constant::Unknown)).0)
    }

    fn integer_payload(&mut self, dst: &str, accept: fn(Kind) -> bool) -> EvalResult<()> {
        match self.declared_type {
            None => {
                let c = self.value.clone().unwrap_or_default();
                if c.kind() != ConstKind::Int {
                    return Err(EvalError::new(format!("can not convert constant {c} to {dst}")));
                }
            }
            Some(ty) => {
                self.load(&LoadConfig::SINGLE_VALUE);
                self.check_readable()?;
                if !accept(self.types().kind(ty)) {
                    return Err(type_conversion(&self.types().name(ty), dst));
                }
            }
        }
        Ok(())
    }

    /// Check that this value can be used where a value of type `ty` (of
    /// kind `kind`) is expected.
    pub fn is_type(&self, ty: Option<Idx>, kind: Kind) -> EvalResult<()> {
        let types = self.types();
        if let Some(own) = self.declared_type {
            return match ty {
                Some(ty) if same_type(types, ty, own) => Ok(()),
                Some(ty) => Err(type_conversion(&types.name(own), &types.name(ty))),
                None => Err(type_conversion(&types.name(own), "nil")),
            };
        }
        let type_name = ty.map_or_else(|| kind.as_str().to_string(), |t| types.name(t));
        if self.is_nil_literal() {
            if kind.is_nilable() {
                return Ok(());
            }
            return Err(EvalError::new(format!("mismatched types nil and {type_name}")));
        }
        let Some(c) = &self.value else {
            return Err(cannot_convert_constant("unknown", &type_name));
        };
        let Some(ty) = ty else {
            return Err(cannot_convert_constant(&c.to_string(), &type_name));
        };
        let ck = c.kind();
        let fits = match types.get(types.resolve_typedef(ty)).kind {
            TypeKind::Int | TypeKind::Uint => ck == ConstKind::Int,
            TypeKind::Float => matches!(ck, ConstKind::Int | ConstKind::Float),
            TypeKind::Bool => ck == ConstKind::Bool,
            TypeKind::String => ck == ConstKind::String,
            TypeKind::Complex => {
                matches!(ck, ConstKind::Complex | ConstKind::Float | ConstKind::Int)
            }
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(cannot_convert_constant(&c.to_string(), &type_name))
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("name", &self.name)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("type", &self.type_string())
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("value", &self.value)
            .field("len", &self.len)
            .field("cap", &self.cap)
            .field("base", &format_args!("{:#x}", self.base))
            .field("children", &self.children)
            .field("loaded", &self.loaded)
            .field("unreadable", &self.unreadable)
            .finish_non_exhaustive()
    }
}
