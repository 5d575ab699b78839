//! Element access: indexing, map lookup, reslicing and register views.

use std::sync::Arc;

use probe_types::{Kind, TypeKind};

use super::{compare_op, Value, FAKE_ADDRESS_UNRESOLV};
use crate::config::LoadConfig;
use crate::constant::{make_float64, make_int64, make_uint64, string_val, BinaryOp, Constant};
use crate::errors::{index_out_of_bounds, key_not_found, unreadable, EvalError, EvalResult};
use crate::flags::ValueFlags;

impl Value {
    /// Address of element `idx`. Wraps like target pointer arithmetic, so
    /// a C pointer indexed far out lands on an unreadable address instead
    /// of overflowing.
    pub(super) fn elem_addr(&self, idx: i64) -> u64 {
        self.base
            .wrapping_add((idx as u64).wrapping_mul(self.stride as u64))
    }

    /// Element `idx` of a string, array, slice or C pointer.
    pub fn slice_access(&self, idx: i64) -> EvalResult<Value> {
        let c_ptr = self.flags.contains(ValueFlags::C_PTR);
        let wrong = if c_ptr { idx < 0 } else { idx < 0 || idx >= self.len };
        if wrong {
            return Err(index_out_of_bounds());
        }
        let elem = self
            .elem_type
            .ok_or_else(|| EvalError::new(format!("{} has no element type", self.type_string())))?;
        let addr = self.elem_addr(idx);
        if self.loaded && !c_ptr {
            if self.kind == Kind::String {
                let bytes = self.value.as_ref().map(string_val).unwrap_or_default();
                let Some(&b) = bytes.get(idx as usize) else {
                    return Err(index_out_of_bounds());
                };
                let mut r = self.spawn("", addr, elem);
                r.loaded = true;
                r.value = Some(make_int64(i64::from(b)));
                return Ok(r);
            }
            return self
                .children
                .get(idx as usize)
                .cloned()
                .ok_or_else(index_out_of_bounds);
        }
        Ok(self.spawn("", addr, elem))
    }

    /// The value stored under `idx`. A missing key is an error, never a
    /// zero value.
    pub fn map_access(&mut self, idx: &mut Value) -> EvalResult<Value> {
        let Some(it) = self.map_iterator(0) else {
            let reason = self
                .unreadable
                .as_ref()
                .map_or_else(|| "not a map".to_string(), ToString::to_string);
            return Err(EvalError::new(format!("can not access unreadable map: {reason}")));
        };
        let mut cfg = LoadConfig::FULL_VALUE;
        if idx.kind == Kind::String {
            let loaded_len = idx.value.as_ref().map_or(0, |c| string_val(c).len()) as i64;
            if loaded_len == idx.len && idx.len > cfg.max_string_len {
                cfg.max_string_len = idx.len;
            }
        }
        let mut first = true;
        for (mut key, value) in it {
            key.load(&cfg);
            if let Some(err) = &key.unreadable {
                return Err(EvalError::new(format!("can not access unreadable map: {err}")));
            }
            if first {
                first = false;
                idx.is_type(key.real_type, key.kind)?;
            }
            if compare_op(BinaryOp::Eq, &mut key, idx)? {
                return Ok(value);
            }
        }
        self.check_readable()?;
        Err(key_not_found())
    }

    /// The sub-sequence `[low, high)` as a slice sharing this value's
    /// memory.
    pub fn reslice(&self, low: i64, mut high: i64) -> EvalResult<Value> {
        let mut needs_fake_slice = false;
        let wrong = if self.flags.contains(ValueFlags::C_PTR) {
            if high == 0 {
                high = low;
            }
            needs_fake_slice = self.kind != Kind::String;
            low < 0 || high < 0
        } else {
            let bound = if self.kind == Kind::Slice { self.cap } else { self.len };
            low < 0 || low > bound || high < 0 || high > bound
        };
        if wrong || high < low {
            return Err(index_out_of_bounds());
        }
        let is_array = self
            .real_type
            .is_some_and(|t| matches!(self.types().get(t).kind, TypeKind::Array { .. }));
        let ty = if is_array || needs_fake_slice {
            let elem = self
                .elem_type
                .ok_or_else(|| EvalError::new(format!("{} has no element type", self.type_string())))?;
            Some(self.types().slice_of(elem))
        } else {
            self.declared_type
        };
        let Some(ty) = ty else {
            return Err(crate::errors::cannot_slice(&self.name, Some(&self.type_string())));
        };
        let mut r = self.spawn("", 0, ty);
        r.len = high - low;
        r.cap = high - low;
        r.base = self.elem_addr(low);
        r.stride = self.stride;
        r.elem_type = self.elem_type;
        r.flags = self.flags;
        r.reg.clone_from(&self.reg);
        Ok(r)
    }

    /// Reinterpret a CPU register as an array of lanes of type `view`:
    /// `int8` .. `uint64`, `float32`, `float64`, or a vector spelling such
    /// as `int8x16` or `uint32x4`.
    pub fn register_type_conv(&self, view: &str) -> EvalResult<Value> {
        let lane = view.split_once('x').map_or(view, |(lane, _)| lane);
        let (size, decode): (usize, fn(&[u8]) -> Constant) = match lane {
            "int8" => (1, |b| make_int64(i64::from(b[0] as i8))),
            "int16" => (2, |b| make_int64(i64::from(i16::from_le_bytes([b[0], b[1]])))),
            "int32" => (4, |b| make_int64(i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))),
            "int64" => (8, |b| make_int64(i64::from_le_bytes(le8(b)))),
            "uint8" => (1, |b| make_uint64(u64::from(b[0]))),
            "uint16" => (2, |b| make_uint64(u64::from(u16::from_le_bytes([b[0], b[1]])))),
            "uint32" => (4, |b| make_uint64(u64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))),
            "uint64" => (8, |b| make_uint64(u64::from_le_bytes(le8(b)))),
            "float32" => (4, |b| {
                make_float64(f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            }),
            "float64" => (8, |b| make_float64(f64::from_le_bytes(le8(b)))),
            _ => {
                return Err(EvalError::new(format!(
                    "unknown CPU register type conversion to {view:?}"
                )))
            }
        };
        let Some(reg) = &self.reg else {
            return Err(unreadable(format!("{} is not a register", self.name)));
        };
        let mut bytes = reg.bytes.to_vec();
        if bytes.len() < 8 {
            bytes.resize(8, 0);
        }
        let types = self.types();
        let elem = types.named_basic(lane);
        let mut children = Vec::with_capacity(bytes.len() / size);
        for chunk in bytes.chunks_exact(size) {
            let mut child = self.spawn_constant(decode(chunk));
            child.name = format!("{view}[{}]", children.len());
            child.addr = FAKE_ADDRESS_UNRESOLV;
            child.flags = ValueFlags::CPU_REGISTER;
            children.push(child);
        }
        let array = types.array_of(elem, children.len() as i64);
        let mut r = Value::blank(
            self.name.clone(),
            FAKE_ADDRESS_UNRESOLV,
            Arc::clone(&self.mem),
            Arc::clone(&self.target),
        );
        r.set_type(array);
        r.base = FAKE_ADDRESS_UNRESOLV;
        r.len = children.len() as i64;
        r.children = children;
        r.flags = ValueFlags::CPU_REGISTER;
        r.reg = Some(reg.clone());
        r.loaded = true;
        Ok(r)
    }
}

fn le8(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&b[..8]);
    out
}
