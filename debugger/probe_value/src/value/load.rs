//! Materializing values from target memory.

use std::sync::Arc;

use probe_stack::ensure_sufficient_stack;
use probe_types::{Idx, Kind, TypeKind};

use super::{FloatSpecial, Value};
use crate::config::LoadConfig;
use crate::constant::{make_bool, make_complex, make_float64, make_int64, make_string, make_uint64};
use crate::errors::{unreadable, EvalResult};
use crate::flags::ValueFlags;
use crate::map::{MapCursor, MapShape};
use crate::memory::{cache_memory, read_exact, read_int_raw, read_uint_raw, SharedMemory};
use crate::target::Target;

/// Element loads that may fail before an array load gives up.
const MAX_ERR_COUNT: usize = 3;

/// Arrays with a wider stride are read element by element.
const MAX_ARRAY_STRIDE_PREFETCH: i64 = 1024;

impl Value {
    /// Read the payload and, within the bounds of `cfg`, the children.
    ///
    /// Failures are recorded in [`unreadable`](Value::unreadable) rather
    /// than returned, so a partially readable aggregate still shows its
    /// readable parts.
    pub fn load(&mut self, cfg: &LoadConfig) {
        self.load_internal(0, cfg);
    }

    pub(crate) fn load_internal(&mut self, recurse: i32, cfg: &LoadConfig) {
        ensure_sufficient_stack(|| self.load_value(recurse, cfg));
    }

    fn load_value(&mut self, recurse: i32, cfg: &LoadConfig) {
        if self.unreadable.is_some() || self.loaded || (self.addr == 0 && self.base == 0) {
            return;
        }
        self.loaded = true;
        match self.kind {
            Kind::Ptr | Kind::UnsafePointer => {
                self.len = 1;
                self.children = vec![self.maybe_dereference()];
                if cfg.follow_pointers && self.kind == Kind::Ptr {
                    let child = &mut self.children[0];
                    // pointers do not count against the recursion limit,
                    // except through interfaces, which can form cycles
                    let level = if child.kind == Kind::Interface {
                        recurse + 1
                    } else {
                        recurse
                    };
                    child.load_internal(level, cfg);
                } else {
                    self.children[0].only_addr = true;
                }
            }
            Kind::Chan => self.load_chan(recurse, cfg),
            Kind::Map => {
                if recurse <= cfg.max_variable_recurse {
                    self.load_map(recurse, cfg);
                } else {
                    // the length tells the reader the map is not empty
                    let _ = self.map_iterator(0);
                }
            }
            Kind::String => self.load_string(cfg),
            Kind::Slice | Kind::Array => self.load_array_values(recurse, cfg),
            Kind::Struct => self.load_struct(recurse, cfg),
            Kind::Interface => self.load_interface(recurse, true, cfg),
            Kind::Complex64 | Kind::Complex128 => self.load_complex(),
            k if k.is_signed() => match read_int_raw(self.mem.as_ref(), self.addr, self.byte_size()) {
                Ok(n) => self.value = Some(make_int64(n)),
                Err(err) => self.unreadable = Some(err.into()),
            },
            k if k.is_unsigned() => {
                if self.flags.contains(ValueFlags::CPU_REGISTER) {
                    let n = self.reg.as_ref().map_or(0, |r| r.value);
                    self.value = Some(make_uint64(n));
                } else {
                    match read_uint_raw(self.mem.as_ref(), self.addr, self.byte_size()) {
                        Ok(n) => self.value = Some(make_uint64(n)),
                        Err(err) => self.unreadable = Some(err.into()),
                    }
                }
            }
            Kind::Bool => match read_uint_raw(self.mem.as_ref(), self.addr, 1) {
                Ok(b) => self.value = Some(make_bool(b != 0)),
                Err(err) => self.unreadable = Some(err.into()),
            },
            Kind::Float32 | Kind::Float64 => match self.read_float(self.addr, self.byte_size()) {
                Ok(f) => {
                    self.float_special = float_special(f);
                    self.value = Some(make_float64(f));
                }
                Err(err) => self.unreadable = Some(err),
            },
            Kind::Func => self.load_func(),
            kind => {
                self.unreadable = Some(unreadable(format!("unknown or unsupported kind: {:?}", kind.as_str())));
            }
        }
    }

    fn byte_size(&self) -> i64 {
        self.real_type.map_or(0, |t| self.types().size(t))
    }

    fn read_float(&self, addr: u64, size: i64) -> EvalResult<f64> {
        match size {
            4 => {
                let bits = read_uint_raw(self.mem.as_ref(), addr, 4)?;
                Ok(f64::from(f32::from_bits(bits as u32)))
            }
            8 => Ok(f64::from_bits(read_uint_raw(self.mem.as_ref(), addr, 8)?)),
            _ => Err(unreadable(format!("invalid size: {size}"))),
        }
    }

    fn load_complex(&mut self) {
        let half = self.byte_size() / 2;
        let parts = self
            .read_float(self.addr, half)
            .and_then(|re| Ok((re, self.read_float(self.addr + half as u64, half)?)));
        match parts {
            Ok((re, im)) => self.value = Some(make_complex(re, im)),
            Err(err) => self.unreadable = Some(err),
        }
    }

    fn load_string(&mut self, cfg: &LoadConfig) {
        if self.flags.contains(ValueFlags::CPU_REGISTER) {
            let bytes = self.reg.as_ref().map(|r| r.bytes.to_vec()).unwrap_or_default();
            self.value = Some(make_string(hex_bytes(&bytes)));
            return;
        }
        let count = self.len.min(cfg.max_string_len).max(0) as usize;
        if count == 0 {
            self.value = Some(make_string(Vec::new()));
            return;
        }
        let mut buf = vec![0u8; count];
        match read_exact(self.mem.as_ref(), self.base, &mut buf) {
            Ok(()) => self.value = Some(make_string(buf)),
            Err(err) => self.unreadable = Some(err.into()),
        }
    }

    fn load_array_values(&mut self, recurse: i32, cfg: &LoadConfig) {
        if self.len < 0 {
            self.unreadable = Some(unreadable("Negative array length"));
            return;
        }
        if self.base == 0 && self.len > 0 {
            self.unreadable = Some(unreadable("non-zero length array with nil base"));
            return;
        }
        let Some(elem) = self.elem_type else {
            return;
        };
        let count = self.len.min(cfg.max_array_values).max(0);
        if self.stride < MAX_ARRAY_STRIDE_PREFETCH {
            self.mem = cache_memory(Arc::clone(&self.mem), self.base, (self.stride * count) as u64);
        }
        let mut errors = 0;
        for i in 0..count {
            let addr = self.elem_addr(i);
            let mut child = self.spawn("", addr, elem);
            child.load_internal(recurse + 1, cfg);
            if child.unreadable.is_some() {
                errors += 1;
            }
            self.children.push(child);
            if errors > MAX_ERR_COUNT {
                break;
            }
        }
    }

    fn load_struct(&mut self, recurse: i32, cfg: &LoadConfig) {
        let Some(real) = self.real_type else {
            return;
        };
        self.mem = cache_memory(Arc::clone(&self.mem), self.addr, self.types().size(real) as u64);
        let fields = self.types().fields(real);
        self.len = fields.len() as i64;
        if recurse > cfg.max_variable_recurse {
            return;
        }
        self.children = Vec::with_capacity(fields.len());
        for field in &fields {
            if cfg.max_struct_fields >= 0 && self.children.len() >= cfg.max_struct_fields as usize {
                break;
            }
            let mut child = match self.to_field(field) {
                Ok(child) => child,
                Err(err) => {
                    self.unreadable = Some(err);
                    return;
                }
            };
            child.name.clone_from(&field.name);
            child.load_internal(recurse + 1, cfg);
            self.children.push(child);
        }
    }

    fn load_chan(&mut self, recurse: i32, cfg: &LoadConfig) {
        if self.base == 0 {
            return;
        }
        let uint = self.types().named_basic("uint");
        let word = self.ptr_size() as u64;
        let mut qcount = self.spawn("qcount", self.base, uint);
        let mut dataqsiz = self.spawn("dataqsiz", self.base + word, uint);
        qcount.load_internal(recurse + 1, cfg);
        dataqsiz.load_internal(recurse + 1, cfg);
        if let Some(err) = qcount.unreadable.clone().or_else(|| dataqsiz.unreadable.clone()) {
            self.unreadable = Some(err);
        }
        self.children = vec![qcount, dataqsiz];
    }

    fn load_func(&mut self) {
        let ptr_size = self.ptr_size();
        let closure = match read_uint_raw(self.mem.as_ref(), self.addr, ptr_size) {
            Ok(c) => c,
            Err(err) => {
                self.unreadable = Some(err.into());
                return;
            }
        };
        self.closure_addr = closure;
        if closure == 0 {
            self.base = 0;
            self.value = Some(make_string(""));
            return;
        }
        match read_uint_raw(self.mem.as_ref(), closure, ptr_size) {
            Ok(entry) => {
                self.base = entry;
                match self.target.function_at(entry) {
                    Some(name) => self.value = Some(make_string(name)),
                    None => {
                        self.unreadable = Some(unreadable(format!("could not find function for {entry:#x}")));
                    }
                }
            }
            Err(err) => self.unreadable = Some(err.into()),
        }
    }

    /// Read the dynamic type and data word of an interface.
    ///
    /// The first word is the type descriptor (empty interfaces) or the
    /// itab, whose second word is the type descriptor. Pointer-shaped
    /// dynamic types are stored directly in the data word; anything else
    /// is stored behind it.
    pub fn load_interface(&mut self, recurse: i32, load_data: bool, cfg: &LoadConfig) {
        if self.unreadable.is_some() {
            return;
        }
        if let Some(data) = self.children.first_mut() {
            if load_data && recurse <= cfg.max_variable_recurse {
                data.only_addr = false;
                data.load_internal(recurse, cfg);
            }
            return;
        }
        let Some(real) = self.real_type else {
            return;
        };
        let empty = matches!(self.types().get(real).kind, TypeKind::Interface { empty: true });
        let ptr_size = self.ptr_size();
        let word = ptr_size as u64;
        let mem = Arc::clone(&self.mem);
        let header = read_uint_raw(mem.as_ref(), self.addr, ptr_size).and_then(|tab| {
            let type_addr = if empty || tab == 0 {
                tab
            } else {
                read_uint_raw(mem.as_ref(), tab + word, ptr_size)?
            };
            Ok((type_addr, read_uint_raw(mem.as_ref(), self.addr + word, ptr_size)?))
        });
        let (type_addr, data) = match header {
            Ok(h) => h,
            Err(err) => {
                self.unreadable = Some(err.into());
                return;
            }
        };
        if type_addr == 0 {
            let mut nil = Value::blank("data", 0, mem, Arc::clone(&self.target));
            nil.loaded = true;
            self.children = vec![nil];
            return;
        }
        let Some(dyn_ty) = self.types().runtime_type(type_addr) else {
            self.unreadable = Some(unreadable(format!(
                "invalid interface type: no type for runtime type {type_addr:#x}"
            )));
            return;
        };
        let direct = self.types().kind(dyn_ty).is_pointer_shaped();
        let addr = if direct { self.addr + word } else { data };
        let mut child = self.spawn("data", addr, dyn_ty);
        if load_data && recurse <= cfg.max_variable_recurse {
            child.load_internal(recurse, cfg);
        } else {
            child.only_addr = true;
        }
        self.children = vec![child];
    }

    /// Start iterating the entries of a map, reading its length into
    /// `len` and its header address into `base`. Returns `None` and sets
    /// the error slot when the map header cannot be read.
    pub fn map_iterator(&mut self, max_entries: i64) -> Option<MapIterator> {
        let Some(real) = self.real_type else {
            return None;
        };
        let TypeKind::Map { key, value } = self.types().get(real).kind else {
            return None;
        };
        if self.unreadable.is_some() {
            return None;
        }
        let types = self.types();
        let shape = MapShape {
            key_size: types.size(key),
            key_align: types.align(key),
            value_size: types.size(value),
            value_align: types.align(value),
            ptr_size: types.ptr_size(),
        };
        let cursor = if self.base == 0 {
            None
        } else {
            match self.target.map_layout().open(self.mem.as_ref(), self.base, shape) {
                Ok(c) => Some(c),
                Err(err) => {
                    self.unreadable = Some(err);
                    return None;
                }
            }
        };
        self.len = cursor.as_ref().map_or(0, |c| c.count());
        Some(MapIterator {
            cursor,
            key,
            value,
            mem: Arc::clone(&self.mem),
            target: Arc::clone(&self.target),
            max_entries,
            visited: 0,
        })
    }

    fn load_map(&mut self, recurse: i32, cfg: &LoadConfig) {
        let Some(mut it) = self.map_iterator(cfg.max_map_buckets) else {
            return;
        };
        if self.len == 0 || self.map_skip >= self.len || cfg.max_array_values == 0 {
            return;
        }
        for _ in 0..self.map_skip {
            if it.next().is_none() {
                self.unreadable = Some(crate::errors::map_index_out_of_bounds());
                return;
            }
        }
        let mut count = 0;
        let mut errors = 0;
        while let Some((mut key, mut val)) = it.next() {
            key.load_internal(recurse + 1, cfg);
            val.load_internal(recurse + 1, cfg);
            if key.unreadable.is_some() || val.unreadable.is_some() {
                errors += 1;
            }
            self.children.push(key);
            self.children.push(val);
            count += 1;
            if errors > MAX_ERR_COUNT || count >= cfg.max_array_values || count >= self.len {
                break;
            }
        }
    }

    /// Reload a paged view of a sequence or map starting at `start`.
    pub fn load_resliced(&self, start: i64, cfg: &LoadConfig) -> EvalResult<Value> {
        let mut r = match self.kind {
            Kind::Array | Kind::Slice => {
                let high = (start + cfg.max_array_values).min(self.len);
                self.reslice(start, high)?
            }
            Kind::Map => {
                let mut r = self.clone();
                r.children.clear();
                r.loaded = false;
                r.map_skip = start;
                r
            }
            _ => {
                return Err(crate::errors::EvalError::new(
                    "variable to reslice is not an array, slice, or map",
                ))
            }
        };
        r.load(cfg);
        Ok(r)
    }
}

/// Entries of one map, produced as (key, value) pairs of unloaded values.
pub struct MapIterator {
    cursor: Option<Box<dyn MapCursor>>,
    key: Idx,
    value: Idx,
    mem: SharedMemory,
    target: Arc<Target>,
    /// 0 means unbounded.
    max_entries: i64,
    visited: i64,
}

impl MapIterator {
    pub fn count(&self) -> i64 {
        self.cursor.as_ref().map_or(0, |c| c.count())
    }
}

impl Iterator for MapIterator {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.max_entries > 0 && self.visited >= self.max_entries {
            return None;
        }
        let (k, v) = self.cursor.as_mut()?.next_entry()?;
        self.visited += 1;
        let key = Value::new("", k, self.key, Arc::clone(&self.mem), &self.target);
        let value = Value::new("", v, self.value, Arc::clone(&self.mem), &self.target);
        Some((key, value))
    }
}

fn float_special(f: f64) -> FloatSpecial {
    if f.is_nan() {
        FloatSpecial::NaN
    } else if f == f64::INFINITY {
        FloatSpecial::PosInf
    } else if f == f64::NEG_INFINITY {
        FloatSpecial::NegInf
    } else {
        FloatSpecial::None
    }
}

/// `0x` followed by the bytes in memory order.
fn hex_bytes(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}
