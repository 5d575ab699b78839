//! Name resolution: locals of a frame and package-level symbols.

use std::sync::Arc;

use probe_types::{align_addr, Kind};
use probe_value::constant::{make_int64, make_string, make_uint64};
use probe_value::errors::{symbol_not_found, unreadable};
use probe_value::memory::read_uint_raw;
use probe_value::{
    EvalError, EvalResult, FakeMemory, LoadConfig, LocalsFlags, Value, ValueFlags,
    FAKE_ADDRESS_UNRESOLV,
};
use rustc_hash::FxHashMap;
use tracing::{error, warn};

use crate::collab::{Function, LexicalEntry, VarLocation, VisibilityFlags};
use crate::scope::EvalScope;

/// Lexical entry holding the generics dictionary of a frame.
const DICT_NAME: &str = ".dict";

/// First toolchain minor version whose argument order can be trusted at
/// function entry.
const TRUST_ARG_ORDER_MINOR: u32 = 12;

/// First toolchain minor version that records reliable declaration lines.
const TRUST_DECL_LINE_MINOR: u32 = 15;

/// First toolchain minor version that tells parameters and results apart.
const METHOD_TYPE_MINOR: u32 = 10;

/// Whether the symbol `full` is `name`, or `name` qualified by a longer
/// import path (`example.com/x/pkg.V` matches `pkg.V`).
pub(crate) fn symbol_matches(full: &str, name: &str) -> bool {
    full == name
        || full
            .strip_suffix(name)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Whether the toolchain named in a producer string (`go1.21.4`, or
/// `Go cmd/compile go1.15; regabi`) is at least `major.minor`.
/// Development toolchains count as newer than every release.
pub(crate) fn producer_after_or_equal(producer: &str, major: u32, minor: u32) -> bool {
    if producer.contains("devel") {
        return true;
    }
    let version = producer.match_indices("go").find_map(|(i, _)| {
        let rest = &producer[i + 2..];
        rest.starts_with(|c: char| c.is_ascii_digit()).then_some(rest)
    });
    let Some(version) = version else {
        return false;
    };
    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    let Some(Ok(maj)) = parts.next().map(str::parse::<u32>) else {
        return false;
    };
    let min = parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
    (maj, min) >= (major, minor)
}

pub(crate) fn visibility_flags(producer: &str, no_decl_line_check: bool) -> VisibilityFlags {
    let mut flags = if no_decl_line_check {
        VisibilityFlags::NO_DECL_LINE_CHECK
    } else {
        VisibilityFlags::ONLY_VISIBLE
    };
    if producer_after_or_equal(producer, 1, TRUST_DECL_LINE_MINOR) {
        flags |= VisibilityFlags::TRUST_DECL_LINE;
    }
    flags
}

impl EvalScope {
    /// Every variable visible in the frame: arguments, results and locals,
    /// ordered by lexical depth and declaration line. A variable hidden by
    /// a later one of the same name is flagged [`ValueFlags::SHADOWED`].
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn locals(&self, flags: LocalsFlags) -> EvalResult<Vec<Value>> {
        let Some(function) = &self.function else {
            return Err(EvalError::new("unable to find function context"));
        };
        let di = self.debug_info();
        let producer = di.producer();
        let trust_arg_order = flags.contains(LocalsFlags::TRUST_ARG_ORDER)
            && producer_after_or_equal(producer, 1, TRUST_ARG_ORDER_MINOR)
            && self.pc == function.entry;
        let vflags = visibility_flags(producer, flags.contains(LocalsFlags::NO_DECL_LINE_CHECK));
        let entries = di.variables(function, self.pc, self.line, vflags)?;

        let dict_addr = *self.dict_addr.get_or_init(|| self.read_dict_addr(&entries));

        let mut vars: Vec<(i32, Value)> = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.name == DICT_NAME {
                continue;
            }
            let mut v = match self.entry_to_value(entry, dict_addr) {
                Ok(v) => v,
                Err(err) => {
                    warn!(name = %entry.name, %err, "skipping variable");
                    continue;
                }
            };
            let no_location = (v.unreadable.is_some() && v.addr == 0)
                || v.flags.contains(ValueFlags::FAKE_ADDRESS);
            if trust_arg_order && entry.is_param && no_location {
                if let Some(ty) = v.declared_type {
                    let mut addr = after_last_arg_addr(&vars);
                    if addr == 0 {
                        addr = self.regs.cfa as u64;
                    }
                    let addr = align_addr(addr as i64, self.types().align(ty)) as u64;
                    let decl_line = v.decl_line;
                    v = self.value(v.name.clone(), addr, ty);
                    v.decl_line = decl_line;
                }
            }
            let mut depth = entry.depth;
            if entry.is_param {
                if depth <= 1 {
                    depth = 0;
                }
                v.flags |= if entry.is_return {
                    ValueFlags::RETURN_ARGUMENT
                } else {
                    ValueFlags::ARGUMENT
                };
            }
            vars.push((depth, v));
        }

        vars.sort_by_key(|(depth, v)| (*depth, v.decl_line));

        let mut last_seen: FxHashMap<String, usize> = FxHashMap::default();
        let mut out: Vec<Value> = Vec::with_capacity(vars.len());
        for (_, mut v) in vars {
            if let Some(name) = v.name.strip_prefix('&').filter(|n| !n.is_empty()) {
                let name = name.to_string();
                let decl_line = v.decl_line;
                let mut heap = v.maybe_dereference();
                if heap.addr == 0 && heap.unreadable.is_none() {
                    heap.unreadable = Some(unreadable("no address for escaped variable"));
                }
                heap.name = name;
                heap.flags |= ValueFlags::ESCAPED;
                heap.decl_line = decl_line;
                v = heap;
            }
            if let Some(&prev) = last_seen.get(&v.name) {
                out[prev].flags |= ValueFlags::SHADOWED;
            }
            last_seen.insert(v.name.clone(), out.len());
            out.push(v);
        }
        Ok(out)
    }

    fn read_dict_addr(&self, entries: &[LexicalEntry]) -> u64 {
        let Some(entry) = entries.iter().find(|e| e.name == DICT_NAME) else {
            return 0;
        };
        let v = match self.entry_to_value(entry, 0) {
            Ok(v) => v,
            Err(err) => {
                error!(%err, "could not load {DICT_NAME} variable");
                return 0;
            }
        };
        if let Some(err) = &v.unreadable {
            error!(%err, "could not load {DICT_NAME} variable");
            return 0;
        }
        match read_uint_raw(v.mem.as_ref(), v.addr, self.ptr_size()) {
            Ok(addr) => addr,
            Err(err) => {
                error!(%err, "could not load {DICT_NAME} variable");
                0
            }
        }
    }

    /// Turn a lexical entry into a value located in this frame.
    fn entry_to_value(&self, entry: &LexicalEntry, dict_addr: u64) -> EvalResult<Value> {
        let ty = self
            .debug_info()
            .instantiate(entry.ty, dict_addr, self.mem.as_ref())?;
        let name = entry.name.clone();
        let mut v = match entry.location {
            VarLocation::Cfa(off) => self.value(name, (self.regs.cfa + off) as u64, ty),
            VarLocation::FrameBase(off) => self.value(name, (self.regs.frame_base + off) as u64, ty),
            VarLocation::Addr(addr) => self.value(name, addr, ty),
            VarLocation::Register(regnum) => match self.regs.reg(regnum) {
                Some(reg) => {
                    // registers are exposed through a synthetic region so
                    // the value reads like any memory-backed one
                    let size = self.types().size(ty).max(0) as usize;
                    let mut bytes = reg.bytes.to_vec();
                    bytes.resize(size.max(bytes.len()), 0);
                    let fake = FakeMemory::with_fallback(Arc::clone(&self.mem));
                    fake.map(FAKE_ADDRESS_UNRESOLV, bytes);
                    let mut v = Value::new(name, FAKE_ADDRESS_UNRESOLV, ty, Arc::new(fake), self.target());
                    v.flags |= ValueFlags::FAKE_ADDRESS;
                    v
                }
                None => {
                    let mut v = self.value(name, 0, ty);
                    v.unreadable = Some(unreadable(format!("could not read register {regnum}")));
                    v
                }
            },
            VarLocation::OptimizedOut => {
                let mut v = self.value(name, 0, ty);
                v.unreadable = Some(unreadable("optimized out"));
                v
            }
        };
        v.decl_line = entry.decl_line;
        Ok(v)
    }

    /// Locals that are neither arguments nor results, loaded with `cfg`.
    pub fn local_variables(&self, cfg: &LoadConfig) -> EvalResult<Vec<Value>> {
        self.filtered_locals(cfg, false)
    }

    /// Arguments and results, loaded with `cfg`.
    pub fn function_arguments(&self, cfg: &LoadConfig) -> EvalResult<Vec<Value>> {
        self.filtered_locals(cfg, true)
    }

    fn filtered_locals(&self, cfg: &LoadConfig, arguments: bool) -> EvalResult<Vec<Value>> {
        let mut vars = self.locals(LocalsFlags::empty())?;
        let arg_flags = ValueFlags::ARGUMENT | ValueFlags::RETURN_ARGUMENT;
        vars.retain(|v| v.flags.intersects(arg_flags) == arguments);
        let cfg = cfg.with_map_buckets();
        for v in &mut vars {
            v.load(&cfg);
        }
        Ok(vars)
    }

    /// Every package variable, ordered by image and debug-info offset.
    /// Variables whose type is unknown are left out.
    pub fn package_variables(&self, cfg: &LoadConfig) -> EvalResult<Vec<Value>> {
        let di = self.debug_info();
        let mut pkg_vars: Vec<_> = di.package_vars().iter().collect();
        pkg_vars.sort_by_key(|v| (v.image, v.offset));
        let mut out = Vec::with_capacity(pkg_vars.len());
        for pv in pkg_vars {
            let mut v = self.value(pv.name.clone(), pv.addr, pv.ty);
            if v.kind == Kind::Invalid {
                continue;
            }
            v.load(cfg);
            out.push(v);
        }
        Ok(out)
    }

    /// Resolve `pkg.name` to a package variable, a function or a named
    /// constant, trying every import path `pkg` may stand for before `pkg`
    /// itself.
    pub fn find_global(&self, pkg: &str, name: &str) -> EvalResult<Value> {
        for path in self.debug_info().package_map(pkg) {
            if let Some(v) = self.find_global_internal(&format!("{path}.{name}"))? {
                return Ok(v);
            }
        }
        if let Some(v) = self.find_global_internal(&format!("{pkg}.{name}"))? {
            return Ok(v);
        }
        Err(symbol_not_found(&format!("{pkg}.{name}")))
    }

    fn find_global_internal(&self, name: &str) -> EvalResult<Option<Value>> {
        let di = self.debug_info();
        if let Some(pv) = di.package_vars().iter().find(|v| symbol_matches(&v.name, name)) {
            return Ok(Some(self.value(pv.name.clone(), pv.addr, pv.ty)));
        }
        if let Some(f) = di.functions().iter().find(|f| symbol_matches(&f.name, name)) {
            return Ok(Some(self.function_value(f)));
        }
        for c in di.constants() {
            if !symbol_matches(&c.full_name, name) {
                continue;
            }
            let mut v = self.value(name, 0, c.ty);
            v.value = Some(match v.kind {
                k if k.is_signed() => make_int64(c.value),
                k if k.is_unsigned() => make_uint64(c.value as u64),
                k => return Err(EvalError::new(format!("unsupported constant kind {k}"))),
            });
            v.flags |= ValueFlags::CONSTANT;
            v.loaded = true;
            return Ok(Some(v));
        }
        Ok(None)
    }

    /// A loaded function value for `f`, located at its entry point.
    pub(crate) fn function_value(&self, f: &Function) -> Value {
        let ty = self.types().func_type("func()");
        let mut v = self.value(f.name.clone(), f.entry, ty);
        v.value = Some(make_string(f.name.clone()));
        v.base = f.entry;
        v.loaded = true;
        if f.entry == 0 {
            v.unreadable = Some(unreadable(format!("function {} is inlined", f.name)));
        }
        v
    }

    /// A method value for `f`: no address, typed by its signature without
    /// the receiver. The caller attaches the receiver as the only child.
    pub(crate) fn method_value(&self, f: &Function) -> EvalResult<Value> {
        let di = self.debug_info();
        if !producer_after_or_equal(di.producer(), 1, METHOD_TYPE_MINOR) {
            return Err(EvalError::new(
                "evaluating methods not supported on this version of Go",
            ));
        }
        let args = di.formal_args(f)?;
        let mut params = Vec::new();
        let mut results = Vec::new();
        for arg in args.args.iter().skip(1) {
            let ty_name = self.types().name(arg.ty);
            let s = if arg.name.starts_with('~') {
                ty_name
            } else {
                format!("{} {ty_name}", arg.name)
            };
            if arg.is_ret {
                results.push(s);
            } else {
                params.push(s);
            }
        }
        let ret = match results.len() {
            0 => String::new(),
            1 => format!(" {}", results[0]),
            _ => format!(" ({})", results.join(", ")),
        };
        let ty = self.types().func_type(&format!("func({}){ret}", params.join(", ")));
        let mut v = self.value(f.name.clone(), 0, ty);
        v.value = Some(make_string(f.name.clone()));
        v.base = f.entry;
        v.loaded = true;
        Ok(v)
    }
}

/// Address just past the last argument or result seen so far; 0 if none.
fn after_last_arg_addr(vars: &[(i32, Value)]) -> u64 {
    vars.iter()
        .rev()
        .map(|(_, v)| v)
        .find(|v| v.flags.intersects(ValueFlags::ARGUMENT | ValueFlags::RETURN_ARGUMENT))
        .map_or(0, |v| {
            let size = v.declared_type.map_or(0, |t| v.types().size(t));
            v.addr + size as u64
        })
}
