//! Assignment of a value to a target location.

use probe_types::{Kind, TypeKind};
use probe_value::constant::{bool_val, float64_val, imag, int64_val, real, uint64_val};
use probe_value::{Constant, EvalError, EvalResult, LoadConfig, Value, ValueFlags};

use crate::scope::EvalScope;

/// Message for string literals that would need target memory.
pub(crate) const STR_ALLOC_NOT_ALLOWED: &str =
    "literal string can not be allocated because function calls are not allowed without using 'call'";

impl EvalScope {
    /// Write `src` into `dst`. `src_expr` is the source text of `src`.
    ///
    /// Scalars are converted to the destination width. Nil zeroes the
    /// destination, strings and slices store a new header, pointers take
    /// the pointee address of `src`, and anything else is copied byte by
    /// byte from an addressable source.
    pub(crate) fn set_value(&self, dst: &Value, mut src: Value, src_expr: &str) -> EvalResult<()> {
        src.load(&LoadConfig::SINGLE_VALUE);

        if let Err(err) = src.is_type(dst.real_type, dst.kind) {
            if err.is_type_conversion() {
                // iface -> eface and pointer-shaped -> eface
                return dst.convert_to_eface(&src);
            }
            return Err(err);
        }

        if let Some(err) = &src.unreadable {
            return Err(EvalError::new(format!(
                "Expression {src_expr:?} is unreadable: {err}"
            )));
        }

        let size = dst.real_type.map_or(0, |t| self.types().size(t));
        let c = src.value.clone().unwrap_or(Constant::Unknown);
        match dst.kind {
            Kind::Float32 | Kind::Float64 => return dst.write_float(float64_val(&c).0, size),
            k if k.is_signed() => return dst.write_uint(int64_val(&c).0 as u64, size),
            k if k.is_unsigned() => return dst.write_uint(uint64_val(&c).0, size),
            Kind::Bool => return dst.write_bool(bool_val(&c)),
            Kind::Complex64 | Kind::Complex128 => {
                let re = float64_val(&real(&c)).0;
                let im = float64_val(&imag(&c)).0;
                return dst.write_complex(re, im, size);
            }
            Kind::Func if size == 0 => {
                if dst.name.is_empty() {
                    return Err(EvalError::new("can not assign to function expression"));
                }
                return Err(EvalError::new(format!("can not assign to {}", dst.name)));
            }
            _ => {}
        }

        if src.is_nil_literal() {
            return dst.write_zero();
        }

        if src.kind == Kind::String {
            if src.base == 0 && src.len > 0 && src.flags.contains(ValueFlags::CONSTANT) {
                return Err(EvalError::new(STR_ALLOC_NOT_ALLOWED));
            }
            return dst.write_string(src.len as u64, src.base);
        }

        // kept apart from the byte copy below so resliced values can be
        // assigned
        if src.kind == Kind::Slice {
            return dst.write_slice(src.len, src.cap, src.base);
        }

        if let Some(real) = dst.real_type {
            if matches!(self.types().get(real).kind, TypeKind::Pointer { .. }) {
                let addr = src.children.first().map_or(0, |c| c.addr);
                return dst.write_uint(addr, size);
            }
        }

        if src.addr != 0 {
            return dst.write_copy(&src);
        }

        Err(EvalError::new(format!(
            "can not set variables of type {} (not implemented)",
            dst.kind
        )))
    }
}
