//! Writing values back to the target.

use probe_types::{Kind, TypeKind};

use super::Value;
use crate::errors::{type_conversion, unreadable, EvalError, EvalResult};
use crate::memory::{read_exact, read_uint_raw, write_uint_raw};

impl Value {
    fn size(&self) -> i64 {
        self.real_type.map_or(0, |t| self.types().size(t))
    }

    fn write_bytes(&self, addr: u64, data: &[u8]) -> EvalResult<()> {
        let n = self.mem.write_memory(addr, data)?;
        if n < data.len() {
            return Err(unreadable(format!("short write at {addr:#x}")));
        }
        Ok(())
    }

    pub fn write_uint(&self, n: u64, size: i64) -> EvalResult<()> {
        write_uint_raw(self.mem.as_ref(), self.addr, n, size)?;
        Ok(())
    }

    pub fn write_float(&self, f: f64, size: i64) -> EvalResult<()> {
        match size {
            4 => self.write_bytes(self.addr, &(f as f32).to_le_bytes()),
            8 => self.write_bytes(self.addr, &f.to_le_bytes()),
            _ => Err(EvalError::new(format!("invalid size: {size}"))),
        }
    }

    pub fn write_complex(&self, re: f64, im: f64, size: i64) -> EvalResult<()> {
        let mut buf = Vec::with_capacity(size as usize);
        match size {
            8 => {
                buf.extend_from_slice(&(re as f32).to_le_bytes());
                buf.extend_from_slice(&(im as f32).to_le_bytes());
            }
            16 => {
                buf.extend_from_slice(&re.to_le_bytes());
                buf.extend_from_slice(&im.to_le_bytes());
            }
            _ => return Err(EvalError::new(format!("invalid size: {size}"))),
        }
        self.write_bytes(self.addr, &buf)
    }

    pub fn write_bool(&self, b: bool) -> EvalResult<()> {
        self.write_bytes(self.addr, &[u8::from(b)])
    }

    /// Overwrite the whole value with zero bytes.
    pub fn write_zero(&self) -> EvalResult<()> {
        self.write_bytes(self.addr, &vec![0u8; self.size().max(0) as usize])
    }

    /// Store a string header.
    pub fn write_string(&self, len: u64, base: u64) -> EvalResult<()> {
        let p = self.ptr_size();
        write_uint_raw(self.mem.as_ref(), self.addr, base, p)?;
        write_uint_raw(self.mem.as_ref(), self.addr + p as u64, len, p)?;
        Ok(())
    }

    /// Store a slice header.
    pub fn write_slice(&self, len: i64, cap: i64, base: u64) -> EvalResult<()> {
        let p = self.ptr_size();
        let word = p as u64;
        write_uint_raw(self.mem.as_ref(), self.addr, base, p)?;
        write_uint_raw(self.mem.as_ref(), self.addr + word, len as u64, p)?;
        write_uint_raw(self.mem.as_ref(), self.addr + 2 * word, cap as u64, p)?;
        Ok(())
    }

    /// Copy the bytes of `src`, which must be addressable and of the same
    /// size.
    pub fn write_copy(&self, src: &Value) -> EvalResult<()> {
        let mut buf = vec![0u8; self.size().max(0) as usize];
        read_exact(src.mem.as_ref(), src.addr, &mut buf)?;
        self.write_bytes(self.addr, &buf)
    }

    /// Store an empty-interface pair.
    pub fn write_empty_interface(&self, type_addr: u64, data: u64) -> EvalResult<()> {
        let p = self.ptr_size();
        write_uint_raw(self.mem.as_ref(), self.addr, type_addr, p)?;
        write_uint_raw(self.mem.as_ref(), self.addr + p as u64, data, p)?;
        Ok(())
    }

    /// Box `src` into this `interface {}`: either another interface, whose
    /// dynamic type and data word are copied, or a pointer-shaped value,
    /// which is stored directly.
    pub fn convert_to_eface(&self, src: &Value) -> EvalResult<()> {
        let types = self.types();
        let dst_name = self.real_type.map(|t| types.name(t)).unwrap_or_default();
        let conv_err = || type_conversion(&src.type_string(), &dst_name);
        if dst_name != "interface {}" {
            return Err(conv_err());
        }
        let p = self.ptr_size();
        let word = p as u64;
        if src.kind == Kind::Interface {
            let Some(real) = src.real_type else {
                return Err(conv_err());
            };
            let empty = matches!(types.get(real).kind, TypeKind::Interface { empty: true });
            let tab = read_uint_raw(src.mem.as_ref(), src.addr, p)?;
            let type_addr = if empty || tab == 0 {
                tab
            } else {
                read_uint_raw(src.mem.as_ref(), tab + word, p)?
            };
            let data = read_uint_raw(src.mem.as_ref(), src.addr + word, p)?;
            return self.write_empty_interface(type_addr, data);
        }
        let Some(ty) = src.declared_type else {
            return Err(conv_err());
        };
        let Some(type_addr) = types.runtime_type_addr(ty) else {
            return Err(conv_err());
        };
        if !src.kind.is_pointer_shaped() {
            return Err(conv_err());
        }
        let data = if src.addr != 0 {
            read_uint_raw(src.mem.as_ref(), src.addr, p)?
        } else {
            src.children.first().map_or(src.base, |c| c.addr)
        };
        self.write_empty_interface(type_addr, data)
    }
}
