//! DWARF register sets.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// One register. `bytes` holds the full contents for registers wider than
/// 64 bits (vector registers); `value` always holds the low 8 bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Register {
    pub value: u64,
    pub bytes: SmallVec<[u8; 16]>,
}

impl Register {
    pub fn from_u64(value: u64) -> Self {
        Self {
            value,
            bytes: SmallVec::from_slice(&value.to_le_bytes()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut low = [0u8; 8];
        let n = bytes.len().min(8);
        low[..n].copy_from_slice(&bytes[..n]);
        Self {
            value: u64::from_le_bytes(low),
            bytes: SmallVec::from_slice(bytes),
        }
    }

    /// Width in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len().max(8)
    }
}

/// Registers of one frame, indexed by DWARF register number, plus the
/// frame's canonical addresses.
#[derive(Clone, Debug, Default)]
pub struct DwarfRegisters {
    regs: FxHashMap<u64, Register>,
    pub cfa: i64,
    pub frame_base: i64,
    pub pc_regnum: u64,
    pub sp_regnum: u64,
    pub bp_regnum: u64,
    /// Link register, on architectures that have one.
    pub lr_regnum: Option<u64>,
}

impl DwarfRegisters {
    pub fn new(pc_regnum: u64, sp_regnum: u64, bp_regnum: u64, lr_regnum: Option<u64>) -> Self {
        Self {
            regs: FxHashMap::default(),
            cfa: 0,
            frame_base: 0,
            pc_regnum,
            sp_regnum,
            bp_regnum,
            lr_regnum,
        }
    }

    pub fn reg(&self, regnum: u64) -> Option<&Register> {
        self.regs.get(&regnum)
    }

    pub fn add_reg(&mut self, regnum: u64, reg: Register) {
        self.regs.insert(regnum, reg);
    }

    pub fn set_u64(&mut self, regnum: u64, value: u64) {
        self.regs.insert(regnum, Register::from_u64(value));
    }

    /// Low 64 bits of a register; 0 if unknown.
    pub fn u64_val(&self, regnum: u64) -> u64 {
        self.regs.get(&regnum).map_or(0, |r| r.value)
    }

    pub fn clear(&mut self) {
        self.regs.clear();
    }

    #[inline]
    pub fn pc(&self) -> u64 {
        self.u64_val(self.pc_regnum)
    }

    #[inline]
    pub fn sp(&self) -> u64 {
        self.u64_val(self.sp_regnum)
    }

    #[inline]
    pub fn bp(&self) -> u64 {
        self.u64_val(self.bp_regnum)
    }

    pub fn lr(&self) -> Option<u64> {
        self.lr_regnum.map(|n| self.u64_val(n))
    }
}
