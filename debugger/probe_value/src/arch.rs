//! Target architecture description.
//!
//! The evaluator needs three things from the architecture: the pointer
//! size, the mapping from register names to DWARF numbers (for `REG`
//! expressions), and the calling-convention details that call injection
//! rewrites. Architectures without the latter cannot inject calls and
//! report so before any register is touched.

use crate::registers::DwarfRegisters;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArchFamily {
    Amd64,
    Arm64,
    Ppc64le,
    I386,
}

/// How a call finds its way back to the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReturnConvention {
    /// Return address pushed on the stack by the caller (amd64).
    Stack,
    /// Return address in a dedicated link register (arm64, ppc64le).
    LinkRegister { regnum: u64 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Arch {
    pub family: ArchFamily,
}

impl Arch {
    pub const AMD64: Arch = Arch {
        family: ArchFamily::Amd64,
    };
    pub const ARM64: Arch = Arch {
        family: ArchFamily::Arm64,
    };
    pub const PPC64LE: Arch = Arch {
        family: ArchFamily::Ppc64le,
    };
    pub const I386: Arch = Arch {
        family: ArchFamily::I386,
    };

    pub fn name(self) -> &'static str {
        match self.family {
            ArchFamily::Amd64 => "amd64",
            ArchFamily::Arm64 => "arm64",
            ArchFamily::Ppc64le => "ppc64le",
            ArchFamily::I386 => "386",
        }
    }

    pub fn ptr_size(self) -> i64 {
        match self.family {
            ArchFamily::I386 => 4,
            _ => 8,
        }
    }

    pub fn pc_regnum(self) -> u64 {
        match self.family {
            ArchFamily::Amd64 => 16,
            ArchFamily::Arm64 => 32,
            ArchFamily::Ppc64le => 64,
            ArchFamily::I386 => 8,
        }
    }

    pub fn sp_regnum(self) -> u64 {
        match self.family {
            ArchFamily::Amd64 => 7,
            ArchFamily::Arm64 => 31,
            ArchFamily::Ppc64le => 1,
            ArchFamily::I386 => 4,
        }
    }

    pub fn bp_regnum(self) -> u64 {
        match self.family {
            ArchFamily::Amd64 => 6,
            ArchFamily::Arm64 => 29,
            ArchFamily::Ppc64le => 31,
            ArchFamily::I386 => 5,
        }
    }

    pub fn lr_regnum(self) -> Option<u64> {
        match self.family {
            ArchFamily::Arm64 => Some(30),
            ArchFamily::Ppc64le => Some(65),
            ArchFamily::Amd64 | ArchFamily::I386 => None,
        }
    }

    /// An empty register set with this architecture's special registers.
    pub fn new_registers(self) -> DwarfRegisters {
        DwarfRegisters::new(
            self.pc_regnum(),
            self.sp_regnum(),
            self.bp_regnum(),
            self.lr_regnum(),
        )
    }

    /// Calling convention for injected calls; `None` if unsupported.
    pub fn return_convention(self) -> Option<ReturnConvention> {
        match self.family {
            ArchFamily::Amd64 => Some(ReturnConvention::Stack),
            ArchFamily::Arm64 | ArchFamily::Ppc64le => Some(ReturnConvention::LinkRegister {
                regnum: self.lr_regnum().unwrap_or_default(),
            }),
            ArchFamily::I386 => None,
        }
    }

    /// Bytes the callee expects between SP and its first argument.
    pub fn call_frame_reserve(self) -> u64 {
        match self.family {
            ArchFamily::Amd64 | ArchFamily::I386 => 0,
            ArchFamily::Arm64 => 8,
            ArchFamily::Ppc64le => 32,
        }
    }

    /// Register that carries the closure context into a called function.
    pub fn closure_context_regnum(self) -> Option<u64> {
        match self.family {
            ArchFamily::Amd64 => Some(1),
            ArchFamily::Arm64 => Some(26),
            ArchFamily::Ppc64le => Some(11),
            ArchFamily::I386 => None,
        }
    }

    /// DWARF number of the register called `name` (already validated and
    /// upper-cased).
    pub fn register_name_to_dwarf(self, name: &str) -> Option<u64> {
        match self.family {
            ArchFamily::Amd64 => amd64_regnum(name),
            ArchFamily::Arm64 => arm64_regnum(name),
            ArchFamily::Ppc64le => ppc64le_regnum(name),
            ArchFamily::I386 => i386_regnum(name),
        }
    }
}

const AMD64_GPRS: [&str; 17] = [
    "RAX", "RDX", "RCX", "RBX", "RSI", "RDI", "RBP", "RSP", "R8", "R9", "R10", "R11", "R12",
    "R13", "R14", "R15", "RIP",
];

fn numbered(name: &str, prefix: &str, count: u64, base: u64) -> Option<u64> {
    let n: u64 = name.strip_prefix(prefix)?.parse().ok()?;
    (n < count).then_some(base + n)
}

fn amd64_regnum(name: &str) -> Option<u64> {
    if let Some(i) = AMD64_GPRS.iter().position(|r| *r == name) {
        return Some(i as u64);
    }
    numbered(name, "XMM", 16, 17)
        .or_else(|| numbered(name, "ST", 8, 33))
        .or_else(|| match name {
            "RFLAGS" | "EFLAGS" => Some(49),
            "ES" => Some(50),
            "CS" => Some(51),
            "SS" => Some(52),
            "DS" => Some(53),
            "FS" => Some(54),
            "GS" => Some(55),
            "FS_BASE" => Some(58),
            "GS_BASE" => Some(59),
            _ => None,
        })
}

fn arm64_regnum(name: &str) -> Option<u64> {
    match name {
        "SP" => return Some(31),
        "PC" => return Some(32),
        "LR" => return Some(30),
        _ => {}
    }
    numbered(name, "X", 31, 0).or_else(|| numbered(name, "V", 32, 64))
}

fn ppc64le_regnum(name: &str) -> Option<u64> {
    match name {
        "PC" => return Some(64),
        "LR" => return Some(65),
        "SP" => return Some(1),
        _ => {}
    }
    numbered(name, "R", 32, 0)
        .or_else(|| numbered(name, "F", 32, 32))
        .or_else(|| numbered(name, "V", 32, 77))
}

fn i386_regnum(name: &str) -> Option<u64> {
    const GPRS: [&str; 9] = ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI", "EIP"];
    GPRS.iter().position(|r| *r == name).map(|i| i as u64)
}

/// Canonical form of a register name written in an expression: leading
/// underscores removed, must be upper-case letters and digits. Returns
/// `None` for anything else.
pub fn valid_register_name(s: &str) -> Option<&str> {
    let s = s.trim_start_matches('_');
    if s.is_empty() {
        return None;
    }
    s.bytes()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .then_some(s)
}
