//! Value flags.

use bitflags::bitflags;

bitflags! {
    /// Independent properties of a [`Value`](crate::Value).
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct ValueFlags: u16 {
        // === Provenance (bits 0-3) ===

        /// Local variable that escaped to the heap; the compiler stored a
        /// pointer to it in the frame.
        const ESCAPED = 1 << 0;
        /// Function argument.
        const ARGUMENT = 1 << 1;
        /// Function return value.
        const RETURN_ARGUMENT = 1 << 2;
        /// A later declaration with the same name hides this one.
        const SHADOWED = 1 << 3;

        // === Storage (bits 4-7) ===

        /// Named constant from debug info.
        const CONSTANT = 1 << 4;
        /// Backed by a CPU register, not memory.
        const CPU_REGISTER = 1 << 5;
        /// Address points into a synthetic region, not target memory.
        const FAKE_ADDRESS = 1 << 6;
        /// Pointer from a C compilation unit; indexing is unchecked.
        const C_PTR = 1 << 7;
    }
}

bitflags! {
    /// Options for enumerating the locals of a scope.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct LocalsFlags: u8 {
        /// Formal arguments without a location get one assigned from their
        /// position in the argument list. Honoured only at the function
        /// entry point.
        const TRUST_ARG_ORDER = 1 << 0;
        /// Ignore declaration lines when deciding visibility.
        const NO_DECL_LINE_CHECK = 1 << 1;
    }
}
