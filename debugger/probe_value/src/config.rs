//! Load limits.

/// Bounds for materializing a value from target memory.
///
/// Loading is recursive; each limit caps one dimension so a single request
/// cannot walk an unbounded linked structure or copy a huge buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoadConfig {
    /// Load the pointee of pointers.
    pub follow_pointers: bool,
    /// How deep nested structs, arrays and pointers are loaded.
    pub max_variable_recurse: i32,
    /// Bytes of a string to read.
    pub max_string_len: i64,
    /// Elements of an array, slice or map to read.
    pub max_array_values: i64,
    /// Fields of a struct to read; -1 reads all of them.
    pub max_struct_fields: i32,
    /// Map buckets to visit before giving up; 0 means unbounded.
    pub max_map_buckets: i64,
}

/// Scales `max_array_values` into `max_map_buckets` for bulk local loads.
pub const MAX_MAP_BUCKETS_FACTOR: i64 = 100;

impl LoadConfig {
    /// Only the value itself; no children.
    pub const SINGLE_VALUE: LoadConfig = LoadConfig {
        follow_pointers: false,
        max_variable_recurse: 0,
        max_string_len: 64,
        max_array_values: 0,
        max_struct_fields: -1,
        max_map_buckets: 0,
    };

    /// One level of children, as used for operator operands.
    pub const FULL_VALUE: LoadConfig = LoadConfig {
        follow_pointers: true,
        max_variable_recurse: 1,
        max_string_len: 64,
        max_array_values: 64,
        max_struct_fields: -1,
        max_map_buckets: 0,
    };

    /// Like [`FULL_VALUE`](Self::FULL_VALUE) but reads strings up to 1 MiB,
    /// for string arithmetic and comparisons.
    pub const FULL_VALUE_LONGER_STRINGS: LoadConfig = LoadConfig {
        max_string_len: 1024 * 1024,
        ..LoadConfig::FULL_VALUE
    };

    /// Derive `max_map_buckets` from `max_array_values`.
    #[must_use]
    pub fn with_map_buckets(mut self) -> Self {
        self.max_map_buckets = self.max_array_values.saturating_mul(MAX_MAP_BUCKETS_FACTOR);
        self
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig::FULL_VALUE
    }
}
