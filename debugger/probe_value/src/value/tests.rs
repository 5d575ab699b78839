use std::sync::Arc;

use pretty_assertions::assert_eq;
use probe_types::{Field, Idx, Kind, TypeData, TypeKind};

use super::*;
use crate::arch::Arch;
use crate::constant::{int64_val, make_int64, make_string, string_val, uint64_val, BinaryOp};
use crate::memory::FakeMemory;

struct Fixture {
    mem: Arc<FakeMemory>,
    target: Arc<Target>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            mem: Arc::new(FakeMemory::new()),
            target: Target::new(Arch::AMD64),
        }
    }

    fn types(&self) -> &TypeTable {
        &self.target.types
    }

    fn shared(&self) -> SharedMemory {
        Arc::clone(&self.mem) as SharedMemory
    }

    fn value(&self, name: &str, addr: u64, ty: Idx) -> Value {
        Value::new(name, addr, ty, self.shared(), &self.target)
    }

    fn constant(&self, c: Constant) -> Value {
        Value::constant(c, self.shared(), &self.target)
    }

    fn map_words(&self, addr: u64, words: &[u64]) {
        self.mem.map(addr, words.iter().flat_map(|w| w.to_le_bytes()).collect());
    }

    /// `main.Outer { main.Inner (embedded); Y int }` with `main.Inner { X int }`.
    fn outer(&self) -> Idx {
        let int = self.types().named_basic("int");
        let inner = self.types().insert(TypeData::new(
            "main.Inner",
            8,
            8,
            TypeKind::Struct {
                fields: vec![Field::new("X", int, 0)],
            },
        ));
        self.types().insert(TypeData::new(
            "main.Outer",
            16,
            8,
            TypeKind::Struct {
                fields: vec![Field::new("Inner", inner, 0).embedded(), Field::new("Y", int, 8)],
            },
        ))
    }

    fn int_map(&self) -> Idx {
        let int = self.types().named_basic("int");
        self.types().insert(TypeData::new(
            "map[int]int",
            8,
            8,
            TypeKind::Map {
                key: int,
                value: int,
            },
        ))
    }
}

fn int_of(v: &Value) -> i64 {
    int64_val(v.value.as_ref().unwrap()).0
}

#[test]
fn test_array_element_address_uses_stride() {
    let f = Fixture::new();
    let int32 = f.types().named_basic("int32");
    let arr = f.types().array_of(int32, 4);
    f.mem.map(0x1000, (1i32..=4).flat_map(i32::to_le_bytes).collect());

    let v = f.value("a", 0x1000, arr);
    assert_eq!((v.base, v.len, v.stride), (0x1000, 4, 4));
    let mut e = v.slice_access(2).unwrap();
    assert_eq!(e.addr, 0x1008);
    e.load(&LoadConfig::FULL_VALUE);
    assert_eq!(int_of(&e), 3);

    assert_eq!(v.slice_access(4).unwrap_err().message, "index out of bounds");
    assert_eq!(v.slice_access(-1).unwrap_err().message, "index out of bounds");
}

#[test]
fn test_string_header_and_byte_access() {
    let f = Fixture::new();
    let string = f.types().named_basic("string");
    f.mem.map(0x2000, b"hello".to_vec());
    f.map_words(0x1000, &[0x2000, 5]);

    let mut s = f.value("s", 0x1000, string);
    assert_eq!((s.base, s.len), (0x2000, 5));
    s.load(&LoadConfig::FULL_VALUE);
    assert_eq!(string_val(s.value.as_ref().unwrap()), b"hello");

    let b = s.slice_access(1).unwrap();
    assert_eq!(b.addr, 0x2001);
    assert_eq!(int_of(&b), i64::from(b'e'));

    let mut short = f.value("s", 0x1000, string);
    short.load(&LoadConfig {
        max_string_len: 3,
        ..LoadConfig::FULL_VALUE
    });
    assert_eq!(string_val(short.value.as_ref().unwrap()), b"hel");
}

#[test]
fn test_slice_reslice_bounds_and_geometry() {
    let f = Fixture::new();
    let int = f.types().named_basic("int");
    let sl = f.types().slice_of(int);
    f.map_words(0x3000, &[10, 20, 30, 40]);
    f.map_words(0x1000, &[0x3000, 3, 4]);

    let v = f.value("s", 0x1000, sl);
    assert_eq!((v.base, v.len, v.cap), (0x3000, 3, 4));

    let r = v.reslice(1, 4).unwrap();
    assert_eq!((r.base, r.len, r.cap), (0x3008, 3, 3));
    assert_eq!(r.stride, 8);
    assert!(v.reslice(1, 5).is_err());
    assert!(v.reslice(3, 2).is_err());

    let again = r.reslice(0, r.len).unwrap();
    assert_eq!((again.base, again.len, again.cap), (r.base, r.len, r.cap));

    let mut r = r;
    r.load(&LoadConfig::FULL_VALUE);
    let vals: Vec<i64> = r.children.iter().map(int_of).collect();
    assert_eq!(vals, vec![20, 30, 40]);
}

#[test]
fn test_reslice_array_yields_slice_type() {
    let f = Fixture::new();
    let int32 = f.types().named_basic("int32");
    let arr = f.types().array_of(int32, 4);
    f.mem.map_zeroed(0x1000, 16);
    let r = f.value("a", 0x1000, arr).reslice(1, 3).unwrap();
    assert_eq!(r.type_string(), "[]int32");
    assert_eq!(r.kind, Kind::Slice);
    assert_eq!((r.base, r.len), (0x1004, 2));
}

#[test]
fn test_struct_member_promotes_embedded_fields() {
    let f = Fixture::new();
    let outer = f.outer();
    f.map_words(0x1000, &[7, 9]);

    let mut o = f.value("o", 0x1000, outer);
    let mut x = o.struct_member("X").unwrap();
    assert_eq!(x.name, "o.X");
    assert_eq!(x.addr, 0x1000);
    x.load(&LoadConfig::FULL_VALUE);
    assert_eq!(int_of(&x), 7);

    let y = o.struct_member("Y").unwrap();
    assert_eq!(y.addr, 0x1008);
    let inner = o.struct_member("Inner").unwrap();
    assert_eq!(inner.type_string(), "main.Inner");

    assert_eq!(o.struct_member("Z").unwrap_err().message, "o has no member Z");

    let int = f.types().named_basic("int");
    let mut n = f.value("n", 0x1000, int);
    assert_eq!(n.struct_member("X").unwrap_err().message, "n (type int) is not a struct");
}

#[test]
fn test_struct_member_through_pointer() {
    let f = Fixture::new();
    let outer = f.outer();
    let ptr = f.types().pointer_to(outer);
    f.map_words(0x1000, &[7, 9]);
    f.map_words(0x2000, &[0x1000, 0]);

    let mut p = f.value("p", 0x2000, ptr);
    assert_eq!(p.struct_member("Y").unwrap().addr, 0x1008);

    let mut nilp = f.value("q", 0x2008, ptr);
    assert_eq!(nilp.struct_member("Y").unwrap_err().message, "q is nil");
    nilp.load(&LoadConfig::SINGLE_VALUE);
    assert!(nilp.is_nil());
}

#[test]
fn test_pointer_to_and_dereference() {
    let f = Fixture::new();
    let int = f.types().named_basic("int");
    f.map_words(0x1000, &[5]);
    let x = f.value("x", 0x1000, int);
    let p = x.pointer_to();
    assert_eq!(p.type_string(), "*int");
    assert_eq!((p.addr, p.len, p.loaded), (0, 1, true));
    assert!(p.children[0].only_addr);
    let d = p.maybe_dereference();
    assert_eq!(d.addr, 0x1000);
    assert!(!p.is_nil());
}

#[test]
fn test_map_access_and_missing_key() {
    let f = Fixture::new();
    let m_ty = f.int_map();
    f.map_words(0x6000, &[1, 100, 2, 200]);
    f.map_words(0x5000, &[2, 0x6000]);
    f.map_words(0x1000, &[0x5000]);

    let mut m = f.value("m", 0x1000, m_ty);
    assert_eq!(m.base, 0x5000);
    let mut v = m.map_access(&mut f.constant(make_int64(2))).unwrap();
    v.load(&LoadConfig::FULL_VALUE);
    assert_eq!(int_of(&v), 200);
    assert_eq!(m.len, 2);

    let err = m.map_access(&mut f.constant(make_int64(3))).unwrap_err();
    assert_eq!(err.message, "key not found");

    let err = m.map_access(&mut f.constant(make_string("a"))).unwrap_err();
    assert_eq!(err.message, "can not convert \"a\" constant to int");
}

#[test]
fn test_map_load_and_skip() {
    let f = Fixture::new();
    let m_ty = f.int_map();
    f.map_words(0x6000, &[1, 100, 2, 200, 3, 300]);
    f.map_words(0x5000, &[3, 0x6000]);
    f.map_words(0x1000, &[0x5000]);

    let mut m = f.value("m", 0x1000, m_ty);
    m.load(&LoadConfig::FULL_VALUE);
    assert_eq!(m.children.len(), 6);

    let paged = m.load_resliced(2, &LoadConfig::FULL_VALUE).unwrap();
    assert_eq!(paged.children.len(), 2);
    assert_eq!(int_of(&paged.children[0]), 3);
    assert_eq!(int_of(&paged.children[1]), 300);
}

#[test]
fn test_empty_map_is_nil() {
    let f = Fixture::new();
    let m_ty = f.int_map();
    f.map_words(0x1000, &[0]);
    let mut m = f.value("m", 0x1000, m_ty);
    assert!(m.is_nil());
    let err = m.map_access(&mut f.constant(make_int64(1))).unwrap_err();
    assert_eq!(err.message, "key not found");
}

#[test]
fn test_interface_dynamic_value() {
    let f = Fixture::new();
    let int = f.types().named_basic("int");
    let eface = f.types().named_basic("interface {}");
    f.types().register_runtime_type(0x9000, int);
    f.map_words(0x7000, &[42]);
    f.map_words(0x1000, &[0x9000, 0x7000, 0, 0]);

    let mut i = f.value("i", 0x1000, eface);
    i.load(&LoadConfig::FULL_VALUE);
    let data = &i.children[0];
    assert_eq!(data.name, "data");
    assert_eq!(data.type_string(), "int");
    assert_eq!(int_of(data), 42);
    assert!(!i.is_nil());

    let mut n = f.value("n", 0x1010, eface);
    n.load(&LoadConfig::FULL_VALUE);
    assert!(n.is_nil());
}

#[test]
fn test_compare_arrays_and_uncomparable_kinds() {
    let f = Fixture::new();
    let int = f.types().named_basic("int");
    let arr = f.types().array_of(int, 2);
    f.map_words(0x1000, &[1, 2, 1, 2, 1, 3]);
    let load = |addr| {
        let mut v = f.value("a", addr, arr);
        v.load(&LoadConfig::FULL_VALUE);
        v
    };
    let (mut a, mut b, mut c) = (load(0x1000), load(0x1010), load(0x1020));
    assert!(compare_op(BinaryOp::Eq, &mut a, &mut b).unwrap());
    assert!(!compare_op(BinaryOp::Eq, &mut a, &mut c).unwrap());
    assert!(compare_op(BinaryOp::Ne, &mut a, &mut c).unwrap());
    assert_eq!(
        compare_op(BinaryOp::Lt, &mut a, &mut b).unwrap_err().message,
        "operator < not defined on array"
    );

    let sl = f.types().slice_of(int);
    f.map_words(0x2000, &[0x1000, 2, 2]);
    let mut s1 = f.value("s", 0x2000, sl);
    let mut s2 = f.value("s", 0x2000, sl);
    assert_eq!(
        compare_op(BinaryOp::Eq, &mut s1, &mut s2).unwrap_err().message,
        "can not compare slice variables"
    );
}

#[test]
fn test_compare_strings_of_different_length() {
    let f = Fixture::new();
    let mut a = f.constant(make_string("abc"));
    let mut b = f.constant(make_string("ab"));
    assert!(!compare_op(BinaryOp::Eq, &mut a, &mut b).unwrap());
    assert!(compare_op(BinaryOp::Gt, &mut a, &mut b).unwrap());
}

#[test]
fn test_unequal_string_lengths_compare_without_reading_bytes() {
    let f = Fixture::new();
    let string = f.types().named_basic("string");
    // both headers point at unmapped memory
    f.map_words(0x1000, &[0xdead_0000, 3, 0xdead_1000, 2]);
    let mut a = f.value("a", 0x1000, string);
    let mut b = f.value("b", 0x1010, string);
    assert!(compare_op(BinaryOp::Ne, &mut a, &mut b).unwrap());
    assert!(!compare_op(BinaryOp::Eq, &mut a, &mut b).unwrap());
    assert!(a.unreadable.is_none() && b.unreadable.is_none());

    // ordering needs the bytes
    assert!(compare_op(BinaryOp::Lt, &mut a, &mut b).is_err());
}

#[test]
fn test_register_vector_view() {
    let f = Fixture::new();
    let bytes = [1u8, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
    let xmm = Value::register("XMM0", Register::from_bytes(&bytes), f.shared(), &f.target);
    assert_eq!(xmm.kind, Kind::String);
    assert_eq!(xmm.len, 32);

    let lanes = xmm.register_type_conv("int32x4").unwrap();
    assert_eq!(lanes.kind, Kind::Array);
    assert_eq!(lanes.len, 4);
    let vals: Vec<i64> = lanes.children.iter().map(int_of).collect();
    assert_eq!(vals, vec![1, 2, 3, -1]);
    assert_eq!(lanes.children[3].name, "int32x4[3]");

    assert!(xmm.register_type_conv("int128").is_err());

    let mut text = xmm.clone();
    text.load(&LoadConfig::FULL_VALUE);
    assert_eq!(
        string_val(text.value.as_ref().unwrap()),
        b"0x010000000200000003000000ffffffff"
    );
}

#[test]
fn test_scalar_register_reads_value() {
    let f = Fixture::new();
    let mut rax = Value::register("RAX", Register::from_u64(0x1234), f.shared(), &f.target);
    assert_eq!(rax.type_string(), "uint64");
    rax.load(&LoadConfig::FULL_VALUE);
    assert_eq!(uint64_val(rax.value.as_ref().unwrap()), (0x1234, true));
}

#[test]
fn test_function_value_names_entry() {
    let f = Fixture::new();
    let func = f.types().insert(TypeData::new("func()", 8, 8, TypeKind::Func));
    f.map_words(0x1000, &[0x4000, 0]);
    f.map_words(0x4000, &[0x40_1000]);
    f.target.register_function(0x40_1000, "main.f");

    let mut fv = f.value("f", 0x1000, func);
    fv.load(&LoadConfig::FULL_VALUE);
    assert_eq!(fv.base, 0x40_1000);
    assert_eq!(string_val(fv.value.as_ref().unwrap()), b"main.f");

    let mut nilf = f.value("g", 0x1008, func);
    nilf.load(&LoadConfig::FULL_VALUE);
    assert!(nilf.is_nil());
}

#[test]
fn test_write_uint_round_trips_through_memory() {
    let f = Fixture::new();
    let int = f.types().named_basic("int");
    f.map_words(0x1000, &[5]);
    let v = f.value("x", 0x1000, int);
    v.write_uint(9, 8).unwrap();
    let mut again = f.value("x", 0x1000, int);
    again.load(&LoadConfig::FULL_VALUE);
    assert_eq!(int_of(&again), 9);
}

#[test]
fn test_as_int_rejects_non_integers() {
    let f = Fixture::new();
    assert_eq!(f.constant(make_int64(4)).as_int().unwrap(), 4);
    let err = f.constant(make_string("x")).as_int().unwrap_err();
    assert_eq!(err.message, "can not convert constant \"x\" to int");

    let string = f.types().named_basic("string");
    f.map_words(0x1000, &[0, 0]);
    let err = f.value("s", 0x1000, string).as_int().unwrap_err();
    assert_eq!(err.message, "can not convert value of type string to int");
}

#[test]
fn test_unreadable_memory_is_recorded_not_returned() {
    let f = Fixture::new();
    let int = f.types().named_basic("int");
    let mut v = f.value("x", 0xdead_0000, int);
    v.load(&LoadConfig::FULL_VALUE);
    assert!(v.loaded);
    assert!(v.unreadable.is_some());
    assert!(v.check_readable().is_err());
}
