mod support;

use std::collections::{BTreeMap, HashMap};

use ice_encoding::{
    new_value, Error, InputStream, OptionalFormat, OutputStream, StreamConfig, ValueSlot,
    ENCODING_1_0, ENCODING_1_1,
};
use support::{full_registry, Derived, Node};

fn encaps(write: impl FnOnce(&mut OutputStream)) -> Vec<u8> {
    let mut os = OutputStream::with_encoding(ENCODING_1_1);
    os.start_encapsulation().unwrap();
    write(&mut os);
    os.end_encapsulation().unwrap();
    os.finished()
}

#[test]
fn tagged_header_wire_matrix() {
    let cases: [(u32, OptionalFormat, &[u8]); 5] = [
        (0, OptionalFormat::F1, &[0x00]),
        (3, OptionalFormat::F4, &[0x1a]),
        (29, OptionalFormat::VSize, &[0xed]),
        (30, OptionalFormat::FSize, &[0xf6, 30]),
        (300, OptionalFormat::Class, &[0xf7, 0xff, 0x2c, 0x01, 0, 0]),
    ];
    for (tag, format, expected) in cases {
        let mut os = OutputStream::with_encoding(ENCODING_1_1);
        assert!(os.write_optional(tag, format).unwrap());
        assert_eq!(os.finished(), expected, "tag {tag}");
    }

    let mut os = OutputStream::with_encoding(ENCODING_1_0);
    assert!(!os.write_optional(1, OptionalFormat::F4).unwrap());
    assert!(os.finished().is_empty());
}

#[test]
fn tagged_values_round_trip_in_tag_order() {
    let mut dict = BTreeMap::new();
    dict.insert(1i32, "one".to_string());
    dict.insert(2, "two".to_string());
    let mut fixed = HashMap::new();
    fixed.insert(7i16, 0.5f64);

    let bytes = encaps(|os| {
        os.write_tagged(1, Some(&true)).unwrap();
        os.write_tagged(2, Some(&0x7fu8)).unwrap();
        os.write_tagged(3, Some(&-3i16)).unwrap();
        os.write_tagged(4, Some(&123_456i32)).unwrap();
        os.write_tagged(5, Some(&1.5f32)).unwrap();
        os.write_tagged(6, Some(&-9_000_000_000i64)).unwrap();
        os.write_tagged(7, Some(&2.25f64)).unwrap();
        os.write_tagged(8, Some(&"tagged".to_string())).unwrap();
        os.write_tagged(9, Some(&vec![1u8, 2, 3])).unwrap();
        os.write_tagged(10, Some(&vec![10i32, 20])).unwrap();
        os.write_tagged(11, Some(&vec!["a".to_string(), "bc".to_string()]))
            .unwrap();
        os.write_tagged(12, Some(&dict)).unwrap();
        os.write_tagged(13, Some(&fixed)).unwrap();
        os.write_tagged(500, Some(&42i32)).unwrap();
    });

    let mut is = InputStream::with_encoding(&bytes, ENCODING_1_1);
    is.start_encapsulation().unwrap();
    assert_eq!(is.read_tagged::<bool>(1).unwrap(), Some(true));
    assert_eq!(is.read_tagged::<u8>(2).unwrap(), Some(0x7f));
    assert_eq!(is.read_tagged::<i16>(3).unwrap(), Some(-3));
    assert_eq!(is.read_tagged::<i32>(4).unwrap(), Some(123_456));
    assert_eq!(is.read_tagged::<f32>(5).unwrap(), Some(1.5));
    assert_eq!(is.read_tagged::<i64>(6).unwrap(), Some(-9_000_000_000));
    assert_eq!(is.read_tagged::<f64>(7).unwrap(), Some(2.25));
    assert_eq!(
        is.read_tagged::<String>(8).unwrap().as_deref(),
        Some("tagged")
    );
    assert_eq!(is.read_tagged::<Vec<u8>>(9).unwrap(), Some(vec![1, 2, 3]));
    assert_eq!(is.read_tagged::<Vec<i32>>(10).unwrap(), Some(vec![10, 20]));
    assert_eq!(
        is.read_tagged::<Vec<String>>(11).unwrap(),
        Some(vec!["a".to_string(), "bc".to_string()])
    );
    assert_eq!(is.read_tagged::<BTreeMap<i32, String>>(12).unwrap(), Some(dict));
    assert_eq!(is.read_tagged::<HashMap<i16, f64>>(13).unwrap(), Some(fixed));
    assert_eq!(is.read_tagged::<i32>(500).unwrap(), Some(42));
    is.end_encapsulation().unwrap();
}

#[test]
fn absent_and_skipped_tags() {
    let bytes = encaps(|os| {
        os.write_tagged(1, Some(&1i32)).unwrap();
        os.write_tagged(2, Some(&"skip me".to_string())).unwrap();
        os.write_tagged(3, Some(&vec!["x".to_string()])).unwrap();
        os.write_tagged(4, Some(&7i64)).unwrap();
        os.write_tagged(31, Some(&1u8)).unwrap();
        os.write_tagged(40, Some(&2i16)).unwrap();
    });

    let mut is = InputStream::with_encoding(&bytes, ENCODING_1_1);
    is.start_encapsulation().unwrap();
    // Tag 0 was never written; nothing is consumed.
    let pos = is.pos();
    assert_eq!(is.read_tagged::<i32>(0).unwrap(), None);
    assert_eq!(is.pos(), pos);
    // Tags 1 to 3 are skipped on the way to 4.
    assert_eq!(is.read_tagged::<i64>(4).unwrap(), Some(7));
    // A missing tag between present ones leaves the next header in place.
    assert_eq!(is.read_tagged::<u8>(30).unwrap(), None);
    assert_eq!(is.read_tagged::<u8>(31).unwrap(), Some(1));
    assert_eq!(is.read_tagged::<i16>(35).unwrap(), None);
    assert_eq!(is.read_tagged::<i16>(40).unwrap(), Some(2));
    assert_eq!(is.read_tagged::<i16>(41).unwrap(), None);
    is.end_encapsulation().unwrap();
}

#[test]
fn absent_values_write_nothing() {
    let bytes = encaps(|os| {
        os.write_tagged::<i32>(1, None).unwrap();
        os.write_tagged_value(2, None).unwrap();
    });
    assert_eq!(bytes, [6, 0, 0, 0, 1, 1]);
}

#[test]
fn format_mismatch_is_a_marshal_error() {
    let bytes = encaps(|os| os.write_tagged(5, Some(&1i32)).unwrap());
    let mut is = InputStream::with_encoding(&bytes, ENCODING_1_1);
    is.start_encapsulation().unwrap();
    let err = is.read_tagged::<i64>(5).unwrap_err();
    assert_eq!(
        err,
        Error::marshal("invalid optional data member `5': unexpected format")
    );
}

#[test]
fn one_zero_has_no_tagged_members() {
    let mut os = OutputStream::with_encoding(ENCODING_1_0);
    os.write_tagged(1, Some(&5i32)).unwrap();
    os.write_int(9);
    let bytes = os.finished();
    assert_eq!(bytes, [9, 0, 0, 0]);

    let mut is = InputStream::with_encoding(&bytes, ENCODING_1_0);
    assert_eq!(is.read_tagged::<i32>(1).unwrap(), None);
    assert_eq!(is.read_int().unwrap(), 9);
}

#[test]
fn tagged_class_members() {
    let v = new_value(Node::new(21));
    let bytes = encaps(|os| {
        os.write_tagged_value(1, Some(&v)).unwrap();
        os.write_tagged_value(2, Some(&v)).unwrap();
        os.write_tagged(3, Some(&5i32)).unwrap();
    });

    let mut is = InputStream::new(&bytes, StreamConfig::default(), full_registry());
    is.start_encapsulation().unwrap();
    let first = is.read_tagged_value(1).unwrap().unwrap();
    let second = is.read_tagged_value(2).unwrap().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.downcast::<Node, _>(|n| n.value), Some(21));
    assert_eq!(is.read_tagged::<i32>(3).unwrap(), Some(5));
    is.end_encapsulation().unwrap();

    // Skipping a tagged instance still unmarshals it.
    let mut is = InputStream::new(&bytes, StreamConfig::default(), full_registry());
    is.start_encapsulation().unwrap();
    assert_eq!(is.read_tagged::<i32>(3).unwrap(), Some(5));
    is.end_encapsulation().unwrap();
}

#[test]
fn tagged_members_in_class_slices() {
    for extra in [None, Some(-1)] {
        let v = new_value(Derived {
            id: 1,
            label: "d".into(),
            extra,
            peer: ValueSlot::new(),
        });
        let mut os = OutputStream::with_encoding(ENCODING_1_1);
        os.write_value(Some(&v)).unwrap();
        let bytes = os.finished();

        let mut is = InputStream::new(&bytes, StreamConfig::default(), full_registry());
        let slot = is.read_value().unwrap();
        assert_eq!(slot.downcast::<Derived, _>(|d| d.extra), Some(extra));
        assert_eq!(is.remaining(), 0);
    }
}

#[test]
fn tagged_enums_use_the_size_format() {
    let bytes = encaps(|os| {
        os.write_tagged_enum(1, Some(3), 10).unwrap();
        os.write_tagged_enum(2, None, 10).unwrap();
        os.write_tagged_enum(3, Some(300), 1000).unwrap();
    });
    assert_eq!(bytes, [14, 0, 0, 0, 1, 1, 0x0c, 3, 0x1c, 0xff, 0x2c, 0x01, 0, 0]);

    let mut is = InputStream::with_encoding(&bytes, ENCODING_1_1);
    is.start_encapsulation().unwrap();
    assert_eq!(is.read_tagged_enum(1, 10).unwrap(), Some(3));
    assert_eq!(is.read_tagged_enum(2, 10).unwrap(), None);
    assert!(is.read_tagged_enum(3, 100).unwrap_err().is_marshal_error());

    // An enumerator skipped on the way to a later tag is a single size.
    let bytes = encaps(|os| {
        os.write_tagged_enum(1, Some(300), 1000).unwrap();
        os.write_tagged(2, Some(&9i32)).unwrap();
    });
    let mut is = InputStream::with_encoding(&bytes, ENCODING_1_1);
    is.start_encapsulation().unwrap();
    assert_eq!(is.read_tagged::<i32>(2).unwrap(), Some(9));
    is.end_encapsulation().unwrap();
}
