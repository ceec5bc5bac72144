//! Provider behaviour through the public API: store bookkeeping, proxy
//! routing and merge reconciliation.

use std::sync::Arc;
use std::thread;

use paramz::prelude::*;

const DEVICE_A: &str = r#"
id: device-a
enums:
  - id: direction
    values:
      - { code: 1, id: left, name: Left }
      - { code: 2, id: right, name: Right }
schemas:
  - id: main
    nodes:
      - id: x
        keys:
          - { id: gain, name: Gain, type: integer, default: 3, range: { min: 0, max: 10 } }
          - { id: dir, name: Direction, enum: direction, default: left }
"#;

const DEVICE_B: &str = r#"
id: device-b
enums:
  - id: direction
    values:
      - { code: 5, id: left, name: Left }
      - { code: 6, id: right, name: Right }
schemas:
  - id: main
    nodes:
      - id: x
        keys:
          - { id: gain, name: Gain, type: integer, default: 3, range: { min: 0, max: 20 } }
          - { id: dir, name: Direction, enum: direction, default: left }
"#;

fn store(text: &str) -> Arc<Store> {
    Arc::new(Store::new(Arc::new(Schema::parse(text).unwrap())))
}

fn read(param: &dyn Param, name: &str) -> Value {
    let mut list = ParamList::new();
    list.add(name);
    param.get(&mut list).unwrap();
    list.get(name).cloned().unwrap()
}

#[test]
fn test_store_set_get_and_counters() {
    let store = store(DEVICE_A);
    let mut list = ParamList::new();
    list.set("/x/gain", 4);

    for round in 1..=3 {
        store.set(&list).unwrap();
        assert_eq!(read(&*store, "/x/gain"), Value::Integer(4));
        assert_eq!(store.counter("/x/gain"), Some(round));
        assert_eq!(store.global_counter(), round);
    }
}

#[test]
fn test_store_rejections_leave_values_unchanged() {
    let store = store(DEVICE_A);
    let mut good = ParamList::new();
    good.set("/x/gain", 6).set("/x/dir", Value::Enum(2));
    store.set(&good).unwrap();

    let bad_batches = [
        {
            let mut l = ParamList::new();
            l.set("/x/gain", 1).set("/x/unknown", 1);
            l
        },
        {
            let mut l = ParamList::new();
            l.set("/x/gain", 1).set("/x/dir", "left");
            l
        },
        {
            let mut l = ParamList::new();
            l.set("/x/dir", Value::Enum(1)).set("/x/gain", 11);
            l
        },
    ];
    for batch in &bad_batches {
        assert!(store.set(batch).is_err());
        assert_eq!(read(&*store, "/x/gain"), Value::Integer(6));
        assert_eq!(read(&*store, "/x/dir"), Value::Enum(2));
    }
    assert_eq!(store.global_counter(), 2);
}

#[test]
fn test_store_readers_never_see_partial_batches() {
    let store = store(DEVICE_A);
    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..200 {
                let mut list = ParamList::new();
                let (gain, dir) = if i % 2 == 0 { (2, 2) } else { (1, 1) };
                list.set("/x/gain", gain).set("/x/dir", Value::Enum(dir));
                store.set(&list).unwrap();
            }
        })
    };
    for _ in 0..200 {
        let mut list: ParamList = ["/x/gain", "/x/dir"].into_iter().collect();
        store.get(&mut list).unwrap();
        let gain = list.get("/x/gain").and_then(Value::as_integer).unwrap();
        let dir = list.get("/x/dir").and_then(Value::as_enum_code).unwrap();
        // Both keys move together; the untouched state is (3, 1)
        assert!(
            (gain, dir) == (2, 2) || (gain, dir) == (1, 1) || (gain, dir) == (3, 1),
            "torn read: gain {gain}, dir {dir}"
        );
    }
    writer.join().unwrap();
}

#[test]
fn test_proxy_isolates_backends() {
    let a = store(DEVICE_A);
    let b = store(DEVICE_B);
    let mut builder = ProxyBuilder::new("rig");
    builder.register("/a", a.clone(), "/x").unwrap();
    builder.register("/b", b.clone(), "/x").unwrap();
    let proxy = builder.bind().unwrap();
    let schema = proxy.schema().unwrap();
    assert!(schema.contains("/a/gain"));
    assert!(schema.contains("/b/gain"));

    let mut list = ParamList::new();
    list.set("/a/gain", 5);
    proxy.set(&list).unwrap();
    assert_eq!(a.value("/x/gain"), Some(Value::Integer(5)));
    assert_eq!(b.value("/x/gain"), Some(Value::Integer(3)));
    assert_eq!(b.global_counter(), 0);

    // Composite ranges follow each backend
    let mut wide = ParamList::new();
    wide.set("/b/gain", 15);
    proxy.set(&wide).unwrap();
    wide.set("/a/gain", 15);
    assert!(proxy.set(&wide).is_err());
    assert_eq!(read(&proxy, "/a/gain"), Value::Integer(5));
}

#[test]
fn test_merge_translates_enum_codes() {
    let a = store(DEVICE_A);
    let b = store(DEVICE_B);
    let mut builder = MergeBuilder::new("pair");
    builder.add(a.clone()).unwrap().add(b.clone()).unwrap();
    let merge = builder.bind().unwrap();
    let schema = merge.schema().unwrap();

    let mut symbols: Vec<&str> = schema.key_enum("/x/dir").unwrap().symbols().collect();
    symbols.sort();
    assert_eq!(symbols, vec!["left", "right"]);
    assert!(merge.kept().is_empty());

    let right = schema.enum_code("/x/dir", "right").unwrap();
    let mut list = ParamList::new();
    list.set("/x/dir", Value::Enum(right));
    merge.set(&list).unwrap();
    assert_eq!(a.value("/x/dir"), Some(Value::Enum(2)));
    assert_eq!(b.value("/x/dir"), Some(Value::Enum(6)));

    let left = schema.enum_code("/x/dir", "left").unwrap();
    list.set("/x/dir", Value::Enum(left));
    merge.set(&list).unwrap();
    assert_eq!(a.value("/x/dir"), Some(Value::Enum(1)));
    assert_eq!(b.value("/x/dir"), Some(Value::Enum(5)));
    assert_eq!(read(&merge, "/x/dir"), Value::Enum(left));
}

#[test]
fn test_merge_keeps_diverged_keys() {
    let a = store(DEVICE_A);
    let b = store(DEVICE_B);
    let mut diverge = ParamList::new();
    diverge.set("/x/gain", 9);
    b.set(&diverge).unwrap();

    let mut builder = MergeBuilder::new("pair");
    builder.add(a.clone()).unwrap().add(b.clone()).unwrap();
    let merge = builder.bind().unwrap();
    assert_eq!(merge.is_kept("/x/gain"), Some(true));
    assert_eq!(merge.is_kept("/x/dir"), Some(false));

    let mut list = ParamList::new();
    list.set("/x/gain", 2).set("/x/dir", Value::Enum(2));
    merge.set(&list).unwrap();
    assert_eq!(a.value("/x/gain"), Some(Value::Integer(3)));
    assert_eq!(b.value("/x/gain"), Some(Value::Integer(9)));
    assert_eq!(a.counter("/x/gain"), Some(0));
    assert_eq!(b.counter("/x/gain"), Some(1));
    assert_eq!(a.value("/x/dir"), Some(Value::Enum(2)));
    assert_eq!(b.value("/x/dir"), Some(Value::Enum(6)));
}

#[test]
fn test_providers_compose() {
    // A merge of two stores, mounted in a proxy next to a controller
    let a = store(DEVICE_A);
    let b = store(DEVICE_B);
    let mut merge = MergeBuilder::new("pair");
    merge.add(a.clone()).unwrap().add(b.clone()).unwrap();
    let merge = Arc::new(merge.bind().unwrap());

    let schema = Arc::new(
        Schema::parse("id: pump\nschemas:\n  - id: m\n    keys: [{ id: rate, type: double, default: 1.0 }]\n")
            .unwrap(),
    );
    let mut controller = Controller::new(schema, 1.0f64);
    controller
        .bind(
            "/rate",
            |r: &f64, _| Value::Real(*r),
            |r: &mut f64, _, v| {
                *r = v.as_real().unwrap_or(*r);
                true
            },
        )
        .unwrap();
    let controller = Arc::new(controller);

    let mut builder = ProxyBuilder::new("station");
    builder.register("/sonar", merge.clone(), "/x").unwrap();
    builder.register("/pump", controller.clone(), "/").unwrap();
    let proxy = builder.bind().unwrap();

    let mut list = ParamList::new();
    list.set("/sonar/gain", 8).set("/pump/rate", 2.5);
    proxy.set(&list).unwrap();
    assert_eq!(a.value("/x/gain"), Some(Value::Integer(8)));
    assert_eq!(b.value("/x/gain"), Some(Value::Integer(8)));
    assert_eq!(*controller.storage(), 2.5);
    assert_eq!(read(&proxy, "/pump/rate"), Value::Real(2.5));
}
