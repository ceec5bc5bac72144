//! Schema-level properties: numeric range checks and the builder round trip.

use paramz::prelude::*;
use paramz::{IntegerRange, KeySpec};
use proptest::prelude::*;

const SONAR: &str = r#"
id: sonar
enums:
  - id: direction
    values:
      - { code: 1, id: left, name: Left, description: Port side }
      - { code: 2, id: right, name: Right }
  - id: mode
    values:
      - { code: 0, id: idle, name: Idle }
      - { code: 7, id: ping, name: Ping }
schemas:
  - id: transducer
    name: Transducer
    keys:
      - { id: frequency, name: Frequency, type: double, default: 200.0, range: { min: 50.0, max: 400.0, step: 0.5 } }
      - { id: mode, name: Mode, enum: mode, default: ping, flags: [hidden] }
  - id: main
    name: Sonar
    description: Multibeam head
    keys:
      - { id: gain, name: Gain, type: integer, default: 5, range: { min: 0, max: 10, step: 1 }, view: hex }
      - { id: serial, name: Serial, type: string, default: SN-1, flags: [readonly], description: Factory serial }
      - { id: armed, name: Armed, type: boolean, flags: [writeonly] }
    nodes:
      - id: port
        name: Port
        schema: transducer
      - id: beam
        name: Beam
        description: Beam forming
        keys:
          - { id: side, name: Side, enum: direction, default: right }
          - { id: width, name: Width, type: double, default: 1.5, range: { min: 0.5, max: 3.0 } }
"#;

#[test]
fn test_every_numeric_default_is_within_range() {
    let schema = Schema::parse(SONAR).unwrap();
    for key in schema.keys() {
        match &key.spec {
            KeySpec::Integer { default, range } => {
                assert!(range.min <= *default && *default <= range.max);
                assert!(schema.check(&key.path, &Value::Integer(*default)));
                assert!(!schema.check(&key.path, &Value::Integer(range.max + range.step)));
                assert!(!schema.check(&key.path, &Value::Integer(range.min - range.step)));
            }
            KeySpec::Real { default, range } => {
                assert!(range.min <= *default && *default <= range.max);
                assert!(schema.check(&key.path, &Value::Real(*default)));
                let step = if range.step > 0.0 { range.step } else { 0.1 };
                assert!(!schema.check(&key.path, &Value::Real(range.max + step)));
                assert!(!schema.check(&key.path, &Value::Real(range.min - step)));
            }
            _ => {}
        }
    }
}

#[test]
fn test_builder_join_round_trip() {
    let source = Schema::parse(SONAR).unwrap();
    let mut builder = SchemaBuilder::new(source.id());
    builder.join(&source, "/", "/").unwrap();
    let text = builder.to_text().unwrap();
    let copy = Schema::parse(&text).unwrap();

    assert_eq!(
        copy.key_paths().collect::<Vec<_>>(),
        source.key_paths().collect::<Vec<_>>()
    );
    for key in source.keys() {
        let other = copy.key(&key.path).unwrap();
        assert_eq!(other.kind(), key.kind());
        assert_eq!(other.access, key.access);
        assert_eq!(other.view, key.view);
        assert_eq!(other.name, key.name);
        assert_eq!(other.description, key.description);
        assert_eq!(copy.integer_range(&key.path), source.integer_range(&key.path));
        assert_eq!(copy.real_range(&key.path), source.real_range(&key.path));
        assert_eq!(copy.default_value(&key.path), source.default_value(&key.path));
        if let Some(source_enum) = source.key_enum(&key.path) {
            let copy_enum = copy.key_enum(&key.path).unwrap();
            assert_eq!(copy_enum.values, source_enum.values);
        }
    }
    assert_eq!(copy.root(), source.root());
    assert_eq!(copy.root().name.as_deref(), Some("Sonar"));
    assert_eq!(
        copy.node("/beam").unwrap().description.as_deref(),
        Some("Beam forming")
    );

    // Emitting the copy again yields the same canonical text
    let mut again = SchemaBuilder::new(copy.id());
    again.join(&copy, "/", "/").unwrap();
    assert_eq!(again.to_text().unwrap(), text);
    assert_eq!(
        Schema::parse(&text).unwrap().fingerprint(),
        copy.fingerprint()
    );
}

#[test]
fn test_overrides_text_drives_parse() {
    let overrides = Overrides::parse(
        r#"
# tighter limits for the bench unit
[key."/gain"]
type = "integer"
default = 2
min = 1
max = 4
step = 1
readonly = false

[enum.direction]
values = [
    { code = 10, id = "left", name = "Left" },
    { code = 20, id = "right", name = "Right" },
    { code = 30, id = "ahead", name = "Ahead", description = "Straight on" },
]
"#,
    )
    .unwrap();
    let schema = Schema::parse_with_overrides(SONAR, &overrides).unwrap();
    assert_eq!(
        schema.integer_range("/gain"),
        Some(IntegerRange {
            min: 1,
            max: 4,
            step: 1
        })
    );
    assert_eq!(schema.default_value("/gain"), Some(Value::Integer(2)));
    assert_eq!(schema.default_value("/beam/side"), Some(Value::Enum(20)));
    assert_eq!(schema.enum_values("direction").unwrap().len(), 3);
    assert_eq!(Overrides::parse(&overrides.to_text().unwrap()).unwrap(), overrides);
}

fn integer_key() -> impl Strategy<Value = (i64, i64, i64, i64)> {
    (-1_000_000i64..1_000_000, 0i64..1_000, 1i64..10).prop_flat_map(|(min, span, step)| {
        let max = min + span;
        (Just(min), Just(max), min..=max, Just(step))
    })
}

fn real_key() -> impl Strategy<Value = (f64, f64, f64, f64)> {
    (-1.0e6f64..1.0e6, 0.0f64..1.0e3, 0.001f64..10.0).prop_flat_map(|(min, span, step)| {
        let max = min + span;
        (Just(min), Just(max), min..=max, Just(step))
    })
}

proptest! {
    #[test]
    fn integer_range_checks_hold((min, max, default, step) in integer_key()) {
        let mut builder = SchemaBuilder::new("prop");
        builder.create_integer("/k", "K", default).unwrap();
        builder.set_integer_range("/k", min, max, step).unwrap();
        let schema = builder.build().unwrap();

        prop_assert!(schema.check("/k", &Value::Integer(default)));
        prop_assert!(schema.check("/k", &Value::Integer(min)));
        prop_assert!(schema.check("/k", &Value::Integer(max)));
        prop_assert!(!schema.check("/k", &Value::Integer(min - step)));
        prop_assert!(!schema.check("/k", &Value::Integer(max + step)));
        prop_assert!(!schema.check("/k", &Value::Real(default as f64)));
    }

    #[test]
    fn real_range_checks_hold((min, max, default, step) in real_key()) {
        let mut builder = SchemaBuilder::new("prop");
        builder.create_real("/k", "K", default).unwrap();
        builder.set_real_range("/k", min, max, step).unwrap();
        let schema = builder.build().unwrap();

        prop_assert!(schema.check("/k", &Value::Real(default)));
        prop_assert!(!schema.check("/k", &Value::Real(min - step)));
        prop_assert!(!schema.check("/k", &Value::Real(max + step)));
        prop_assert_eq!(schema.default_value("/k"), Some(Value::Real(default)));
    }

    #[test]
    fn inverted_integer_ranges_are_rejected(min in -1000i64..1000, gap in 1i64..1000) {
        let mut builder = SchemaBuilder::new("prop");
        builder.create_integer("/k", "K", min).unwrap();
        let result = builder.set_integer_range("/k", min, min - gap, 1);
        prop_assert!(matches!(result, Err(BuildError::RangeInverted { .. })), "expected RangeInverted, got {:?}", result);
    }
}
