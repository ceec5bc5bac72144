use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use paramz::prelude::*;
use paramz::{Key, KeySpec};
use serde::Serialize;
use tracing::{debug, info};

use crate::CliResult;

/// One row of `keys` output.
#[derive(Debug, Serialize)]
struct KeyRow {
    path: String,
    name: String,
    kind: String,
    flags: Vec<String>,
    default: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    values: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    view: String,
}

impl KeyRow {
    fn new(schema: &Schema, key: &Key) -> Self {
        let (min, max, step) = match &key.spec {
            KeySpec::Integer { range, .. } => (
                Some(range.min.to_string()),
                Some(range.max.to_string()),
                Some(range.step.to_string()),
            ),
            KeySpec::Real { range, .. } => (
                Some(range.min.to_string()),
                Some(range.max.to_string()),
                Some(range.step.to_string()),
            ),
            _ => (None, None, None),
        };
        let default = match key.default_value() {
            Value::Enum(code) => schema
                .enum_symbol(&key.path, code)
                .map(str::to_string)
                .unwrap_or_else(|| code.to_string()),
            other => other.to_string(),
        };
        let values = schema
            .key_enum(&key.path)
            .map(|e| e.symbols().map(str::to_string).collect())
            .unwrap_or_default();
        Self {
            path: key.path.clone(),
            name: key.name.clone(),
            kind: key.kind().to_string(),
            flags: key.access.flags(),
            default,
            min,
            max,
            step,
            values,
            view: key.view.clone(),
        }
    }
}

fn load(schema: &Path, overrides: Option<&Path>) -> CliResult<Schema> {
    let text = fs::read_to_string(schema)?;
    let parsed = match overrides {
        Some(path) => {
            let overrides = Overrides::parse(&fs::read_to_string(path)?)?;
            debug!(
                "loaded {} overrides from {}",
                overrides.len(),
                path.display()
            );
            Schema::parse_with_overrides(&text, &overrides)?
        }
        None => Schema::parse(&text)?,
    };
    Ok(parsed)
}

pub fn check(schema: &Path, overrides: Option<&Path>) -> CliResult {
    let parsed = load(schema, overrides)?;
    println!(
        "{}: {} keys, {} enums",
        parsed.id(),
        parsed.len(),
        parsed.enum_types().count()
    );
    println!("fingerprint {}", parsed.fingerprint());
    Ok(())
}

pub fn keys(schema: &Path, overrides: Option<&Path>, json: bool) -> CliResult {
    let parsed = load(schema, overrides)?;
    let rows: Vec<KeyRow> = parsed.keys().map(|k| KeyRow::new(&parsed, k)).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in &rows {
        let range = match (&row.min, &row.max) {
            (Some(min), Some(max)) => format!(" [{min}, {max}]"),
            _ if !row.values.is_empty() => format!(" {{{}}}", row.values.join(", ")),
            _ => String::new(),
        };
        let flags = if row.flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", row.flags.join(", "))
        };
        println!(
            "{:<32} {:<8} = {}{}{}",
            row.path, row.kind, row.default, range, flags
        );
    }
    Ok(())
}

pub fn canonical(schema: &Path) -> CliResult {
    let parsed = load(schema, None)?;
    let mut builder = SchemaBuilder::new(parsed.id());
    builder.join(&parsed, "/", "/")?;
    print!("{}", builder.to_text()?);
    Ok(())
}

pub fn merge(schemas: &[PathBuf]) -> CliResult {
    let mut stores = Vec::with_capacity(schemas.len());
    let mut builder = MergeBuilder::new("merged");
    for path in schemas {
        let store = Arc::new(Store::new(Arc::new(load(path, None)?)));
        builder.add(store.clone())?;
        stores.push(store);
    }
    let merge = builder.bind()?;
    let Some(schema) = merge.schema() else {
        return Err("merge produced no schema".into());
    };
    info!(
        "merged {} schemas into {} keys",
        stores.len(),
        schema.len()
    );

    for key in schema.keys() {
        let row = KeyRow::new(&schema, key);
        let kept = if merge.is_kept(&key.path).unwrap_or(false) {
            " keep"
        } else {
            ""
        };
        println!("{:<32} {:<8} = {}{}", row.path, row.kind, row.default, kept);
    }
    Ok(())
}
