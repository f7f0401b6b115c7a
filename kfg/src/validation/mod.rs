use crate::error::{FieldError, KfgError, Result};
use crate::schema::{CompiledSchema, FieldKind};
use crate::util::{get_path, set_path, type_name};
use serde_json::Value;

/// Apply schema defaults in place. A field counts as unset when it is
/// missing or null. In `only_importants` mode non-important fields are
/// fully optional and stay unset.
pub fn apply_defaults(compiled: &CompiledSchema, data: &mut Value) {
    for field in &compiled.fields {
        if compiled.only_importants && !field.def.important {
            continue;
        }
        let unset = matches!(get_path(data, &field.path), None | Some(Value::Null));
        if unset {
            if let Some(default) = &field.def.default {
                set_path(data, &field.path, default.clone());
            }
        }
    }
}

/// Attempt to coerce a value to the given kind. Returns None when the
/// value cannot represent the kind.
pub fn coerce(kind: FieldKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (FieldKind::String, Value::String(_)) => Some(value.clone()),
        (FieldKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldKind::Number, Value::Number(_)) => Some(value.clone()),
        (FieldKind::Number, Value::String(s)) => {
            if let Ok(i) = s.parse::<i64>() {
                Some(Value::Number(i.into()))
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::Number::from_f64(f).map(Value::Number)
            } else {
                None
            }
        }
        (FieldKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldKind::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::Object, Value::Object(_)) => Some(value.clone()),
        (FieldKind::Object, Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => Some(parsed),
            _ => None,
        },
        (FieldKind::Array, Value::Array(_)) => Some(value.clone()),
        (FieldKind::Array, Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Array(_)) => Some(parsed),
            _ => None,
        },
        _ => None,
    }
}

/// Validate one schema-conforming object in place: coerce field values,
/// check kinds, enforce required fields, run refines. Returns the
/// collected field errors; an empty list means the value passed.
pub fn validate_value(compiled: &CompiledSchema, data: &mut Value) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for field in &compiled.fields {
        let current = get_path(data, &field.path).cloned();

        let present = match &current {
            None | Some(Value::Null) => false,
            Some(_) => true,
        };

        if !present {
            if field.required {
                errors.push(FieldError {
                    path: field.path.clone(),
                    expected: field
                        .def
                        .kind
                        .map(|k| k.name().to_string())
                        .unwrap_or_else(|| "value".into()),
                    received: "nothing".into(),
                    message: "required field is missing".into(),
                });
            }
            continue;
        }

        let value = current.unwrap();

        let checked = match field.def.kind {
            Some(kind) => match coerce(kind, &value) {
                Some(coerced) => {
                    if coerced != value {
                        set_path(data, &field.path, coerced.clone());
                    }
                    coerced
                }
                None => {
                    errors.push(FieldError {
                        path: field.path.clone(),
                        expected: kind.name().into(),
                        received: type_name(&value).into(),
                        message: "type mismatch".into(),
                    });
                    continue;
                }
            },
            None => value,
        };

        for refine in &field.def.refines {
            if let Err(message) = (refine.0)(&checked) {
                errors.push(FieldError {
                    path: field.path.clone(),
                    expected: "refined value".into(),
                    received: type_name(&checked).into(),
                    message,
                });
            }
        }
    }

    errors
}

/// Fill defaults, coerce, and validate. In multimode the root is a
/// mapping from record id to one schema-conforming object and every
/// record is validated independently; field errors carry the record id
/// as a path prefix.
pub fn validate_and_prepare(
    compiled: &CompiledSchema,
    data: &mut Value,
    multimode: bool,
) -> Result<()> {
    if !multimode {
        apply_defaults(compiled, data);
        let errors = validate_value(compiled, data);
        if !errors.is_empty() {
            return Err(KfgError::Validation(errors));
        }
        return Ok(());
    }

    let records = match data.as_object_mut() {
        Some(map) => map,
        None => {
            return Err(KfgError::validation(
                "",
                "object of records",
                type_name(data),
                "multimode data must map record ids to objects",
            ))
        }
    };

    let mut errors = Vec::new();
    for (id, record) in records.iter_mut() {
        if !record.is_object() {
            errors.push(FieldError {
                path: id.clone(),
                expected: "object".into(),
                received: type_name(record).into(),
                message: "record must be an object".into(),
            });
            continue;
        }
        apply_defaults(compiled, record);
        for mut error in validate_value(compiled, record) {
            error.path = format!("{id}.{}", error.path);
            errors.push(error);
        }
    }

    if !errors.is_empty() {
        return Err(KfgError::Validation(errors));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, CompiledSchema, FieldDefinition, SchemaNode};
    use serde_json::json;

    fn compiled() -> CompiledSchema {
        let schema = parse_schema_str(
            r#"
app:
  port: { type: number, default: 3000 }
  host: { type: string, default: localhost }
name: { type: string, important: true }
debug: { type: boolean, default: false }
tags: { type: array }
"#,
        )
        .unwrap();
        CompiledSchema::compile(&schema, false).unwrap()
    }

    #[test]
    fn test_apply_defaults() {
        let compiled = compiled();
        let mut data = json!({ "name": "svc" });
        apply_defaults(&compiled, &mut data);
        assert_eq!(data["app"]["port"], json!(3000));
        assert_eq!(data["app"]["host"], json!("localhost"));
        assert_eq!(data["debug"], json!(false));
    }

    #[test]
    fn test_defaults_dont_overwrite() {
        let compiled = compiled();
        let mut data = json!({ "name": "svc", "app": { "port": 9090 } });
        apply_defaults(&compiled, &mut data);
        assert_eq!(data["app"]["port"], json!(9090));
    }

    #[test]
    fn test_missing_required() {
        let compiled = compiled();
        let mut data = json!({});
        apply_defaults(&compiled, &mut data);
        let errors = validate_value(&compiled, &mut data);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "name");
    }

    #[test]
    fn test_string_to_number_coercion() {
        let compiled = compiled();
        let mut data = json!({ "name": "svc", "app": { "port": "8080" } });
        let errors = validate_value(&compiled, &mut data);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(data["app"]["port"], json!(8080));
    }

    #[test]
    fn test_bool_coercion() {
        let compiled = compiled();
        let mut data = json!({ "name": "svc", "debug": "true" });
        let errors = validate_value(&compiled, &mut data);
        assert!(errors.is_empty());
        assert_eq!(data["debug"], json!(true));
    }

    #[test]
    fn test_type_mismatch_reported() {
        let compiled = compiled();
        let mut data = json!({ "name": "svc", "app": { "port": "not-a-number" } });
        let errors = validate_value(&compiled, &mut data);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "app.port");
        assert_eq!(errors[0].expected, "number");
        assert_eq!(errors[0].received, "string");
    }

    #[test]
    fn test_array_from_json_text() {
        let compiled = compiled();
        let mut data = json!({ "name": "svc", "tags": "[\"a\",\"b\"]" });
        let errors = validate_value(&compiled, &mut data);
        assert!(errors.is_empty());
        assert_eq!(data["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_refine() {
        let schema = SchemaNode::namespace([(
            "port",
            SchemaNode::leaf(FieldDefinition::number().refine(|v| {
                if v.as_i64().map(|p| p > 0 && p < 65536).unwrap_or(false) {
                    Ok(())
                } else {
                    Err("port out of range".into())
                }
            })),
        )]);
        let compiled = CompiledSchema::compile(&schema, false).unwrap();

        let mut ok = json!({ "port": 8080 });
        assert!(validate_value(&compiled, &mut ok).is_empty());

        let mut bad = json!({ "port": 99999 });
        let errors = validate_value(&compiled, &mut bad);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "port out of range");
    }

    #[test]
    fn test_only_importants_still_type_checks() {
        let schema = parse_schema_str(
            r#"
name: { type: string, important: true }
app:
  port: { type: number, default: 3000 }
"#,
        )
        .unwrap();
        let compiled = CompiledSchema::compile(&schema, true).unwrap();

        // optional fields get no default but a present value is checked
        let mut data = json!({ "name": "svc" });
        apply_defaults(&compiled, &mut data);
        assert!(data.get("app").is_none());

        let mut bad = json!({ "name": "svc", "app": { "port": "not-a-number" } });
        let errors = validate_value(&compiled, &mut bad);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "app.port");

        // important fields stay required
        let mut missing = json!({});
        let errors = validate_value(&compiled, &mut missing);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "name");
    }

    #[test]
    fn test_multimode_per_record() {
        let compiled = compiled();
        let mut data = json!({
            "1": { "name": "a" },
            "2": {},
        });
        let err = validate_and_prepare(&compiled, &mut data, true).unwrap_err();
        match err {
            KfgError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].path, "2.name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_multimode_fills_defaults_per_record() {
        let compiled = compiled();
        let mut data = json!({ "1": { "name": "a" } });
        validate_and_prepare(&compiled, &mut data, true).unwrap();
        assert_eq!(data["1"]["app"]["port"], json!(3000));
    }
}
