//! Parameter Model: typed parameter declarations, request-payload parsing,
//! claim-substitution, and manifest generation.
//!
//! Parsing is deterministic and purely functional over (declaration, input,
//! claims) — it never touches the network, matching the guarantee in the
//! design document's Parameter Model section.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// A parameter's primitive or composite type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// UTF-8 string
    String,
    /// Signed 64-bit integer
    Integer,
    /// Double-precision float
    Float,
    /// Boolean
    Boolean,
    /// Array of a nested element type
    Array(Box<ParamType>),
}

impl ParamType {
    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
        }
    }

    /// The JSON-schema `type` this maps to for an MCP `inputSchema`.
    fn json_schema_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
        }
    }
}

/// A binding from a parameter to an auth service's verified claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServiceBinding {
    /// Name of the auth service (must match a registered `AuthService`).
    #[serde(rename = "service")]
    pub service_name: String,
    /// Name of the claim field within that service's claim map.
    pub field: String,
}

/// A raw declaration fragment as it appears in YAML (`parameters: [...]`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawParamDecl {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default, rename = "authServices")]
    auth_services: Vec<AuthServiceBinding>,
    /// Nested declaration for `type: array` — the element type.
    #[serde(default)]
    items: Option<Box<RawParamDecl>>,
}

/// A declared parameter: name, type, description, required/default, and
/// optional auth-service binding.
#[derive(Debug, Clone)]
pub struct ParameterDeclaration {
    /// Parameter name (unique within its tool)
    pub name: String,
    /// Declared type
    pub param_type: ParamType,
    /// Human-facing description
    pub description: String,
    /// Whether the parameter must be present (payload, claim, or default)
    pub required: bool,
    /// Default value used when absent from both payload and claims
    pub default: Option<Value>,
    /// Auth services this parameter may be sourced from, in priority order
    pub auth_services: Vec<AuthServiceBinding>,
}

impl ParameterDeclaration {
    /// Declare a parameter list from its YAML configuration fragment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a declared type is unrecognized.
    pub fn declare_all(raw: &[RawParamDecl]) -> Result<Vec<Self>> {
        raw.iter().map(Self::declare).collect()
    }

    fn declare(raw: &RawParamDecl) -> Result<Self> {
        let param_type = Self::parse_type(&raw.type_name, raw.items.as_deref())?;
        let required = raw.required.unwrap_or(raw.default.is_none());
        Ok(Self {
            name: raw.name.clone(),
            param_type,
            description: raw.description.clone(),
            required,
            default: raw.default.clone(),
            auth_services: raw.auth_services.clone(),
        })
    }

    fn parse_type(name: &str, items: Option<&RawParamDecl>) -> Result<ParamType> {
        match name {
            "string" => Ok(ParamType::String),
            "integer" => Ok(ParamType::Integer),
            "float" => Ok(ParamType::Float),
            "boolean" => Ok(ParamType::Boolean),
            "array" => {
                let item_decl = items
                    .ok_or_else(|| Error::Config("array parameter missing 'items'".into()))?;
                let item_type = Self::parse_type(&item_decl.type_name, item_decl.items.as_deref())?;
                Ok(ParamType::Array(Box::new(item_type)))
            }
            other => Err(Error::Config(format!("unknown parameter type: {other}"))),
        }
    }
}

/// A bound, typed value produced by [`bind`].
#[derive(Debug, Clone)]
pub struct ParameterValue {
    /// Parameter name
    pub name: String,
    /// Typed value
    pub value: Value,
}

/// Per-service verified claim maps, keyed by auth-service name.
pub type ClaimMap = HashMap<String, HashMap<String, Value>>;

/// Bind a declared parameter list against an incoming payload and claim map.
///
/// For each declaration: if it has any `authServices`, the first service for
/// which claims are present supplies the value (via the named claim field);
/// otherwise the payload is consulted by parameter name; otherwise the
/// default; otherwise binding fails with a missing-parameter error. The
/// binding set per parameter is disjoint — payload and claims are never both
/// consulted for the same parameter. Order of emitted values follows
/// declaration order regardless of payload-map ordering.
///
/// # Errors
///
/// Returns [`Error::ParamError`] naming the parameter on a missing required
/// value or a type mismatch (including within array elements).
pub fn bind(
    declarations: &[ParameterDeclaration],
    payload: &serde_json::Map<String, Value>,
    claims: &ClaimMap,
) -> Result<Vec<ParameterValue>> {
    declarations.iter().map(|decl| bind_one(decl, payload, claims)).collect()
}

fn bind_one(
    decl: &ParameterDeclaration,
    payload: &serde_json::Map<String, Value>,
    claims: &ClaimMap,
) -> Result<ParameterValue> {
    let located = locate(decl, payload, claims);
    let raw = match located {
        Some(v) => v,
        None => {
            if decl.required {
                return Err(Error::param(
                    &decl.name,
                    format!("missing required parameter of type {}", decl.param_type.name()),
                ));
            }
            // Not required and no default: emit JSON null.
            Value::Null
        }
    };
    let converted = convert(&decl.name, &decl.param_type, &raw)?;
    Ok(ParameterValue {
        name: decl.name.clone(),
        value: converted,
    })
}

/// Locate the raw value for a declaration: claims first (first matching
/// service), then payload, then default.
fn locate(
    decl: &ParameterDeclaration,
    payload: &serde_json::Map<String, Value>,
    claims: &ClaimMap,
) -> Option<Value> {
    for binding in &decl.auth_services {
        if let Some(service_claims) = claims.get(&binding.service_name) {
            if let Some(v) = service_claims.get(&binding.field) {
                return Some(v.clone());
            }
        }
    }
    if !decl.auth_services.is_empty() {
        // Declared to come exclusively from an auth service; do not fall
        // through to the payload even if claims were absent — the payload
        // and claims binding sets are disjoint by design.
        return decl.default.clone();
    }
    payload.get(&decl.name).cloned().or_else(|| decl.default.clone())
}

fn convert(name: &str, param_type: &ParamType, raw: &Value) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match param_type {
        ParamType::String => match raw {
            Value::String(_) => Ok(raw.clone()),
            _ => Err(type_error(name, "string")),
        },
        ParamType::Integer => match raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
            Value::String(s) => s
                .parse::<i64>()
                .map(|v| Value::from(v))
                .map_err(|_| type_error(name, "integer")),
            _ => Err(type_error(name, "integer")),
        },
        ParamType::Float => match raw {
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or_default())),
            Value::String(s) => s
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| type_error(name, "float")),
            _ => Err(type_error(name, "float")),
        },
        ParamType::Boolean => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
            _ => Err(type_error(name, "boolean")),
        },
        ParamType::Array(item_type) => match raw {
            Value::Array(items) => {
                let converted: Result<Vec<Value>> = items
                    .iter()
                    .map(|item| convert(name, item_type, item))
                    .collect();
                Ok(Value::Array(converted?))
            }
            _ => Err(type_error(name, "array")),
        },
    }
}

fn type_error(name: &str, expected: &str) -> Error {
    Error::param(name, format!("expected type {expected}"))
}

/// Emit a JSON-schema-like `inputSchema` object for an MCP tool manifest:
/// `properties` keyed by parameter name with `type`/`description`, plus a
/// `required` list.
#[must_use]
pub fn manifest_schema(declarations: &[ParameterDeclaration]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for decl in declarations {
        properties.insert(decl.name.clone(), schema_for(decl));
        if decl.required {
            required.push(Value::String(decl.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

fn schema_for(decl: &ParameterDeclaration) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert(
        "type".into(),
        Value::String(decl.param_type.json_schema_type().into()),
    );
    obj.insert("description".into(), Value::String(decl.description.clone()));
    if let ParamType::Array(item_type) = &decl.param_type {
        obj.insert(
            "items".into(),
            serde_json::json!({ "type": item_type.json_schema_type() }),
        );
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(name: &str, ty: &str, required: Option<bool>, default: Option<Value>) -> RawParamDecl {
        RawParamDecl {
            name: name.into(),
            type_name: ty.into(),
            description: String::new(),
            required,
            default,
            auth_services: vec![],
            items: None,
        }
    }

    #[test]
    fn declares_known_types() {
        let raw = vec![decl("limit", "integer", None, None)];
        let declared = ParameterDeclaration::declare_all(&raw).unwrap();
        assert_eq!(declared[0].param_type, ParamType::Integer);
        assert!(declared[0].required);
    }

    #[test]
    fn unknown_type_fails_declaration() {
        let raw = vec![decl("x", "blob", None, None)];
        assert!(ParameterDeclaration::declare_all(&raw).is_err());
    }

    #[test]
    fn required_defaults_to_false_when_default_present() {
        let raw = vec![decl("limit", "integer", None, Some(json!(10)))];
        let declared = ParameterDeclaration::declare_all(&raw).unwrap();
        assert!(!declared[0].required);
    }

    #[test]
    fn binds_from_payload_in_declaration_order() {
        let raw = vec![
            decl("b", "string", None, None),
            decl("a", "integer", None, None),
        ];
        let declared = ParameterDeclaration::declare_all(&raw).unwrap();
        let mut payload = serde_json::Map::new();
        payload.insert("a".into(), json!(5));
        payload.insert("b".into(), json!("hi"));
        let claims = ClaimMap::new();
        let values = bind(&declared, &payload, &claims).unwrap();
        assert_eq!(values[0].name, "b");
        assert_eq!(values[1].name, "a");
    }

    #[test]
    fn missing_required_fails() {
        let raw = vec![decl("needed", "string", None, None)];
        let declared = ParameterDeclaration::declare_all(&raw).unwrap();
        let payload = serde_json::Map::new();
        let claims = ClaimMap::new();
        let err = bind(&declared, &payload, &claims).unwrap_err();
        match err {
            Error::ParamError { param, .. } => assert_eq!(param, "needed"),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn type_mismatch_names_param_and_type() {
        let raw = vec![decl("age", "integer", None, None)];
        let declared = ParameterDeclaration::declare_all(&raw).unwrap();
        let mut payload = serde_json::Map::new();
        payload.insert("age".into(), json!("not a number"));
        let claims = ClaimMap::new();
        let err = bind(&declared, &payload, &claims).unwrap_err();
        match err {
            Error::ParamError { param, message } => {
                assert_eq!(param, "age");
                assert!(message.contains("integer"));
            }
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn claim_bound_parameter_prefers_claims_over_payload() {
        let mut raw = decl("email", "string", None, None);
        raw.auth_services = vec![AuthServiceBinding {
            service_name: "google-auth".into(),
            field: "email".into(),
        }];
        let declared = ParameterDeclaration::declare_all(&[raw]).unwrap();

        let mut payload = serde_json::Map::new();
        payload.insert("email".into(), json!("payload@example.com"));

        let mut claims = ClaimMap::new();
        let mut google_claims = HashMap::new();
        google_claims.insert("email".to_string(), json!("claims@example.com"));
        claims.insert("google-auth".to_string(), google_claims);

        let values = bind(&declared, &payload, &claims).unwrap();
        assert_eq!(values[0].value, json!("claims@example.com"));
    }

    #[test]
    fn claim_bound_parameter_without_verified_claims_fails_required() {
        let mut raw = decl("email", "string", None, None);
        raw.auth_services = vec![AuthServiceBinding {
            service_name: "google-auth".into(),
            field: "email".into(),
        }];
        let declared = ParameterDeclaration::declare_all(&[raw]).unwrap();
        let payload = serde_json::Map::new();
        let claims = ClaimMap::new();
        assert!(bind(&declared, &payload, &claims).is_err());
    }

    #[test]
    fn array_recurses_element_wise() {
        let mut raw = decl("tags", "array", None, None);
        raw.items = Some(Box::new(decl("item", "string", None, None)));
        let declared = ParameterDeclaration::declare_all(&[raw]).unwrap();
        let mut payload = serde_json::Map::new();
        payload.insert("tags".into(), json!(["a", "b"]));
        let claims = ClaimMap::new();
        let values = bind(&declared, &payload, &claims).unwrap();
        assert_eq!(values[0].value, json!(["a", "b"]));
    }

    #[test]
    fn array_element_type_mismatch_fails() {
        let mut raw = decl("nums", "array", None, None);
        raw.items = Some(Box::new(decl("item", "integer", None, None)));
        let declared = ParameterDeclaration::declare_all(&[raw]).unwrap();
        let mut payload = serde_json::Map::new();
        payload.insert("nums".into(), json!([1, "oops"]));
        let claims = ClaimMap::new();
        assert!(bind(&declared, &payload, &claims).is_err());
    }

    #[test]
    fn manifest_emits_properties_and_required_list() {
        let raw = vec![
            decl("q", "string", Some(true), None),
            decl("limit", "integer", None, Some(json!(10))),
        ];
        let declared = ParameterDeclaration::declare_all(&raw).unwrap();
        let schema = manifest_schema(&declared);
        assert_eq!(schema["properties"]["q"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["required"], json!(["q"]));
    }

    #[test]
    fn round_trips_when_all_required_members_supplied() {
        let raw = vec![decl("a", "integer", None, None), decl("b", "string", None, None)];
        let declared = ParameterDeclaration::declare_all(&raw).unwrap();
        let mut payload = serde_json::Map::new();
        payload.insert("a".into(), json!(1));
        payload.insert("b".into(), json!("x"));
        let claims = ClaimMap::new();
        let values = bind(&declared, &payload, &claims).unwrap();
        let mut reserialized = serde_json::Map::new();
        for v in &values {
            reserialized.insert(v.name.clone(), v.value.clone());
        }
        let values2 = bind(&declared, &reserialized, &claims).unwrap();
        assert_eq!(
            values.iter().map(|v| v.value.clone()).collect::<Vec<_>>(),
            values2.iter().map(|v| v.value.clone()).collect::<Vec<_>>()
        );
    }
}
