use kube::core::DynamicObject;
use serde_json::json;

use duck_operator_controller::crd::v1::duck_type::{self, DuckType, DuckTypeSpec};

use crate::admission::error::{AdmissionError, AdmissionResult};


fn decode_duck_type(payload: &DynamicObject) -> AdmissionResult<DuckType> {
    let payload_types = payload
        .types
        .clone()
        .ok_or_else(|| AdmissionError::ValidationError("missing apiVersion and kind".to_string()))?;

    if payload_types.kind != "DuckType" {
        return Err(AdmissionError::InvalidKind(payload_types.kind, "DuckType".to_string()));
    }

    let version = payload_types
        .api_version
        .split("/")
        .last()
        .unwrap_or(&payload_types.api_version);
    if version != "v1" {
        return Err(AdmissionError::InvalidVersion(version.to_string(), "DuckType".to_string()));
    }

    let spec: DuckTypeSpec =
        serde_json::from_value(payload.data.get("spec").cloned().unwrap_or_else(|| json!({})))
            .map_err(|err| AdmissionError::ValidationError(err.to_string()))?;

    Ok(DuckType::new(
        payload.metadata.name.as_deref().unwrap_or_default(),
        spec,
    ))
}

/// Validate a DuckType on create and update: names are defaulted first, then
/// the name/spec invariants are enforced.
pub fn validate_duck_type_crd(payload: &DynamicObject) -> AdmissionResult<()> {
    let mut duck_type = decode_duck_type(payload)?;
    duck_type.spec.apply_defaults();

    let errs = duck_type::validate(&duck_type);
    if !errs.is_empty() {
        return Err(AdmissionError::ValidationError(errs.join(", ")));
    }

    Ok(())
}

/// Compute the JSON patch that fills `spec.singular` and `spec.listKind`
/// when they are absent. Returns None when nothing needs defaulting.
pub fn default_duck_type_crd(payload: &DynamicObject) -> AdmissionResult<Option<json_patch::Patch>> {
    let duck_type = decode_duck_type(payload)?;

    let mut operations = vec![];
    if duck_type.spec.singular.as_deref().unwrap_or_default().is_empty() {
        operations.push(json!({
            "op": "add",
            "path": "/spec/singular",
            "value": duck_type.spec.singular(),
        }));
    }
    if duck_type.spec.list_kind.as_deref().unwrap_or_default().is_empty() {
        operations.push(json!({
            "op": "add",
            "path": "/spec/listKind",
            "value": duck_type.spec.list_kind(),
        }));
    }

    if operations.is_empty() {
        return Ok(None);
    }

    serde_json::from_value(json!(operations))
        .map(Some)
        .map_err(|err| AdmissionError::ValidationError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: &str, spec: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "duck.reconciler.io/v1",
            "kind": "DuckType",
            "metadata": { "name": name },
            "spec": spec,
        }))
        .unwrap()
    }

    #[test]
    fn accepts_a_well_formed_duck_type() {
        let payload = payload(
            "ducks.example.com",
            json!({ "group": "example.com", "plural": "ducks", "kind": "Duck" }),
        );

        assert!(validate_duck_type_crd(&payload).is_ok());
    }

    #[test]
    fn rejects_a_mismatched_name() {
        let payload = payload(
            "ducks.example.com",
            json!({ "group": "example.com", "plural": "geese", "kind": "Duck" }),
        );

        let err = validate_duck_type_crd(&payload).unwrap_err();
        assert!(err.to_string().contains("name must take the form"));
    }

    #[test]
    fn rejects_the_wrong_kind() {
        let mut payload = payload(
            "ducks.example.com",
            json!({ "group": "example.com", "plural": "ducks", "kind": "Duck" }),
        );
        payload.types.as_mut().unwrap().kind = "Goose".to_string();

        let err = validate_duck_type_crd(&payload).unwrap_err();
        assert!(matches!(err, AdmissionError::InvalidKind(_, _)));
    }

    #[test]
    fn defaults_fill_missing_names() {
        let payload = payload(
            "ducks.example.com",
            json!({ "group": "example.com", "plural": "ducks", "kind": "Duck" }),
        );

        let patch = default_duck_type_crd(&payload).unwrap().unwrap();
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            value,
            json!([
                { "op": "add", "path": "/spec/singular", "value": "duck" },
                { "op": "add", "path": "/spec/listKind", "value": "DuckList" },
            ])
        );
    }

    #[test]
    fn defaults_are_a_noop_when_names_are_set() {
        let payload = payload(
            "ducks.example.com",
            json!({
                "group": "example.com",
                "plural": "ducks",
                "singular": "duck",
                "kind": "Duck",
                "listKind": "DuckList",
            }),
        );

        assert!(default_duck_type_crd(&payload).unwrap().is_none());
    }
}
