use kube::CustomResource;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use duck_operator_common::conditions::{self, ConditionSet};

pub const DUCK_TYPE_CONDITION_RBAC: &str = "RBAC";
pub const DUCK_TYPE_CONDITION_CRD_ESTABLISHED: &str = "CustomResourceDefinitionEstablished";

/// Ready rolls up the RBAC and CustomResourceDefinitionEstablished conditions.
pub static DUCK_TYPE_CONDITIONS: ConditionSet = ConditionSet::new(
    "Ready",
    &[
        DUCK_TYPE_CONDITION_RBAC,
        DUCK_TYPE_CONDITION_CRD_ESTABLISHED,
    ],
);

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "DuckType",
    group = "duck.reconciler.io",
    version = "v1",
    status = "DuckTypeStatus",
    doc = "DuckType declares a family of resources sharing a common structural subset.",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DuckTypeSpec {
    /// Group is the API group of the defined custom resource.
    /// Must match the name of the DuckType (in the form `<plural>.<group>`).
    pub group: String,
    /// Plural is the plural name of the resource to serve.
    /// Must match the name of the DuckType (in the form `<plural>.<group>`).
    /// Must be all lowercase.
    pub plural: String,
    /// Singular is the singular name of the resource. It must be all lowercase.
    /// Defaults to lowercased `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singular: Option<String>,
    /// Kind is the serialized kind of the resource. It is normally CamelCase and singular.
    /// Custom resource instances will use this value as the `kind` attribute in API calls.
    pub kind: String,
    /// ListKind is the serialized kind of the list for this resource. Defaults to "<kind>List".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_kind: Option<String>,
}

impl DuckTypeSpec {
    /// Fill the optional names the same way the defaulting webhook does.
    pub fn apply_defaults(&mut self) {
        if self.singular.as_deref().unwrap_or_default().is_empty() {
            self.singular = Some(self.kind.to_lowercase());
        }
        if self.list_kind.as_deref().unwrap_or_default().is_empty() {
            self.list_kind = Some(format!("{}List", self.kind));
        }
    }

    pub fn singular(&self) -> String {
        match self.singular.as_deref() {
            Some(singular) if !singular.is_empty() => singular.to_string(),
            _ => self.kind.to_lowercase(),
        }
    }

    pub fn list_kind(&self) -> String {
        match self.list_kind.as_deref() {
            Some(list_kind) if !list_kind.is_empty() => list_kind.to_string(),
            _ => format!("{}List", self.kind),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DuckTypeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DuckTypeStatus {
    pub fn is_ready(&self) -> bool {
        conditions::is_ready(&self.conditions)
    }
}

/// Validate a DuckType the way the admission webhook does. Defaults are
/// expected to be applied first. Returns one message per violated field.
pub fn validate(duck_type: &DuckType) -> Vec<String> {
    let mut errs = vec![];
    let name = duck_type.metadata.name.as_deref().unwrap_or_default();
    let spec = &duck_type.spec;

    if name != format!("{}.{}", spec.plural, spec.group) {
        errs.push(format!(
            "metadata.name: Invalid value {:?}: name must take the form `<plural>.<group>`",
            name
        ));
    }
    if spec.group.is_empty() {
        errs.push("spec.group: Required value".to_string());
    } else if spec.group.to_lowercase() != spec.group {
        errs.push(format!("spec.group: Invalid value {:?}: must be all lowercase", spec.group));
    }
    if spec.plural.is_empty() {
        errs.push("spec.plural: Required value".to_string());
    } else if spec.plural.to_lowercase() != spec.plural {
        errs.push(format!("spec.plural: Invalid value {:?}: must be all lowercase", spec.plural));
    }
    match spec.singular.as_deref() {
        None | Some("") => errs.push("spec.singular: Required value".to_string()),
        Some(singular) if singular.to_lowercase() != singular => {
            errs.push(format!("spec.singular: Invalid value {:?}: must be all lowercase", singular));
        }
        _ => {}
    }
    if spec.kind.is_empty() {
        errs.push("spec.kind: Required value".to_string());
    }
    if spec.list_kind.as_deref().unwrap_or_default().is_empty() {
        errs.push("spec.listKind: Required value".to_string());
    }

    errs
}
