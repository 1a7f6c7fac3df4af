use std::fmt::{Display, Formatter, Result as FmtResult};

use kube::core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use serde::{Deserialize, Serialize};

use duck_operator_common::conditions::{self, ConditionSet};

use crate::crd::v1::duck_type::DuckType;

pub const DUCK_CONDITION_RBAC: &str = "RBAC";
pub const DUCK_CONDITION_AVAILABLE: &str = "Available";

/// Ready rolls up the RBAC and Available conditions.
pub static DUCK_CONDITIONS: ConditionSet =
    ConditionSet::new("Ready", &[DUCK_CONDITION_RBAC, DUCK_CONDITION_AVAILABLE]);

/// A group plus a kind, without a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        GroupKind { group: group.into(), kind: kind.into() }
    }
}

/// A group plus a plural resource name, parsed from `<resource>.<group>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    /// Everything before the first `.` is the resource, the rest is the
    /// group; a bare name is a core-group resource.
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((resource, group)) => GroupResource {
                group: group.to_string(),
                resource: resource.to_string(),
            },
            None => GroupResource { group: String::new(), resource: name.to_string() },
        }
    }
}

impl Display for GroupResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// DuckSpec defines the desired state of Duck.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DuckSpec {
    /// Group to read the target Duck.
    #[serde(default)]
    pub group: String,
    /// Version to read the target Duck.
    #[serde(default)]
    pub version: String,
    /// Kind to read the target Duck.
    #[serde(default)]
    pub kind: String,
}

impl DuckSpec {
    pub fn group_version_kind(&self) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn type_meta(&self) -> TypeMeta {
        let api_version = if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        };
        TypeMeta { api_version, kind: self.kind.clone() }
    }
}

/// DuckStatus defines the observed state of Duck.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DuckStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Concrete apiVersion and kind the duck resolved to, set while Available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<TypeMeta>,
}

/// A member-kind declaration inside a DuckType. Its concrete group and kind
/// are the DuckType's, so it is decoded from a DynamicObject rather than
/// served from a fixed schema.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Duck {
    #[serde(flatten)]
    pub types: Option<TypeMeta>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DuckSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DuckStatus>,
}

impl Duck {
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(obj)?)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The member group-resource encoded in the duck's name,
    /// `<member-plural>.<member-group>`.
    pub fn group_resource(&self) -> GroupResource {
        GroupResource::parse(self.name())
    }

    /// The member GVK as declared by the spec.
    pub fn member_gvk(&self) -> GroupVersionKind {
        self.spec.group_version_kind()
    }

    /// ApiResource for the member kind. The plural comes from the duck's own
    /// name, which the availability probe has cross-checked for Ready ducks.
    pub fn member_api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.member_gvk(), &self.group_resource().resource)
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| conditions::is_ready(&status.conditions))
    }
}

/// ApiResource for the Duck kind served by a DuckType's CRD.
pub fn duck_api_resource(duck_type: &DuckType) -> ApiResource {
    let spec = &duck_type.spec;
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind {
            group: spec.group.clone(),
            version: "v1".to_string(),
            kind: spec.kind.clone(),
        },
        &spec.plural,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn duck(name: &str, group: &str, version: &str, kind: &str, ready: bool) -> Duck {
        let status = json!({
            "observedGeneration": 1,
            "conditions": [
                {
                    "type": "Ready",
                    "status": if ready { "True" } else { "False" },
                    "reason": if ready { "Ready" } else { "NotFound" },
                    "message": "",
                    "lastTransitionTime": "2025-01-01T00:00:00Z",
                },
            ],
        });
        serde_json::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Duck",
            "metadata": { "name": name },
            "spec": { "group": group, "version": version, "kind": kind },
            "status": status,
        }))
        .unwrap()
    }

    #[test]
    fn parses_group_resource_from_name() {
        let gr = GroupResource::parse("deployments.apps");
        assert_eq!(gr.resource, "deployments");
        assert_eq!(gr.group, "apps");
        assert_eq!(gr.to_string(), "deployments.apps");
    }

    #[test]
    fn parses_core_group_resource() {
        let gr = GroupResource::parse("pods");
        assert_eq!(gr.resource, "pods");
        assert_eq!(gr.group, "");
        assert_eq!(gr.to_string(), "pods");
    }

    #[test]
    fn decodes_from_dynamic_object() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Duck",
            "metadata": { "name": "deployments.apps" },
            "spec": { "group": "apps", "version": "v1", "kind": "Deployment" },
        }))
        .unwrap();

        let duck = Duck::from_dynamic(&obj).unwrap();
        assert_eq!(duck.name(), "deployments.apps");
        assert_eq!(duck.spec.kind, "Deployment");
        assert_eq!(duck.types.as_ref().unwrap().kind, "Duck");
        assert!(!duck.is_ready());
    }

    #[test]
    fn member_api_resource_uses_name_for_plural() {
        let duck = duck("deployments.apps", "apps", "v1", "Deployment", true);
        let ar = duck.member_api_resource();

        assert_eq!(ar.group, "apps");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.kind, "Deployment");
        assert_eq!(ar.plural, "deployments");
        assert_eq!(ar.api_version, "apps/v1");
    }

    #[test]
    fn readiness_follows_the_ready_condition() {
        assert!(duck("jobs.batch", "batch", "v1", "Job", true).is_ready());
        assert!(!duck("jobs.batch", "batch", "v1", "Job", false).is_ready());
    }

    #[test]
    fn ready_rolls_up_rbac_and_available() {
        let mut conditions = vec![];
        let mut manager = DUCK_CONDITIONS.manage(&mut conditions, 1);
        manager.initialize();
        manager.mark_true(DUCK_CONDITION_RBAC, "Defined", "");
        manager.mark_true(DUCK_CONDITION_AVAILABLE, "Available", "");

        let ready = manager.get("Ready").unwrap();
        assert_eq!(ready.status, "True");
        assert_eq!(ready.reason, "Ready");
    }

    #[test]
    fn spec_type_meta_handles_core_group() {
        let spec = DuckSpec {
            group: String::new(),
            version: "v1".to_string(),
            kind: "Pod".to_string(),
        };
        assert_eq!(spec.type_meta().api_version, "v1");
    }
}
