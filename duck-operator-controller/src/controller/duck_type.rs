use kube::{
    api::{Api, Patch, PatchParams, ResourceExt, ObjectMeta},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as Finalizer},
        watcher,
    },
    Resource,
};
use k8s_openapi::api::rbac::v1::{AggregationRule, ClusterRole};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceConversion, CustomResourceDefinition,
    CustomResourceDefinitionCondition, CustomResourceDefinitionNames,
    CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceSubresourceStatus,
    CustomResourceSubresources, CustomResourceValidation, JSONSchemaProps, SelectableField,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use std::sync::Arc;
use serde_json::json;

use duck_operator_common::constant::{FINALIZER, ROLE_LABEL, TYPE_LABEL};
use duck_operator_common::telemetry::info;

use crate::controller::context::Context;
use crate::controller::duck::DuckController;
use crate::controller::utils::{api_error_message, api_error_reason, apply, FIELD_MANAGER};
use crate::crd::v1::duck::GroupKind;
use crate::crd::v1::duck_type::{
    DuckType, DUCK_TYPE_CONDITIONS, DUCK_TYPE_CONDITION_CRD_ESTABLISHED, DUCK_TYPE_CONDITION_RBAC,
};
use crate::error::{ControllerError, Result};

pub struct DuckTypeController;

impl DuckTypeController {
    /// Create the controller for the DuckType resource
    ///
    /// Watches the DuckType kind plus the ClusterRoles and
    /// CustomResourceDefinitions it owns.
    ///
    /// # Arguments
    /// * `ctx` - The controller context
    ///
    /// # Returns
    /// The controller for the DuckType resource
    pub async fn create_controller(ctx: Arc<Context>) -> Controller<DuckType> {
        let client = ctx.client.clone();
        let duck_types = Api::<DuckType>::all(client.clone());

        let cluster_roles = Api::<ClusterRole>::all(client.clone());
        let crds = Api::<CustomResourceDefinition>::all(client.clone());

        Controller::new(duck_types, watcher::Config::default())
            .owns(cluster_roles, watcher::Config::default())
            .owns(crds, watcher::Config::default())
    }

    /// Reconcile the DuckType resource
    ///
    /// # Arguments
    /// * `duck_type` - The DuckType resource to reconcile
    /// * `ctx` - The controller context
    ///
    /// # Returns
    /// An action to take after reconciling the DuckType resource
    pub async fn reconcile(duck_type: Arc<DuckType>, ctx: Arc<Context>) -> Result<Action> {
        let api = Api::<DuckType>::all(ctx.client.clone());

        finalizer(&api, FINALIZER, duck_type, |event| async {
            match event {
                Finalizer::Apply(duck_type) => reconcile_duck_type(&duck_type, &ctx).await,
                Finalizer::Cleanup(duck_type) => cleanup_duck_type(&duck_type, &ctx).await,
            }
        })
        .await
        .map_err(|e| ControllerError::FinalizerError(e.to_string()))
    }
}

/// Reconcile the DuckType resource
///
/// Steps are sequenced: the aggregate roles, then the member-duck CRD, then
/// the sub-manager launch. A hard failure stops later steps from mutating
/// state, but the conditions gathered so far are still published.
async fn reconcile_duck_type(duck_type: &DuckType, ctx: &Context) -> Result<Action> {
    let client = ctx.client.clone();
    let name = duck_type.name_any();
    let generation = duck_type.metadata.generation.unwrap_or_default();

    let mut status = duck_type.status.clone().unwrap_or_default();
    let mut result: Result<()> = Ok(());

    {
        let mut conditions = DUCK_TYPE_CONDITIONS.manage(&mut status.conditions, generation);
        conditions.initialize();

        // Aggregate view/edit roles; an external controller fills their rules
        // from matching member roles.
        let role_api = Api::<ClusterRole>::all(client.clone());
        let mut rbac_err = None;
        for role in desired_aggregate_roles(duck_type) {
            let role_name = role.metadata.name.clone().unwrap_or_default();
            if let Err(err) = apply(&role_api, role, &role_name).await {
                rbac_err = Some(err);
                break;
            }
        }
        match rbac_err {
            None => conditions.mark_true(DUCK_TYPE_CONDITION_RBAC, "Defined", ""),
            Some(err) => match api_error_reason(&err) {
                Some("Invalid") => {
                    conditions.mark_false(DUCK_TYPE_CONDITION_RBAC, "Invalid", &api_error_message(&err));
                }
                Some("AlreadyExists") => {
                    conditions.mark_false(DUCK_TYPE_CONDITION_RBAC, "AlreadyExists", &api_error_message(&err));
                }
                _ => {
                    conditions.mark_unknown(DUCK_TYPE_CONDITION_RBAC, "Unknown", "");
                    result = Err(err);
                }
            },
        }

        // Member-duck CRD whose group and names mirror the DuckType spec. The
        // CustomResourceDefinitionEstablished condition mirrors the child's
        // own Established condition.
        if result.is_ok() {
            let crd_api = Api::<CustomResourceDefinition>::all(client.clone());
            let not_established =
                format!("child CustomResourceDefinition {} is not established", name);
            match desired_crd(duck_type) {
                Ok(desired) => match apply(&crd_api, desired, &name).await {
                    Ok(_) => match crd_api.get_opt(&name).await {
                        Ok(Some(child)) => match established_condition(&child) {
                            Some(c) if c.status == "True" => {
                                conditions.mark_true(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "Established", "");
                            }
                            Some(c) if c.status == "False" => {
                                conditions.mark_false(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "NotEstablished", &not_established);
                            }
                            _ => {
                                conditions.mark_unknown(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "NotEstablished", &not_established);
                            }
                        },
                        Ok(None) => {
                            conditions.mark_false(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "Missing", "");
                        }
                        Err(err) => {
                            conditions.mark_unknown(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "Unknown", "");
                            result = Err(err.into());
                        }
                    },
                    Err(err) => match api_error_reason(&err) {
                        Some("Invalid") => {
                            conditions.mark_false(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "Invalid", &api_error_message(&err));
                        }
                        Some("AlreadyExists") => {
                            conditions.mark_false(
                                DUCK_TYPE_CONDITION_CRD_ESTABLISHED,
                                "AlreadyExists",
                                &format!("another CustomResourceDefinition already exists with name {}", name),
                            );
                        }
                        _ => {
                            conditions.mark_unknown(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "Unknown", "");
                            result = Err(err);
                        }
                    },
                },
                Err(err) => {
                    conditions.mark_unknown(DUCK_TYPE_CONDITION_CRD_ESTABLISHED, "Unknown", "");
                    result = Err(err);
                }
            }
        }
    }

    // Launch the sub-manager that hosts this DuckType's Duck controller.
    if result.is_ok() {
        let spec = &duck_type.spec;
        let local_types = vec![
            GroupKind::new(spec.group.clone(), spec.kind.clone()),
            GroupKind::new(spec.group.clone(), spec.list_kind()),
        ];
        let launch = ctx
            .submanagers
            .reconcile(duck_type, local_types, |manager, cancel| {
                DuckController::register(manager, cancel, duck_type)
            })
            .await;
        if let Err(err) = launch {
            result = Err(err);
        }
    }

    status.observed_generation = Some(generation);
    let api = Api::<DuckType>::all(client);
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;

    result.map(|_| Action::requeue(ctx.requeue_after()))
}

/// Cleanup the DuckType resource
///
/// Stops the sub-manager; the aggregate roles and the member-duck CRD are
/// garbage collected through their owner references.
async fn cleanup_duck_type(duck_type: &DuckType, ctx: &Context) -> Result<Action> {
    ctx.submanagers
        .reconcile(duck_type, vec![], |_, _| Ok(()))
        .await?;
    info!(
        event = "SubManagerStopped",
        duck_type = duck_type.name_any().as_str()
    );

    Ok(Action::await_change())
}

/// The two aggregate ClusterRoles for a DuckType. Their rules stay empty;
/// the aggregation controller fills them from member roles carrying the
/// matching type and role labels.
fn desired_aggregate_roles(duck_type: &DuckType) -> Vec<ClusterRole> {
    let name = duck_type.name_any();
    let owner = duck_type.controller_owner_ref(&());

    ["view", "edit"]
        .into_iter()
        .map(|role| ClusterRole {
            metadata: ObjectMeta {
                name: Some(format!("reconcilerio-ducks-{}-{}", name, role)),
                labels: Some(BTreeMap::from([(TYPE_LABEL.to_string(), name.clone())])),
                owner_references: owner.clone().map(|owner| vec![owner]),
                ..Default::default()
            },
            rules: Some(vec![]),
            aggregation_rule: Some(AggregationRule {
                cluster_role_selectors: Some(vec![LabelSelector {
                    match_labels: Some(BTreeMap::from([
                        (TYPE_LABEL.to_string(), name.clone()),
                        (ROLE_LABEL.to_string(), role.to_string()),
                    ])),
                    ..Default::default()
                }]),
            }),
        })
        .collect()
}

/// The member-duck CRD for a DuckType: cluster scoped, category `duck`, one
/// served and stored version `v1` with the common structural subset.
fn desired_crd(duck_type: &DuckType) -> Result<CustomResourceDefinition> {
    let spec = &duck_type.spec;
    let owner = duck_type.controller_owner_ref(&());

    let schema: JSONSchemaProps = serde_json::from_value(json!({
        "type": "object",
        "properties": {
            "apiVersion": { "type": "string" },
            "kind": { "type": "string" },
            "metadata": { "type": "object" },
            "spec": {
                "type": "object",
                "required": ["group", "version", "kind"],
                "properties": {
                    "group": { "type": "string" },
                    "version": { "type": "string" },
                    "kind": { "type": "string" },
                },
            },
            "status": {
                "type": "object",
                "properties": {
                    "observedGeneration": { "type": "integer", "format": "int64" },
                    "conditions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["lastTransitionTime", "message", "reason", "status", "type"],
                            "properties": {
                                "lastTransitionTime": { "type": "string", "format": "date-time" },
                                "message": { "type": "string", "maxLength": 32768 },
                                "observedGeneration": { "type": "integer", "format": "int64", "minimum": 0 },
                                "reason": {
                                    "type": "string",
                                    "maxLength": 1024,
                                    "minLength": 1,
                                    "pattern": "^[A-Za-z]([A-Za-z0-9_,:]*[A-Za-z0-9_])?$",
                                },
                                "status": { "type": "string", "enum": ["True", "False", "Unknown"] },
                                "type": {
                                    "type": "string",
                                    "maxLength": 316,
                                    "pattern": "^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])$",
                                },
                            },
                        },
                    },
                    "resolved": {
                        "type": "object",
                        "properties": {
                            "apiVersion": { "type": "string" },
                            "kind": { "type": "string" },
                        },
                    },
                },
            },
        },
    }))?;

    Ok(CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(duck_type.name_any()),
            owner_references: owner.map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: spec.group.clone(),
            scope: "Cluster".to_string(),
            names: CustomResourceDefinitionNames {
                plural: spec.plural.clone(),
                singular: Some(spec.singular()),
                kind: spec.kind.clone(),
                list_kind: Some(spec.list_kind()),
                categories: Some(vec!["duck".to_string()]),
                ..Default::default()
            },
            versions: vec![CustomResourceDefinitionVersion {
                name: "v1".to_string(),
                served: true,
                storage: true,
                selectable_fields: Some(vec![
                    SelectableField { json_path: ".spec.group".to_string() },
                    SelectableField { json_path: ".spec.kind".to_string() },
                ]),
                subresources: Some(CustomResourceSubresources {
                    status: Some(CustomResourceSubresourceStatus(serde_json::Value::Object(Default::default()))),
                    ..Default::default()
                }),
                additional_printer_columns: Some(vec![
                    CustomResourceColumnDefinition {
                        json_path: r#".status.conditions[?(@.type=="Ready")].status"#.to_string(),
                        name: "Ready".to_string(),
                        type_: "string".to_string(),
                        ..Default::default()
                    },
                    CustomResourceColumnDefinition {
                        json_path: r#".status.conditions[?(@.type=="Ready")].reason"#.to_string(),
                        name: "Reason".to_string(),
                        type_: "string".to_string(),
                        ..Default::default()
                    },
                    CustomResourceColumnDefinition {
                        json_path: ".metadata.creationTimestamp".to_string(),
                        name: "Age".to_string(),
                        type_: "date".to_string(),
                        ..Default::default()
                    },
                ]),
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(schema),
                }),
                ..Default::default()
            }],
            conversion: Some(CustomResourceConversion {
                strategy: "None".to_string(),
                webhook: None,
            }),
            ..Default::default()
        },
        status: None,
    })
}

fn established_condition(crd: &CustomResourceDefinition) -> Option<&CustomResourceDefinitionCondition> {
    crd.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Established")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::v1::duck_type::DuckTypeSpec;
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionStatus;

    fn duck_type() -> DuckType {
        let mut duck_type = DuckType::new(
            "ducks.example.com",
            DuckTypeSpec {
                group: "example.com".to_string(),
                plural: "ducks".to_string(),
                singular: None,
                kind: "Duck".to_string(),
                list_kind: None,
            },
        );
        duck_type.metadata.uid = Some("uid-1".to_string());
        duck_type
    }

    #[test]
    fn aggregate_roles_select_member_roles() {
        let roles = desired_aggregate_roles(&duck_type());
        assert_eq!(roles.len(), 2);

        for (role, suffix) in roles.iter().zip(["view", "edit"]) {
            assert_eq!(
                role.metadata.name.as_deref(),
                Some(format!("reconcilerio-ducks-ducks.example.com-{}", suffix).as_str())
            );
            assert_eq!(
                role.metadata.labels.as_ref().unwrap().get(TYPE_LABEL).unwrap(),
                "ducks.example.com"
            );
            // direct rules stay empty, they are aggregated from member roles
            assert!(role.rules.as_ref().unwrap().is_empty());

            let selector = &role.aggregation_rule.as_ref().unwrap().cluster_role_selectors.as_ref().unwrap()[0];
            let labels = selector.match_labels.as_ref().unwrap();
            assert_eq!(labels.get(TYPE_LABEL).unwrap(), "ducks.example.com");
            assert_eq!(labels.get(ROLE_LABEL).unwrap(), suffix);
        }
    }

    #[test]
    fn crd_mirrors_the_duck_type_spec() {
        let crd = desired_crd(&duck_type()).unwrap();

        assert_eq!(crd.metadata.name.as_deref(), Some("ducks.example.com"));
        assert_eq!(crd.spec.group, "example.com");
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.plural, "ducks");
        assert_eq!(crd.spec.names.singular.as_deref(), Some("duck"));
        assert_eq!(crd.spec.names.kind, "Duck");
        assert_eq!(crd.spec.names.list_kind.as_deref(), Some("DuckList"));
        assert_eq!(crd.spec.names.categories.as_ref().unwrap(), &["duck"]);
        assert_eq!(crd.spec.conversion.as_ref().unwrap().strategy, "None");

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1");
        assert!(version.served);
        assert!(version.storage);
        assert!(version.subresources.as_ref().unwrap().status.is_some());

        let selectable: Vec<_> = version
            .selectable_fields
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| f.json_path.as_str())
            .collect();
        assert_eq!(selectable, vec![".spec.group", ".spec.kind"]);

        let columns: Vec<_> = version
            .additional_printer_columns
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(columns, vec!["Ready", "Reason", "Age"]);

        let schema = version.schema.as_ref().unwrap().open_api_v3_schema.as_ref().unwrap();
        let spec_schema = schema.properties.as_ref().unwrap().get("spec").unwrap();
        assert_eq!(
            spec_schema.required.as_ref().unwrap(),
            &["group", "version", "kind"]
        );
    }

    #[test]
    fn two_reconciles_produce_equal_children() {
        let duck_type = duck_type();

        assert_eq!(desired_aggregate_roles(&duck_type), desired_aggregate_roles(&duck_type));
        assert_eq!(desired_crd(&duck_type).unwrap(), desired_crd(&duck_type).unwrap());
    }

    #[test]
    fn established_condition_is_mirrored_from_status() {
        let mut crd = desired_crd(&duck_type()).unwrap();
        assert!(established_condition(&crd).is_none());

        crd.status = Some(CustomResourceDefinitionStatus {
            conditions: Some(vec![CustomResourceDefinitionCondition {
                type_: "Established".to_string(),
                status: "True".to_string(),
                reason: Some("InitialNamesAccepted".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });

        assert_eq!(established_condition(&crd).unwrap().status, "True");
    }
}
