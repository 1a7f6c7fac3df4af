use kube::{
    api::{Api, Patch, PatchParams, ResourceExt, ObjectMeta},
    core::{ApiResource, DynamicObject, GroupVersion},
    discovery::oneshot,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as Finalizer},
        reflector::ObjectRef,
        watcher,
    },
    Client,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use futures::{FutureExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use serde_json::json;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use duck_operator_common::constant::{FINALIZER, ROLE_LABEL, TYPE_LABEL};
use duck_operator_common::telemetry::{error, info};

use crate::controller::submanager::SubManager;
use crate::controller::utils::{self, api_error_message, api_error_reason, apply, FIELD_MANAGER};
use crate::crd::v1::duck::{
    duck_api_resource, Duck, GroupResource, DUCK_CONDITIONS, DUCK_CONDITION_AVAILABLE,
    DUCK_CONDITION_RBAC,
};
use crate::crd::v1::duck_type::DuckType;
use crate::error::{ControllerError, Result};

/// Context for one DuckType's Duck controller. The resource is the duck kind
/// served by that DuckType's CRD; the duck type resource is the group-resource
/// the concrete roles are labelled with for aggregation.
pub struct DuckContext {
    pub client: Client,
    pub resource: ApiResource,
    pub duck_type_resource: String,
    pub requeue: Duration,
}

pub struct DuckController;

impl DuckController {
    /// Register the Duck controller with a sub-manager
    ///
    /// The controller reconciles the duck kind of the given DuckType and
    /// re-enqueues ducks when the CustomResourceDefinition or APIService
    /// possibly backing them changes. Successful reconciles requeue after
    /// the manager's sync period, the periodic resync.
    ///
    /// # Arguments
    /// * `manager` - The sub-manager to register with
    /// * `cancel` - Token firing when the sub-manager shuts down
    /// * `duck_type` - The DuckType owning the sub-manager
    ///
    /// # Returns
    /// A Result indicating whether registration succeeded
    pub fn register(
        manager: &mut SubManager,
        cancel: &CancellationToken,
        duck_type: &DuckType,
    ) -> Result<()> {
        let client = manager.client();
        let resource = duck_api_resource(duck_type);
        let ducks = manager.local_api(&resource)?;

        let ctx = Arc::new(DuckContext {
            client: client.clone(),
            resource: resource.clone(),
            duck_type_resource: duck_type.name_any(),
            requeue: manager.sync_period(),
        });

        let crds = Api::<CustomResourceDefinition>::all(client.clone());
        let api_services = Api::<APIService>::all(client);

        let controller = Controller::new_with(ducks, watcher::Config::default(), resource.clone());
        let store = controller.store();

        // changes to a CRD re-enqueue every duck whose member group-resource
        // carries the CRD's name; content is not consulted, only existence
        let crd_mapper = {
            let store = store.clone();
            let resource = resource.clone();
            move |crd: CustomResourceDefinition| {
                let name = crd.name_any();
                store
                    .state()
                    .iter()
                    .filter_map(|obj| {
                        let duck = Duck::from_dynamic(obj).ok()?;
                        (duck.group_resource().to_string() == name)
                            .then(|| ObjectRef::new_with(duck.name(), resource.clone()))
                    })
                    .collect::<Vec<_>>()
            }
        };

        // same for the `<version>.<group>` APIService
        let api_service_mapper = {
            let resource = resource.clone();
            move |service: APIService| {
                let name = service.name_any();
                store
                    .state()
                    .iter()
                    .filter_map(|obj| {
                        let duck = Duck::from_dynamic(obj).ok()?;
                        let member = duck.group_resource();
                        (format!("{}.{}", duck.spec.version, member.group) == name)
                            .then(|| ObjectRef::new_with(duck.name(), resource.clone()))
                    })
                    .collect::<Vec<_>>()
            }
        };

        let duck_type_name = duck_type.name_any();
        let future = controller
            .watches(crds, watcher::Config::default(), crd_mapper)
            .watches(api_services, watcher::Config::default(), api_service_mapper)
            .graceful_shutdown_on(cancel.clone().cancelled_owned())
            .run(DuckController::reconcile, utils::error_policy, ctx)
            .for_each(move |result| {
                let duck_type_name = duck_type_name.clone();
                async move {
                    match result {
                        Ok(_) => info!(event = "Reconciled", kind = "Duck", duck_type = duck_type_name.as_str()),
                        Err(e) => error!(event = "ReconcileError", error = %e),
                    }
                }
            });
        manager.add(future.map(|_| Ok(())));

        Ok(())
    }

    /// Reconcile a Duck resource
    ///
    /// # Arguments
    /// * `obj` - The duck, as served by the DuckType's CRD
    /// * `ctx` - The Duck controller context
    ///
    /// # Returns
    /// An action to take after reconciling the duck
    pub async fn reconcile(obj: Arc<DynamicObject>, ctx: Arc<DuckContext>) -> Result<Action> {
        let api: Api<DynamicObject> = Api::all_with(ctx.client.clone(), &ctx.resource);

        finalizer(&api, FINALIZER, obj, |event| async {
            match event {
                Finalizer::Apply(obj) => reconcile_duck(&obj, &ctx).await,
                Finalizer::Cleanup(obj) => cleanup_duck(&obj, &ctx).await,
            }
        })
        .await
        .map_err(|e| ControllerError::FinalizerError(e.to_string()))
    }
}

/// Reconcile a duck: apply its concrete view/edit roles, then probe
/// discovery for the declared member kind and publish the conditions.
async fn reconcile_duck(obj: &DynamicObject, ctx: &DuckContext) -> Result<Action> {
    let duck = Duck::from_dynamic(obj)?;
    let name = duck.name().to_string();
    let generation = duck.metadata.generation.unwrap_or_default();

    let mut status = duck.status.clone().unwrap_or_default();
    let mut result: Result<()> = Ok(());

    {
        let mut conditions = DUCK_CONDITIONS.manage(&mut status.conditions, generation);
        conditions.initialize();

        let role_api = Api::<ClusterRole>::all(ctx.client.clone());
        let mut rbac_err = None;
        for role in desired_member_roles(&duck, &ctx.duck_type_resource) {
            let role_name = role.metadata.name.clone().unwrap_or_default();
            if let Err(err) = apply(&role_api, role, &role_name).await {
                rbac_err = Some(err);
                break;
            }
        }
        match rbac_err {
            None => conditions.mark_true(DUCK_CONDITION_RBAC, "Defined", ""),
            Some(err) => match api_error_reason(&err) {
                Some("Invalid") => {
                    conditions.mark_false(DUCK_CONDITION_RBAC, "Invalid", &api_error_message(&err));
                }
                Some("AlreadyExists") => {
                    conditions.mark_false(DUCK_CONDITION_RBAC, "AlreadyExists", &api_error_message(&err));
                }
                _ => {
                    conditions.mark_unknown(DUCK_CONDITION_RBAC, "Unknown", "");
                    result = Err(err);
                }
            },
        }

        // Ask discovery whether the declared group/version serves a resource
        // matching the duck's name, and cross-check the declared names.
        let member = duck.group_resource();
        let gv = GroupVersion {
            group: member.group.clone(),
            version: duck.spec.version.clone(),
        };
        match oneshot::pinned_group(&ctx.client, &gv).await {
            Ok(group) => {
                let resources: Vec<ApiResource> = group
                    .versioned_resources(&gv.version)
                    .into_iter()
                    .map(|(resource, _)| resource)
                    .collect();
                match evaluate_availability(&duck, &resources) {
                    Availability::Available => {
                        conditions.mark_true(DUCK_CONDITION_AVAILABLE, "Available", "");
                        status.resolved = Some(duck.spec.type_meta());
                    }
                    Availability::NotFound => {
                        conditions.mark_false(DUCK_CONDITION_AVAILABLE, "NotFound", "");
                        status.resolved = None;
                    }
                    Availability::Invalid(message) => {
                        conditions.mark_false(DUCK_CONDITION_AVAILABLE, "Invalid", &message);
                        status.resolved = None;
                    }
                }
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                conditions.mark_false(DUCK_CONDITION_AVAILABLE, "NotFound", "");
                status.resolved = None;
            }
            Err(err) => {
                conditions.mark_unknown(DUCK_CONDITION_AVAILABLE, "Unknown", "");
                status.resolved = None;
                result = Err(err.into());
            }
        }
    }

    status.observed_generation = Some(generation);
    let api: Api<DynamicObject> = Api::all_with(ctx.client.clone(), &ctx.resource);
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;

    result.map(|_| Action::requeue(ctx.requeue))
}

/// Cleanup a duck by deleting its concrete roles. The roles carry no owner
/// reference (owner references to duck-typed parents are unreliable), so
/// they are removed here by their well-known names.
async fn cleanup_duck(obj: &DynamicObject, ctx: &DuckContext) -> Result<Action> {
    let duck = Duck::from_dynamic(obj)?;

    let role_api = Api::<ClusterRole>::all(ctx.client.clone());
    for role in desired_member_roles(&duck, &ctx.duck_type_resource) {
        let role_name = role.metadata.name.clone().unwrap_or_default();
        utils::delete(&role_api, &role_name).await?;
    }
    info!(event = "RolesDeleted", duck = duck.name());

    Ok(Action::await_change())
}

/// The concrete view/edit ClusterRoles for a duck, labelled for aggregation
/// into the duck type's roles and granting access to the member kind.
fn desired_member_roles(duck: &Duck, duck_type_resource: &str) -> Vec<ClusterRole> {
    let member = duck.group_resource();

    [
        ("view", vec!["get", "list", "watch"]),
        ("edit", vec!["get", "list", "watch", "patch"]),
    ]
    .into_iter()
    .map(|(role, verbs)| ClusterRole {
        metadata: ObjectMeta {
            name: Some(format!(
                "reconcilerio-ducks-{}-{}-{}",
                duck_type_resource,
                duck.name(),
                role
            )),
            labels: Some(BTreeMap::from([
                (TYPE_LABEL.to_string(), duck_type_resource.to_string()),
                (ROLE_LABEL.to_string(), role.to_string()),
            ])),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![member.group.clone()]),
            resources: Some(vec![member.resource.clone()]),
            verbs: verbs.into_iter().map(String::from).collect(),
            ..Default::default()
        }]),
        aggregation_rule: None,
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Availability {
    Available,
    NotFound,
    Invalid(String),
}

/// Decide the Available condition from the resources discovery reports for
/// the duck's group/version.
fn evaluate_availability(duck: &Duck, resources: &[ApiResource]) -> Availability {
    let member = duck.group_resource();

    for resource in resources {
        let candidate = GroupResource {
            group: member.group.clone(),
            resource: resource.plural.clone(),
        };
        if duck.name() != candidate.to_string() {
            continue;
        }

        let resolved = GroupResource {
            group: duck.spec.group.clone(),
            resource: resource.plural.clone(),
        };
        if resolved.to_string() != duck.name() {
            return Availability::Invalid(".spec.group does not match resolved resource".to_string());
        }
        if resource.kind != duck.spec.kind {
            return Availability::Invalid(format!(
                ".spec.kind does not match resolved kind {:?}",
                resource.kind
            ));
        }
        return Availability::Available;
    }

    Availability::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::v1::duck::DuckSpec;

    fn duck(name: &str, group: &str, version: &str, kind: &str) -> Duck {
        Duck {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: DuckSpec {
                group: group.to_string(),
                version: version.to_string(),
                kind: kind.to_string(),
            },
            status: None,
        }
    }

    fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: if group.is_empty() {
                version.to_string()
            } else {
                format!("{}/{}", group, version)
            },
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    #[test]
    fn member_roles_carry_aggregation_labels() {
        let duck = duck("deployments.apps", "apps", "v1", "Deployment");
        let roles = desired_member_roles(&duck, "ducks.example.com");
        assert_eq!(roles.len(), 2);

        for (role, suffix) in roles.iter().zip(["view", "edit"]) {
            assert_eq!(
                role.metadata.name.as_deref(),
                Some(format!("reconcilerio-ducks-ducks.example.com-deployments.apps-{}", suffix).as_str())
            );
            let labels = role.metadata.labels.as_ref().unwrap();
            assert_eq!(labels.get(TYPE_LABEL).unwrap(), "ducks.example.com");
            assert_eq!(labels.get(ROLE_LABEL).unwrap(), suffix);
            assert!(role.metadata.owner_references.is_none());
            assert!(role.aggregation_rule.is_none());

            let rule = &role.rules.as_ref().unwrap()[0];
            assert_eq!(rule.api_groups.as_ref().unwrap(), &["apps"]);
            assert_eq!(rule.resources.as_ref().unwrap(), &["deployments"]);
        }

        let verbs: Vec<_> = roles.iter().map(|r| r.rules.as_ref().unwrap()[0].verbs.clone()).collect();
        assert_eq!(verbs[0], vec!["get", "list", "watch"]);
        assert_eq!(verbs[1], vec!["get", "list", "watch", "patch"]);
    }

    #[test]
    fn availability_not_found_without_matching_resource() {
        let duck = duck("duckinstances.example.com", "example.com", "v1", "DuckInstance");

        assert_eq!(evaluate_availability(&duck, &[]), Availability::NotFound);
        assert_eq!(
            evaluate_availability(
                &duck,
                &[api_resource("example.com", "v1", "Goose", "geese")]
            ),
            Availability::NotFound
        );
    }

    #[test]
    fn availability_true_for_matching_resource() {
        let duck = duck("duckinstances.example.com", "example.com", "v1", "DuckInstance");
        let resources = [api_resource("example.com", "v1", "DuckInstance", "duckinstances")];

        assert_eq!(evaluate_availability(&duck, &resources), Availability::Available);
    }

    #[test]
    fn availability_invalid_on_kind_mismatch() {
        let duck = duck("duckinstances.example.com", "example.com", "v1", "Mallard");
        let resources = [api_resource("example.com", "v1", "DuckInstance", "duckinstances")];

        assert_eq!(
            evaluate_availability(&duck, &resources),
            Availability::Invalid(".spec.kind does not match resolved kind \"DuckInstance\"".to_string())
        );
    }

    #[test]
    fn availability_invalid_on_group_mismatch() {
        // the name resolves under apps, but the spec claims another group
        let duck = duck("deployments.apps", "example.com", "v1", "Deployment");
        let resources = [api_resource("apps", "v1", "Deployment", "deployments")];

        assert_eq!(
            evaluate_availability(&duck, &resources),
            Availability::Invalid(".spec.group does not match resolved resource".to_string())
        );
    }
}
