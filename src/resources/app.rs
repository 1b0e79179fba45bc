//! The whole stack, built in one leaf-first pass.

use super::compute::{declare_compute, Compute};
use super::config_store::{declare_config_stores, ConfigStores, Sources};
use super::database::{declare_database, Database};
use super::edge::{declare_edge, Edge};
use super::frontend::{declare_frontend, Frontend};
use super::identity::{declare_identity, Identity};
use super::network::{declare_network, Network};
use super::outputs::declare_outputs;
use super::roles::{declare_ci_role, declare_trust_roles, TrustRoles};
use super::storage::{declare_storage, Storage};
use crate::core::error::Result;
use crate::core::stack::Stack;
use crate::core::template::{Handle, Template};
use crate::core::types::StackConfig;

/// Every handle the pass produced, plus the finished template.
#[derive(Debug, Clone)]
pub struct AppStack {
    pub template: Template,
    pub network: Network,
    pub storage: Storage,
    pub database: Database,
    pub identity: Identity,
    pub roles: TrustRoles,
    pub compute: Compute,
    pub edge: Edge,
    pub frontend: Frontend,
    pub ci_role: Handle,
    pub stores: ConfigStores,
    pub outputs: usize,
}

pub fn build_app_stack(config: &StackConfig) -> Result<AppStack> {
    let mut stack = Stack::new(config);

    let network = declare_network(&mut stack)?;
    let storage = declare_storage(&mut stack)?;
    let database = declare_database(&mut stack, &network)?;
    let identity = declare_identity(&mut stack)?;
    let roles = declare_trust_roles(&mut stack, &storage, &database)?;
    let compute = declare_compute(&mut stack, &database, &storage, &identity, &roles)?;
    let edge = declare_edge(&mut stack, &network, &compute, &identity, &database)?;
    let frontend = declare_frontend(&mut stack)?;
    let ci_role = declare_ci_role(&mut stack, &frontend)?;

    let sources = Sources {
        storage: &storage,
        database: &database,
        identity: &identity,
        roles: &roles,
        compute: &compute,
        edge: &edge,
        frontend: &frontend,
    };
    let stores = declare_config_stores(&mut stack, &sources)?;
    let outputs = declare_outputs(&mut stack, &sources)?;

    tracing::info!(
        stack = %config.name,
        resources = stack.len(),
        outputs,
        "stack synthesized"
    );

    Ok(AppStack {
        template: stack.into_template(),
        network,
        storage,
        database,
        identity,
        roles,
        compute,
        edge,
        frontend,
        ci_role,
        stores,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::{build_execution_order, declaration_order_violations};
    use crate::resources::config_store::{Consumer, Sensitivity};
    use crate::resources::routes::{DenyAll, RoutingTable, PUBLIC_ROUTES};
    use std::collections::BTreeSet;

    fn config() -> StackConfig {
        serde_yaml_ng::from_str(
            "version: \"1.0\"\nname: CodeRefactorInfra\naccount: \"123456789012\"\nregion: us-east-1\n",
        )
        .unwrap()
    }

    #[test]
    fn test_builds_and_orders() {
        let app = build_app_stack(&config()).unwrap();
        assert!(declaration_order_violations(&app.template).is_empty());
        let order = build_execution_order(&app.template).unwrap();
        assert_eq!(order.len(), app.template.resources.len());
    }

    #[test]
    fn test_outputs_exported() {
        let app = build_app_stack(&config()).unwrap();
        assert_eq!(app.outputs, 13);
        let out = &app.template.outputs["APIGatewayURL"];
        assert_eq!(out.export.as_ref().unwrap().name, "CodeRefactor-API-Gateway-URL");
        assert!(app
            .template
            .outputs
            .values()
            .all(|o| o.export.as_ref().unwrap().name.starts_with("CodeRefactor-")));
    }

    #[test]
    fn test_names_for_reference_account() {
        let app = build_app_stack(&config()).unwrap();
        assert_eq!(app.storage.name, "code-refactor-bucket-123456789012-us-east-1");
        assert_eq!(app.identity.domain_prefix, "code-refactor-123456789012");
    }

    #[test]
    fn test_public_routes_exact() {
        let app = build_app_stack(&config()).unwrap();
        let table = RoutingTable::from_template(&app.template).unwrap();
        let expected: BTreeSet<(String, String)> = PUBLIC_ROUTES
            .iter()
            .map(|r| (r.method.to_string(), r.path.to_string()))
            .collect();
        assert_eq!(table.unauthenticated(), expected);
        assert!(table.unguarded_non_public().is_empty());
        assert_eq!(table.evaluate("GET", "/health", None, &DenyAll).status(), 200);
        assert_eq!(table.evaluate("GET", "/projects", None, &DenyAll).status(), 401);
        assert_eq!(table.evaluate("GET", "/", None, &DenyAll).status(), 401);
    }

    #[test]
    fn test_store_records() {
        let app = build_app_stack(&config()).unwrap();
        let plain = app
            .stores
            .records
            .iter()
            .filter(|r| r.sensitivity == Sensitivity::Plain)
            .count();
        assert_eq!(plain, 19);
        assert_eq!(app.stores.parameters.len(), 19);
        assert_eq!(app.stores.secrets.len(), 2);
        assert!(app
            .template
            .resources
            .contains_key("Parambackendapigatewayurl"));
        let secret = &app.template.resources["BackendSecrets"];
        assert_eq!(secret.properties["Name"], "/code-refactor/backend/secrets");
        assert!(app
            .stores
            .records
            .iter()
            .filter(|r| r.consumer == Consumer::Deployment)
            .all(|r| r.sensitivity == Sensitivity::Plain));
    }

    #[test]
    fn test_deterministic() {
        let a = build_app_stack(&config()).unwrap();
        let b = build_app_stack(&config()).unwrap();
        assert_eq!(
            serde_json::to_string(&a.template).unwrap(),
            serde_json::to_string(&b.template).unwrap()
        );
    }
}
