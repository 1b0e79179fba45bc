//! Gateway routing table and its authentication guard.
//!
//! [`PUBLIC_ROUTES`] is the one list of routes that bypass the bearer-token
//! guard. The gateway declarations in `edge` and the guard classification
//! here are both derived from it. A [`RoutingTable`] can also be rebuilt from
//! a synthesized template, which is how the contract checks enumerate what was
//! actually declared.

use crate::core::error::{InfraError, Result};
use crate::core::template::Template;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// A route served without authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicRoute {
    pub method: &'static str,
    pub path: &'static str,
}

pub const PUBLIC_ROUTES: [PublicRoute; 3] = [
    PublicRoute {
        method: "GET",
        path: "/health",
    },
    PublicRoute {
        method: "GET",
        path: "/swagger",
    },
    PublicRoute {
        method: "GET",
        path: "/auth",
    },
];

pub const CORS_ALLOW_ORIGINS: [&str; 1] = ["*"];
pub const CORS_ALLOW_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "OPTIONS"];
pub const CORS_ALLOW_HEADERS: [&str; 2] = ["Content-Type", "Authorization"];

pub const ROOT_PATH: &str = "/";
pub const PROXY_PATH: &str = "/{proxy+}";
pub const ANY: &str = "ANY";

/// How the gateway treats a request before it reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Guard {
    /// Bearer token validated against the user directory
    Bearer,
    /// Forwarded without authentication
    Public,
    /// CORS preflight answered by the gateway itself
    Preflight,
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer => write!(f, "bearer"),
            Self::Public => write!(f, "public"),
            Self::Preflight => write!(f, "preflight"),
        }
    }
}

/// One method on one gateway resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub guard: Guard,
}

/// What the gateway does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Forwarded to the backend; a healthy backend answers 200
    Forward,
    /// Answered by the gateway's mock integration with 204
    Preflight,
    Unauthorized,
    Forbidden,
}

impl Outcome {
    pub fn status(self) -> u16 {
        match self {
            Self::Forward => 200,
            Self::Preflight => 204,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
        }
    }
}

/// Result of validating a bearer token with the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerdict {
    Valid,
    /// Malformed, expired, or not issued by the directory
    Invalid,
    /// Valid but lacking the required scope
    Insufficient,
}

/// Token validation is owned by the identity service; this is its seam.
pub trait TokenVerifier {
    fn verify(&self, token: &str) -> TokenVerdict;
}

/// Rejects every token.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl TokenVerifier for DenyAll {
    fn verify(&self, _token: &str) -> TokenVerdict {
        TokenVerdict::Invalid
    }
}

/// Fixed token sets, for exercising the guard without a live directory.
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    pub valid: HashSet<String>,
    pub insufficient: HashSet<String>,
}

impl TokenVerifier for StaticTokens {
    fn verify(&self, token: &str) -> TokenVerdict {
        if self.valid.contains(token) {
            TokenVerdict::Valid
        } else if self.insufficient.contains(token) {
            TokenVerdict::Insufficient
        } else {
            TokenVerdict::Invalid
        }
    }
}

/// Every route the gateway serves.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    /// The intended table: guarded catch-all on `/` and `/{proxy+}`, one open
    /// method per public route, and a preflight method on every resource.
    pub fn designed() -> Self {
        let mut routes = Vec::new();
        for path in [ROOT_PATH, PROXY_PATH] {
            routes.push(route(ANY, path, Guard::Bearer));
            routes.push(route("OPTIONS", path, Guard::Preflight));
        }
        for public in PUBLIC_ROUTES.iter() {
            routes.push(route(public.method, public.path, Guard::Public));
            routes.push(route("OPTIONS", public.path, Guard::Preflight));
        }
        Self { routes }
    }

    /// Rebuild the table from the gateway resources and methods in a template.
    pub fn from_template(template: &Template) -> Result<Self> {
        let mut parents: HashMap<&str, (Option<&str>, &str)> = HashMap::new();
        for (id, r) in &template.resources {
            if r.resource_type != "AWS::ApiGateway::Resource" {
                continue;
            }
            let part = r
                .properties
                .get("PathPart")
                .and_then(Value::as_str)
                .ok_or_else(|| InfraError::Validation(format!("gateway resource '{}' has no PathPart", id)))?;
            let parent = r.properties.get("ParentId").and_then(resource_ref);
            parents.insert(id.as_str(), (parent, part));
        }

        let mut routes = Vec::new();
        for (id, r) in &template.resources {
            if r.resource_type != "AWS::ApiGateway::Method" {
                continue;
            }
            let method = r
                .properties
                .get("HttpMethod")
                .and_then(Value::as_str)
                .ok_or_else(|| InfraError::Validation(format!("method '{}' has no HttpMethod", id)))?;
            let path = match r.properties.get("ResourceId").and_then(resource_ref) {
                Some(resource) => resource_path(resource, &parents)?,
                None => ROOT_PATH.to_string(),
            };
            let auth = r
                .properties
                .get("AuthorizationType")
                .and_then(Value::as_str)
                .unwrap_or("NONE");
            let integration = r
                .properties
                .get("Integration")
                .and_then(|i| i.get("Type"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let guard = match (auth, integration) {
                ("NONE", "MOCK") => Guard::Preflight,
                ("NONE", _) => Guard::Public,
                _ => Guard::Bearer,
            };
            routes.push(route(method, &path, guard));
        }
        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// `(method, path)` of every route that forwards without a token.
    pub fn unauthenticated(&self) -> BTreeSet<(String, String)> {
        self.routes
            .iter()
            .filter(|r| r.guard == Guard::Public)
            .map(|r| (r.method.clone(), r.path.clone()))
            .collect()
    }

    /// Routes whose guard is neither bearer nor a mock preflight on OPTIONS.
    pub fn unguarded_non_public(&self) -> Vec<&Route> {
        let public: HashSet<(&str, &str)> =
            PUBLIC_ROUTES.iter().map(|p| (p.method, p.path)).collect();
        self.routes
            .iter()
            .filter(|r| match r.guard {
                Guard::Bearer => false,
                Guard::Preflight => r.method != "OPTIONS",
                Guard::Public => !public.contains(&(r.method.as_str(), r.path.as_str())),
            })
            .collect()
    }

    /// Gateway resource that serves a request path: a fixed resource when one
    /// matches exactly, otherwise the greedy proxy.
    fn resource_for(&self, path: &str) -> Option<&str> {
        if let Some(r) = self.routes.iter().find(|r| r.path == path) {
            return Some(r.path.as_str());
        }
        if path != ROOT_PATH && self.routes.iter().any(|r| r.path == PROXY_PATH) {
            return Some(PROXY_PATH);
        }
        None
    }

    /// The route a request lands on, if any.
    pub fn resolve(&self, method: &str, path: &str) -> Option<&Route> {
        let path = normalize_path(path);
        let resource = self.resource_for(&path)?;
        let method = method.to_ascii_uppercase();
        self.routes
            .iter()
            .find(|r| r.path == resource && r.method == method)
            .or_else(|| {
                self.routes
                    .iter()
                    .find(|r| r.path == resource && r.method == ANY)
            })
    }

    /// What the gateway answers for a request.
    pub fn evaluate(
        &self,
        method: &str,
        path: &str,
        authorization: Option<&str>,
        verifier: &dyn TokenVerifier,
    ) -> Outcome {
        let Some(route) = self.resolve(method, path) else {
            // unmatched method on a fixed resource
            return Outcome::Forbidden;
        };
        match route.guard {
            Guard::Public => Outcome::Forward,
            Guard::Preflight => Outcome::Preflight,
            Guard::Bearer => {
                let Some(token) = authorization.and_then(bearer_token) else {
                    return Outcome::Unauthorized;
                };
                match verifier.verify(token) {
                    TokenVerdict::Valid => Outcome::Forward,
                    TokenVerdict::Invalid => Outcome::Unauthorized,
                    TokenVerdict::Insufficient => Outcome::Forbidden,
                }
            }
        }
    }
}

fn route(method: &str, path: &str, guard: Guard) -> Route {
    Route {
        method: method.to_string(),
        path: path.to_string(),
        guard,
    }
}

/// `Bearer <token>` with a non-empty token.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Strip the query string and any trailing slash; empty becomes `/`.
///
/// The gateway maps `/health/` onto the `/health` resource, so a trailing
/// slash keeps a public route public and a guarded route guarded.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT_PATH.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Logical id behind `{"Ref": id}`. The root resource (`Fn::GetAtt
/// [api, RootResourceId]`) yields `None`.
fn resource_ref(value: &Value) -> Option<&str> {
    value.get("Ref").and_then(Value::as_str)
}

fn resource_path(id: &str, parents: &HashMap<&str, (Option<&str>, &str)>) -> Result<String> {
    let mut parts = Vec::new();
    let mut current = Some(id);
    let mut seen = HashSet::new();
    while let Some(node) = current {
        if !seen.insert(node) {
            return Err(InfraError::Cycle(node.to_string()));
        }
        let (parent, part) = parents.get(node).ok_or_else(|| {
            InfraError::Validation(format!("method references unknown gateway resource '{}'", node))
        })?;
        parts.push(*part);
        current = *parent;
    }
    parts.reverse();
    Ok(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> StaticTokens {
        StaticTokens {
            valid: HashSet::from(["good".to_string()]),
            insufficient: HashSet::from(["reader".to_string()]),
        }
    }

    #[test]
    fn test_health_without_header_is_200() {
        let table = RoutingTable::designed();
        let outcome = table.evaluate("GET", "/health", None, &DenyAll);
        assert_eq!(outcome, Outcome::Forward);
        assert_eq!(outcome.status(), 200);
    }

    #[test]
    fn test_other_paths_without_header_are_401() {
        let table = RoutingTable::designed();
        for (method, path) in [
            ("GET", "/"),
            ("GET", "/projects"),
            ("POST", "/refactor/jobs"),
            ("DELETE", "/projects/42"),
            ("GET", "/health/deep"),
        ] {
            assert_eq!(
                table.evaluate(method, path, None, &DenyAll).status(),
                401,
                "{} {}",
                method,
                path
            );
        }
    }

    #[test]
    fn test_token_outcomes() {
        let table = RoutingTable::designed();
        let v = tokens();
        assert_eq!(
            table.evaluate("GET", "/projects", Some("Bearer good"), &v),
            Outcome::Forward
        );
        assert_eq!(
            table.evaluate("GET", "/projects", Some("Bearer expired"), &v).status(),
            401
        );
        assert_eq!(
            table.evaluate("GET", "/projects", Some("Bearer reader"), &v).status(),
            403
        );
        assert_eq!(
            table.evaluate("GET", "/projects", Some("Basic Zm9v"), &v).status(),
            401
        );
        assert_eq!(
            table.evaluate("GET", "/projects", Some("Bearer "), &v).status(),
            401
        );
    }

    #[test]
    fn test_unknown_method_on_fixed_resource_is_403() {
        let table = RoutingTable::designed();
        assert_eq!(table.evaluate("POST", "/health", None, &DenyAll).status(), 403);
    }

    #[test]
    fn test_preflight_never_needs_token() {
        let table = RoutingTable::designed();
        assert_eq!(
            table.evaluate("OPTIONS", "/projects", None, &DenyAll),
            Outcome::Preflight
        );
        assert_eq!(
            table.evaluate("OPTIONS", "/health", None, &DenyAll),
            Outcome::Preflight
        );
    }

    #[test]
    fn test_designed_public_set() {
        let table = RoutingTable::designed();
        let expected: BTreeSet<(String, String)> = PUBLIC_ROUTES
            .iter()
            .map(|p| (p.method.to_string(), p.path.to_string()))
            .collect();
        assert_eq!(table.unauthenticated(), expected);
        assert!(table.unguarded_non_public().is_empty());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/health/"), "/health");
        assert_eq!(normalize_path("/health?x=1"), "/health");
        assert_eq!(normalize_path("swagger"), "/swagger");
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Token abc"), None);
    }

    #[test]
    fn test_trailing_slash_keeps_route_guard() {
        let table = RoutingTable::designed();
        for public in PUBLIC_ROUTES.iter() {
            for path in [format!("{}/", public.path), format!("{}//", public.path)] {
                assert_eq!(
                    table.evaluate(public.method, &path, None, &DenyAll),
                    Outcome::Forward,
                    "{} {}",
                    public.method,
                    path
                );
            }
        }
        assert_eq!(table.evaluate("GET", "/projects/", None, &DenyAll).status(), 401);
        assert_eq!(table.evaluate("GET", "/health/deep/", None, &DenyAll).status(), 401);
        assert_eq!(table.evaluate("POST", "/health/", None, &DenyAll).status(), 403);
    }

    #[test]
    fn test_query_string_does_not_open_health() {
        let table = RoutingTable::designed();
        assert_eq!(table.evaluate("GET", "/health?debug=1", None, &DenyAll).status(), 200);
        assert_eq!(table.evaluate("GET", "/healthz", None, &DenyAll).status(), 401);
    }
}
