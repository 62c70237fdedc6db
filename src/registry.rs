//! Service registry and route matcher (spec.md §4.1).
//!
//! Grounded on the teacher's `routing.rs` regex-cache approach to path
//! matching, generalized to the exact template grammar the spec calls for
//! (`{name}`, `*`, `**`) instead of the teacher's segment trie.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, instrument};

use crate::error::{GatewayError, Result};
use crate::model::{EndpointConfig, RouteLookupResult, RouteMatch, ServiceRegistration};
use crate::ports::ServiceRepository;

/// An operation gated by a service's [`crate::model::PermissionPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOperation {
    /// Creating a brand-new service registration.
    Create,
    /// Updating an existing registration's endpoints/config.
    Update,
    /// Deleting a registration.
    Delete,
    /// Writing a new permission policy onto a registration.
    WritePermissions,
}

impl RegistryOperation {
    fn policy_key(self) -> &'static str {
        match self {
            RegistryOperation::Create => "service.config.create",
            RegistryOperation::Update => "service.config.update",
            RegistryOperation::Delete => "service.config.delete",
            RegistryOperation::WritePermissions => "service.permissions.write",
        }
    }
}

/// Compiled form of an [`EndpointConfig`]'s path template: the regex used
/// to match incoming paths and the ordered list of `{name}` capture names.
struct CompiledEndpoint {
    regex: Regex,
    var_names: Vec<String>,
    endpoint: EndpointConfig,
}

/// A single compiled service: its registration plus every endpoint's
/// compiled path pattern, in registration order so first-match is stable.
struct CompiledService {
    registration: ServiceRegistration,
    endpoints: Vec<CompiledEndpoint>,
}

/// Service registry and path-template route matcher. Holds a compiled,
/// read-optimized mirror of whatever is in the backing
/// [`ServiceRepository`]; every successful write refreshes its entry.
pub struct Registry {
    repo: Arc<dyn ServiceRepository>,
    compiled: DashMap<String, Arc<CompiledService>>,
}

impl Registry {
    /// Construct a registry backed by `repo`. The compiled cache starts
    /// empty and is populated lazily via [`Registry::warm`] or on writes.
    pub fn new(repo: Arc<dyn ServiceRepository>) -> Self {
        Self { repo, compiled: DashMap::new() }
    }

    /// Preload the compiled cache for every currently-registered service.
    /// Fetches run concurrently rather than one-at-a-time, since a large
    /// registry shouldn't serialize an otherwise fully async startup path.
    pub async fn warm(&self) -> Result<()> {
        let ids = self.repo.list_ids().await?;
        let fetches = ids.iter().map(|id| self.repo.get(id));
        let registrations = futures::future::try_join_all(fetches).await?;

        for reg in registrations.into_iter().flatten() {
            self.compiled.insert(reg.service_id.clone(), Arc::new(compile(reg)?));
        }
        Ok(())
    }

    /// Register a new service, or update an existing one under optimistic
    /// locking. `expected_current_version` must be `None` for a brand-new
    /// `service_id` and `Some(current_version)` for an update; a mismatch
    /// produces [`GatewayError::Conflict`] rather than blind overwrite.
    #[instrument(skip(self, reg, actor_roles))]
    pub async fn register(
        &self,
        mut reg: ServiceRegistration,
        expected_current_version: Option<u64>,
        actor_roles: &[String],
    ) -> Result<()> {
        if ServiceRegistration::is_reserved_id(&reg.service_id) {
            return Err(GatewayError::Validation {
                field: "service_id".into(),
                reason: format!("'{}' is a reserved identifier", reg.service_id),
            });
        }

        let op = if expected_current_version.is_none() {
            reg.version = 1;
            RegistryOperation::Create
        } else {
            reg.version = expected_current_version.unwrap() + 1;
            RegistryOperation::Update
        };
        self.authorize(&reg, op, actor_roles)?;

        validate_registration(&reg)?;

        let ok = self.repo.put_cas(reg.clone(), expected_current_version).await?;
        if !ok {
            return Err(GatewayError::Conflict {
                reason: "service_id already registered at a different version".into(),
            });
        }

        self.compiled.insert(reg.service_id.clone(), Arc::new(compile(reg)?));
        Ok(())
    }

    /// Remove a registration and invalidate its compiled cache entry.
    #[instrument(skip(self, actor_roles))]
    pub async fn unregister(&self, service_id: &str, actor_roles: &[String]) -> Result<bool> {
        if let Some(entry) = self.compiled.get(service_id) {
            self.authorize(&entry.registration, RegistryOperation::Delete, actor_roles)?;
        }
        let removed = self.repo.delete(service_id).await?;
        self.compiled.remove(service_id);
        Ok(removed)
    }

    fn authorize(&self, reg: &ServiceRegistration, op: RegistryOperation, actor_roles: &[String]) -> Result<()> {
        let Some(policy) = &reg.permission_policy else { return Ok(()) };
        let Some(allowed_roles) = policy.get(op.policy_key()) else { return Ok(()) };
        if allowed_roles.is_empty() {
            return Ok(());
        }
        if actor_roles.iter().any(|r| allowed_roles.contains(r)) {
            Ok(())
        } else {
            Err(GatewayError::AuthZ {
                reason: format!("missing role for '{}'", op.policy_key()),
            })
        }
    }

    /// Fetch a registration by ID without attempting any path matching.
    pub async fn get_service(&self, service_id: &str) -> Result<Option<ServiceRegistration>> {
        if let Some(entry) = self.compiled.get(service_id) {
            return Ok(Some(entry.registration.clone()));
        }
        self.repo.get(service_id).await
    }

    /// Find the route for a gateway-mode request against a single known
    /// service (caller already resolved `service_id`).
    #[instrument(skip(self))]
    pub fn find_route(&self, service_id: &str, method: &str, path: &str) -> RouteLookupResult {
        let Some(compiled) = self.compiled.get(service_id) else {
            return RouteLookupResult::None;
        };
        match_within(&compiled, method, path)
    }

    /// Find the route across all registered services, used for gateway-mode
    /// dispatch where the caller has not already narrowed to one service.
    /// Services are tried in no particular cross-service order; within a
    /// service, endpoints are tried in registration order (first match
    /// wins), per spec.md §4.1.
    #[instrument(skip(self))]
    pub fn find_route_any(&self, method: &str, path: &str) -> RouteLookupResult {
        let mut fallback = RouteLookupResult::None;
        for entry in self.compiled.iter() {
            match match_within(&entry, method, path) {
                matched @ RouteLookupResult::Matched(_) => return matched,
                service_only @ RouteLookupResult::ServiceOnly(_) => {
                    if matches!(fallback, RouteLookupResult::None) {
                        fallback = service_only;
                    }
                }
                RouteLookupResult::None => {}
            }
        }
        fallback
    }
}

fn match_within(compiled: &CompiledService, method: &str, path: &str) -> RouteLookupResult {
    let normalized = normalize_path(path);
    for ep in &compiled.endpoints {
        if !method_matches(&ep.endpoint.methods, method) {
            continue;
        }
        let Some(captures) = ep.regex.captures(&normalized) else { continue };
        let mut path_variables = HashMap::new();
        for name in &ep.var_names {
            if let Some(m) = captures.name(name) {
                path_variables.insert(name.clone(), m.as_str().to_string());
            }
        }
        let target_path = apply_rewrite(ep.endpoint.path_rewrite.as_deref(), &normalized, &path_variables);
        debug!(service_id = %compiled.registration.service_id, path = %normalized, "route matched");
        return RouteLookupResult::Matched(RouteMatch {
            service: compiled.registration.clone(),
            endpoint: ep.endpoint.clone(),
            target_path,
            path_variables,
        });
    }
    RouteLookupResult::ServiceOnly(compiled.registration.clone())
}

fn method_matches(configured: &[String], actual: &str) -> bool {
    configured.iter().any(|m| m == "*" || m.eq_ignore_ascii_case(actual))
}

/// Strip a trailing slash (except for the root path) and ensure a leading
/// slash, so `"foo/"`, `"/foo/"`, and `"/foo"` all compile/match identically.
pub fn normalize_path(path: &str) -> String {
    let mut p = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
    if p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

fn apply_rewrite(template: Option<&str>, matched_path: &str, vars: &HashMap<String, String>) -> String {
    let Some(template) = template else { return matched_path.to_string() };
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                name.push(c2);
            }
            if let Some(value) = vars.get(&name) {
                out.push_str(value);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn compile(reg: ServiceRegistration) -> Result<CompiledService> {
    let mut endpoints = Vec::with_capacity(reg.endpoints.len());
    for endpoint in &reg.endpoints {
        let (pattern, var_names) = compile_template(&endpoint.path)?;
        let regex = Regex::new(&pattern).map_err(|e| GatewayError::Validation {
            field: "path".into(),
            reason: format!("invalid path template '{}': {e}", endpoint.path),
        })?;
        endpoints.push(CompiledEndpoint { regex, var_names, endpoint: endpoint.clone() });
    }
    Ok(CompiledService { registration: reg, endpoints })
}

/// Translate a path template into an anchored regex plus the ordered list
/// of named captures it declares.
///
/// - `{name}` -> a named capture matching any run of non-`/` characters.
/// - `**`     -> an unnamed capture matching anything, including `/`.
/// - `*`      -> an unnamed capture matching any run of non-`/` characters.
fn compile_template(template: &str) -> Result<(String, Vec<String>)> {
    let normalized = normalize_path(template);
    let mut pattern = String::from("^");
    let mut var_names = Vec::new();
    let mut chars = normalized.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c2);
                }
                if !closed || name.is_empty() {
                    return Err(GatewayError::Validation {
                        field: "path".into(),
                        reason: format!("unterminated or empty path variable in '{template}'"),
                    });
                }
                pattern.push_str(&format!("(?P<{name}>[^/]+)"));
                var_names.push(name);
            }
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    pattern.push_str("(?:.*)");
                } else {
                    pattern.push_str("(?:[^/]*)");
                }
            }
            other => {
                pattern.push_str(&regex::escape(&other.to_string()));
            }
        }
    }
    pattern.push('$');
    Ok((pattern, var_names))
}

fn validate_registration(reg: &ServiceRegistration) -> Result<()> {
    if reg.service_id.trim().is_empty() {
        return Err(GatewayError::Validation { field: "service_id".into(), reason: "must not be empty".into() });
    }
    if reg.base_url.trim().is_empty() {
        return Err(GatewayError::Validation { field: "base_url".into(), reason: "must not be empty".into() });
    }
    for ep in &reg.endpoints {
        if ep.methods.is_empty() {
            return Err(GatewayError::Validation {
                field: "methods".into(),
                reason: format!("endpoint '{}' declares no methods", ep.path),
            });
        }
        if let Some(rewrite) = &ep.path_rewrite {
            let (_, template_vars) = compile_template(&ep.path)?;
            for var in extract_rewrite_vars(rewrite) {
                if !template_vars.contains(&var) {
                    return Err(GatewayError::Validation {
                        field: "path_rewrite".into(),
                        reason: format!("rewrite references undeclared variable '{{{var}}}'"),
                    });
                }
            }
        }
    }
    Ok(())
}

fn extract_rewrite_vars(template: &str) -> Vec<String> {
    let mut vars = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                name.push(c2);
            }
            vars.push(name);
        }
    }
    vars
}
