//! Field Policies
//!
//! Reconciles client-supplied and server-authoritative values for governed
//! fields such as owner or tenant identifiers.
//!
//! - `StrictServer`: the principal's value is injected on insert; a client
//!   value that differs is a [`KernelError::PolicyViolation`]
//! - `ClientSet`: the client's value is taken verbatim
//!
//! A strict policy declared with `scope_rows` also restricts which existing
//! rows the principal can see. Service-role principals bypass both checks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::context::{ExecutionContext, Principal};
use crate::core::error::{KernelError, KernelResult};
use crate::crud::filters::Predicate;
use crate::spec::{FieldSpec, OperationAlias, SpecTable};

/// Who decides the value of a governed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    StrictServer,
    ClientSet,
}

/// Where the authoritative value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalClaim {
    UserId,
    TenantId,
    Claim(String),
}

impl PrincipalClaim {
    /// Value of this claim for `principal`
    pub fn value_for(&self, principal: &Principal) -> Option<Value> {
        match self {
            PrincipalClaim::UserId => principal.user_id.clone().map(Value::String),
            PrincipalClaim::TenantId => principal.tenant_id.clone().map(Value::String),
            PrincipalClaim::Claim(name) => principal.claims.get(name).cloned(),
        }
    }
}

/// Policy for one governed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    pub field: String,
    pub mode: PolicyMode,
    #[serde(default = "default_source")]
    pub source: PrincipalClaim,
    #[serde(default)]
    pub scope_rows: bool,
}

fn default_source() -> PrincipalClaim {
    PrincipalClaim::UserId
}

impl FieldPolicy {
    pub fn strict_server(field: impl Into<String>, source: PrincipalClaim) -> Self {
        Self {
            field: field.into(),
            mode: PolicyMode::StrictServer,
            source,
            scope_rows: false,
        }
    }

    pub fn client_set(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            mode: PolicyMode::ClientSet,
            source: PrincipalClaim::UserId,
            scope_rows: false,
        }
    }

    /// Restrict visible rows to those owned by the principal
    pub fn scoped(mut self) -> Self {
        self.scope_rows = true;
        self
    }
}

/// Applies a model's field policies to one execution
pub struct PolicyResolver;

impl PolicyResolver {
    /// Fills `ctx.policy_values` and `ctx.scope`.
    ///
    /// No-op for models without policies.
    pub fn resolve(
        table: &SpecTable,
        op: OperationAlias,
        ctx: &mut ExecutionContext,
    ) -> KernelResult<()> {
        for policy in table.policies() {
            if policy.mode != PolicyMode::StrictServer {
                continue;
            }
            let Some(field) = table.field(&policy.field) else {
                continue;
            };
            let authoritative = policy.source.value_for(&ctx.principal);

            if op.carries_values() {
                for supplied in supplied_values(&ctx.payload, field) {
                    check_supplied(table, field, authoritative.as_ref(), supplied, &ctx.principal)?;
                }
                if op.inserts() && !ctx.principal.is_service_role {
                    let value = authoritative.clone().ok_or_else(|| {
                        KernelError::policy_violation(
                            table.model(),
                            &field.name,
                            "principal carries no value for governed field",
                        )
                    })?;
                    debug!(model = table.model(), field = %field.name, "injecting server value");
                    ctx.policy_values.insert(field.name.clone(), value);
                }
            }

            let reads_existing = !matches!(op, OperationAlias::Create | OperationAlias::BulkCreate);
            if policy.scope_rows && reads_existing && !ctx.principal.is_service_role {
                let value = authoritative.ok_or_else(|| {
                    KernelError::policy_violation(
                        table.model(),
                        &field.name,
                        "principal carries no value for row scope",
                    )
                })?;
                ctx.scope.push(Predicate::eq(field.name.clone(), value));
            }
        }
        Ok(())
    }
}

/// Values the client explicitly supplied for `field`, under its name or
/// alias. `null` and the empty string count as not supplied.
fn supplied_values<'a>(payload: &'a Value, field: &'a FieldSpec) -> Vec<&'a Value> {
    let rows: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    rows.into_iter()
        .filter_map(Value::as_object)
        .flat_map(|row| {
            let mut keys = vec![field.name.as_str()];
            if let Some(alias) = field.io.alias_in.as_deref() {
                keys.push(alias);
            }
            keys.into_iter().filter_map(move |k| row.get(k))
        })
        .filter(|value| !is_missing(value))
        .collect()
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn check_supplied(
    table: &SpecTable,
    field: &FieldSpec,
    authoritative: Option<&Value>,
    supplied: &Value,
    principal: &Principal,
) -> KernelResult<()> {
    if principal.is_service_role || Some(supplied) == authoritative {
        return Ok(());
    }
    Err(KernelError::policy_violation(
        table.model(),
        &field.name,
        format!(
            "client-supplied value {} conflicts with server-governed value",
            supplied
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crud::memory::InMemoryStore;
    use crate::spec::{IoSpec, ModelSpec};
    use serde_json::json;

    fn table(policy: FieldPolicy) -> SpecTable {
        SpecTable::build(
            ModelSpec::new("Doc")
                .field(FieldSpec::string("title").io(
                    IoSpec::new().in_verbs([OperationAlias::Create, OperationAlias::Update]),
                ))
                .field(FieldSpec::string("owner_id").io(
                    IoSpec::new()
                        .in_verbs([OperationAlias::Create])
                        .alias_in("ownerId"),
                ))
                .policy(policy),
        )
        .unwrap()
    }

    fn ctx(principal: Principal, payload: Value) -> ExecutionContext {
        ExecutionContext::new(InMemoryStore::new().session(), principal).with_payload(payload)
    }

    #[test]
    fn test_strict_server_injects_principal_value() {
        let t = table(FieldPolicy::strict_server("owner_id", PrincipalClaim::UserId));
        let mut c = ctx(Principal::user("u1"), json!({"title": "x"}));
        PolicyResolver::resolve(&t, OperationAlias::Create, &mut c).unwrap();
        assert_eq!(c.policy_values["owner_id"], json!("u1"));
    }

    #[test]
    fn test_strict_server_rejects_conflicting_alias() {
        let t = table(FieldPolicy::strict_server("owner_id", PrincipalClaim::UserId));
        let mut c = ctx(Principal::user("u1"), json!({"ownerId": "u2"}));
        let err = PolicyResolver::resolve(&t, OperationAlias::Create, &mut c).unwrap_err();
        assert_eq!(err.code(), "POLICY_VIOLATION");
        assert_eq!(err.field(), Some("owner_id"));
    }

    #[test]
    fn test_strict_server_treats_null_and_empty_as_missing() {
        let t = table(FieldPolicy::strict_server("owner_id", PrincipalClaim::UserId));
        for payload in [json!({"owner_id": null}), json!({"ownerId": ""})] {
            let mut c = ctx(Principal::user("u1"), payload);
            PolicyResolver::resolve(&t, OperationAlias::Create, &mut c).unwrap();
            assert_eq!(c.policy_values["owner_id"], json!("u1"));
        }
    }

    #[test]
    fn test_strict_server_requires_principal_value() {
        let t = table(FieldPolicy::strict_server("owner_id", PrincipalClaim::TenantId));
        let mut c = ctx(Principal::user("u1"), json!({}));
        assert!(PolicyResolver::resolve(&t, OperationAlias::Create, &mut c).is_err());
    }

    #[test]
    fn test_service_role_may_set_field() {
        let t = table(FieldPolicy::strict_server("owner_id", PrincipalClaim::UserId).scoped());
        let mut c = ctx(Principal::service_role(), json!({"owner_id": "anyone"}));
        PolicyResolver::resolve(&t, OperationAlias::Create, &mut c).unwrap();
        assert!(c.policy_values.is_empty());
        assert!(c.scope.is_empty());
    }

    #[test]
    fn test_scope_added_for_reads() {
        let t = table(FieldPolicy::strict_server("owner_id", PrincipalClaim::UserId).scoped());
        let mut c = ctx(Principal::user("u1"), Value::Null);
        PolicyResolver::resolve(&t, OperationAlias::List, &mut c).unwrap();
        assert_eq!(c.scope, vec![Predicate::eq("owner_id", json!("u1"))]);
    }

    #[test]
    fn test_client_set_is_noop() {
        let t = table(FieldPolicy::client_set("owner_id"));
        let mut c = ctx(Principal::user("u1"), json!({"owner_id": "u9"}));
        PolicyResolver::resolve(&t, OperationAlias::Create, &mut c).unwrap();
        assert!(c.policy_values.is_empty());
    }

    #[test]
    fn test_policy_deserializes() {
        let p: FieldPolicy = serde_json::from_value(json!({
            "field": "org", "mode": "strict_server", "source": {"claim": "org"}, "scope_rows": true
        }))
        .unwrap();
        assert_eq!(p.source, PrincipalClaim::Claim("org".to_string()));
        assert!(p.scope_rows);
    }
}
