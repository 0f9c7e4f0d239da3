//! Execution Context
//!
//! Per-request mutable state threaded through a phase chain run.
//! A context is created by the caller for one `execute` and discarded after;
//! it is never shared between concurrent executions.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::{KernelError, KernelResult};
use super::phase::Phase;
use crate::config::KernelConfig;
use crate::crud::filters::Predicate;
use crate::crud::session::{DataSession, Row};
use crate::crud::sorter::SortSpec;
use crate::schema::OpView;

/// The already-authenticated caller
#[derive(Debug, Clone, Default)]
pub struct Principal {
    /// The authenticated user's ID
    pub user_id: Option<String>,

    /// Tenant the user acts for
    pub tenant_id: Option<String>,

    /// Bypasses row scoping and may set server-governed fields
    pub is_service_role: bool,

    /// Custom claims
    pub claims: HashMap<String, Value>,
}

impl Principal {
    /// Principal for an authenticated user
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn service_role() -> Self {
        Self {
            is_service_role: true,
            ..Self::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }
}

/// Raw list parameters as supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// `field` / `field__op` keys
    pub filters: Map<String, Value>,
    /// `field` or `-field`
    pub sort: Option<String>,
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Handle that cancels an in-flight execution at the next step boundary
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-request mutable state
pub struct ExecutionContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    pub principal: Principal,

    session: Arc<dyn DataSession>,

    /// Request body as received
    pub payload: Value,

    /// Target primary key for single-row operations
    pub ident: Option<Value>,

    pub query: ListQuery,

    /// Decoded input rows keyed by field name
    pub in_rows: Vec<Row>,

    /// Assembled values, one per input row
    pub values: Vec<Row>,

    /// Server-authoritative values produced by the policy resolver
    pub policy_values: Row,

    /// Translated list filters
    pub filters: Vec<Predicate>,

    /// Row scope imposed by policies
    pub scope: Vec<Predicate>,

    /// Translated sort
    pub sort: Option<SortSpec>,

    /// When cleared, END_TX rolls back instead of committing
    pub persist: bool,

    /// Scratch space for hooks
    pub temp: HashMap<String, Value>,

    /// Result of the most recent step that produced one
    pub result: Option<Value>,

    /// Wire-shaped response built by the OUT_* phases
    pub response: Option<Value>,

    view: Option<Arc<OpView>>,
    config: Arc<KernelConfig>,
    phase: Option<Phase>,
    cancelled: Arc<AtomicBool>,
    started_at: Instant,
}

impl ExecutionContext {
    /// Create a context bound to a data session
    pub fn new(session: Arc<dyn DataSession>, principal: Principal) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            principal,
            session,
            payload: Value::Null,
            ident: None,
            query: ListQuery::default(),
            in_rows: Vec::new(),
            values: Vec::new(),
            policy_values: Row::new(),
            filters: Vec::new(),
            scope: Vec::new(),
            sort: None,
            persist: true,
            temp: HashMap::new(),
            result: None,
            response: None,
            view: None,
            config: Arc::new(KernelConfig::default()),
            phase: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.ident = Some(id.into());
        self
    }

    /// List filters as `field` / `field__op` keys
    pub fn with_filters(mut self, filters: Value) -> Self {
        if let Value::Object(map) = filters {
            self.query.filters = map;
        }
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.query.sort = Some(sort.into());
        self
    }

    pub fn with_page(mut self, skip: usize, limit: Option<usize>) -> Self {
        self.query.skip = skip;
        self.query.limit = limit;
        self
    }

    pub fn session(&self) -> &Arc<dyn DataSession> {
        &self.session
    }

    /// Compiled view of the running operation
    pub fn view(&self) -> KernelResult<Arc<OpView>> {
        self.view
            .clone()
            .ok_or_else(|| KernelError::internal("execution context not attached to a chain"))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Phase currently running, if any
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    pub(crate) fn attach(&mut self, view: Arc<OpView>, config: Arc<KernelConfig>) {
        self.view = Some(view);
        self.config = config;
    }

    pub(crate) fn enter_phase(&mut self, phase: Phase) {
        self.phase = Some(phase);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("principal", &self.principal)
            .field("phase", &self.phase)
            .field("persist", &self.persist)
            .field("payload", &self.payload)
            .field("ident", &self.ident)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crud::memory::InMemoryStore;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(InMemoryStore::new().session(), Principal::user("u1"))
    }

    #[test]
    fn test_builders() {
        let ctx = ctx()
            .with_payload(json!({"name": "a"}))
            .with_id("42")
            .with_filters(json!({"value__gt": 1}))
            .with_sort("-value")
            .with_page(5, Some(10));

        assert_eq!(ctx.ident, Some(json!("42")));
        assert_eq!(ctx.query.filters["value__gt"], json!(1));
        assert_eq!(ctx.query.sort.as_deref(), Some("-value"));
        assert_eq!((ctx.query.skip, ctx.query.limit), (5, Some(10)));
        assert!(ctx.persist);
        assert!(ctx.phase().is_none());
    }

    #[test]
    fn test_cancel_handle_shares_flag() {
        let ctx = ctx();
        let handle = ctx.cancel_handle();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_unattached_context_has_no_view() {
        assert!(ctx().view().is_err());
    }

    #[test]
    fn test_principal_constructors() {
        let p = Principal::user("u1").with_tenant("t1");
        assert_eq!(p.user_id.as_deref(), Some("u1"));
        assert_eq!(p.tenant_id.as_deref(), Some("t1"));
        assert!(Principal::service_role().is_service_role);
    }
}
