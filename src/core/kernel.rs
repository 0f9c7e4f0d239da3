//! Kernel
//!
//! Declaration-time API (`register`, `register_hook`, `register_atom`) and
//! the two request-time entry points (`compile`, `execute`).
//!
//! Registries are open until first use: a model's hooks freeze at its first
//! `compile`, and the atom registry freezes at the first `compile` of any
//! model. After that everything is read-only and shared between concurrent
//! executions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{info, info_span, Instrument};

use super::chain::PhaseChain;
use super::context::ExecutionContext;
use super::error::{KernelError, KernelResult};
use super::executor::run_chain;
use super::phase::Phase;
use crate::atoms::{Atom, AtomRegistry};
use crate::config::KernelConfig;
use crate::hooks::{Hook, HookRegistry};
use crate::schema::{ListParams, SchemaCompiler, SchemaIn, SchemaOut};
use crate::spec::{ModelSpec, OperationAlias, SpecError, SpecTable};

type ChainKey = (String, OperationAlias);

/// The operation kernel
pub struct Kernel {
    config: Arc<KernelConfig>,
    tables: RwLock<HashMap<String, Arc<SpecTable>>>,
    atoms: RwLock<AtomRegistry>,
    hooks: RwLock<HookRegistry>,
    chains: RwLock<HashMap<ChainKey, Arc<PhaseChain>>>,
    frozen: RwLock<HashSet<String>>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl Kernel {
    /// Kernel with the built-in atoms
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config: Arc::new(config),
            tables: RwLock::new(HashMap::new()),
            atoms: RwLock::new(AtomRegistry::builtin()),
            hooks: RwLock::new(HookRegistry::new()),
            chains: RwLock::new(HashMap::new()),
            frozen: RwLock::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Validates and registers a model
    pub fn register(&self, spec: ModelSpec) -> KernelResult<Arc<SpecTable>> {
        let table = Arc::new(SpecTable::build(spec)?);
        let mut tables = write(&self.tables)?;
        if tables.contains_key(table.model()) {
            return Err(SpecError::duplicate_model(table.model()).into());
        }
        info!(
            model = table.model(),
            fields = table.fields().len(),
            policies = table.policies().len(),
            "registered model"
        );
        tables.insert(table.model().to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Binds a hook to `ops` of `model` at `phase`
    pub fn register_hook(
        &self,
        model: &str,
        ops: impl IntoIterator<Item = OperationAlias>,
        phase: Phase,
        hook: Hook,
    ) -> KernelResult<()> {
        self.table(model)?;
        // Held until the hook is stored; compile freezes under the write lock.
        let frozen = read(&self.frozen)?;
        if frozen.contains(model) {
            return Err(SpecError::registry_frozen(model).into());
        }
        let ops: Vec<_> = ops.into_iter().collect();
        info!(model, hook = %hook.name, phase = %phase, ops = ops.len(), "registered hook");
        write(&self.hooks)?.register(model, ops, phase, hook);
        drop(frozen);
        Ok(())
    }

    /// Adds a custom atom; only before the first compile
    pub fn register_atom(&self, atom: Atom) -> KernelResult<()> {
        let frozen = read(&self.frozen)?;
        if !frozen.is_empty() {
            return Err(SpecError::registry_frozen(atom.label()).into());
        }
        info!(atom = %atom.label(), phase = %atom.phase, "registered atom");
        write(&self.atoms)?.register(atom);
        drop(frozen);
        Ok(())
    }

    pub fn table(&self, model: &str) -> KernelResult<Arc<SpecTable>> {
        read(&self.tables)?
            .get(model)
            .cloned()
            .ok_or_else(|| SpecError::unknown_model(model).into())
    }

    /// Registered model names, sorted
    pub fn models(&self) -> KernelResult<Vec<String>> {
        let mut models: Vec<String> = read(&self.tables)?.keys().cloned().collect();
        models.sort();
        Ok(models)
    }

    /// Compiled chain for (model, op), cached after the first call
    pub fn compile(&self, model: &str, op: OperationAlias) -> KernelResult<Arc<PhaseChain>> {
        let key = (model.to_string(), op);
        if let Some(chain) = read(&self.chains)?.get(&key) {
            return Ok(Arc::clone(chain));
        }

        let table = self.table(model)?;
        if !table.is_enabled(op) {
            return Err(SpecError::operation_disabled(model, op.as_str()).into());
        }

        let mut chains = write(&self.chains)?;
        if let Some(chain) = chains.get(&key) {
            return Ok(Arc::clone(chain));
        }
        write(&self.frozen)?.insert(model.to_string());
        let chain = {
            let atoms = read(&self.atoms)?;
            let hooks = read(&self.hooks)?;
            Arc::new(PhaseChain::compile(table, op, &atoms, &hooks))
        };
        chains.insert(key, Arc::clone(&chain));
        Ok(chain)
    }

    /// Runs `chain` with `ctx`, returning the wire response
    pub async fn execute(
        &self,
        chain: &PhaseChain,
        ctx: &mut ExecutionContext,
    ) -> KernelResult<Value> {
        let span = info_span!(
            "kernel.execute",
            model = chain.model(),
            op = %chain.op(),
            request_id = %ctx.request_id,
        );
        run_chain(chain, Arc::clone(&self.config), ctx)
            .instrument(span)
            .await
    }

    /// `compile` then `execute`
    pub async fn run(
        &self,
        model: &str,
        op: OperationAlias,
        ctx: &mut ExecutionContext,
    ) -> KernelResult<Value> {
        let chain = self.compile(model, op)?;
        self.execute(&chain, ctx).await
    }

    pub fn schema_in(&self, model: &str, op: OperationAlias) -> KernelResult<SchemaIn> {
        let table = self.table(model)?;
        Ok(SchemaCompiler::compile_in(&table, op))
    }

    pub fn schema_out(&self, model: &str, op: OperationAlias) -> KernelResult<SchemaOut> {
        let table = self.table(model)?;
        Ok(SchemaCompiler::compile_out(&table, op))
    }

    pub fn list_params(&self, model: &str) -> KernelResult<ListParams> {
        let table = self.table(model)?;
        Ok(SchemaCompiler::list_params(&table))
    }

    /// `PHASE:label` sequence of a chain. Compiles (and freezes) the model.
    pub fn plan(&self, model: &str, op: OperationAlias) -> KernelResult<Vec<String>> {
        Ok(self.compile(model, op)?.plan())
    }

    /// Plans of every enabled operation of every model
    pub fn kernelz(&self) -> KernelResult<BTreeMap<String, BTreeMap<OperationAlias, Vec<String>>>> {
        let mut out = BTreeMap::new();
        for model in self.models()? {
            let table = self.table(&model)?;
            let mut plans = BTreeMap::new();
            for op in table.enabled_operations() {
                plans.insert(op, self.plan(&model, op)?);
            }
            out.insert(model, plans);
        }
        Ok(out)
    }
}

fn read<T>(lock: &RwLock<T>) -> KernelResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| KernelError::internal("kernel registry lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> KernelResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| KernelError::internal("kernel registry lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::StepFn;
    use crate::spec::{FieldSpec, IoSpec, SpecErrorCode};

    fn widget() -> ModelSpec {
        ModelSpec::new("Widget")
            .field(FieldSpec::string("name").io(IoSpec::new()
                .in_verbs([OperationAlias::Create])
                .out_verbs([OperationAlias::Read])))
            .disable(OperationAlias::Clear)
    }

    fn spec_code(err: KernelError) -> SpecErrorCode {
        match err {
            KernelError::Spec(e) => e.code(),
            other => panic!("expected spec error, got {other}"),
        }
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let kernel = Kernel::default();
        kernel.register(widget()).unwrap();
        assert_eq!(
            spec_code(kernel.register(widget()).unwrap_err()),
            SpecErrorCode::DuplicateModel
        );
    }

    #[test]
    fn test_compile_disabled_operation_fails() {
        let kernel = Kernel::default();
        kernel.register(widget()).unwrap();
        assert_eq!(
            spec_code(kernel.compile("Widget", OperationAlias::Clear).unwrap_err()),
            SpecErrorCode::OperationDisabled
        );
        assert_eq!(
            spec_code(kernel.compile("Nope", OperationAlias::Read).unwrap_err()),
            SpecErrorCode::UnknownModel
        );
    }

    #[test]
    fn test_compile_is_cached() {
        let kernel = Kernel::default();
        kernel.register(widget()).unwrap();
        let a = kernel.compile("Widget", OperationAlias::Read).unwrap();
        let b = kernel.compile("Widget", OperationAlias::Read).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_registries_freeze_after_compile() {
        let kernel = Kernel::default();
        kernel.register(widget()).unwrap();
        kernel
            .register_hook("Widget", [OperationAlias::Read], Phase::PostHandler, Hook::sync("h", |_| Ok(None)))
            .unwrap();
        kernel.compile("Widget", OperationAlias::Read).unwrap();

        let err = kernel
            .register_hook("Widget", [OperationAlias::Read], Phase::PostHandler, Hook::sync("late", |_| Ok(None)))
            .unwrap_err();
        assert_eq!(spec_code(err), SpecErrorCode::RegistryFrozen);

        let err = kernel
            .register_atom(Atom::new("x", "y", Phase::Handler, 0, StepFn::sync(|_| Ok(None))))
            .unwrap_err();
        assert_eq!(spec_code(err), SpecErrorCode::RegistryFrozen);
    }

    #[test]
    fn test_accepted_hooks_always_join_chain() {
        for _ in 0..50 {
            let kernel = Arc::new(Kernel::default());
            kernel.register(widget()).unwrap();
            let registrar = {
                let kernel = Arc::clone(&kernel);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|i| {
                            kernel
                                .register_hook(
                                    "Widget",
                                    [OperationAlias::Read],
                                    Phase::PostHandler,
                                    Hook::sync(format!("h{}", i), |_| Ok(None)),
                                )
                                .is_ok()
                        })
                        .count()
                })
            };
            let chain = kernel.compile("Widget", OperationAlias::Read).unwrap();
            let accepted = registrar.join().unwrap();
            assert_eq!(chain.steps(Phase::PostHandler).len(), accepted);
        }
    }

    #[test]
    fn test_kernelz_lists_enabled_operations() {
        let kernel = Kernel::default();
        kernel.register(widget()).unwrap();
        let z = kernel.kernelz().unwrap();
        let plans = &z["Widget"];
        assert_eq!(plans.len(), OperationAlias::ALL.len() - 1);
        assert!(!plans.contains_key(&OperationAlias::Clear));
        assert!(plans[&OperationAlias::Read].contains(&"HANDLER:sys:crud:read".to_string()));
    }
}
