//! Atom Registry
//!
//! Atoms are built-in, spec-driven steps. Each carries a trigger predicate
//! over (spec table, operation) and is compiled into a chain only when the
//! predicate holds. Within a phase, atoms run ordered by (priority, label),
//! never by registration order.

mod out;
mod query;
mod resolve;
mod schema;

use std::fmt;
use std::sync::Arc;

use crate::core::phase::Phase;
use crate::core::step::{Step, StepFn, StepKind};
use crate::spec::{OperationAlias, SpecTable};

pub use out::mask_value;

/// Decides whether an atom belongs in a chain
pub type Trigger = Arc<dyn Fn(&SpecTable, OperationAlias) -> bool + Send + Sync>;

/// A trigger-gated step
#[derive(Clone)]
pub struct Atom {
    pub domain: String,
    pub subject: String,
    pub phase: Phase,
    pub priority: i32,
    trigger: Trigger,
    func: StepFn,
}

impl Atom {
    /// An atom that always applies
    pub fn new(
        domain: impl Into<String>,
        subject: impl Into<String>,
        phase: Phase,
        priority: i32,
        func: StepFn,
    ) -> Self {
        Self {
            domain: domain.into(),
            subject: subject.into(),
            phase,
            priority,
            trigger: Arc::new(|_, _| true),
            func,
        }
    }

    /// Restrict the atom to chains where `trigger` holds
    pub fn when<F>(mut self, trigger: F) -> Self
    where
        F: Fn(&SpecTable, OperationAlias) -> bool + Send + Sync + 'static,
    {
        self.trigger = Arc::new(trigger);
        self
    }

    /// `atom:<domain>:<subject>`
    pub fn label(&self) -> String {
        format!("atom:{}:{}", self.domain, self.subject)
    }

    pub fn applies(&self, table: &SpecTable, op: OperationAlias) -> bool {
        (self.trigger)(table, op)
    }

    fn step(&self) -> Step {
        Step {
            label: self.label(),
            kind: StepKind::Atom,
            phase: self.phase,
            func: self.func.clone(),
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("label", &self.label())
            .field("phase", &self.phase)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Registered atoms
#[derive(Debug, Default)]
pub struct AtomRegistry {
    atoms: Vec<Atom>,
}

impl AtomRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in atoms
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(resolve::policy_resolve());
        registry.register(schema::collect_in());
        registry.register(resolve::assemble());
        registry.register(resolve::validate_in());
        registry.register(query::filter_translate());
        registry.register(query::sort_translate());
        registry.register(schema::collect_out());
        registry.register(out::masking());
        registry
    }

    pub fn register(&mut self, atom: Atom) {
        self.atoms.push(atom);
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Qualifying atom steps for one phase, ordered by (priority, label)
    pub fn steps(&self, phase: Phase, table: &SpecTable, op: OperationAlias) -> Vec<Step> {
        let mut atoms: Vec<&Atom> = self
            .atoms
            .iter()
            .filter(|a| a.phase == phase && a.applies(table, op))
            .collect();
        atoms.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.label().cmp(&b.label()))
        });
        atoms.into_iter().map(Atom::step).collect()
    }
}

/// Shared trigger: the operation carries values and something consumes them
fn takes_input(table: &SpecTable, op: OperationAlias) -> bool {
    op.carries_values() && (!table.fields_for_in(op).is_empty() || !table.policies().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{FieldPolicy, PrincipalClaim};
    use crate::spec::{FieldSpec, FilterOp, IoSpec, ModelSpec};

    fn labels(steps: Vec<Step>) -> Vec<String> {
        steps.into_iter().map(|s| s.label).collect()
    }

    fn plain() -> SpecTable {
        SpecTable::build(ModelSpec::new("Plain").field(FieldSpec::string("n"))).unwrap()
    }

    fn rich() -> SpecTable {
        SpecTable::build(
            ModelSpec::new("Rich")
                .field(FieldSpec::string("name").io(IoSpec::new()
                    .in_verbs([OperationAlias::Create])
                    .out_verbs([OperationAlias::Read, OperationAlias::List])
                    .filter_ops([FilterOp::Eq])
                    .sortable()
                    .sensitive()))
                .field(FieldSpec::string("owner"))
                .policy(FieldPolicy::strict_server("owner", PrincipalClaim::UserId)),
        )
        .unwrap()
    }

    #[test]
    fn test_plain_model_gets_minimal_atoms() {
        let registry = AtomRegistry::builtin();
        let t = plain();
        assert!(registry.steps(Phase::PreTxBegin, &t, OperationAlias::Create).is_empty());
        assert!(registry.steps(Phase::PreHandler, &t, OperationAlias::Create).is_empty());
        // implicit id is output-visible everywhere
        assert_eq!(
            labels(registry.steps(Phase::OutCollect, &t, OperationAlias::Read)),
            ["atom:schema:collect_out"]
        );
        assert!(registry.steps(Phase::OutMask, &t, OperationAlias::Read).is_empty());
        assert!(registry.steps(Phase::OutCollect, &t, OperationAlias::Delete).is_empty());
    }

    #[test]
    fn test_priority_order_within_phase() {
        let registry = AtomRegistry::builtin();
        let t = rich();
        assert_eq!(
            labels(registry.steps(Phase::PreHandler, &t, OperationAlias::Create)),
            [
                "atom:schema:collect_in",
                "atom:resolve:assemble",
                "atom:wire:validate_in"
            ]
        );
        assert_eq!(
            labels(registry.steps(Phase::PreHandler, &t, OperationAlias::List)),
            ["atom:query:filter_translate", "atom:query:sort_translate"]
        );
        assert_eq!(
            labels(registry.steps(Phase::PreTxBegin, &t, OperationAlias::Create)),
            ["atom:policy:resolve"]
        );
        assert_eq!(
            labels(registry.steps(Phase::OutMask, &t, OperationAlias::Read)),
            ["atom:out:masking"]
        );
    }

    #[test]
    fn test_custom_atom_sorted_by_priority_then_label() {
        let mut registry = AtomRegistry::new();
        registry.register(Atom::new("z", "late", Phase::Handler, 5, StepFn::sync(|_| Ok(None))));
        registry.register(Atom::new("b", "x", Phase::Handler, 1, StepFn::sync(|_| Ok(None))));
        registry.register(Atom::new("a", "x", Phase::Handler, 1, StepFn::sync(|_| Ok(None))));
        registry.register(
            Atom::new("never", "x", Phase::Handler, 0, StepFn::sync(|_| Ok(None)))
                .when(|_, _| false),
        );
        assert_eq!(
            labels(registry.steps(Phase::Handler, &plain(), OperationAlias::Read)),
            ["atom:a:x", "atom:b:x", "atom:z:late"]
        );
    }
}
