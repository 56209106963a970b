//! Declarative rules wiring source paths to effects on a target path.
//!
//! Rules are registered on a [`GroupSchema`](crate::GroupSchema) through
//! [`BehaviorSchema`] and bound when the form is built (or, for array
//! items, when the item is pushed). Each bound rule becomes a
//! [`BehaviorBinding`] owning the subscriptions it created; disposing the
//! owning group releases them.
//!
//! | Rule | Effect |
//! |------|--------|
//! | `compute` | target = f(sources), kept in sync |
//! | `watch` | side effect on change, optional `immediate` and `debounce` |
//! | `enable_when` / `disable_when` | toggle target from a predicate over the scope value |
//! | `copy_to` | one-way mirror, optionally guarded and transformed |
//! | `revalidate_when` | re-run target validation when a trigger changes |
//! | `reset_when` | reset target when a predicate turns true |
//!
//! Closures never hold nodes strongly; they reach the tree through weak
//! handles so a binding cannot keep its own form alive.

mod bind;

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use formkit_reactive::BindingScope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::node::{FormNode, GroupNode, WeakGroup};
use crate::path::Path;
use crate::runtime::FormRuntime;

pub(crate) use bind::{bind, derive_into};

pub(crate) type ComputeFn = Rc<dyn Fn(&[Value]) -> Value>;
pub(crate) type WatchFn = Rc<dyn Fn(&Value, &BehaviorContext)>;
pub(crate) type Predicate = Rc<dyn Fn(&Value) -> bool>;
pub(crate) type TransformFn = Rc<dyn Fn(&Value) -> Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Compute,
    Watch,
    EnableWhen,
    DisableWhen,
    CopyTo,
    RevalidateWhen,
    ResetWhen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Fire once at bind time with the current value.
    pub immediate: bool,
    /// Coalesce bursts of changes into one trailing call.
    pub debounce: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleOptions {
    /// Reset the target to its initial value when it becomes disabled.
    pub reset_on_disable: bool,
}

/// Guard and transform for [`BehaviorSchema::copy_to`].
#[derive(Clone, Default)]
pub struct CopyOptions {
    when: Option<Predicate>,
    transform: Option<TransformFn>,
}

impl CopyOptions {
    /// Copy only while `guard` holds over the scope value.
    #[must_use]
    pub fn when(mut self, guard: impl Fn(&Value) -> bool + 'static) -> Self {
        self.when = Some(Rc::new(guard));
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: impl Fn(&Value) -> Value + 'static) -> Self {
        self.transform = Some(Rc::new(transform));
        self
    }
}

impl fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOptions")
            .field("when", &self.when.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) enum Effect {
    Compute(ComputeFn),
    Watch {
        callback: WatchFn,
        options: WatchOptions,
    },
    Toggle {
        predicate: Predicate,
        enable_when: bool,
        options: ToggleOptions,
    },
    Copy(CopyOptions),
    Revalidate,
    Reset {
        predicate: Predicate,
        value: Option<Value>,
    },
}

/// One registered rule, not yet bound to nodes.
#[derive(Clone)]
pub struct BehaviorRule {
    kind: BehaviorKind,
    sources: Vec<Path>,
    target: Path,
    effect: Effect,
}

impl BehaviorRule {
    #[must_use]
    pub fn kind(&self) -> BehaviorKind {
        self.kind
    }

    #[must_use]
    pub fn sources(&self) -> &[Path] {
        &self.sources
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub(crate) fn effect(&self) -> &Effect {
        &self.effect
    }

    /// Rewrite every path of the rule.
    pub(crate) fn relocate(self, map: impl Fn(&Path) -> Result<Path>) -> Result<Self> {
        Ok(Self {
            sources: self.sources.iter().map(&map).collect::<Result<_>>()?,
            target: map(&self.target)?,
            ..self
        })
    }
}

impl fmt::Debug for BehaviorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRule")
            .field("kind", &self.kind)
            .field("sources", &self.sources)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Collects rules. Passed to the closure given to
/// [`GroupSchema::behaviors`](crate::GroupSchema::behaviors).
#[derive(Default)]
pub struct BehaviorSchema {
    rules: Vec<BehaviorRule>,
}

impl BehaviorSchema {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_rules(self) -> Vec<BehaviorRule> {
        self.rules
    }

    fn push(&mut self, kind: BehaviorKind, sources: Vec<Path>, target: Path, effect: Effect) -> &mut Self {
        self.rules.push(BehaviorRule {
            kind,
            sources,
            target,
            effect,
        });
        self
    }

    /// Keep `target` equal to `f` over the values of `sources`, in order.
    pub fn compute<I, P>(
        &mut self,
        sources: I,
        target: impl Into<Path>,
        f: impl Fn(&[Value]) -> Value + 'static,
    ) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        let sources = sources.into_iter().map(Into::into).collect();
        self.push(BehaviorKind::Compute, sources, target.into(), Effect::Compute(Rc::new(f)))
    }

    /// Call `f` with the new value of `source` after every change.
    pub fn watch(
        &mut self,
        source: impl Into<Path>,
        options: WatchOptions,
        f: impl Fn(&Value, &BehaviorContext) + 'static,
    ) -> &mut Self {
        let source = source.into();
        let effect = Effect::Watch {
            callback: Rc::new(f),
            options,
        };
        self.push(BehaviorKind::Watch, vec![source.clone()], source, effect)
    }

    /// Enable `target` while `predicate` holds over the scope value,
    /// disable it otherwise.
    pub fn enable_when(
        &mut self,
        target: impl Into<Path>,
        options: ToggleOptions,
        predicate: impl Fn(&Value) -> bool + 'static,
    ) -> &mut Self {
        let effect = Effect::Toggle {
            predicate: Rc::new(predicate),
            enable_when: true,
            options,
        };
        self.push(BehaviorKind::EnableWhen, vec![Path::scope()], target.into(), effect)
    }

    /// Disable `target` while `predicate` holds over the scope value.
    pub fn disable_when(
        &mut self,
        target: impl Into<Path>,
        options: ToggleOptions,
        predicate: impl Fn(&Value) -> bool + 'static,
    ) -> &mut Self {
        let effect = Effect::Toggle {
            predicate: Rc::new(predicate),
            enable_when: false,
            options,
        };
        self.push(BehaviorKind::DisableWhen, vec![Path::scope()], target.into(), effect)
    }

    /// Mirror `source` into `target`.
    pub fn copy_to(
        &mut self,
        source: impl Into<Path>,
        target: impl Into<Path>,
        options: CopyOptions,
    ) -> &mut Self {
        self.push(
            BehaviorKind::CopyTo,
            vec![source.into()],
            target.into(),
            Effect::Copy(options),
        )
    }

    /// Re-validate `target` whenever any of `triggers` changes.
    pub fn revalidate_when<I, P>(&mut self, target: impl Into<Path>, triggers: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        let triggers = triggers.into_iter().map(Into::into).collect();
        self.push(BehaviorKind::RevalidateWhen, triggers, target.into(), Effect::Revalidate)
    }

    /// Reset `target` each time `predicate` over the scope value turns
    /// true. `Some(value)` becomes the target's new initial value.
    pub fn reset_when(
        &mut self,
        target: impl Into<Path>,
        value: Option<Value>,
        predicate: impl Fn(&Value) -> bool + 'static,
    ) -> &mut Self {
        let effect = Effect::Reset {
            predicate: Rc::new(predicate),
            value,
        };
        self.push(BehaviorKind::ResetWhen, vec![Path::scope()], target.into(), effect)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Description of a live binding, as paths resolved at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub kind: BehaviorKind,
    pub sources: Vec<Path>,
    pub target: Path,
}

/// A bound rule and the subscriptions it holds.
#[derive(Debug)]
pub struct BehaviorBinding {
    info: BindingInfo,
    scope: BindingScope,
}

impl BehaviorBinding {
    #[must_use]
    pub fn info(&self) -> &BindingInfo {
        &self.info
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.scope.is_empty()
    }

    /// Release every subscription of this binding.
    pub fn dispose(&mut self) {
        self.scope.clear();
    }
}

/// What a `watch` callback can reach: its scope group and the form root.
#[derive(Clone)]
pub struct BehaviorContext {
    scope: WeakGroup,
    runtime: Rc<FormRuntime>,
}

impl BehaviorContext {
    pub(crate) fn new(scope: &GroupNode) -> Self {
        Self {
            scope: scope.downgrade(),
            runtime: Rc::clone(scope.runtime()),
        }
    }

    /// The group the rule was registered on (the item, for per-item rules).
    #[must_use]
    pub fn scope(&self) -> Option<GroupNode> {
        self.scope.upgrade()
    }

    #[must_use]
    pub fn form(&self) -> Option<GroupNode> {
        self.runtime.root()
    }

    /// Resolve `path` against the scope (`$.` paths from the root).
    #[must_use]
    pub fn node(&self, path: impl Into<Path>) -> Option<FormNode> {
        self.scope()?.resolve(&path.into())
    }

    #[must_use]
    pub fn get(&self, path: impl Into<Path>) -> Option<Value> {
        self.node(path).map(|node| node.value())
    }

    /// Programmatic write. Returns `false` when the path does not resolve.
    pub fn set_value(&self, path: impl Into<Path>, value: Value) -> bool {
        match self.node(path) {
            Some(node) => {
                node.set_value(value);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for BehaviorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorContext")
            .field("scope", &self.scope().map(|scope| scope.path().to_string()))
            .finish_non_exhaustive()
    }
}
