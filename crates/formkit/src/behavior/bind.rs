//! Turning rules into live subscriptions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use formkit_reactive::{BindingScope, Computed, Dependency, Priority, Subscription};
use futures::FutureExt;
use futures::future::{AbortHandle, abortable};
use serde_json::Value;

use super::{
    BehaviorBinding, BehaviorContext, BehaviorRule, BindingInfo, ComputeFn, CopyOptions, Effect,
    Predicate, ToggleOptions, WatchFn,
};
use crate::node::{FormNode, GroupNode, WeakNode};

/// Bind `rule` against `scope`. Unresolvable paths warn (through
/// `resolve`) and skip the rule.
pub(crate) fn bind(scope: &GroupNode, rule: &BehaviorRule) -> Option<BehaviorBinding> {
    let target = scope.resolve(rule.target());
    let sources: Option<Vec<FormNode>> =
        rule.sources().iter().map(|path| scope.resolve(path)).collect();
    let (Some(target), Some(sources)) = (target, sources) else {
        tracing::debug!(
            message = "behavior.skip",
            kind = ?rule.kind(),
            scope = %scope.path(),
            target = %rule.target()
        );
        return None;
    };
    let first = sources.first()?.clone();

    let subscription = match rule.effect() {
        Effect::Compute(f) => derive_into(&target, &sources, Rc::clone(f)),
        Effect::Watch { callback, options } => watch(
            BehaviorContext::new(scope),
            &first,
            Rc::clone(callback),
            options.immediate,
            options.debounce,
        ),
        Effect::Toggle {
            predicate,
            enable_when,
            options,
        } => toggle(&first, &target, Rc::clone(predicate), *enable_when, *options),
        Effect::Copy(options) => copy(scope, &first, &target, options.clone()),
        Effect::Revalidate => revalidate(&sources, &target),
        Effect::Reset { predicate, value } => {
            reset(&first, &target, Rc::clone(predicate), value.clone())
        }
    };

    let info = BindingInfo {
        kind: rule.kind(),
        sources: sources.iter().map(FormNode::path).collect(),
        target: target.path(),
    };
    tracing::debug!(
        message = "behavior.bind",
        kind = ?info.kind,
        target = %info.target,
        sources = info.sources.len()
    );
    let mut held = BindingScope::new();
    held.hold(subscription);
    Some(BehaviorBinding { info, scope: held })
}

/// Write `f(source values)` into `target` now and after every change of a
/// source.
///
/// The write runs in the high-priority lane, ahead of any observer of the
/// same change, so observers read `target` already recomputed.
pub(crate) fn derive_into(target: &FormNode, sources: &[FormNode], f: ComputeFn) -> Subscription {
    let readers: Vec<WeakNode> = sources.iter().map(FormNode::downgrade).collect();
    let deps: Vec<&dyn Dependency> = sources.iter().map(FormNode::value_dependency).collect();
    let derived = Computed::new(
        move || {
            let values: Vec<Value> = readers
                .iter()
                .map(|reader| reader.upgrade().map_or(Value::Null, |node| node.value()))
                .collect();
            f(&values)
        },
        &deps,
    );
    target.set_value(derived.get());

    let writer = target.downgrade();
    derived
        .subscribe_with(Priority::High, move |value| {
            if let Some(target) = writer.upgrade() {
                target.set_value(value.clone());
            }
        })
        .retain(derived.clone())
}

fn watch(
    ctx: BehaviorContext,
    source: &FormNode,
    callback: WatchFn,
    immediate: bool,
    debounce: Option<Duration>,
) -> Subscription {
    if immediate {
        callback(&source.value(), &ctx);
    }
    let Some(delay) = debounce else {
        return source.subscribe_value(move |value| callback(value, &ctx));
    };

    let pending: Rc<RefCell<Option<AbortHandle>>> = Rc::default();
    let timer = Rc::clone(&pending);
    let on_change = source.subscribe_value(move |value| {
        if let Some(previous) = timer.borrow_mut().take() {
            previous.abort();
        }
        let sleep = ctx.runtime.sleep(delay);
        let (callback, fire_ctx, value) = (Rc::clone(&callback), ctx.clone(), value.clone());
        let (task, handle) = abortable(async move {
            sleep.await;
            callback(&value, &fire_ctx);
        });
        *timer.borrow_mut() = Some(handle);
        ctx.runtime.spawn(task.map(drop).boxed_local());
    });
    on_change.join(Subscription::on_dispose(move || {
        if let Some(handle) = pending.borrow_mut().take() {
            handle.abort();
        }
    }))
}

fn toggle(
    source: &FormNode,
    target: &FormNode,
    predicate: Predicate,
    enable_when: bool,
    options: ToggleOptions,
) -> Subscription {
    let last: Cell<Option<bool>> = Cell::new(None);
    let writer = target.downgrade();
    let apply = move |value: &Value| {
        let enabled = predicate(value) == enable_when;
        if last.replace(Some(enabled)) == Some(enabled) {
            return;
        }
        let Some(target) = writer.upgrade() else {
            return;
        };
        if enabled {
            target.enable();
        } else {
            if options.reset_on_disable {
                target.reset(None);
            }
            target.disable();
        }
    };
    apply(&source.value());
    source.subscribe_value(apply)
}

/// Mirror `source` into `target` while the guard holds.
///
/// The guard is re-checked on every change of the scope, so the mirror
/// catches up as soon as the guard turns true again.
fn copy(scope: &GroupNode, source: &FormNode, target: &FormNode, options: CopyOptions) -> Subscription {
    let CopyOptions { when, transform } = options;
    let (reader, writer) = (source.downgrade(), target.downgrade());
    let write: Rc<dyn Fn()> = Rc::new(move || {
        let (Some(source), Some(target)) = (reader.upgrade(), writer.upgrade()) else {
            return;
        };
        let value = source.value();
        target.set_value(transform.as_ref().map_or_else(|| value.clone(), |t| t(&value)));
    });

    let Some(when) = when else {
        write();
        return source.subscribe_value_with(Priority::High, move |_| write());
    };

    let holds = Rc::new(Cell::new(when(&scope.value())));
    if holds.get() {
        write();
    }
    let on_source = {
        let (guard_scope, when, holds, write) =
            (scope.downgrade(), Rc::clone(&when), Rc::clone(&holds), Rc::clone(&write));
        source.subscribe_value_with(Priority::High, move |_| {
            let Some(scope) = guard_scope.upgrade() else {
                return;
            };
            holds.set(when(&scope.value()));
            if holds.get() {
                write();
            }
        })
    };
    let on_guard = scope.value_cell().subscribe_with(Priority::High, move |value| {
        let now = when(value);
        let held = holds.replace(now);
        if now && !held {
            write();
        }
    });
    on_source.join(on_guard)
}

fn revalidate(triggers: &[FormNode], target: &FormNode) -> Subscription {
    let writer = target.downgrade();
    triggers.iter().fold(Subscription::empty(), |held, trigger| {
        let writer = writer.clone();
        held.join(trigger.subscribe_value(move |_| {
            if let Some(target) = writer.upgrade() {
                target.validate_in_background();
            }
        }))
    })
}

fn reset(source: &FormNode, target: &FormNode, predicate: Predicate, value: Option<Value>) -> Subscription {
    let was = Cell::new(predicate(&source.value()));
    let writer = target.downgrade();
    source.subscribe_value(move |current| {
        let now = predicate(current);
        let before = was.replace(now);
        if now && !before {
            if let Some(target) = writer.upgrade() {
                target.reset(value.clone());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;
    use crate::behavior::WatchOptions;
    use crate::config::FormConfig;
    use crate::node::FieldStatus;
    use crate::schema::{FieldSchema, GroupSchema};

    fn numbers() -> GroupSchema {
        GroupSchema::new()
            .field("a", FieldSchema::new(json!(0)))
            .field("b", FieldSchema::new(json!(0)))
            .field("sum", FieldSchema::new(json!(0)))
    }

    fn build(schema: &GroupSchema) -> GroupNode {
        GroupNode::create(schema, FormConfig::default()).unwrap()
    }

    fn int(value: &Value) -> i64 {
        value.as_i64().unwrap_or(0)
    }

    #[test]
    fn compute_keeps_target_in_sync() {
        let schema = numbers()
            .behaviors(|b| {
                b.compute(["a", "b"], "sum", |v| json!(int(&v[0]) + int(&v[1])));
            })
            .unwrap();
        let form = build(&schema);
        form.field("a").unwrap().set_value(json!(3));
        form.field("b").unwrap().set_value(json!(4));
        assert_eq!(form.field("sum").unwrap().value(), json!(7));
        form.field("a").unwrap().set_value(json!(10));
        assert_eq!(form.field("sum").unwrap().value(), json!(14));
        assert!(!form.field("sum").unwrap().dirty());
    }

    #[test]
    fn watch_sees_each_change_and_immediate_value() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let schema = numbers()
            .behaviors(move |b| {
                let options = WatchOptions {
                    immediate: true,
                    ..WatchOptions::default()
                };
                b.watch("a", options, move |value, ctx| {
                    s.borrow_mut().push(value.clone());
                    ctx.set_value("b", json!(int(value) * 2));
                });
            })
            .unwrap();
        let form = build(&schema);
        form.field("a").unwrap().set_value(json!(5));
        assert_eq!(*seen.borrow(), vec![json!(0), json!(5)]);
        assert_eq!(form.field("b").unwrap().value(), json!(10));
    }

    #[test]
    fn enable_when_resets_on_disable() {
        let schema = GroupSchema::new()
            .field("has_company", FieldSchema::new(json!(true)))
            .field("company", FieldSchema::new(json!("")))
            .behaviors(|b| {
                let options = ToggleOptions {
                    reset_on_disable: true,
                };
                b.enable_when("company", options, |form| form["has_company"] == json!(true));
            })
            .unwrap();
        let form = build(&schema);
        let company = form.field("company").unwrap();
        assert_eq!(company.status(), FieldStatus::Valid);
        company.set_value(json!("Acme"));

        form.field("has_company").unwrap().set_value(json!(false));
        assert_eq!(company.status(), FieldStatus::Disabled);
        assert_eq!(company.value(), json!(""));

        form.field("has_company").unwrap().set_value(json!(true));
        assert_eq!(company.status(), FieldStatus::Valid);
    }

    #[test]
    fn disable_when_applies_at_bind_time() {
        let schema = GroupSchema::new()
            .field("locked", FieldSchema::new(json!(true)))
            .field("note", FieldSchema::new(json!("x")))
            .behaviors(|b| {
                b.disable_when("note", ToggleOptions::default(), |form| form["locked"] == json!(true));
            })
            .unwrap();
        let form = build(&schema);
        assert!(form.field("note").unwrap().is_disabled());
        assert_eq!(form.field("note").unwrap().value(), json!("x"));
    }

    #[test]
    fn copy_to_respects_guard_and_transform() {
        let schema = GroupSchema::new()
            .field("same", FieldSchema::new(json!(true)))
            .field("billing", FieldSchema::new(json!("a")))
            .field("shipping", FieldSchema::new(json!("")))
            .behaviors(|b| {
                b.copy_to(
                    "billing",
                    "shipping",
                    CopyOptions::default()
                        .when(|form| form["same"] == json!(true))
                        .transform(|v| json!(v.as_str().unwrap_or_default().to_uppercase())),
                );
            })
            .unwrap();
        let form = build(&schema);
        assert_eq!(form.field("shipping").unwrap().value(), json!("A"));
        form.field("same").unwrap().set_value(json!(false));
        form.field("billing").unwrap().set_value(json!("b"));
        assert_eq!(form.field("shipping").unwrap().value(), json!("A"));

        form.field("same").unwrap().set_value(json!(true));
        assert_eq!(form.field("shipping").unwrap().value(), json!("B"));
    }

    #[test]
    fn revalidate_when_trigger_changes() {
        let schema = GroupSchema::new()
            .field("password", FieldSchema::new(json!("secret")))
            .field("confirm", FieldSchema::new(json!("secret")).update_on(crate::UpdateOn::Submit))
            .validation(|v| {
                v.validate("confirm", |value, ctx| {
                    (ctx.value("password").as_ref() != Some(value))
                        .then(|| crate::ValidationError::new("mismatch", "Does not match"))
                });
            })
            .behaviors(|b| {
                b.revalidate_when("confirm", ["password"]);
            })
            .unwrap();
        let form = build(&schema);
        form.field("password").unwrap().set_value(json!("other"));
        assert_eq!(form.field("confirm").unwrap().status(), FieldStatus::Invalid);
        assert_eq!(form.field("confirm").unwrap().value(), json!("secret"));
    }

    #[test]
    fn reset_when_fires_on_transition_only() {
        let schema = GroupSchema::new()
            .field("country", FieldSchema::new(json!("FR")))
            .field("state", FieldSchema::new(json!("")))
            .behaviors(|b| {
                b.reset_when("state", None, |form| form["country"] != json!("US"));
            })
            .unwrap();
        let form = build(&schema);
        let state = form.field("state").unwrap();
        form.field("country").unwrap().set_value(json!("US"));
        state.set_value(json!("CA"));
        assert_eq!(state.value(), json!("CA"));

        form.field("country").unwrap().set_value(json!("DE"));
        assert_eq!(state.value(), json!(""));
        assert!(!state.dirty());
    }

    #[test]
    fn unresolved_paths_skip_the_rule() {
        let schema = numbers()
            .behaviors(|b| {
                b.compute(["missing"], "sum", |v| v[0].clone());
            })
            .unwrap();
        let form = build(&schema);
        assert!(form.bindings().is_empty());
    }

    #[test]
    fn dispose_stops_effects() {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let schema = numbers()
            .behaviors(move |b| {
                b.watch("a", WatchOptions::default(), move |_, _| h.set(h.get() + 1));
            })
            .unwrap();
        let form = build(&schema);
        assert_eq!(form.bindings().len(), 1);
        form.field("a").unwrap().set_value(json!(1));
        form.dispose();
        form.field("a").unwrap().set_value(json!(2));
        assert_eq!(hits.get(), 1);
        assert!(form.bindings().is_empty());
    }
}
