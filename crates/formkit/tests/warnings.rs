//! Usage mistakes surface as `warn!` events on target `formkit::usage`
//! and never as panics or errors.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use formkit::{
    ArraySchema, FieldSchema, FieldStatus, FormConfig, GroupNode, GroupSchema, MemberAccess,
    ValidationError, WatchOptions,
};
use serde_json::json;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// Records the `op` field of every usage warning.
#[derive(Clone, Default)]
struct UsageLog(Arc<Mutex<Vec<String>>>);

impl UsageLog {
    fn ops(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct OpVisitor(Option<String>);

impl Visit for OpVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "op" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "op" && self.0.is_none() {
            self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

impl<S> Layer<S> for UsageLog
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target() != "formkit::usage" || *meta.level() != Level::WARN {
            return;
        }
        let mut visitor = OpVisitor(None);
        event.record(&mut visitor);
        self.0
            .lock()
            .unwrap()
            .push(visitor.0.unwrap_or_default());
    }
}

fn capture(run: impl FnOnce()) -> Vec<String> {
    let log = UsageLog::default();
    let subscriber = tracing_subscriber::registry().with(log.clone());
    tracing::subscriber::with_default(subscriber, run);
    log.ops()
}

fn schema() -> GroupSchema {
    GroupSchema::new()
        .field("name", FieldSchema::new(json!("")))
        .array(
            "tags",
            ArraySchema::new(GroupSchema::new().field("label", FieldSchema::new(json!(""))))
                .with_items(vec![json!({ "label": "a" })]),
        )
}

fn create(dev_warnings: bool) -> GroupNode {
    GroupNode::create(&schema(), FormConfig::default().dev_warnings(dev_warnings)).unwrap()
}

#[test]
fn unknown_path_warns_and_returns_none() {
    let ops = capture(|| {
        let form = create(true);
        assert!(form.field("missing").is_none());
        assert!(form.array("name").is_none());
    });
    assert_eq!(ops, ["resolve", "resolve"]);
}

#[test]
fn warnings_are_silent_when_disabled() {
    let ops = capture(|| {
        let form = create(false);
        assert!(form.field("missing").is_none());
        form.patch_value(json!({ "nope": 1 }));
        assert!(form.array("tags").unwrap().remove_at(5).is_none());
    });
    assert!(ops.is_empty());
}

#[test]
fn patch_value_warns_per_unknown_key() {
    let ops = capture(|| {
        let form = create(true);
        form.patch_value(json!({ "name": "ok", "x": 1, "y": 2 }));
        assert_eq!(form.value()["name"], json!("ok"));
    });
    assert_eq!(ops, ["patch_value", "patch_value"]);
}

#[test]
fn array_misuse_warns() {
    let ops = capture(|| {
        let form = create(true);
        let tags = form.array("tags").unwrap();
        assert!(tags.remove_at(3).is_none());
        assert!(!tags.move_item(0, 4));
        assert_eq!(tags.len(), 1);
    });
    assert_eq!(ops, ["remove_at", "move_item"]);
}

#[test]
fn rejected_member_writes_warn() {
    let ops = capture(|| {
        let form = create(true);
        assert!(!form.set("valid", json!(false)));
        assert!(!form.set("name", json!("x")));
        assert!(form.set("theme", json!("dark")));
        assert!(form.get("nothing").is_none());
    });
    assert_eq!(ops, ["member.set", "member.set", "member.get"]);
}

#[test]
fn behavior_with_unknown_source_is_skipped() {
    let ops = capture(|| {
        let schema = schema()
            .behaviors(|b| {
                b.watch("ghost", WatchOptions::default(), |_, _| {});
            })
            .unwrap();
        let form = GroupNode::create(&schema, FormConfig::default().dev_warnings(true)).unwrap();
        assert!(form.bindings().is_empty());
    });
    assert_eq!(ops, ["resolve", "resolve"]);
}

#[test]
fn async_validation_without_runtime_stays_pending() {
    let ops = capture(|| {
        let schema = GroupSchema::new()
            .field("username", FieldSchema::new(json!("")))
            .validation(|v| {
                v.validate_async("username", |_, _| {
                    futures::future::pending::<Option<ValidationError>>()
                });
            });
        let form = create_from(&schema);
        let username = form.field("username").unwrap();

        username.set_value(json!("x"));
        assert_eq!(username.status(), FieldStatus::Pending);

        // A newer run still supersedes the dropped one.
        username.set_errors(vec![ValidationError::new("server", "Rejected")]);
        assert_eq!(username.status(), FieldStatus::Invalid);
    });
    assert_eq!(ops, ["spawn"]);
}

#[test]
fn debounce_without_runtime_fires_immediately() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let ops = capture(move || {
        let schema = schema()
            .behaviors(move |b| {
                let sink = Rc::clone(&sink);
                let options = WatchOptions {
                    debounce: Some(Duration::from_millis(300)),
                    ..WatchOptions::default()
                };
                b.watch("name", options, move |value, _| sink.borrow_mut().push(value.clone()));
            })
            .unwrap();
        let form = create_from(&schema);
        form.field("name").unwrap().set_value(json!("a"));
        form.field("name").unwrap().set_value(json!("ab"));
    });
    assert_eq!(*seen.borrow(), vec![json!("a"), json!("ab")]);
    assert_eq!(ops, ["sleep", "sleep"]);
}

fn create_from(schema: &GroupSchema) -> GroupNode {
    GroupNode::create(schema, FormConfig::default().dev_warnings(true)).unwrap()
}
