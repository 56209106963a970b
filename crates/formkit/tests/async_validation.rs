//! Asynchronous validation and debounced behaviors on tokio's paused clock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use formkit::{
    FieldSchema, FieldStatus, FormConfig, GroupNode, GroupSchema, ValidationError, WatchOptions,
    fallible_async_validator,
};
use serde_json::{Value, json};
use tokio::task::LocalSet;
use tokio::time::sleep;

fn create(schema: &GroupSchema) -> GroupNode {
    GroupNode::create(schema, FormConfig::default().dev_warnings(false)).unwrap()
}

fn username_form() -> GroupSchema {
    GroupSchema::new()
        .field("username", FieldSchema::new(json!("")))
        .validation(|v| {
            v.validate_async("username", |value, _| async move {
                let delay = if value == json!("slow") { 100 } else { 10 };
                sleep(Duration::from_millis(delay)).await;
                (value == json!("slow") || value == json!("taken"))
                    .then(|| ValidationError::new("taken", "Username is taken"))
            });
        })
}

#[tokio::test(start_paused = true)]
async fn async_validator_goes_pending_then_settles() {
    LocalSet::new()
        .run_until(async {
            let form = create(&username_form());
            let username = form.field("username").unwrap();

            username.set_value(json!("taken"));
            assert_eq!(username.status(), FieldStatus::Pending);
            assert!(form.pending());

            sleep(Duration::from_millis(50)).await;
            assert_eq!(username.status(), FieldStatus::Invalid);
            assert_eq!(username.errors()[0].code, "taken");
            assert!(!form.pending());

            username.set_value(json!("free"));
            assert!(username.validate().await);
            assert_eq!(username.status(), FieldStatus::Valid);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn latest_validation_wins_over_slower_earlier_run() {
    LocalSet::new()
        .run_until(async {
            let form = create(&username_form());
            let username = form.field("username").unwrap();

            username.set_value(json!("slow"));
            username.set_value(json!("fast"));

            sleep(Duration::from_millis(20)).await;
            assert_eq!(username.status(), FieldStatus::Valid);

            sleep(Duration::from_millis(200)).await;
            assert_eq!(username.status(), FieldStatus::Valid);
            assert!(username.errors().is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn sync_failure_skips_async_validators() {
    LocalSet::new()
        .run_until(async {
            let schema = username_form().validation(|v| {
                v.required("username");
            });
            let form = create(&schema);
            let username = form.field("username").unwrap();

            assert!(!username.validate().await);
            assert_eq!(username.status(), FieldStatus::Invalid);
            let codes: Vec<_> = username.errors().into_iter().map(|e| e.code).collect();
            assert_eq!(codes, ["required"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn backend_failure_resolves_valid() {
    LocalSet::new()
        .run_until(async {
            let schema = GroupSchema::new()
                .field("email", FieldSchema::new(json!("")))
                .validation(|v| {
                    v.add_async(
                        "email",
                        fallible_async_validator(|_, _| async {
                            sleep(Duration::from_millis(5)).await;
                            Err::<Option<ValidationError>, _>("backend unavailable")
                        }),
                    );
                });
            let form = create(&schema);
            let email = form.field("email").unwrap();

            email.set_value(json!("a@b.co"));
            assert!(email.pending());
            assert!(email.validate().await);
            assert_eq!(email.status(), FieldStatus::Valid);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn debounced_watch_fires_once_with_last_value() {
    LocalSet::new()
        .run_until(async {
            let seen: Rc<RefCell<Vec<Value>>> = Rc::default();
            let sink = Rc::clone(&seen);
            let schema = GroupSchema::new()
                .field("query", FieldSchema::new(json!("")))
                .behaviors(move |b| {
                    let sink = Rc::clone(&sink);
                    let options = WatchOptions {
                        immediate: false,
                        debounce: Some(Duration::from_millis(100)),
                    };
                    b.watch("query", options, move |value, _| {
                        sink.borrow_mut().push(value.clone());
                    });
                })
                .unwrap();
            let form = create(&schema);
            let query = form.field("query").unwrap();

            for text in ["a", "ab", "abc"] {
                query.set_value(json!(text));
                sleep(Duration::from_millis(30)).await;
            }
            assert!(seen.borrow().is_empty());

            sleep(Duration::from_millis(150)).await;
            assert_eq!(*seen.borrow(), vec![json!("abc")]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_pending_debounce() {
    LocalSet::new()
        .run_until(async {
            let calls = Rc::new(RefCell::new(0));
            let counter = Rc::clone(&calls);
            let schema = GroupSchema::new()
                .field("query", FieldSchema::new(json!("")))
                .behaviors(move |b| {
                    let counter = Rc::clone(&counter);
                    let options = WatchOptions {
                        immediate: false,
                        debounce: Some(Duration::from_millis(100)),
                    };
                    b.watch("query", options, move |_, _| {
                        *counter.borrow_mut() += 1;
                    });
                })
                .unwrap();
            let form = create(&schema);

            form.field("query").unwrap().set_value(json!("x"));
            form.dispose();
            sleep(Duration::from_millis(300)).await;
            assert_eq!(*calls.borrow(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn submit_waits_for_async_validators() {
    LocalSet::new()
        .run_until(async {
            let form = create(&username_form());
            form.field("username").unwrap().set_value(json!("taken"));

            let outcome = form
                .submit(|_| async { Ok::<_, String>("sent") })
                .await;
            assert_eq!(outcome, Ok(None));
            assert!(form.field("username").unwrap().touched());

            form.field("username").unwrap().set_value(json!("ada"));
            let observer = form.clone();
            let outcome = form
                .submit(move |value| async move {
                    assert!(observer.submitting());
                    Ok::<_, String>(value)
                })
                .await;
            assert_eq!(outcome, Ok(Some(json!({ "username": "ada" }))));
            assert!(!form.submitting());
        })
        .await;
}
