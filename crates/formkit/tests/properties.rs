use formkit::{FieldSchema, FieldStatus, FormConfig, GroupNode, GroupSchema};
use proptest::prelude::*;
use serde_json::json;

fn profile() -> GroupSchema {
    GroupSchema::new()
        .field("name", FieldSchema::new(json!("")))
        .field("age", FieldSchema::new(json!(0)))
        .validation(|v| {
            v.min_length("name", 3).max("age", 130.0);
        })
}

fn create() -> GroupNode {
    GroupNode::create(&profile(), FormConfig::default().dev_warnings(false)).unwrap()
}

proptest! {
    #[test]
    fn status_matches_errors(name in "[a-z]{0,6}", age in -10i64..200) {
        let form = create();
        form.field("name").unwrap().set_value(json!(name));
        form.field("age").unwrap().set_value(json!(age));
        for key in ["name", "age"] {
            let field = form.field(key).unwrap();
            prop_assert_eq!(field.status() == FieldStatus::Invalid, !field.errors().is_empty());
        }
    }

    #[test]
    fn group_valid_iff_every_field_valid(name in "[a-z]{0,6}", age in -10i64..200) {
        let form = create();
        form.field("name").unwrap().set_value(json!(name));
        form.field("age").unwrap().set_value(json!(age));
        let all = ["name", "age"].iter().all(|key| form.field(*key).unwrap().valid());
        prop_assert_eq!(form.valid(), all);
    }

    #[test]
    fn set_value_then_value_round_trips(name in "[a-z ]{0,12}", age in 0i64..130) {
        let form = create();
        let value = json!({ "name": name, "age": age });
        form.set_value(value.clone());
        prop_assert_eq!(form.value(), value);
        prop_assert!(!form.dirty());
    }

    #[test]
    fn reset_is_idempotent(name in "[a-z]{1,6}", age in 1i64..130, touch in any::<bool>()) {
        let form = create();
        form.field("name").unwrap().set_value(json!(name));
        form.field("age").unwrap().set_value(json!(age));
        if touch {
            form.mark_as_touched();
        }

        form.reset(None);
        let once = (form.value(), form.dirty(), form.touched(), form.status());
        form.reset(None);
        let twice = (form.value(), form.dirty(), form.touched(), form.status());
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.0, json!({ "name": "", "age": 0 }));
        prop_assert!(!once.1 && !once.2);
    }
}
