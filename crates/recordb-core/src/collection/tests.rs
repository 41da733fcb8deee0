use crate::{
    collection::{CollectionError, FieldsGetArgs, OnchangeParams, OnchangeTrace, RecordCollection},
    db::{Database, search::Condition},
    env::{Environment, access::AccessOp},
    error::ErrorClass,
    field_map,
    model::FieldType,
    obs::{metrics_report, metrics_reset_all},
    registry::RegistryError,
    test_support::{fixture, user_values},
    value::{RecordId, Value},
};
use std::sync::Arc;

fn users(env: &Environment) -> RecordCollection {
    env.pool("User").expect("User declared")
}

fn create_user(env: &Environment, name: &str) -> RecordCollection {
    users(env).create(user_values(name)).expect("create user")
}

fn create_post(env: &Environment, user: &RecordCollection, title: &str) -> RecordCollection {
    env.pool("Post")
        .expect("Post declared")
        .create(field_map! { "User" => user, "Title" => title })
        .expect("create post")
}

fn text(value: &Value) -> &str {
    value.as_text().unwrap_or_default()
}

// ---------------------------------------------------------------------
// Lazy access and batching
// ---------------------------------------------------------------------

#[test]
fn first_access_loads_whole_prefetch_set_in_one_fetch() {
    let db = Database::new(fixture());
    db.execute_in_new_environment(1, |env| {
        for name in ["John Smith", "Jane Smith", "Will Doe"] {
            create_user(env, name);
        }
        Ok(())
    })
    .expect("seed users");

    let env = db.environment(1);
    let all = users(&env).search_all().expect("search");
    metrics_reset_all();

    let names: Vec<String> = all
        .records()
        .iter()
        .map(|user| text(&user.get("Name").expect("name")).to_string())
        .collect();
    for user in all.records() {
        user.get("Email").expect("email");
    }

    assert_eq!(names, vec!["John Smith", "Jane Smith", "Will Doe"]);
    assert_eq!(metrics_report().fetches_for("user"), 1);
}

#[test]
fn load_uses_one_retrieval_per_source() {
    let db = Database::new(fixture());
    db.execute_in_new_environment(1, |env| {
        for name in ["John Smith", "Jane Smith"] {
            let user = create_user(env, name);
            create_post(env, &user, "Hello");
            create_post(env, &user, "World");
        }
        Ok(())
    })
    .expect("seed users");

    let env = db.environment(1);
    let all = users(&env).search_all().expect("search");
    metrics_reset_all();
    all.load(&["Name", "Posts"]).expect("load");

    let report = metrics_report();
    assert_eq!(report.fetches_for("user"), 1);
    assert_eq!(report.fetches_for("post"), 1);

    for user in all.records() {
        assert_eq!(user.get("Posts").expect("posts").ids().len(), 2);
    }
    assert_eq!(metrics_report().fetches_for("post"), 1);
}

#[test]
fn related_fields_load_each_hop_once() {
    let db = Database::new(fixture());
    db.execute_in_new_environment(1, |env| {
        let profiles = env.pool("Profile")?;
        for (name, age) in [("John Smith", 24), ("Jane Smith", 23), ("Will Doe", 36), ("Tom Doe", 41)] {
            let profile = profiles.create(field_map! { "Age" => age })?;
            let mut values = user_values(name);
            values.insert("Profile".to_string(), Value::from(&profile));
            users(env).create(values)?;
        }
        Ok(())
    })
    .expect("seed users");

    let env = db.environment(1);
    let all = users(&env).search_all().expect("search");
    metrics_reset_all();
    all.load(&["Age"]).expect("load");

    let report = metrics_report();
    assert_eq!(report.fetches_for("user"), 1);
    assert_eq!(report.fetches_for("profile"), 1);

    let ages: Vec<Value> = all
        .records()
        .iter()
        .map(|user| user.get("Age").expect("age"))
        .collect();
    assert_eq!(ages, vec![Value::Int(24), Value::Int(23), Value::Int(36), Value::Int(41)]);
    assert_eq!(metrics_report().fetches_for("profile"), 1);
}

#[test]
fn single_record_hop_prefetches_sibling_targets() {
    let db = Database::new(fixture());
    db.execute_in_new_environment(1, |env| {
        for name in ["John Smith", "Jane Smith"] {
            let user = create_user(env, name);
            create_post(env, &user, "Hello");
            create_post(env, &user, "World");
        }
        Ok(())
    })
    .expect("seed users");

    let env = db.environment(1);
    let all = users(&env).search_all().expect("search");
    metrics_reset_all();

    let letters: Vec<Value> = all
        .records()
        .iter()
        .map(|user| user.get("TitleLetters").expect("letters"))
        .collect();

    assert_eq!(letters, vec![Value::Int(10), Value::Int(10)]);
    // one scan for the Posts relation, one fetch for every post title
    assert_eq!(metrics_report().fetches_for("post"), 2);
}

#[test]
fn read_returns_requested_fields_and_id() {
    let env = Database::new(fixture()).environment(1);
    let user = create_user(&env, "John Smith");

    let rows = user.read(&["Name", "Email"]).expect("read");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value("Name"), &Value::from("John Smith"));
    assert_eq!(rows[0].value("Email"), &Value::from("john@example.com"));
    assert_eq!(
        rows[0].value(crate::READ_ID_KEY),
        &Value::Int(i64::try_from(user.id().expect("id").get()).expect("small id"))
    );
    assert_eq!(rows[0].len(), 3);
}

#[test]
fn get_on_empty_multi_and_missing_records() {
    let env = Database::new(fixture()).environment(1);
    let a = create_user(&env, "John Smith");
    let b = create_user(&env, "Jane Smith");

    assert_eq!(users(&env).get("Name").expect("empty reads null"), Value::Null);

    let err = a.union(&b).expect("same model").get("Name").expect_err("two records");
    assert!(matches!(
        err.collection_error(),
        Some(CollectionError::NotSingleton { len: 2, .. })
    ));

    let err = users(&env)
        .browse(&[RecordId(999)])
        .get("Name")
        .expect_err("record 999 does not exist");
    assert!(err.is_not_found());
    assert!(matches!(
        err.collection_error(),
        Some(CollectionError::RecordNotFound { .. })
    ));

    let err = a.get("Nickname").expect_err("unknown field");
    assert!(matches!(
        err.registry_error(),
        Some(RegistryError::UnknownField { field, .. }) if field == "Nickname"
    ));
}

// ---------------------------------------------------------------------
// Create, write, copy, unlink
// ---------------------------------------------------------------------

#[test]
fn create_fills_declared_and_context_defaults() {
    let env = Database::new(fixture()).environment(1);

    let user = create_user(&env, "John Smith");
    assert_eq!(user.get("Status").expect("status"), Value::Int(12));
    assert_eq!(user.get("IsStaff").expect("is staff"), Value::Bool(false));

    let overridden = users(&env.with_context("default_Status", 7))
        .create(user_values("Jane Smith"))
        .expect("create with context default");
    assert_eq!(overridden.get("Status").expect("status"), Value::Int(7));

    let explicit = users(&env)
        .create(user_values("Will Doe").with("Status", 3))
        .expect("create with explicit status");
    assert_eq!(explicit.get("Status").expect("status"), Value::Int(3));
}

#[test]
fn create_rejects_unknown_and_computed_fields() {
    let env = Database::new(fixture()).environment(1);

    let err = users(&env)
        .create(user_values("John Smith").with("Nickname", "JS"))
        .expect_err("unknown field");
    assert!(err.is_not_found());

    let err = users(&env)
        .create(user_values("John Smith").with("PostCount", 3))
        .expect_err("computed field");
    assert_eq!(err.class, ErrorClass::InvalidArgument);

    let err = users(&env)
        .create(user_values("John Smith").with("Status", "high"))
        .expect_err("type mismatch");
    assert_eq!(err.class, ErrorClass::InvalidArgument);
}

#[test]
fn write_then_read_round_trips_and_refreshes_stored_computes() {
    let db = Database::new(fixture());
    let id = db
        .execute_in_new_environment(1, |env| {
            let user = create_user(env, "John Smith");
            assert_eq!(user.get("NameLength")?, Value::Int(10));

            user.set("Name", "Jo")?;
            assert_eq!(user.get("Name")?, Value::from("Jo"));
            assert_eq!(user.get("NameLength")?, Value::Int(2));
            assert_eq!(user.get("DisplayName")?, Value::from("Jo"));

            user.id()
        })
        .expect("write round trip");

    let env = db.environment(1);
    let user = users(&env).browse(&[id]);
    assert_eq!(user.get("NameLength").expect("stored compute"), Value::Int(2));
}

#[test]
fn write_refreshes_last_update() {
    let env = Database::new(fixture()).environment(1);
    let user = create_user(&env, "John Smith");

    let created = user.get("CreateDate").expect("create date");
    assert!(created.as_datetime().is_some());
    assert_eq!(user.get("WriteDate").expect("write date"), Value::Null);
    assert_eq!(user.get("LastUpdate").expect("last update"), created);

    user.set("Email", "john.smith@example.com").expect("write");
    let written = user.get("WriteDate").expect("write date");
    assert!(written.as_datetime().is_some());
    assert_eq!(user.get("LastUpdate").expect("last update"), written);
}

#[test]
fn failed_write_leaves_no_partial_values() {
    let env = Database::new(fixture()).environment(1);
    let john = create_user(&env, "John Smith");
    let jane = create_user(&env, "Jane Smith");
    let both = john.union(&jane).expect("same model");

    let err = both
        .write(field_map! { "Name" => "Multi", "Posts" => Value::Ids(Vec::new()) })
        .expect_err("one2many assignment needs a single record");
    assert_eq!(err.class, ErrorClass::InvalidArgument);

    assert_eq!(john.get("Name").expect("name"), Value::from("John Smith"));
    assert_eq!(jane.get("Name").expect("name"), Value::from("Jane Smith"));
}

#[test]
fn write_on_missing_record_fails() {
    let env = Database::new(fixture()).environment(1);

    let err = users(&env)
        .browse(&[RecordId(42)])
        .set("Name", "Ghost")
        .expect_err("record 42 does not exist");

    assert!(err.is_not_found());
}

#[test]
fn copy_duplicates_scalars_and_resets_to_many() {
    let env = Database::new(fixture()).environment(1);
    let user = create_user(&env, "John Smith");
    user.set("Nums", 4).expect("write nums");
    create_post(&env, &user, "Hello");
    assert_eq!(user.get("Posts").expect("posts").ids().len(), 1);

    let copy = user.copy(field_map! { "Name" => "X" }).expect("copy");

    assert_ne!(copy.id().expect("id"), user.id().expect("id"));
    assert_eq!(copy.get("Name").expect("name"), Value::from("X"));
    assert_eq!(copy.get("Email").expect("email"), user.get("Email").expect("email"));
    assert_eq!(copy.get("Nums").expect("nums"), Value::Int(4));
    assert_eq!(copy.get("Password").expect("password"), Value::Null);
    assert!(copy.get("Posts").expect("posts").ids().is_empty());
    assert_eq!(copy.get("NameLength").expect("name length"), Value::Int(1));
}

#[test]
fn unlink_detaches_references() {
    let env = Database::new(fixture()).environment(1);
    let user = create_user(&env, "John Smith");
    let post = create_post(&env, &user, "Hello");
    assert_eq!(post.get("User").expect("user"), Value::from(&user));

    assert_eq!(user.unlink().expect("unlink"), 1);

    assert_eq!(post.get("User").expect("user"), Value::Null);
    assert_eq!(users(&env).search_count(&Condition::all()).expect("count"), 0);
    assert!(user.get("Name").is_err());
}

// ---------------------------------------------------------------------
// Relations and computed fields
// ---------------------------------------------------------------------

#[test]
fn one2many_follows_reverse_column_changes() {
    let env = Database::new(fixture()).environment(1);
    let john = create_user(&env, "John Smith");
    let jane = create_user(&env, "Jane Smith");
    assert!(john.get("Posts").expect("posts").ids().is_empty());
    assert_eq!(john.get("PostCount").expect("count"), Value::Int(0));

    let post = create_post(&env, &john, "Hello");
    assert_eq!(john.get("Posts").expect("posts"), Value::from(&post));
    assert_eq!(john.get("PostCount").expect("count"), Value::Int(1));
    assert_eq!(john.get("TitleLetters").expect("letters"), Value::Int(5));

    post.set("Title", "Hi").expect("retitle");
    assert_eq!(john.get("TitleLetters").expect("letters"), Value::Int(2));

    post.set("User", &jane).expect("move post");
    assert_eq!(john.get("PostCount").expect("count"), Value::Int(0));
    assert_eq!(jane.get("PostCount").expect("count"), Value::Int(1));
}

#[test]
fn one2many_assignment_rewrites_children() {
    let env = Database::new(fixture()).environment(1);
    let john = create_user(&env, "John Smith");
    let first = create_post(&env, &john, "First");
    let second = env
        .pool("Post")
        .expect("Post declared")
        .create(field_map! { "Title" => "Second" })
        .expect("orphan post");

    john.set("Posts", &second).expect("assign posts");

    assert_eq!(john.get("Posts").expect("posts"), Value::from(&second));
    assert_eq!(first.get("User").expect("user"), Value::Null);
    assert_eq!(second.get("User").expect("user"), Value::from(&john));
}

#[test]
fn many2many_links_and_unlinks() {
    let env = Database::new(fixture()).environment(1);
    let tags = env.pool("Tag").expect("Tag declared");
    let t1 = tags.create(field_map! { "Name" => "Trending" }).expect("t1");
    let t2 = tags.create(field_map! { "Name" => "Books" }).expect("t2");
    let post = create_post(&env, &create_user(&env, "John Smith"), "Hello");

    let both = t1.union(&t2).expect("same model");
    post.set("Tags", &both).expect("tag post");
    assert_eq!(post.get("Tags").expect("tags"), Value::from(&both));
    assert!(post.related("Tags").expect("related tags").equals(&both));

    t1.unlink().expect("unlink tag");
    assert_eq!(post.get("Tags").expect("tags"), Value::from(&t2));
}

#[test]
fn unlinking_a_target_refreshes_dependent_computes() {
    let env = Database::new(fixture()).environment(1);
    let tags = env.pool("Tag").expect("Tag declared");
    let t1 = tags.create(field_map! { "Name" => "Trending" }).expect("t1");
    let t2 = tags.create(field_map! { "Name" => "Books" }).expect("t2");
    let tagged = create_post(&env, &create_user(&env, "John Smith"), "Hello");
    let untagged = create_post(&env, &create_user(&env, "Jane Smith"), "World");

    tagged.set("Tags", &t1.union(&t2).expect("same model")).expect("tag post");
    assert_eq!(tagged.get("TagCount").expect("count"), Value::Int(2));
    assert_eq!(untagged.get("TagCount").expect("count"), Value::Int(0));

    t1.unlink().expect("unlink tag");

    assert_eq!(tagged.get("Tags").expect("tags"), Value::from(&t2));
    assert_eq!(tagged.get("TagCount").expect("count"), Value::Int(1));
    assert_eq!(untagged.get("TagCount").expect("count"), Value::Int(0));
}

#[test]
fn related_fields_follow_their_path() {
    let env = Database::new(fixture()).environment(1);
    let user = create_user(&env, "John Smith");
    let post = create_post(&env, &user, "Hello");
    assert_eq!(post.get("UserName").expect("user name"), Value::from("John Smith"));
    assert_eq!(user.get("Age").expect("age"), Value::Null);

    user.set("Name", "Johnny").expect("rename");
    assert_eq!(post.get("UserName").expect("user name"), Value::from("Johnny"));

    let profile = env
        .pool("Profile")
        .expect("Profile declared")
        .create(field_map! { "Age" => 30 })
        .expect("profile");
    user.set("Profile", &profile).expect("attach profile");
    assert_eq!(user.get("Age").expect("age"), Value::Int(30));

    profile.set("Age", 31).expect("birthday");
    assert_eq!(user.get("Age").expect("age"), Value::Int(31));
}

#[test]
fn name_get_uses_name_field_or_model_and_id() {
    let env = Database::new(fixture()).environment(1);
    let user = create_user(&env, "John Smith");
    let profile = env
        .pool("Profile")
        .expect("Profile declared")
        .create(field_map! { "City" => "Paris" })
        .expect("profile");

    assert_eq!(user.name_get().expect("name"), "John Smith");
    assert_eq!(
        profile.name_get().expect("name"),
        format!("Profile({})", profile.id().expect("id"))
    );
}

// ---------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------

#[test]
fn search_filters_limits_and_rejects_unstored_fields() {
    let env = Database::new(fixture()).environment(1);
    let john = create_user(&env, "John Smith");
    create_user(&env, "Jane Smith");
    create_user(&env, "Will Doe");

    let found = users(&env)
        .search(&Condition::field("Name").equals("John Smith"))
        .expect("search");
    assert!(found.equals(&john));

    let smiths = users(&env)
        .search(&Condition::field("Name").like("J% Smith"))
        .expect("search");
    assert_eq!(smiths.len(), 2);

    let by_id = users(&env)
        .search(&Condition::field("ID").equals(i64::try_from(john.id().expect("id").get()).expect("small id")))
        .expect("search by id");
    assert!(by_id.equals(&john));

    let limited = users(&env)
        .search_limit(&Condition::all(), &Value::Int(2))
        .expect("limited search");
    assert_eq!(limited.len(), 2);
    let unlimited = users(&env)
        .search_limit(&Condition::all(), &Value::Bool(false))
        .expect("unlimited search");
    assert_eq!(unlimited.len(), 3);

    let err = users(&env)
        .search(&Condition::field("PostCount").greater(0))
        .expect_err("computed fields are not searchable");
    assert_eq!(err.class, ErrorClass::InvalidArgument);
}

#[test]
fn denied_read_surfaces_security_error() {
    let policy = |uid: u64, _: &str, op: AccessOp| uid == 1 || op != AccessOp::Read;
    let db = Database::new(fixture()).with_policy(Arc::new(policy));
    let id = db
        .execute_in_new_environment(1, |env| create_user(env, "John Smith").id())
        .expect("seed user");

    let guest = db.environment(5);
    let err = users(&guest)
        .browse(&[id])
        .get("Email")
        .expect_err("guest may not read");

    assert!(err.is_security_denied());
    assert!(users(&guest).search_all().expect_err("denied").is_security_denied());
}

// ---------------------------------------------------------------------
// Introspection, defaults, onchange, recursion
// ---------------------------------------------------------------------

#[test]
fn fields_get_reports_every_field_or_a_subset() {
    let env = Database::new(fixture()).environment(1);
    let pool = users(&env);

    let all = pool.fields_get(&FieldsGetArgs::default()).expect("fields get");
    assert_eq!(all.len(), pool.model().field_count());
    assert_eq!(all["Name"].help, "The user's username");
    assert_eq!(all["Posts"].field_type, FieldType::One2Many);
    assert_eq!(all["Age"].field_type, FieldType::Integer);

    let some = pool
        .fields_get(&FieldsGetArgs::only(&["Name", "Email"]))
        .expect("subset");
    assert_eq!(some.keys().collect::<Vec<_>>(), vec!["Name", "Email"]);

    let info = pool.field_get("Profile").expect("field get");
    assert_eq!(info.relation.as_deref(), Some("Profile"));
    assert!(pool.field_get("Nickname").is_err());
}

#[test]
fn default_get_honours_context() {
    let env = Database::new(fixture()).environment(1);

    let defaults = users(&env).default_get().expect("defaults");
    assert_eq!(defaults.value("Status"), &Value::Int(12));
    assert_eq!(defaults.value("IsStaff"), &Value::Bool(false));
    assert!(!defaults.contains_key("Name"));

    let defaults = users(&env.with_context("default_Name", "Anonymous"))
        .default_get()
        .expect("defaults");
    assert_eq!(defaults.value("Name"), &Value::from("Anonymous"));
}

#[test]
fn onchange_reports_deltas_without_persisting() {
    let env = Database::new(fixture()).environment(1);
    let jane = create_user(&env, "Jane Smith");
    let params = OnchangeParams::new(
        &["Name"],
        field_map! { "Name" => "William", "Email" => "will@example.com" },
    );

    let result = jane.onchange(&params).expect("onchange");

    assert_eq!(result.value.len(), 1);
    assert_eq!(
        result.value.value("DecoratedName"),
        &Value::from("User: William [<will@example.com>]")
    );
    assert_eq!(
        result.trace,
        vec![OnchangeTrace {
            trigger: "Name".to_string(),
            field: "Name".to_string(),
        }]
    );
    assert_eq!(jane.get("Name").expect("name"), Value::from("Jane Smith"));
    assert_eq!(jane.get("DecoratedName").expect("decorated"), Value::Null);

    let again = jane.onchange(&params).expect("onchange again");
    assert_eq!(again, result);
}

#[test]
fn onchange_follows_triggers_transitively() {
    let env = Database::new(fixture()).environment(1);
    let pool = users(&env);
    let values = field_map! { "Name" => "Will", "Email" => "Will@Example.com" };

    let result = pool
        .onchange(&OnchangeParams::new(&["Email"], values.clone()).with_trigger("Email2", "1"))
        .expect("onchange");
    assert_eq!(result.value.value("Email2"), &Value::from("will@example.com"));
    assert_eq!(result.value.value("Nums"), &Value::Int(16));
    assert_eq!(
        result.trace,
        vec![
            OnchangeTrace {
                trigger: "Email".to_string(),
                field: "Email".to_string(),
            },
            OnchangeTrace {
                trigger: "Email".to_string(),
                field: "Email2".to_string(),
            },
        ]
    );

    let result = pool
        .onchange(&OnchangeParams::new(&["Email"], values).with_trigger("Email2", "0"))
        .expect("onchange");
    assert_eq!(result.trace.len(), 1);
    assert!(!result.value.contains_key("Nums"));
    assert_eq!(pool.search_count(&Condition::all()).expect("count"), 0);
}

#[test]
fn onchange_conflicts_resolve_to_last_applied() {
    let env = Database::new(fixture()).environment(1);
    let pool = users(&env);
    let values = field_map! { "Name" => "Will", "Email" => "will@example.com" };

    let name_last = pool
        .onchange(&OnchangeParams::new(&["Email", "Name"], values.clone()))
        .expect("onchange");
    assert_eq!(
        name_last.value.value("DecoratedName"),
        &Value::from("User: Will [<will@example.com>]")
    );

    let email_last = pool
        .onchange(&OnchangeParams::new(&["Name", "Email"], values))
        .expect("onchange");
    assert_eq!(
        email_last.value.value("DecoratedName"),
        &Value::from("<will@example.com>")
    );
}

#[test]
fn check_recursion_detects_closed_parent_chain() {
    let env = Database::new(fixture()).environment(1);
    let tags = env.pool("Tag").expect("Tag declared");
    let tag1 = tags.create(field_map! { "Name" => "Tag1" }).expect("tag1");
    let tag2 = tags
        .create(field_map! { "Name" => "Tag2", "Parent" => &tag1 })
        .expect("tag2");
    let tag3 = tags
        .create(field_map! { "Name" => "Tag3", "Parent" => &tag2 })
        .expect("tag3");

    for tag in [&tag1, &tag2, &tag3] {
        assert!(tag.check_recursion().expect("check"));
    }

    tag1.set("Parent", &tag3).expect("close the cycle");
    for tag in [&tag1, &tag2, &tag3] {
        assert!(!tag.check_recursion().expect("check"));
    }

    assert!(create_user(&env, "John Smith").check_recursion().expect("no hierarchy"));
}

#[test]
fn check_recursion_rejects_self_parent() {
    let env = Database::new(fixture()).environment(1);
    let tag = env
        .pool("Tag")
        .expect("Tag declared")
        .create(field_map! { "Name" => "Loop" })
        .expect("tag");

    tag.set("Parent", &tag).expect("self parent");

    assert!(!tag.check_recursion().expect("check"));
}
