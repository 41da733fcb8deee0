//! Business fixture shared by the integration suites: tags, profiles, users
//! and posts, declared by a `base` module and extended by `social`.

use recordb::prelude::*;
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| build().expect("fixture registry should finalize"))
}

pub fn database() -> Database {
    Database::new(registry())
}

/// Declared fields per model, before the five automatic ones.
pub const USER_DECLARED_FIELDS: usize = 13;
pub const AUTOMATIC_FIELDS: usize = 5;

fn build() -> Result<Registry, recordb::core::error::InternalError> {
    let mut builder = Registry::builder();

    builder
        .declare("Tag")
        .field(FieldDescriptor::char("Name").required())
        .field(FieldDescriptor::many2one("Parent", "Tag"))
        .field(FieldDescriptor::text("Description"))
        .hierarchy("Parent");

    builder
        .declare("Profile")
        .field(FieldDescriptor::integer("Age"))
        .field(FieldDescriptor::float("Money"))
        .field(FieldDescriptor::char("Country"));

    builder
        .declare("User")
        .field(
            FieldDescriptor::char("Name")
                .label("Name")
                .help("The user's username")
                .required()
                .onchange(|rs| {
                    let name = rs.get("Name")?;
                    let email = rs.get("Email")?;
                    Ok(field_map! {
                        "DecoratedName" => format!(
                            "User: {} [<{}>]",
                            name.as_text().unwrap_or_default(),
                            email.as_text().unwrap_or_default()
                        ),
                    })
                }),
        )
        .field(FieldDescriptor::char("DecoratedName"))
        .field(FieldDescriptor::char("Email").help("The user's email address"))
        .field(FieldDescriptor::char("Password").no_copy())
        .field(FieldDescriptor::boolean("IsStaff").default_value(false))
        .field(FieldDescriptor::boolean("IsActive").default_value(true))
        .field(FieldDescriptor::integer("Status").default_value(12))
        .field(FieldDescriptor::integer("Nums"))
        .field(FieldDescriptor::many2one("Profile", "Profile"))
        .field(FieldDescriptor::related("Age", "Profile.Age"))
        .field(FieldDescriptor::one2many("Posts", "Post", "User"))
        .field(
            FieldDescriptor::integer("PostCount").computed(&["Posts"], |rs| {
                let posts = rs.get("Posts")?;
                Ok(Value::Int(i64::try_from(posts.ids().len()).unwrap_or(i64::MAX)))
            }),
        )
        .field(FieldDescriptor::many2many("Tags", "Tag"));

    builder
        .declare("Post")
        .field(FieldDescriptor::many2one("User", "User"))
        .field(FieldDescriptor::char("Title"))
        .field(FieldDescriptor::text("Content"))
        .field(FieldDescriptor::many2many("Tags", "Tag"))
        .name_field("Title");

    builder
        .module("social")
        .extend("User")
        .method("NameGet", |rs, next, args| {
            let name = next.call(rs, args)?;
            if rs.get("IsStaff")?.as_bool() == Some(true) {
                let name = name.into_value()?;
                let name = name.as_text().unwrap_or_default();
                return Ok(Payload::from(Value::from(format!("{name} (staff)"))));
            }

            Ok(name)
        })
        .method("PromoteAll", |rs, _, _| {
            let staff = rs.search_all()?;
            staff.write(field_map! { "IsStaff" => true })?;

            Ok(Payload::from(staff))
        });

    builder.finalize()
}

/// Create-ready values for a user called `name`.
pub fn user_values(name: &str) -> FieldMap {
    let login = name.split_whitespace().next().unwrap_or(name).to_lowercase();

    field_map! {
        "Name" => name,
        "Email" => format!("{login}@example.com"),
        "Password" => "secret",
    }
}

pub fn create_user(env: &Environment, name: &str) -> RecordCollection {
    env.pool("User")
        .expect("User declared")
        .create(user_values(name))
        .expect("user should be created")
}

pub fn create_tag(env: &Environment, name: &str, parent: Option<&RecordCollection>) -> RecordCollection {
    let mut values = field_map! { "Name" => name };
    if let Some(parent) = parent {
        values.insert("Parent".to_string(), Value::from(parent));
    }

    env.pool("Tag")
        .expect("Tag declared")
        .create(values)
        .expect("tag should be created")
}
