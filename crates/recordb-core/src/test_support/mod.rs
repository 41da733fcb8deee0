//! Shared registry fixture for unit tests.

use crate::{
    field_map,
    model::FieldDescriptor,
    registry::Registry,
    value::{FieldMap, Value},
};
use std::sync::OnceLock;

static FIXTURE: OnceLock<Registry> = OnceLock::new();

/// Tag, Profile, User and Post, declared by a `base` and a `social` module.
pub(crate) fn fixture() -> &'static Registry {
    FIXTURE.get_or_init(|| build().expect("fixture registry should finalize"))
}

fn build() -> Result<Registry, crate::error::InternalError> {
    let mut builder = Registry::builder();

    builder
        .declare("Tag")
        .field(FieldDescriptor::char("Name").required())
        .field(FieldDescriptor::many2one("Parent", "Tag"))
        .hierarchy("Parent");

    builder
        .declare("Profile")
        .field(FieldDescriptor::integer("Age"))
        .field(FieldDescriptor::float("Money"))
        .field(FieldDescriptor::char("City"));

    builder
        .declare("User")
        .field(
            FieldDescriptor::char("Name")
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
        .field(FieldDescriptor::char("Email").onchange(|rs| {
            let email = rs.get("Email")?;
            let email = email.as_text().unwrap_or_default();
            Ok(field_map! {
                "Email2" => email.to_lowercase(),
                "DecoratedName" => format!("<{email}>"),
            })
        }))
        .field(FieldDescriptor::char("Email2").onchange(|rs| {
            let email = rs.get("Email2")?;
            let len = email.as_text().map_or(0, |e| e.chars().count());
            Ok(field_map! { "Nums" => i64::try_from(len).unwrap_or(i64::MAX) })
        }))
        .field(FieldDescriptor::char("Password").no_copy())
        .field(FieldDescriptor::boolean("IsStaff").default_value(false))
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
        .field(
            FieldDescriptor::integer("NameLength")
                .computed(&["Name"], |rs| {
                    let name = rs.get("Name")?;
                    let len = name.as_text().map_or(0, |n| n.chars().count());
                    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
                })
                .stored(),
        );

    builder
        .declare("Post")
        .field(FieldDescriptor::many2one("User", "User"))
        .field(FieldDescriptor::char("Title"))
        .field(FieldDescriptor::text("Content"))
        .field(FieldDescriptor::many2many("Tags", "Tag"))
        .field(
            FieldDescriptor::integer("TagCount").computed(&["Tags"], |rs| {
                let tags = rs.get("Tags")?;
                Ok(Value::Int(i64::try_from(tags.ids().len()).unwrap_or(i64::MAX)))
            }),
        )
        .field(FieldDescriptor::related("UserName", "User.Name"))
        .name_field("Title");

    builder
        .module("social")
        .extend("User")
        .field(
            FieldDescriptor::integer("TitleLetters").computed(&["Posts.Title"], |rs| {
                let mut total = 0usize;
                for post in rs.related("Posts")?.records() {
                    total += post.get("Title")?.as_text().map_or(0, str::len);
                }
                Ok(Value::Int(i64::try_from(total).unwrap_or(i64::MAX)))
            }),
        );

    builder.finalize()
}

/// Create-ready values for a user called `name`.
pub(crate) fn user_values(name: &str) -> FieldMap {
    let login = name.split_whitespace().next().unwrap_or(name).to_lowercase();

    field_map! {
        "Name" => name,
        "Email" => format!("{login}@example.com"),
        "Password" => "secret",
    }
}
