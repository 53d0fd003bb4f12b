//! Normalization boundary for backend payloads.
//!
//! Ghost returns flat objects; Strapi v4 wraps every record as
//! `{ id, attributes: { .. } }` and every relation as `{ data: .. }`. Both
//! shapes, and the field-name differences between them, are resolved here into
//! the canonical types.

use quire_api_types::{Author, Item, ItemSummary, Tag};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{ChangeMarker, SourceError};

/// A record with its `attributes` wrapper (if any) peeled off.
struct Record<'a> {
    outer: &'a Value,
    fields: &'a Value,
}

impl<'a> Record<'a> {
    fn new(value: &'a Value) -> Self {
        let fields = value
            .get("attributes")
            .filter(|attrs| attrs.is_object())
            .unwrap_or(value);
        Self {
            outer: value,
            fields,
        }
    }

    fn id(&self) -> Option<String> {
        self.outer
            .get("id")
            .or_else(|| self.fields.get("id"))
            .and_then(scalar_string)
    }

    fn text(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .find_map(|value| value.as_str().map(str::to_string))
            .filter(|value| !value.is_empty())
    }

    fn timestamp(&self, names: &[&str]) -> Option<OffsetDateTime> {
        self.text(names)
            .and_then(|raw| OffsetDateTime::parse(&raw, &Rfc3339).ok())
    }

    fn relation(&self, name: &str) -> Option<&'a Value> {
        self.fields.get(name).map(unwrap_data).filter(|v| !v.is_null())
    }
}

fn unwrap_data(value: &Value) -> &Value {
    match value.get("data") {
        Some(inner) if value.is_object() => inner,
        _ => value,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Media URL from either a plain string or a Strapi media relation.
fn media_url(record: &Record<'_>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        let value = record.relation(name)?;
        match value {
            Value::String(url) if !url.is_empty() => Some(url.clone()),
            Value::Object(_) => Record::new(value).text(&["url"]),
            _ => None,
        }
    })
}

pub fn tag(value: &Value) -> Option<Tag> {
    let record = Record::new(value);
    let slug = record.text(&["slug"])?;
    let name = record.text(&["name"]).unwrap_or_else(|| slug.clone());
    Some(Tag {
        id: record.id().unwrap_or_else(|| slug.clone()),
        name,
        slug,
    })
}

pub fn tags(value: &Value) -> Vec<Tag> {
    unwrap_data(value)
        .as_array()
        .map(|items| items.iter().filter_map(tag).collect())
        .unwrap_or_default()
}

fn author(value: &Value) -> Option<Author> {
    let record = Record::new(value);
    let id = record.id()?;
    let name = record
        .text(&["name", "username"])
        .unwrap_or_else(|| id.clone());
    Some(Author {
        id,
        name,
        slug: record.text(&["slug"]),
        profile_image: media_url(&record, &["profile_image", "avatar"]),
    })
}

fn primary_author(record: &Record<'_>) -> Option<Author> {
    if let Some(primary) = record.relation("primary_author") {
        return author(primary);
    }
    match record.relation("author") {
        Some(Value::Array(list)) => list.first().and_then(author),
        Some(single) => author(single),
        None => record
            .relation("authors")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(author),
    }
}

/// Normalize one item record.
pub fn item(value: &Value) -> Result<Item, SourceError> {
    let record = Record::new(value);
    let id = record
        .id()
        .ok_or_else(|| SourceError::invalid("item is missing `id`"))?;
    let slug = record
        .text(&["slug"])
        .ok_or_else(|| SourceError::invalid(format!("item `{id}` is missing `slug`")))?;

    Ok(Item {
        title: record.text(&["title"]).unwrap_or_default(),
        html: record.text(&["html", "content"]),
        excerpt: record.text(&["custom_excerpt", "excerpt"]),
        feature_image: media_url(&record, &["feature_image", "cover"]),
        tags: record.relation("tags").map(tags).unwrap_or_default(),
        published_at: record.timestamp(&["published_at", "publishedAt"]),
        updated_at: record.timestamp(&["updated_at", "updatedAt"]),
        primary_author: primary_author(&record),
        id,
        slug,
    })
}

/// Normalize a collection of item records into list summaries.
pub fn summaries(values: &[Value]) -> Result<Vec<ItemSummary>, SourceError> {
    values
        .iter()
        .map(|value| item(value).map(ItemSummary::from))
        .collect()
}

/// Change marker carried by a (possibly partial) item record.
pub fn change_marker(value: &Value) -> Option<ChangeMarker> {
    Record::new(value)
        .timestamp(&["updated_at", "updatedAt"])
        .map(ChangeMarker::from_timestamp)
}

/// First element of the array stored under `field`, or `NotFound`.
pub fn first_record<'a>(body: &'a Value, field: &str) -> Result<&'a Value, SourceError> {
    body.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::invalid(format!("response has no `{field}` array")))?
        .first()
        .ok_or(SourceError::NotFound)
}

/// The array stored under `field`.
pub fn records<'a>(body: &'a Value, field: &str) -> Result<&'a [Value], SourceError> {
    body.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| SourceError::invalid(format!("response has no `{field}` array")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn ghost_post() -> Value {
        json!({
            "id": "65a1",
            "slug": "hello-world",
            "title": "Hello",
            "html": "<p>Hi</p>",
            "custom_excerpt": "Short",
            "feature_image": "https://cdn/img.png",
            "published_at": "2024-05-01T10:00:00.000+00:00",
            "updated_at": "2024-05-02T08:30:00.000+00:00",
            "tags": [{"id": "t1", "name": "Rust", "slug": "rust"}],
            "primary_author": {"id": "a1", "name": "Kim", "slug": "kim", "profile_image": null}
        })
    }

    fn strapi_post() -> Value {
        json!({
            "id": 7,
            "attributes": {
                "slug": "hello-world",
                "title": "Hello",
                "content": "<p>Hi</p>",
                "excerpt": "Short",
                "publishedAt": "2024-05-01T10:00:00.000Z",
                "updatedAt": "2024-05-02T08:30:00.000Z",
                "cover": {"data": {"id": 3, "attributes": {"url": "https://cdn/img.png"}}},
                "tags": {"data": [{"id": 1, "attributes": {"name": "Rust", "slug": "rust"}}]},
                "author": {"data": {"id": 2, "attributes": {"username": "kim", "avatar": {"data": null}}}}
            }
        })
    }

    #[test]
    fn ghost_and_strapi_shapes_normalize_to_same_content() {
        let ghost = item(&ghost_post()).expect("ghost item");
        let strapi = item(&strapi_post()).expect("strapi item");

        for normalized in [&ghost, &strapi] {
            assert_eq!(normalized.slug, "hello-world");
            assert_eq!(normalized.title, "Hello");
            assert_eq!(normalized.html.as_deref(), Some("<p>Hi</p>"));
            assert_eq!(normalized.excerpt.as_deref(), Some("Short"));
            assert_eq!(normalized.feature_image.as_deref(), Some("https://cdn/img.png"));
            assert_eq!(normalized.tags.len(), 1);
            assert_eq!(normalized.tags[0].slug, "rust");
            assert_eq!(normalized.published_at, Some(datetime!(2024-05-01 10:00 UTC)));
        }

        assert_eq!(ghost.id, "65a1");
        assert_eq!(strapi.id, "7");
        assert_eq!(ghost.primary_author.as_ref().map(|a| a.name.as_str()), Some("Kim"));
        assert_eq!(strapi.primary_author.as_ref().map(|a| a.name.as_str()), Some("kim"));
        assert_eq!(strapi.primary_author.and_then(|a| a.profile_image), None);
    }

    #[test]
    fn missing_slug_is_invalid() {
        let err = item(&json!({"id": 1, "title": "x"})).expect_err("slug required");
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }

    #[test]
    fn change_markers_agree_across_shapes() {
        let ghost = change_marker(&ghost_post()).expect("ghost marker");
        let strapi = change_marker(&strapi_post()).expect("strapi marker");
        assert_eq!(ghost, strapi);
        assert_eq!(change_marker(&json!({"id": 1})), None);
    }

    #[test]
    fn first_record_distinguishes_empty_from_malformed() {
        assert_eq!(
            first_record(&json!({"data": []}), "data").expect_err("empty"),
            SourceError::NotFound
        );
        assert!(matches!(
            first_record(&json!({"oops": 1}), "data").expect_err("malformed"),
            SourceError::InvalidResponse(_)
        ));
    }

    #[test]
    fn tags_skip_records_without_slug() {
        let parsed = tags(&json!({"data": [
            {"id": 1, "attributes": {"name": "Rust", "slug": "rust"}},
            {"id": 2, "attributes": {"name": "Nameless"}}
        ]}));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "Rust");
    }
}
