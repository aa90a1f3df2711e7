//! Entities mirrored into the full-text index.

use std::collections::BTreeMap;

use crate::model::types::Post;

/// Indexed field name → current value.
pub type SearchFields = BTreeMap<&'static str, String>;

/// Collection (and table) holding posts.
pub const POST_COLLECTION: &str = "post";

/// Field list indexed for posts.
pub const POST_SEARCHABLE: &[&str] = &["content"];

/// An entity whose instances are kept in the search index.
///
/// Object safe so the sync layer can work over `&dyn Searchable` without
/// knowing the concrete type.
pub trait Searchable {
    /// Index collection, named after the entity's table.
    fn collection(&self) -> &'static str;

    /// Primary key, reused as the document id.
    fn search_id(&self) -> i64;

    /// Names of the indexed fields.
    fn searchable_fields(&self) -> &'static [&'static str];

    /// Value of one indexed field.
    fn field_value(&self, field: &str) -> Option<String>;

    /// Current values of every indexed field.
    fn search_fields(&self) -> SearchFields {
        self.searchable_fields()
            .iter()
            .filter_map(|&name| self.field_value(name).map(|v| (name, v)))
            .collect()
    }
}

impl Searchable for Post {
    fn collection(&self) -> &'static str {
        POST_COLLECTION
    }

    fn search_id(&self) -> i64 {
        self.id
    }

    fn searchable_fields(&self) -> &'static [&'static str] {
        POST_SEARCHABLE
    }

    fn field_value(&self, field: &str) -> Option<String> {
        match field {
            "content" => Some(self.content.clone()),
            "title" => Some(self.title.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_indexes_only_its_content() {
        let post = Post {
            id: 7,
            title: "Hidden title".into(),
            content: "<p>borrow checker</p>".into(),
            date_posted: 0,
            user_id: 1,
        };
        let fields = post.search_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("content").map(String::as_str), Some("<p>borrow checker</p>"));
        assert_eq!(post.collection(), "post");
        assert_eq!(post.search_id(), 7);
    }
}
