use convert_case::{Case, Casing};

/// `BlogPost` -> `blog_post`
pub fn snake(type_name: &str) -> String {
    type_name.to_case(Case::Snake)
}

/// `BlogPost` -> `blog_posts`
pub fn table_name(type_name: &str) -> String {
    format!("{}s", snake(type_name))
}

/// `BlogPost` -> `blog_post_id`
pub fn foreign_key(name: &str) -> String {
    format!("{}_id", snake(name))
}

/// Join table for a many-to-many between two types: both snake names in
/// alphabetical order, `Role` + `Permission` -> `permission_role`.
pub fn pivot_table(first: &str, second: &str) -> String {
    let mut names = [snake(first), snake(second)];
    names.sort();
    names.join("_")
}

/// Id and type columns of a polymorphic association named `morph_name`.
pub fn morph_columns(morph_name: &str) -> (String, String) {
    let base = snake(morph_name);
    (format!("{}_id", base), format!("{}_type", base))
}

/// Column prefix for an embedded value object of `type_name`.
pub fn embed_prefix(type_name: &str) -> String {
    format!("{}_", snake(type_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conventions() {
        assert_eq!(table_name("User"), "users");
        assert_eq!(table_name("BlogPost"), "blog_posts");
        assert_eq!(foreign_key("BlogPost"), "blog_post_id");
        assert_eq!(foreign_key("author"), "author_id");
        assert_eq!(pivot_table("Role", "Permission"), "permission_role");
        assert_eq!(
            morph_columns("commentable"),
            ("commentable_id".to_string(), "commentable_type".to_string())
        );
        assert_eq!(embed_prefix("Address"), "address_");
    }
}
