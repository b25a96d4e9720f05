//! Namespace-agnostic helpers over [`roxmltree`] nodes.
//!
//! CAP documents come with or without a `cap:` prefix and with several schema
//! versions, so every lookup compares local tag names only and only looks at
//! direct children of the given element.

use roxmltree::Node;

/// Concatenated text of the direct text children of `node`.
pub fn text(node: Node) -> String {
    node.children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect()
}

/// Direct children of `node` whose local name is `tag`.
pub fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |child| child.is_element() && child.tag_name().name() == tag)
}

/// Text of the first direct child named `tag`, if any.
pub fn first_value(node: Node, tag: &str) -> Option<String> {
    children(node, tag).next().map(text)
}

/// Texts of every direct child named `tag`.
pub fn values(node: Node, tag: &str) -> Vec<String> {
    children(node, tag).map(text).collect()
}

/// `(valueName, value)` pairs of every direct child named `tag`.
///
/// Entries without a `value` are skipped; a missing `valueName` becomes empty.
pub fn named_values(node: Node, tag: &str) -> Vec<(String, String)> {
    children(node, tag)
        .filter_map(|child| {
            let value = first_value(child, "value")?;
            let name = first_value(child, "valueName").unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<cap:alert xmlns:cap="urn:oasis:names:tc:emergency:cap:1.2">
        <cap:code>first</cap:code>
        <cap:code>second</cap:code>
        <cap:parameter><cap:valueName>a</cap:valueName><cap:value>1</cap:value></cap:parameter>
        <cap:parameter><cap:valueName>b</cap:valueName></cap:parameter>
        <cap:nested><cap:code>deep</cap:code></cap:nested>
    </cap:alert>"#;

    #[test]
    fn test_lookups_ignore_namespace_prefix() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        let root = doc.root_element();

        assert_eq!(first_value(root, "code").as_deref(), Some("first"));
        assert_eq!(values(root, "code"), vec!["first", "second"]);
        assert_eq!(first_value(root, "missing"), None);
    }

    #[test]
    fn test_named_values_skip_entries_without_value() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        let pairs = named_values(doc.root_element(), "parameter");

        assert_eq!(pairs, vec![("a".to_owned(), "1".to_owned())]);
    }
}
