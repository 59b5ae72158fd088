//! Rich-text document tree.
//!
//! The tree is the lossless representation of a post's content, in the
//! JSON shape produced by the editor (`{"type": "...", "attrs": {...},
//! "content": [...]}`). Every node type is a variant of the closed
//! [`Node`] enum so both converter directions match exhaustively.
//!
//! Node types the schema does not know deserialize to
//! [`Node::Unsupported`] instead of failing the whole document; the
//! converters skip them with a debug log.

use serde::{Deserialize, Serialize};

/// One node of a document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Doc {
        #[serde(default)]
        content: Vec<Node>,
    },
    Paragraph {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<Node>,
    },
    Heading {
        attrs: HeadingAttrs,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<Node>,
    },
    CodeBlock {
        #[serde(default)]
        attrs: CodeBlockAttrs,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<Node>,
    },
    Blockquote {
        #[serde(default)]
        content: Vec<Node>,
    },
    BulletList {
        #[serde(default)]
        content: Vec<Node>,
    },
    OrderedList {
        #[serde(default)]
        attrs: OrderedListAttrs,
        #[serde(default)]
        content: Vec<Node>,
    },
    ListItem {
        #[serde(default)]
        content: Vec<Node>,
    },
    Image {
        attrs: ImageAttrs,
    },
    Table {
        #[serde(default)]
        content: Vec<Node>,
    },
    TableRow {
        #[serde(default)]
        content: Vec<Node>,
    },
    TableHeader {
        #[serde(default)]
        content: Vec<Node>,
    },
    TableCell {
        #[serde(default)]
        content: Vec<Node>,
    },
    HorizontalRule,
    HardBreak,
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        marks: Vec<Mark>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingAttrs {
    pub level: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeBlockAttrs {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedListAttrs {
    #[serde(default = "default_start")]
    pub start: u64,
}

impl Default for OrderedListAttrs {
    fn default() -> Self {
        Self { start: 1 }
    }
}

fn default_start() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttrs {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Inline formatting applied to a text node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mark {
    Bold,
    Italic,
    Strike,
    Code,
    Underline,
    Link { attrs: LinkAttrs },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAttrs {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Mark {
    pub fn link(href: impl Into<String>) -> Self {
        Mark::Link {
            attrs: LinkAttrs {
                href: href.into(),
                title: None,
            },
        }
    }

    /// Whether two marks are the same kind, ignoring link targets.
    pub fn same_kind(&self, other: &Mark) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Node {
    pub fn doc(content: Vec<Node>) -> Self {
        Node::Doc { content }
    }

    pub fn paragraph(content: Vec<Node>) -> Self {
        Node::Paragraph { content }
    }

    pub fn heading(level: u8, content: Vec<Node>) -> Self {
        Node::Heading {
            attrs: HeadingAttrs { level },
            content,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::Text {
            text: text.into(),
            marks: Vec::new(),
        }
    }

    pub fn marked(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        Node::Text {
            text: text.into(),
            marks,
        }
    }

    pub fn image(src: impl Into<String>, alt: Option<&str>) -> Self {
        Node::Image {
            attrs: ImageAttrs {
                src: src.into(),
                alt: alt.map(str::to_string),
                title: None,
            },
        }
    }

    /// The `type` discriminator as it appears in JSON.
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Doc { .. } => "doc",
            Node::Paragraph { .. } => "paragraph",
            Node::Heading { .. } => "heading",
            Node::CodeBlock { .. } => "codeBlock",
            Node::Blockquote { .. } => "blockquote",
            Node::BulletList { .. } => "bulletList",
            Node::OrderedList { .. } => "orderedList",
            Node::ListItem { .. } => "listItem",
            Node::Image { .. } => "image",
            Node::Table { .. } => "table",
            Node::TableRow { .. } => "tableRow",
            Node::TableHeader { .. } => "tableHeader",
            Node::TableCell { .. } => "tableCell",
            Node::HorizontalRule => "horizontalRule",
            Node::HardBreak => "hardBreak",
            Node::Text { .. } => "text",
            Node::Unsupported => "unsupported",
        }
    }

    /// Child nodes; empty for leaves.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Doc { content }
            | Node::Paragraph { content }
            | Node::Heading { content, .. }
            | Node::CodeBlock { content, .. }
            | Node::Blockquote { content }
            | Node::BulletList { content }
            | Node::OrderedList { content, .. }
            | Node::ListItem { content }
            | Node::Table { content }
            | Node::TableRow { content }
            | Node::TableHeader { content }
            | Node::TableCell { content } => content,
            Node::Image { .. }
            | Node::HorizontalRule
            | Node::HardBreak
            | Node::Text { .. }
            | Node::Unsupported => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Doc { content }
            | Node::Paragraph { content }
            | Node::Heading { content, .. }
            | Node::CodeBlock { content, .. }
            | Node::Blockquote { content }
            | Node::BulletList { content }
            | Node::OrderedList { content, .. }
            | Node::ListItem { content }
            | Node::Table { content }
            | Node::TableRow { content }
            | Node::TableHeader { content }
            | Node::TableCell { content } => Some(content),
            Node::Image { .. }
            | Node::HorizontalRule
            | Node::HardBreak
            | Node::Text { .. }
            | Node::Unsupported => None,
        }
    }

    /// Inline nodes sit inside paragraphs, headings, and cells.
    pub fn is_inline(&self) -> bool {
        matches!(self, Node::Text { .. } | Node::HardBreak)
    }

    /// Concatenated text of this node and its descendants.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Visit this node and every descendant depth-first, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Mutable depth-first visit, parents first.
    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Node)) {
        visit(self);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.walk_mut(visit);
            }
        }
    }
}

fn collect_text(node: &Node, out: &mut String) {
    match node {
        Node::Text { text, .. } => out.push_str(text),
        Node::HardBreak => out.push('\n'),
        other => {
            for child in other.children() {
                collect_text(child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_editor_json() {
        let value = json!({
            "type": "doc",
            "content": [
                {"type": "heading", "attrs": {"level": 2}, "content": [{"type": "text", "text": "Title"}]},
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "bold", "marks": [{"type": "bold"}]},
                    {"type": "text", "text": "link", "marks": [{"type": "link", "attrs": {"href": "https://x.dev", "target": "_blank"}}]}
                ]},
                {"type": "horizontalRule"},
                {"type": "image", "attrs": {"src": "/media/a.png", "alt": "A"}}
            ]
        });
        let doc: Node = serde_json::from_value(value).unwrap();
        let Node::Doc { content } = &doc else {
            panic!("expected doc");
        };
        assert_eq!(content.len(), 4);
        assert_eq!(content[0], Node::heading(2, vec![Node::text("Title")]));
        assert_eq!(content[2], Node::HorizontalRule);
        assert_eq!(doc.plain_text(), "Titleboldlink");
    }

    #[test]
    fn unknown_node_types_become_unsupported() {
        let value = json!({
            "type": "doc",
            "content": [{"type": "mention", "attrs": {"id": "u1"}}, {"type": "paragraph"}]
        });
        let doc: Node = serde_json::from_value(value).unwrap();
        assert_eq!(doc.children()[0], Node::Unsupported);
        assert_eq!(doc.children()[1], Node::paragraph(vec![]));
    }

    #[test]
    fn serializes_compact_shape() {
        let node = Node::paragraph(vec![Node::text("hi")]);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(
            value,
            json!({"type": "paragraph", "content": [{"type": "text", "text": "hi"}]})
        );
        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn ordered_list_start_defaults_to_one() {
        let node: Node = serde_json::from_value(json!({"type": "orderedList", "content": []})).unwrap();
        assert_eq!(
            node,
            Node::OrderedList {
                attrs: OrderedListAttrs { start: 1 },
                content: vec![]
            }
        );
    }

    #[test]
    fn walk_mut_reaches_nested_images() {
        let mut doc = Node::doc(vec![Node::BulletList {
            content: vec![Node::ListItem {
                content: vec![Node::image("a.png", None)],
            }],
        }]);
        let mut seen = 0;
        doc.walk_mut(&mut |n| {
            if let Node::Image { attrs } = n {
                attrs.src = "b.png".into();
                seen += 1;
            }
        });
        assert_eq!(seen, 1);
        let mut srcs = Vec::new();
        doc.walk(&mut |n| {
            if let Node::Image { attrs } = n {
                srcs.push(attrs.src.clone());
            }
        });
        assert_eq!(srcs, vec!["b.png"]);
    }
}
