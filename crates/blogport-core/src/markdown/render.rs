//! Document tree → markdown.

use tracing::debug;

use crate::document::{ImageAttrs, Mark, Node};

/// Rendering knobs for [`tree_to_markdown`].
#[derive(Default)]
pub struct RenderOptions<'a> {
    /// Rewrites every image `src` before it is written, e.g. to point at
    /// a file inside the archive instead of the serving URL.
    pub image_src: Option<&'a dyn Fn(&str) -> String>,
}

/// Convert a document tree into markdown text.
///
/// Blocks are separated by exactly one blank line, the output carries no
/// leading blank lines, and non-empty output ends with a single newline.
pub fn tree_to_markdown(node: &Node, options: &RenderOptions<'_>) -> String {
    let renderer = Renderer { options };
    let body = renderer.block(node);
    let body = body.trim_matches('\n').trim_end();
    if body.is_empty() {
        String::new()
    } else {
        format!("{}\n", body)
    }
}

struct Renderer<'o, 'a> {
    options: &'o RenderOptions<'a>,
}

impl Renderer<'_, '_> {
    fn block(&self, node: &Node) -> String {
        match node {
            Node::Doc { content } => self.blocks(content),
            Node::Paragraph { content } => escape_lines(&self.inline(content)),
            Node::Heading { attrs, content } => {
                let level = attrs.level.clamp(1, 6) as usize;
                format!("{} {}", "#".repeat(level), self.inline(content).trim())
            }
            Node::CodeBlock { attrs, content } => {
                let code: String = content.iter().map(Node::plain_text).collect();
                let fence = "`".repeat(longest_backtick_run(&code).max(2) + 1);
                let lang = attrs.language.as_deref().unwrap_or("");
                if code.is_empty() {
                    format!("{fence}{lang}\n{fence}")
                } else {
                    format!("{fence}{lang}\n{code}\n{fence}")
                }
            }
            Node::Blockquote { content } => self
                .blocks(content)
                .lines()
                .map(|line| {
                    if line.is_empty() {
                        ">".to_string()
                    } else {
                        format!("> {}", line)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Node::BulletList { content } => self.list(content, None),
            Node::OrderedList { attrs, content } => self.list(content, Some(attrs.start)),
            Node::ListItem { content } => self.list_item(content),
            Node::Image { attrs } => self.image(attrs),
            Node::Table { content } => self.table(content),
            Node::TableRow { content } | Node::TableHeader { content } | Node::TableCell { content } => {
                self.blocks(content)
            }
            Node::HorizontalRule => "---".to_string(),
            Node::HardBreak => "\n".to_string(),
            Node::Text { .. } => escape_lines(&self.inline(std::slice::from_ref(node))),
            Node::Unsupported => {
                debug!("skipping unsupported block node");
                String::new()
            }
        }
    }

    fn blocks(&self, nodes: &[Node]) -> String {
        nodes
            .iter()
            .map(|n| self.block(n))
            .map(|s| s.trim_matches('\n').to_string())
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn list(&self, items: &[Node], start: Option<u64>) -> String {
        let mut lines: Vec<String> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let marker = match start {
                Some(s) => format!("{}.", s.saturating_add(i as u64)),
                None => "-".to_string(),
            };
            // Continuation lines align with the item's content column.
            let indent = " ".repeat(marker.len() + 1);
            let body = self.block(item);
            let mut body_lines = body.lines();
            match body_lines.next() {
                Some(first) => lines.push(format!("{} {}", marker, first).trim_end().to_string()),
                None => lines.push(marker),
            }
            for line in body_lines {
                if line.is_empty() {
                    lines.push(String::new());
                } else {
                    lines.push(format!("{}{}", indent, line));
                }
            }
        }
        lines.join("\n")
    }

    fn list_item(&self, content: &[Node]) -> String {
        let mut out = String::new();
        for node in content {
            let rendered = self.block(node);
            let rendered = rendered.trim_matches('\n');
            if rendered.trim().is_empty() {
                continue;
            }
            if !out.is_empty() {
                let nested_list = matches!(node, Node::BulletList { .. } | Node::OrderedList { .. });
                out.push_str(if nested_list { "\n" } else { "\n\n" });
            }
            out.push_str(rendered);
        }
        out
    }

    fn table(&self, rows: &[Node]) -> String {
        let rows: Vec<Vec<String>> = rows
            .iter()
            .map(|row| row.children().iter().map(|cell| self.cell(cell)).collect())
            .collect();
        let Some(header) = rows.first() else {
            return String::new();
        };
        // A row wider than the header widens the whole table; GFM drops
        // cells past the header's width.
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);

        let mut out = vec![table_row(header, columns)];
        out.push(format!("|{}", " --- |".repeat(columns)));
        for row in &rows[1..] {
            out.push(table_row(row, columns));
        }
        out.join("\n")
    }

    fn cell(&self, cell: &Node) -> String {
        let children = cell.children();
        let inline = match children.iter().find(|c| matches!(c, Node::Paragraph { .. })) {
            Some(paragraph) => self.inline(paragraph.children()),
            None => self.inline(children),
        };
        inline
            .replace("  \n", "<br>")
            .replace('\n', " ")
            .replace('|', "\\|")
            .trim()
            .to_string()
    }

    fn image(&self, attrs: &ImageAttrs) -> String {
        let src = match self.options.image_src {
            Some(rewrite) => rewrite(&attrs.src),
            None => attrs.src.clone(),
        };
        let src = if src.contains(' ') || src.contains(')') {
            format!("<{}>", src)
        } else {
            src
        };
        let alt = attrs.alt.as_deref().unwrap_or("").replace(']', "\\]");
        match attrs.title.as_deref() {
            Some(title) if !title.is_empty() => {
                format!("![{}]({} \"{}\")", alt, src, title.replace('"', "\\\""))
            }
            _ => format!("![{}]({})", alt, src),
        }
    }

    fn inline(&self, nodes: &[Node]) -> String {
        let mut out = String::new();
        for node in nodes {
            match node {
                Node::Text { text, marks } => out.push_str(&marked_text(text, marks)),
                Node::HardBreak => out.push_str("  \n"),
                Node::Image { attrs } => out.push_str(&self.image(attrs)),
                Node::Unsupported => debug!("skipping unsupported inline node"),
                other => out.push_str(&self.inline(other.children())),
            }
        }
        out
    }
}

/// Wrap text in its marks, applied in stored order (first mark innermost).
fn marked_text(text: &str, marks: &[Mark]) -> String {
    if marks.iter().any(|m| matches!(m, Mark::Code)) {
        let mut s = code_span(text);
        for mark in marks.iter().filter(|m| !matches!(m, Mark::Code)) {
            s = wrap(mark, &s);
        }
        return s;
    }

    let escaped = escape_text(text);
    if marks.is_empty() {
        return escaped;
    }
    // Delimiters must hug non-whitespace to be recognized.
    let core = escaped.trim();
    if core.is_empty() {
        return escaped;
    }
    let lead = &escaped[..escaped.len() - escaped.trim_start().len()];
    let trail = &escaped[escaped.trim_end().len()..];

    let mut s = core.to_string();
    for mark in marks {
        s = wrap(mark, &s);
    }
    format!("{}{}{}", lead, s, trail)
}

fn wrap(mark: &Mark, s: &str) -> String {
    match mark {
        Mark::Bold => format!("**{}**", s),
        Mark::Italic => format!("*{}*", s),
        Mark::Strike => format!("~~{}~~", s),
        Mark::Underline => format!("<u>{}</u>", s),
        Mark::Code => s.to_string(),
        Mark::Link { attrs } => {
            let href = if attrs.href.contains(' ') || attrs.href.contains(')') {
                format!("<{}>", attrs.href)
            } else {
                attrs.href.clone()
            };
            match attrs.title.as_deref() {
                Some(title) if !title.is_empty() => {
                    format!("[{}]({} \"{}\")", s, href, title.replace('"', "\\\""))
                }
                _ => format!("[{}]({})", s, href),
            }
        }
    }
}

fn code_span(text: &str) -> String {
    let run = longest_backtick_run(text);
    if run == 0 {
        return format!("`{}`", text);
    }
    let ticks = "`".repeat(run + 1);
    format!("{ticks} {text} {ticks}")
}

fn longest_backtick_run(s: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in s.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '~' => {
                out.push('\\');
                out.push(c);
            }
            '&' if chars
                .peek()
                .map(|n| n.is_ascii_alphanumeric() || *n == '#')
                .unwrap_or(false) =>
            {
                out.push_str("\\&");
            }
            _ => out.push(c),
        }
    }
    out
}

/// Escape the start of every line a hard break opens, not just the first.
fn escape_lines(inline: &str) -> String {
    inline
        .split("  \n")
        .map(escape_line_start)
        .collect::<Vec<_>>()
        .join("  \n")
}

/// Escape a leading character that would otherwise open a block construct.
fn escape_line_start(line: &str) -> String {
    let trimmed = line.trim_start();
    let Some(first) = trimmed.chars().next() else {
        return String::new();
    };
    let second = trimmed[first.len_utf8()..].chars().next();
    let opens_block = match first {
        '#' | '>' | '+' | '=' => true,
        '-' => second.map(char::is_whitespace).unwrap_or(true) || trimmed.starts_with("---"),
        _ => false,
    };
    if opens_block {
        return format!("\\{}", trimmed);
    }

    if first.is_ascii_digit() {
        let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
        let rest = &trimmed[digits..];
        if rest.starts_with(". ") || rest.starts_with(") ") || rest == "." || rest == ")" {
            return format!("{}\\{}", &trimmed[..digits], rest);
        }
    }
    trimmed.to_string()
}

fn table_row(cells: &[String], columns: usize) -> String {
    let mut row = String::from("|");
    for i in 0..columns {
        row.push(' ');
        row.push_str(cells.get(i).map(String::as_str).unwrap_or(""));
        row.push_str(" |");
    }
    row
}
