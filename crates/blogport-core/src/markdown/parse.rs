//! Markdown → document tree.
//!
//! Walks the pulldown-cmark event stream (the same stream its HTML
//! renderer consumes) and builds nodes against a fixed schema: paragraph,
//! heading, code block, blockquote, lists, image, table, horizontal rule,
//! hard break, and text with bold / italic / strike / code / underline /
//! link marks. Anything else is dropped with a debug log.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use tracing::debug;

use crate::document::{CodeBlockAttrs, ImageAttrs, LinkAttrs, Mark, Node, OrderedListAttrs};

/// Parse markdown text into a `doc` node.
pub fn markdown_to_tree(markdown: &str) -> Node {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let mut builder = TreeBuilder::new();
    for event in Parser::new_ext(markdown, options) {
        builder.event(event);
    }
    builder.finish()
}

enum Frame {
    Root,
    Paragraph,
    Heading(u8),
    CodeBlock { language: Option<String>, code: String },
    Blockquote,
    List(Option<u64>),
    Item,
    Table,
    TableHead,
    TableRow,
    TableCell { header: bool },
    Image { src: String, title: String, alt: String },
    Skipped,
    Passthrough,
}

struct Open {
    frame: Frame,
    children: Vec<Node>,
}

struct TreeBuilder {
    stack: Vec<Open>,
    marks: Vec<Mark>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![Open {
                frame: Frame::Root,
                children: Vec::new(),
            }],
            marks: Vec::new(),
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text, None),
            Event::Code(text) => self.text(&text, Some(Mark::Code)),
            Event::SoftBreak => self.text(" ", None),
            Event::HardBreak => match &mut self.top().frame {
                Frame::Image { alt, .. } => alt.push(' '),
                _ => self.push(Node::HardBreak),
            },
            Event::Rule => self.push(Node::HorizontalRule),
            Event::InlineHtml(html) => self.inline_html(&html),
            Event::Html(html) => debug!(html = %html.trim(), "dropping raw HTML block"),
            other => debug!(event = ?other, "dropping unsupported markdown event"),
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        let frame = match tag {
            Tag::Paragraph => Frame::Paragraph,
            Tag::Heading { level, .. } => Frame::Heading(level as u8),
            Tag::BlockQuote(_) => Frame::Blockquote,
            Tag::CodeBlock(kind) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                Frame::CodeBlock {
                    language,
                    code: String::new(),
                }
            }
            Tag::List(start) => Frame::List(start),
            Tag::Item => Frame::Item,
            Tag::Table(_) => Frame::Table,
            Tag::TableHead => Frame::TableHead,
            Tag::TableRow => Frame::TableRow,
            Tag::TableCell => Frame::TableCell {
                header: matches!(self.top().frame, Frame::TableHead),
            },
            Tag::Image {
                dest_url, title, ..
            } => Frame::Image {
                src: dest_url.to_string(),
                title: title.to_string(),
                alt: String::new(),
            },
            Tag::Emphasis => return self.marks.push(Mark::Italic),
            Tag::Strong => return self.marks.push(Mark::Bold),
            Tag::Strikethrough => return self.marks.push(Mark::Strike),
            Tag::Link {
                dest_url, title, ..
            } => {
                return self.marks.push(Mark::Link {
                    attrs: LinkAttrs {
                        href: dest_url.to_string(),
                        title: Some(title.to_string()).filter(|t| !t.is_empty()),
                    },
                })
            }
            Tag::HtmlBlock => Frame::Skipped,
            other => {
                debug!(tag = ?other, "unwrapping unsupported markdown container");
                Frame::Passthrough
            }
        };
        self.stack.push(Open {
            frame,
            children: Vec::new(),
        });
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Emphasis => return self.pop_mark(&Mark::Italic),
            TagEnd::Strong => return self.pop_mark(&Mark::Bold),
            TagEnd::Strikethrough => return self.pop_mark(&Mark::Strike),
            TagEnd::Link => return self.pop_mark(&Mark::link("")),
            _ => {}
        }
        if self.stack.len() < 2 {
            return;
        }
        let Some(open) = self.stack.pop() else {
            return;
        };
        let children = open.children;
        let nodes: Vec<Node> = match open.frame {
            Frame::Root => Vec::new(),
            Frame::Paragraph => blockify(children),
            Frame::Heading(level) => {
                let (inline, images): (Vec<Node>, Vec<Node>) = children
                    .into_iter()
                    .partition(|n| !matches!(n, Node::Image { .. }));
                let mut nodes = vec![Node::heading(level, inline)];
                nodes.extend(images);
                nodes
            }
            Frame::CodeBlock { language, mut code } => {
                if code.ends_with('\n') {
                    code.pop();
                }
                let content = if code.is_empty() {
                    Vec::new()
                } else {
                    vec![Node::text(code)]
                };
                vec![Node::CodeBlock {
                    attrs: CodeBlockAttrs { language },
                    content,
                }]
            }
            Frame::Blockquote => vec![Node::Blockquote {
                content: blockify(children),
            }],
            Frame::List(Some(start)) => vec![Node::OrderedList {
                attrs: OrderedListAttrs { start },
                content: children,
            }],
            Frame::List(None) => vec![Node::BulletList { content: children }],
            Frame::Item => vec![Node::ListItem {
                content: blockify(children),
            }],
            Frame::Table => vec![Node::Table { content: children }],
            Frame::TableHead | Frame::TableRow => vec![Node::TableRow { content: children }],
            Frame::TableCell { header } => {
                let content = vec![Node::paragraph(
                    children.into_iter().filter(|n| n.is_inline()).collect(),
                )];
                if header {
                    vec![Node::TableHeader { content }]
                } else {
                    vec![Node::TableCell { content }]
                }
            }
            Frame::Image { src, title, alt } => vec![Node::Image {
                attrs: ImageAttrs {
                    src,
                    alt: Some(alt).filter(|a| !a.is_empty()),
                    title: Some(title).filter(|t| !t.is_empty()),
                },
            }],
            Frame::Skipped => Vec::new(),
            Frame::Passthrough => children,
        };
        self.top().children.extend(nodes);
    }

    fn text(&mut self, text: &str, extra: Option<Mark>) {
        match &mut self.top().frame {
            Frame::CodeBlock { code, .. } => return code.push_str(text),
            Frame::Image { alt, .. } => return alt.push_str(text),
            Frame::Skipped => return,
            _ => {}
        }
        // The mark stack is outermost first; stored marks are innermost
        // first, with a code span always innermost.
        let mut marks: Vec<Mark> = extra.into_iter().collect();
        marks.extend(self.marks.iter().rev().cloned());

        let children = &mut self.top().children;
        if let Some(Node::Text {
            text: prev,
            marks: prev_marks,
        }) = children.last_mut()
        {
            if *prev_marks == marks {
                prev.push_str(text);
                return;
            }
        }
        children.push(Node::marked(text, marks));
    }

    fn inline_html(&mut self, html: &str) {
        let tag: String = html
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        match tag.as_str() {
            "<u>" => self.marks.push(Mark::Underline),
            "</u>" => self.pop_mark(&Mark::Underline),
            "<br>" | "<br/>" => self.push(Node::HardBreak),
            _ => debug!(html, "dropping inline HTML"),
        }
    }

    fn pop_mark(&mut self, kind: &Mark) {
        if let Some(pos) = self.marks.iter().rposition(|m| m.same_kind(kind)) {
            self.marks.remove(pos);
        }
    }

    fn push(&mut self, node: Node) {
        self.top().children.push(node);
    }

    fn top(&mut self) -> &mut Open {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn finish(mut self) -> Node {
        while self.stack.len() > 1 {
            let open = self.stack.pop();
            if let Some(open) = open {
                self.top().children.extend(open.children);
            }
        }
        let root = self.stack.pop().map(|o| o.children).unwrap_or_default();
        Node::doc(blockify(root))
    }
}

/// Group runs of inline nodes into paragraphs; block nodes (including
/// images) pass through. Whitespace-only runs are dropped.
fn blockify(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::new();
    let mut run: Vec<Node> = Vec::new();
    for node in nodes {
        if node.is_inline() {
            run.push(node);
        } else {
            flush_run(&mut run, &mut out);
            out.push(node);
        }
    }
    flush_run(&mut run, &mut out);
    out
}

fn flush_run(run: &mut Vec<Node>, out: &mut Vec<Node>) {
    if run.is_empty() {
        return;
    }
    let meaningful = run.iter().any(|n| match n {
        Node::Text { text, .. } => !text.trim().is_empty(),
        _ => false,
    });
    let mut inline = std::mem::take(run);
    if meaningful {
        trim_run(&mut inline);
        out.push(Node::paragraph(inline));
    }
}

/// Image splitting leaves soft-break spaces at run edges; trim them off.
fn trim_run(run: &mut Vec<Node>) {
    while matches!(run.first(), Some(Node::HardBreak)) {
        run.remove(0);
    }
    while matches!(run.last(), Some(Node::HardBreak)) {
        run.pop();
    }
    if let Some(Node::Text { text, marks }) = run.first_mut() {
        if marks.is_empty() {
            *text = text.trim_start().to_string();
        }
    }
    if let Some(Node::Text { text, marks }) = run.last_mut() {
        if marks.is_empty() {
            *text = text.trim_end().to_string();
        }
    }
    run.retain(|n| !matches!(n, Node::Text { text, .. } if text.is_empty()));
}
