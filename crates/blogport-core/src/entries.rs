//! Post discovery inside an opened archive.
//!
//! Two archive shapes are understood:
//!
//! - **native**: written by an export; has `manifest.json` and one
//!   directory per post under `posts/`, each holding `index.md`, an
//!   optional `content.json`, and an optional `images/` directory.
//! - **markdown**: any other archive; every `*.md` / `*.markdown` file
//!   outside `__MACOSX/` and dot-directories is a post.
//!
//! Enumeration only reads enough to list posts (title and location).
//! Files that do not yield a title are skipped silently: archives may
//! legitimately contain unrelated files.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::Archive;
use crate::frontmatter;
use crate::models::Manifest;

pub const POSTS_PREFIX: &str = "posts/";
pub const MANIFEST_PATH: &str = "manifest.json";
pub const TAGS_PATH: &str = "tags.json";
pub const RESERVED_PREFIX: &str = "__MACOSX/";

const MARKDOWN_GLOBS: &[&str] = &["**/*.md", "**/*.markdown"];

/// Archive shape, decided by the presence of a valid manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Native,
    Markdown,
}

/// A post discovered in an archive, before its content is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEntry {
    /// Post directory name (native) or file stem (markdown).
    pub name: String,
    pub title: String,
    /// Archive directory the post's relative paths resolve against.
    pub base_dir: String,
    /// Markdown file of the post; absent for native entries, whose file is
    /// always `<base_dir>/index.md`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_path: Option<String>,
}

impl PostEntry {
    pub fn markdown_file(&self) -> String {
        match &self.markdown_path {
            Some(path) => path.clone(),
            None => format!("{}/index.md", self.base_dir),
        }
    }

    pub fn content_json_path(&self) -> String {
        format!("{}/content.json", self.base_dir)
    }

    pub fn image_dir(&self) -> String {
        format!("{}/images", self.base_dir)
    }
}

pub fn detect_dialect(archive: &Archive) -> Dialect {
    match archive.read_validated_json::<Manifest, _>(MANIFEST_PATH, Manifest::validate) {
        Some(_) => Dialect::Native,
        None => Dialect::Markdown,
    }
}

pub fn enumerate(archive: &Archive, dialect: Dialect) -> Vec<PostEntry> {
    match dialect {
        Dialect::Native => enumerate_native(archive),
        Dialect::Markdown => enumerate_markdown(archive),
    }
}

/// One entry per `posts/<dir>/` whose `index.md` yields a title.
pub fn enumerate_native(archive: &Archive) -> Vec<PostEntry> {
    archive
        .list_subdirectories(POSTS_PREFIX)
        .into_iter()
        .filter_map(|dir| {
            let base_dir = format!("{}{}", POSTS_PREFIX, dir);
            let index = format!("{}/index.md", base_dir);
            let Some(text) = archive.read_text(&index) else {
                debug!(dir = %base_dir, "no readable index.md, skipping");
                return None;
            };
            let parsed = frontmatter::parse(&text);
            let Some(meta) = frontmatter::normalize(&parsed.metadata) else {
                debug!(path = %index, "no title in front matter, skipping");
                return None;
            };
            Some(PostEntry {
                name: dir,
                title: meta.title,
                base_dir,
                markdown_path: None,
            })
        })
        .collect()
}

/// One entry per markdown file whose front matter or first `# ` heading
/// yields a title, in archive path order.
pub fn enumerate_markdown(archive: &Archive) -> Vec<PostEntry> {
    let globs = match markdown_globset() {
        Ok(globs) => globs,
        Err(err) => {
            debug!(error = %err, "markdown globs failed to build");
            return Vec::new();
        }
    };

    archive
        .list_paths("")
        .into_iter()
        .filter(|path| !path.starts_with(RESERVED_PREFIX))
        .filter(|path| !path.split('/').any(|seg| seg.starts_with('.')))
        .filter(|path| globs.is_match(path))
        .filter_map(|path| {
            let text = archive.read_text(path)?;
            let parsed = frontmatter::parse(&text);
            let title = frontmatter::normalize(&parsed.metadata)
                .map(|m| m.title)
                .or_else(|| first_heading(&parsed.body));
            let Some(title) = title else {
                debug!(path = %path, "no title found, skipping");
                return None;
            };
            let (base_dir, file) = match path.rsplit_once('/') {
                Some((dir, file)) => (dir.to_string(), file),
                None => (String::new(), path),
            };
            let name = file
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(file)
                .to_string();
            Some(PostEntry {
                name,
                title,
                base_dir,
                markdown_path: Some(path.to_string()),
            })
        })
        .collect()
}

fn markdown_globset() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in MARKDOWN_GLOBS {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    builder.build()
}

/// Text of the first ATX level-one heading outside fenced code.
pub fn first_heading(body: &str) -> Option<String> {
    let mut in_fence = false;
    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("# ") {
            let title = rest.trim().trim_end_matches('#').trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn archive(entries: &[(&str, &str)]) -> Archive {
        let mut archive = Archive::new();
        for (path, text) in entries {
            archive.insert_text(*path, text).unwrap();
        }
        archive
    }

    fn manifest() -> String {
        serde_json::to_string(&Manifest {
            version: Manifest::VERSION.into(),
            exported_at: Utc::now(),
            post_count: 2,
            generator: "blogport".into(),
        })
        .unwrap()
    }

    #[test]
    fn manifest_selects_native_dialect() {
        let m = manifest();
        let native = archive(&[(MANIFEST_PATH, m.as_str())]);
        assert_eq!(detect_dialect(&native), Dialect::Native);
        let broken = archive(&[(MANIFEST_PATH, "{\"version\": 1")]);
        assert_eq!(detect_dialect(&broken), Dialect::Markdown);
        assert_eq!(detect_dialect(&Archive::new()), Dialect::Markdown);
    }

    #[test]
    fn native_entries_skip_untitled_dirs() {
        let m = manifest();
        let a = archive(&[
            (MANIFEST_PATH, m.as_str()),
            ("posts/b-post/index.md", "---\ntitle: B\n---\n\nbody"),
            ("posts/a-post/index.md", "---\ntitle: A\n---\n\nbody"),
            ("posts/a-post/images/x.png", "png"),
            ("posts/no-title/index.md", "just text"),
            ("posts/no-index/content.json", "{}"),
        ]);
        let entries = enumerate(&a, Dialect::Native);
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(entries[0].base_dir, "posts/a-post");
        assert_eq!(entries[0].markdown_file(), "posts/a-post/index.md");
        assert_eq!(entries[0].image_dir(), "posts/a-post/images");
    }

    #[test]
    fn markdown_entries_follow_path_order() {
        let a = archive(&[
            ("blog/second.md", "---\ntitle: Second\n---\n"),
            ("blog/first.MD", "+++\ntitle = \"First\"\n+++\n"),
            ("readme.markdown", "Intro\n\n# From Heading\n"),
            ("__MACOSX/blog/._first.md", "---\ntitle: junk\n---\n"),
            (".drafts/hidden.md", "---\ntitle: hidden\n---\n"),
            ("notes.txt", "# not markdown"),
            ("untitled.md", "no title here"),
        ]);
        let entries = enumerate(&a, Dialect::Markdown);
        let got: Vec<_> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.title.as_str(), e.base_dir.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("first", "First", "blog"),
                ("second", "Second", "blog"),
                ("readme", "From Heading", ""),
            ]
        );
        assert_eq!(entries[0].markdown_file(), "blog/first.MD");
    }

    #[test]
    fn first_heading_ignores_code_fences() {
        let body = "```\n# not this\n```\n## Sub\n# Real Title #\n";
        assert_eq!(first_heading(body).as_deref(), Some("Real Title"));
        assert_eq!(first_heading("no heading"), None);
    }
}
