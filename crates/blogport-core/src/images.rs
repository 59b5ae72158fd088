//! Image reference discovery, path resolution, and rewriting.
//!
//! Stored posts reference images through the media route
//! (`/media/<storage key>`). Inside an archive, images are plain files
//! addressed relative to the post that references them. This module
//! converts between the two without touching any storage; uploading is
//! done by [`crate::relocate`].

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use base64::Engine;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::document::Node;

/// URL prefix under which stored images are served.
pub const MEDIA_ROUTE_PREFIX: &str = "/media/";

/// How a markdown image reference points at its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRefKind {
    Relative,
    Remote,
    DataUri,
}

/// One `![alt](src)` occurrence in markdown text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub original: String,
    pub alt: String,
    pub kind: ImageRefKind,
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"!\[(?P<alt>[^\]]*)\]\(\s*(?:<(?P<angled>[^>]*)>|(?P<src>[^)\s]+))(?P<rest>\s+"[^"]*")?\s*\)"#)
            .expect("image pattern is valid")
    })
}

fn captured_src<'t>(caps: &Captures<'t>) -> Option<regex::Match<'t>> {
    caps.name("angled").or_else(|| caps.name("src"))
}

/// Media route URL for a storage key.
pub fn media_url(key: &str) -> String {
    format!("{}{}", MEDIA_ROUTE_PREFIX, key)
}

/// Storage key portion of an image `src`, ignoring query string, fragment,
/// and the media route prefix (including absolute URLs on the same route).
/// Returns `None` for sources that do not point at stored media.
pub fn storage_key_from_src(src: &str) -> Option<String> {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let path = match path.find("://") {
        Some(idx) => {
            let after_scheme = &path[idx + 3..];
            &after_scheme[after_scheme.find('/')?..]
        }
        None => path,
    };
    let key = path.strip_prefix(MEDIA_ROUTE_PREFIX)?;
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Storage keys of every stored image in the tree, in document order,
/// without duplicates.
pub fn extract_image_keys(tree: &Node) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    tree.walk(&mut |node| {
        if let Node::Image { attrs } = node {
            if let Some(key) = storage_key_from_src(&attrs.src) {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
    });
    keys
}

/// Every image reference in markdown text, in order of appearance.
pub fn extract_markdown_image_refs(markdown: &str) -> Vec<ImageRef> {
    image_pattern()
        .captures_iter(markdown)
        .filter_map(|caps| {
            let src = captured_src(&caps)?.as_str().to_string();
            Some(ImageRef {
                kind: classify(&src),
                alt: caps.name("alt").map(|m| m.as_str()).unwrap_or("").to_string(),
                original: src,
            })
        })
        .collect()
}

fn classify(src: &str) -> ImageRefKind {
    let lower = src.to_ascii_lowercase();
    if lower.starts_with("data:") {
        return ImageRefKind::DataUri;
    }
    if lower.starts_with("//") {
        return ImageRefKind::Remote;
    }
    let scheme = lower
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .filter(|s| {
            !s.is_empty()
                && s.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
                && s.chars().all(|c| c.is_ascii_alphanumeric() || "+.-".contains(c))
        });
    if scheme.is_some() {
        ImageRefKind::Remote
    } else {
        ImageRefKind::Relative
    }
}

/// Resolve a relative reference against an archive directory.
///
/// A leading `./` is stripped; `..` pops a segment of the base, `.` is a
/// no-op, anything else is appended.
pub fn resolve_relative_path(base_dir: &str, reference: &str) -> String {
    let reference = reference.strip_prefix("./").unwrap_or(reference);
    if base_dir.is_empty() {
        return reference.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in reference.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Copy of `tree` with stored image sources remapped through
/// `old key → new key`. Matching is tried on the storage key first, then
/// on the raw `src`; rewritten sources point at the media route.
pub fn rewrite_tree_image_paths(tree: &Node, keys: &HashMap<String, String>) -> Node {
    let mut out = tree.clone();
    out.walk_mut(&mut |node| {
        if let Node::Image { attrs } = node {
            let new_key = storage_key_from_src(&attrs.src)
                .and_then(|key| keys.get(&key))
                .or_else(|| keys.get(&attrs.src));
            if let Some(new_key) = new_key {
                attrs.src = media_url(new_key);
            }
        }
    });
    out
}

/// Replace image sources in markdown text that exactly match a key of
/// `refs` with the mapped value. Everything else is left byte-identical.
pub fn rewrite_markdown_image_paths(markdown: &str, refs: &HashMap<String, String>) -> String {
    image_pattern()
        .replace_all(markdown, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let Some(src) = captured_src(caps) else {
                return whole.to_string();
            };
            match refs.get(src.as_str()) {
                Some(new_src) => {
                    let start = src.start() - caps.get(0).map(|m| m.start()).unwrap_or(0);
                    let end = start + src.len();
                    format!("{}{}{}", &whole[..start], new_src, &whole[end..])
                }
                None => whole.to_string(),
            }
        })
        .into_owned()
}

/// Deterministic, per-post unique file names for a list of storage keys.
///
/// The last key segment is used as the file name; later keys whose name is
/// already taken get a numeric prefix. The same key list always yields the
/// same names, which is how an importer maps `content.json` sources back to
/// files under `images/`.
pub fn image_file_names(keys: &[String]) -> Vec<(String, String)> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        let base = sanitize_file_name(key.rsplit('/').next().unwrap_or(key));
        let mut name = base.clone();
        let mut n = i + 1;
        while taken.contains(&name) {
            name = format!("{}-{}", n, base);
            n += 1;
        }
        taken.insert(name.clone());
        out.push((key.clone(), name));
    }
    out
}

/// Blob key for uploaded image bytes: `images/<hash prefix>-<file name>`.
/// Identical bytes under the same name always map to the same key.
pub fn content_addressed_key(file_name: &str, bytes: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    format!("images/{}-{}", &digest[..16], sanitize_file_name(file_name))
}

/// Restrict a file name to `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '-').to_string();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

/// Decode a base64 `data:` URI into its media type and bytes.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    let media_type = if media_type.is_empty() {
        "application/octet-stream"
    } else {
        media_type
    };
    Some((media_type.to_string(), bytes))
}

/// File extension for an image media type.
pub fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/avif" => "avif",
        _ => "bin",
    }
}

/// Media type guessed from a file name's extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_parent_segments() {
        assert_eq!(resolve_relative_path("a/b/c", "../../img.jpg"), "a/img.jpg");
        assert_eq!(resolve_relative_path("", "./x.jpg"), "x.jpg");
        assert_eq!(resolve_relative_path("posts/a", "./images/p.png"), "posts/a/images/p.png");
        assert_eq!(resolve_relative_path("a", "./b/./c.png"), "a/b/c.png");
    }

    #[test]
    fn storage_keys_ignore_prefix_and_query() {
        assert_eq!(storage_key_from_src("/media/images/a.png?w=300").as_deref(), Some("images/a.png"));
        assert_eq!(
            storage_key_from_src("https://blog.dev/media/x.jpg#frag").as_deref(),
            Some("x.jpg")
        );
        assert_eq!(storage_key_from_src("https://cdn.dev/x.jpg"), None);
        assert_eq!(storage_key_from_src("images/a.png"), None);
    }

    #[test]
    fn image_keys_are_deduplicated_in_order() {
        let tree = Node::doc(vec![
            Node::image("/media/b.png", None),
            Node::paragraph(vec![Node::text("x")]),
            Node::image("/media/a.png", None),
            Node::image("/media/b.png?v=2", None),
            Node::image("https://elsewhere.dev/c.png", None),
        ]);
        assert_eq!(extract_image_keys(&tree), vec!["b.png", "a.png"]);
    }

    #[test]
    fn markdown_refs_are_classified() {
        let md = "![a](./img/a.png) ![b](https://x.dev/b.png \"T\") ![c](data:image/png;base64,AAA=) ![d](<my pic.png>)";
        let refs = extract_markdown_image_refs(md);
        let kinds: Vec<_> = refs.iter().map(|r| (r.original.as_str(), r.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("./img/a.png", ImageRefKind::Relative),
                ("https://x.dev/b.png", ImageRefKind::Remote),
                ("data:image/png;base64,AAA=", ImageRefKind::DataUri),
                ("my pic.png", ImageRefKind::Relative),
            ]
        );
        assert_eq!(refs[1].alt, "b");
    }

    #[test]
    fn markdown_rewrite_only_touches_exact_matches() {
        let md = "![a](img/a.png \"Title\")\n![b](img/b.png)\n";
        let map = HashMap::from([("img/a.png".to_string(), "/media/k1".to_string())]);
        assert_eq!(
            rewrite_markdown_image_paths(md, &map),
            "![a](/media/k1 \"Title\")\n![b](img/b.png)\n"
        );
    }

    #[test]
    fn tree_rewrite_is_a_copy() {
        let tree = Node::doc(vec![Node::image("/media/old.png", Some("o"))]);
        let map = HashMap::from([("old.png".to_string(), "images/abc-old.png".to_string())]);
        let rewritten = rewrite_tree_image_paths(&tree, &map);
        assert_eq!(rewritten, Node::doc(vec![Node::image("/media/images/abc-old.png", Some("o"))]));
        assert_eq!(tree, Node::doc(vec![Node::image("/media/old.png", Some("o"))]));
    }

    #[test]
    fn file_names_are_unique_and_stable() {
        let keys = vec![
            "images/1-photo.png".to_string(),
            "other/photo.png".to_string(),
            "x/photo.png".to_string(),
        ];
        let names = image_file_names(&keys);
        assert_eq!(names[0].1, "1-photo.png");
        assert_eq!(names[1].1, "photo.png");
        assert_ne!(names[2].1, "photo.png");
        assert_ne!(names[2].1, "1-photo.png");
        assert_eq!(image_file_names(&keys), names);
    }

    #[test]
    fn content_addressed_keys_depend_on_bytes() {
        let a = content_addressed_key("My Photo.png", b"one");
        let b = content_addressed_key("My Photo.png", b"two");
        assert!(a.starts_with("images/"));
        assert!(a.ends_with("-My-Photo.png"));
        assert_ne!(a, b);
        assert_eq!(a, content_addressed_key("My Photo.png", b"one"));
    }

    #[test]
    fn data_uris_decode() {
        let (media, bytes) = decode_data_uri("data:image/png;base64,aGk=").unwrap();
        assert_eq!(media, "image/png");
        assert_eq!(bytes, b"hi");
        assert!(decode_data_uri("data:text/plain,hi").is_none());
        assert_eq!(extension_for(&media), "png");
    }
}
