//! Text normalization, content hashing and shingle-based similarity keys

use scraper::{Html, Node};
use sha2::{Digest, Sha256};

const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Reduces content to a canonical text form for comparison
///
/// HTML input is reduced to its visible text first. The result is
/// lowercased, every non-alphanumeric character becomes a space, and runs
/// of whitespace collapse to a single space.
pub fn normalize_content(content: &str) -> String {
    let text = if looks_like_html(content) {
        visible_text(content)
    } else {
        content.to_string()
    };

    let mapped: String = text
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(content: &str) -> bool {
    let head: String = content
        .trim_start()
        .chars()
        .take(512)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html")
        || head.contains("<html")
        || head.contains("<body")
        || head.contains("<div")
        || head.contains("<p>")
}

fn visible_text(content: &str) -> String {
    let document = Html::parse_document(content);
    let mut parts = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => SKIPPED_ELEMENTS.contains(&element.name()),
            _ => false,
        });
        if !hidden {
            parts.push(String::from(&**text));
        }
    }

    parts.join(" ")
}

/// Hex-encoded SHA-256 of already normalized text
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Builds the similarity key of normalized text
///
/// The key is the sorted, deduplicated set of 64-bit hashes of every
/// `shingle_size`-word window. Text with fewer words than one shingle forms
/// a single shingle; empty text yields an empty key.
pub fn similarity_key(normalized: &str, shingle_size: usize) -> Vec<u64> {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let size = shingle_size.max(1);
    let mut key: Vec<u64> = if words.len() <= size {
        vec![shingle_hash(&words)]
    } else {
        words.windows(size).map(shingle_hash).collect()
    };

    key.sort_unstable();
    key.dedup();
    key
}

fn shingle_hash(words: &[&str]) -> u64 {
    let digest = Sha256::digest(words.join(" ").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Jaccard similarity of two sorted, deduplicated keys
///
/// Two empty keys have similarity 0 so that empty content never matches.
pub fn jaccard(a: &[u64], b: &[u64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }

    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}
