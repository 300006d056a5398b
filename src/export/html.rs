//! HTML alt 属性注入
//!
//! 对每个 `<img>` 标签，若其 src 包含某个缓存名称，则把 alt 设置为该条目的描述。
//! 多个名称同时命中时取最长者。失败条目的描述就是错误标记，同样写入，便于页面上直接看到。

use crate::cache::CacheEntry;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;
use tracing::{debug, info};

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("valid img regex")
});
static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([^\s=/>"']+)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s>]+))?"#)
        .expect("valid attribute regex")
});

/// 改写结果
#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    /// 改写后的文档
    pub html: String,
    /// 写入了 alt 的标签数
    pub patched_tags: usize,
    /// 没有出现在任何 `<img src>` 中的缓存名称
    pub unmatched: Vec<String>,
    /// 写入的是错误标记的名称
    pub failure_markers: Vec<String>,
}

/// 标签中的一个属性
struct Attr<'a> {
    name: &'a str,
    value: Option<&'a str>,
    span: Range<usize>,
}

/// 按出现顺序解析 `<img` 之后的属性；引号内的文本不会被当作属性
fn attrs(tag: &str) -> Vec<Attr<'_>> {
    const PREFIX: usize = "<img".len();
    ATTR.captures_iter(&tag[PREFIX..])
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str();
            let value = caps.get(2).map(|m| {
                let v = m.as_str();
                v.strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| v.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(v)
            });
            Some(Attr {
                name,
                value,
                span: PREFIX + whole.start()..PREFIX + whole.end(),
            })
        })
        .collect()
}

/// 转义 HTML 属性值
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn src_of(tag: &str) -> Option<&str> {
    attrs(tag)
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case("src"))
        .and_then(|a| a.value)
}

fn with_alt(tag: &str, description: &str) -> String {
    let alt = format!("alt=\"{}\"", escape_attr(description));
    match attrs(tag)
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case("alt"))
    {
        Some(a) => format!("{}{}{}", &tag[..a.span.start], alt, &tag[a.span.end..]),
        None => format!("{} {}{}", &tag[..4], alt, &tag[4..]),
    }
}

/// 按缓存内容改写文档
pub fn patch_html(html: &str, entries: &[CacheEntry]) -> PatchReport {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut failure_markers: Vec<String> = Vec::new();
    let mut patched_tags = 0usize;

    let patched = IMG_TAG.replace_all(html, |caps: &regex::Captures| {
        let tag = &caps[0];
        let Some(src) = src_of(tag) else {
            return tag.to_string();
        };

        let candidates: Vec<&CacheEntry> = entries
            .iter()
            .filter(|e| !e.name.is_empty() && src.contains(e.name.as_str()))
            .collect();
        seen.extend(candidates.iter().map(|&e| e.name.as_str()));

        let Some(entry) = candidates.into_iter().max_by_key(|e| e.name.len()) else {
            return tag.to_string();
        };

        if entry.is_failure() {
            debug!("Injecting failure marker for {}", entry.name);
            if !failure_markers.contains(&entry.name) {
                failure_markers.push(entry.name.clone());
            }
        }
        patched_tags += 1;
        with_alt(tag, &entry.description)
    });

    let unmatched: Vec<String> = entries
        .iter()
        .filter(|e| !seen.contains(e.name.as_str()))
        .map(|e| e.name.clone())
        .collect();

    info!(
        "HTML patched: {} tags updated, {} cached names unmatched",
        patched_tags,
        unmatched.len()
    );

    PatchReport {
        html: patched.into_owned(),
        patched_tags,
        unmatched,
        failure_markers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::BackendKind;
    use crate::error::DescribeError;

    fn ok(name: &str, description: &str) -> CacheEntry {
        CacheEntry::success(name, name, description, BackendKind::RemoteHosted)
    }

    #[test]
    fn test_patch_sets_alt_and_reports_unmatched() {
        let html = r#"<p><img src="images/cat.png"></p>"#;
        let entries = vec![ok("cat.png", "a cat on a sofa"), ok("dog.jpg", "a dog")];

        let report = patch_html(html, &entries);
        assert_eq!(
            report.html,
            r#"<p><img alt="a cat on a sofa" src="images/cat.png"></p>"#
        );
        assert_eq!(report.patched_tags, 1);
        assert_eq!(report.unmatched, vec!["dog.jpg"]);
    }

    #[test]
    fn test_patch_replaces_existing_alt() {
        let html = r#"<IMG class='hero' alt='old' SRC='/static/cat.png' />"#;
        let report = patch_html(html, &[ok("cat.png", r#"a "fancy" cat & <friends>"#)]);
        assert_eq!(
            report.html,
            r#"<IMG class='hero' alt="a &quot;fancy&quot; cat &amp; &lt;friends&gt;" SRC='/static/cat.png' />"#
        );
        assert!(report.unmatched.is_empty());
    }

    #[test]
    fn test_longest_name_wins_shorter_still_matched() {
        let html = r#"<img src="/img/bobcat.png">"#;
        let report = patch_html(html, &[ok("cat.png", "cat"), ok("bobcat.png", "bobcat")]);
        assert_eq!(report.html, r#"<img alt="bobcat" src="/img/bobcat.png">"#);
        // cat.png 出现在 src 中，不算未匹配
        assert!(report.unmatched.is_empty());
    }

    #[test]
    fn test_failed_entries_inject_marker() {
        let err = DescribeError::unreachable("timeout");
        let failed =
            CacheEntry::failure("cat.png", "/cat.png", &err, BackendKind::LocalDaemon);
        let html = r#"<img src="cat.png"><img src="cat.png">"#;
        let report = patch_html(html, &[failed]);

        let expected = format!(r#"<img alt="{}" src="cat.png">"#, escape_attr(&err.marker()));
        assert_eq!(report.html, expected.repeat(2));
        assert_eq!(report.patched_tags, 2);
        assert_eq!(report.failure_markers, vec!["cat.png"]);
        assert!(report.unmatched.is_empty());
    }

    #[test]
    fn test_data_src_is_not_src() {
        let html = r#"<img data-src="cat.png">"#;
        let report = patch_html(html, &[ok("cat.png", "cat")]);
        assert_eq!(report.html, html);
        assert_eq!(report.unmatched, vec!["cat.png"]);
    }

    #[test]
    fn test_src_inside_other_attribute_value_is_ignored() {
        let html = r#"<img alt="see src=dog.png" src="cat.png">"#;
        let report = patch_html(html, &[ok("cat.png", "a cat"), ok("dog.png", "a dog")]);
        assert_eq!(report.html, r#"<img alt="a cat" src="cat.png">"#);
        assert_eq!(report.unmatched, vec!["dog.png"]);
    }

    #[test]
    fn test_alt_inside_other_attribute_value_is_ignored() {
        let html = r#"<img title="x alt=y" src="cat.png">"#;
        let report = patch_html(html, &[ok("cat.png", "a cat")]);
        assert_eq!(
            report.html,
            r#"<img alt="a cat" title="x alt=y" src="cat.png">"#
        );
    }

    #[test]
    fn test_valueless_alt_is_replaced_in_place() {
        let html = r#"<img alt src="cat.png">"#;
        let report = patch_html(html, &[ok("cat.png", "a cat")]);
        assert_eq!(report.html, r#"<img alt="a cat" src="cat.png">"#);
    }

    #[test]
    fn test_quoted_gt_does_not_end_tag() {
        let html = r#"<img title="a > b" src="cat.png">"#;
        let report = patch_html(html, &[ok("cat.png", "a cat")]);
        assert_eq!(
            report.html,
            r#"<img alt="a cat" title="a > b" src="cat.png">"#
        );
    }
}
