// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

//! Destination key templates.
//!
//! Placeholders: `{filename}` is the last key segment, `{dir[n]}` the
//! nth directory (0-based), `{key}` the whole source key. The rendered
//! key has consecutive slashes collapsed and leading slashes stripped;
//! a template that renders empty is an error.

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Filename,
    Dir(usize),
    Key,
}

/// A compiled destination template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template. Unknown or malformed placeholders fail here,
    /// not at apply time.
    pub fn new(template: &str) -> Result<PathTemplate> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            let mut placeholder = String::new();
            let mut closed = false;
            for p in chars.by_ref() {
                if p == '}' {
                    closed = true;
                    break;
                }
                placeholder.push(p);
            }
            if !closed {
                return Err(Error::Template {
                    reason: format!("unterminated placeholder in {template:?}"),
                });
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_placeholder(&placeholder, template)?);
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if segments.is_empty() {
            return Err(Error::Template {
                reason: "template is empty".to_owned(),
            });
        }
        Ok(PathTemplate { segments })
    }

    /// Render the destination key for one source key.
    pub fn apply(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('/').collect();
        let filename = parts.last().copied().unwrap_or_default();
        let dirs = &parts[..parts.len().saturating_sub(1)];

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Filename => out.push_str(filename),
                Segment::Key => out.push_str(key),
                Segment::Dir(n) => match dirs.get(*n) {
                    Some(dir) => out.push_str(dir),
                    None => {
                        return Err(Error::Template {
                            reason: format!(
                                "dir[{n}] out of range for key {key:?} ({} directories)",
                                dirs.len()
                            ),
                        });
                    }
                },
            }
        }

        let collapsed = collapse_slashes(&out);
        let rendered = collapsed.trim_start_matches('/');
        if rendered.is_empty() {
            return Err(Error::Template {
                reason: format!("template renders empty for key {key:?}"),
            });
        }
        Ok(rendered.to_owned())
    }
}

fn parse_placeholder(name: &str, template: &str) -> Result<Segment> {
    match name {
        "filename" => Ok(Segment::Filename),
        "key" => Ok(Segment::Key),
        _ => {
            if let Some(index) = name
                .strip_prefix("dir[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                let n: usize = index.parse().map_err(|_| Error::Template {
                    reason: format!("bad directory index {index:?} in {template:?}"),
                })?;
                Ok(Segment::Dir(n))
            } else {
                Err(Error::Template {
                    reason: format!("unknown placeholder {{{name}}} in {template:?}"),
                })
            }
        }
    }
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_slash = false;
    for c in s.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("archive/{key}", "data/sub/file.txt", "archive/data/sub/file.txt")]
    #[case("flat/{filename}", "data/sub/file.txt", "flat/file.txt")]
    #[case("{dir[0]}/{filename}", "data/sub/file.txt", "data/file.txt")]
    #[case("{dir[1]}/{filename}", "data/sub/file.txt", "sub/file.txt")]
    #[case("{key}", "file.txt", "file.txt")]
    #[case("a/{filename}.bak", "x/y", "a/y.bak")]
    fn renders(#[case] template: &str, #[case] key: &str, #[case] expected: &str) {
        let t = PathTemplate::new(template).unwrap();
        assert_eq!(t.apply(key).unwrap(), expected);
    }

    #[test]
    fn out_of_range_dir_is_an_error() {
        let t = PathTemplate::new("{dir[3]}/{filename}").unwrap();
        assert!(t.apply("data/file.txt").is_err());
    }

    #[test]
    fn slashes_collapsed_and_leading_stripped() {
        let t = PathTemplate::new("/mirror//{key}").unwrap();
        assert_eq!(t.apply("data/file.txt").unwrap(), "mirror/data/file.txt");
    }

    #[test]
    fn empty_render_is_an_error() {
        let t = PathTemplate::new("{filename}").unwrap();
        assert!(t.apply("data/").is_err());
    }

    #[rstest]
    #[case("{unknown}")]
    #[case("{dir[x]}")]
    #[case("{dir[0}")]
    #[case("{filename")]
    #[case("")]
    fn bad_templates_fail_construction(#[case] template: &str) {
        assert!(PathTemplate::new(template).is_err(), "{template:?}");
    }

    #[test]
    fn key_only_template_is_idempotent() {
        let t = PathTemplate::new("{key}").unwrap();
        let once = t.apply("data/file.txt").unwrap();
        let twice = t.apply(&once).unwrap();
        assert_eq!(once, twice);
    }
}
