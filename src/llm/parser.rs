//! Extraction of SQL from generator replies.
//!
//! Generators answer in markdown. The first fenced block tagged `sql` (or
//! `postgresql`/`postgres`) is taken as the query; failing that, the first
//! untagged block. Blocks tagged with any other language are ignored.

/// A generator reply split into prose and SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorReply {
    /// Text outside the chosen code block.
    pub text: String,
    /// Extracted SQL query, if found.
    pub sql: Option<String>,
}

impl GeneratorReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sql: None,
        }
    }

    pub fn with_sql(text: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sql: Some(sql.into()),
        }
    }
}

const SQL_TAGS: &[&str] = &["sql", "postgresql", "postgres", "psql"];

/// One fenced block: byte span of the whole fence, its tag and its body.
struct Fence<'a> {
    start: usize,
    end: usize,
    tag: &'a str,
    body: &'a str,
}

/// Scans `text` for complete ``` fences, in order.
fn fences(text: &str) -> Vec<Fence<'_>> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(open) = text[cursor..].find("```").map(|i| cursor + i) {
        let after_open = open + 3;
        let Some(line_end) = text[after_open..].find('\n').map(|i| after_open + i) else {
            break;
        };
        let body_start = line_end + 1;
        let Some(close) = text[body_start..].find("```").map(|i| body_start + i) else {
            break;
        };

        found.push(Fence {
            start: open,
            end: close + 3,
            tag: text[after_open..line_end].trim(),
            body: &text[body_start..close],
        });
        cursor = close + 3;
    }

    found
}

/// Splits a generator reply into explanatory text and SQL.
pub fn extract_sql(reply: &str) -> GeneratorReply {
    let blocks = fences(reply);

    let chosen = blocks
        .iter()
        .find(|fence| SQL_TAGS.contains(&fence.tag.to_lowercase().as_str()))
        .or_else(|| blocks.iter().find(|fence| fence.tag.is_empty()));

    match chosen {
        Some(fence) if !fence.body.trim().is_empty() => {
            let before = reply[..fence.start].trim_end();
            let after = reply[fence.end..].trim_start();
            let text = match (before.is_empty(), after.is_empty()) {
                (false, false) => format!("{}\n\n{}", before, after),
                _ => format!("{}{}", before, after),
            };
            GeneratorReply::with_sql(text.trim(), fence.body.trim())
        }
        _ => GeneratorReply::text_only(reply.trim()),
    }
}
