//! String assignment scanner for the MCP server script
//!
//! Recognizes exactly one statement form:
//!
//! ```text
//! [const|let|var|this.]IDENT <ws>* = <ws>* QUOTE literal QUOTE
//! ```
//!
//! where QUOTE is `'`, `"` or a backtick and the literal contains no quote
//! characters or newlines. Template literals with `${}` interpolation are not
//! literals. Occurrences on a `//` comment line are ignored.

/// A located string-literal assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub value: String,
    pub quote: char,
    /// Byte range of the literal contents (quotes excluded)
    pub value_start: usize,
    pub value_end: usize,
}

/// Outcome of a lookup. Not finding the statement is an ordinary answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Assignment),
    NotFound,
}

impl Lookup {
    pub fn found(self) -> Option<Assignment> {
        match self {
            Lookup::Found(a) => Some(a),
            Lookup::NotFound => None,
        }
    }
}

const QUOTES: [char; 3] = ['\'', '"', '`'];

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Find the first string assignment to `ident`.
pub fn find_assignment(source: &str, ident: &str) -> Lookup {
    if ident.is_empty() {
        return Lookup::NotFound;
    }

    let mut search_from = 0;
    while let Some(rel) = source[search_from..].find(ident) {
        let start = search_from + rel;
        let after_ident = start + ident.len();
        search_from = after_ident;

        let preceded_ok = source[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_ident_char(c));
        let followed_ok = source[after_ident..]
            .chars()
            .next()
            .is_none_or(|c| !is_ident_char(c));
        if !preceded_ok || !followed_ok || in_line_comment(source, start) {
            continue;
        }

        if let Some(assignment) = parse_rhs(source, after_ident) {
            return Lookup::Found(assignment);
        }
    }
    Lookup::NotFound
}

/// A `//` before `pos` on the same line that is not inside a string literal.
fn in_line_comment(source: &str, pos: usize) -> bool {
    let line_start = source[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut open: Option<char> = None;
    let mut chars = source[line_start..pos].chars().peekable();
    while let Some(c) = chars.next() {
        match open {
            Some(_) if c == '\\' => {
                chars.next();
            }
            Some(q) if c == q => open = None,
            Some(_) => {}
            None if QUOTES.contains(&c) => open = Some(c),
            None if c == '/' && chars.peek() == Some(&'/') => return true,
            None => {}
        }
    }
    false
}

/// Parse `<ws>* = <ws>* QUOTE literal QUOTE` starting right after the name.
fn parse_rhs(source: &str, pos: usize) -> Option<Assignment> {
    let rest = &source[pos..];
    let trimmed = rest.trim_start_matches([' ', '\t']);
    let mut offset = pos + (rest.len() - trimmed.len());

    let after_eq = trimmed.strip_prefix('=')?;
    if after_eq.starts_with('=') || after_eq.starts_with('>') {
        return None;
    }
    offset += 1;

    let value_part = after_eq.trim_start_matches([' ', '\t']);
    offset += after_eq.len() - value_part.len();

    let quote = value_part.chars().next().filter(|c| QUOTES.contains(c))?;
    let body = &value_part[quote.len_utf8()..];
    let value_start = offset + quote.len_utf8();

    let end = body.find(|c: char| QUOTES.contains(&c) || c == '\n')?;
    if end == 0 || !body[end..].starts_with(quote) {
        return None;
    }
    if quote == '`' && body[..end].contains("${") {
        return None;
    }

    Some(Assignment {
        value: body[..end].to_string(),
        quote,
        value_start,
        value_end: value_start + end,
    })
}

/// Replace the literal contents of `assignment`, keeping the original quotes.
pub fn replace_value(source: &str, assignment: &Assignment, new_value: &str) -> String {
    let escaped = new_value.replace(assignment.quote, &format!("\\{}", assignment.quote));
    let mut out = String::with_capacity(source.len() + escaped.len());
    out.push_str(&source[..assignment.value_start]);
    out.push_str(&escaped);
    out.push_str(&source[assignment.value_end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_const_assignment() {
        let src = "  const webhookUrl = 'http://localhost:5678/webhook-test/compile-video';\n";
        let found = find_assignment(src, "webhookUrl").found().unwrap();
        assert_eq!(found.value, "http://localhost:5678/webhook-test/compile-video");
        assert_eq!(found.quote, '\'');
        assert_eq!(&src[found.value_start..found.value_end], found.value);
    }

    #[test]
    fn test_finds_member_and_backtick_assignment() {
        let src = "this.webhookUrl=`http://a/hook`;";
        let found = find_assignment(src, "webhookUrl").found().unwrap();
        assert_eq!(found.value, "http://a/hook");
        assert_eq!(found.quote, '`');
    }

    #[test]
    fn test_skips_comparisons_prefixes_and_comments() {
        let src = r#"
// webhookUrl = 'http://commented/out'
if (webhookUrl === 'x') {}
const myWebhookUrl = 'http://not/it';
const webhookUrl = "http://real/one";
"#;
        let found = find_assignment(src, "webhookUrl").found().unwrap();
        assert_eq!(found.value, "http://real/one");
    }

    #[test]
    fn test_url_earlier_on_the_line_is_not_a_comment() {
        let src = "const a = 'http://x', webhookUrl = 'http://y';\n";
        let found = find_assignment(src, "webhookUrl").found().unwrap();
        assert_eq!(found.value, "http://y");

        let trailing = "const a = 'http://x'; // webhookUrl = 'http://z'\n";
        assert_eq!(find_assignment(trailing, "webhookUrl"), Lookup::NotFound);
    }

    #[test]
    fn test_non_literal_is_not_found() {
        let src = "const webhookUrl = `${base}/webhook`;\nconst webhookUrl2 = buildUrl();";
        assert_eq!(find_assignment(src, "webhookUrl"), Lookup::NotFound);
        assert_eq!(find_assignment("", "webhookUrl"), Lookup::NotFound);
    }

    #[test]
    fn test_replace_only_touches_the_literal() {
        let src = "const a = 1;\nconst webhookUrl = 'http://old';\nconst b = 2;\n";
        let found = find_assignment(src, "webhookUrl").found().unwrap();
        let out = replace_value(src, &found, "http://new/webhook/compile-video");
        assert_eq!(
            out,
            "const a = 1;\nconst webhookUrl = 'http://new/webhook/compile-video';\nconst b = 2;\n"
        );
    }
}
