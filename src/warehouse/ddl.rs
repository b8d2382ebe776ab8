//! DDL script handling shared by every backend.
//!
//! DDL files are externally owned text. They are split into statements here and each statement is
//! handed to the database verbatim.

/// Split a DDL script on `;` into trimmed, non-empty statements.
///
/// `--` line comments are removed. Quoted text (`'...'` literals and `"..."` identifiers) is copied
/// as is, so a `;` or `--` inside quotes neither ends the statement nor starts a comment. A doubled
/// quote (`'it''s'`) stays inside the literal.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                // Comment runs to the end of the line; the newline itself is kept.
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// First line of a statement, shortened for log messages.
pub fn summarize(statement: &str) -> String {
    let first = statement.lines().next().unwrap_or("").trim();
    if first.chars().count() > 60 {
        format!("{}...", first.chars().take(60).collect::<String>())
    } else {
        first.to_string()
    }
}
