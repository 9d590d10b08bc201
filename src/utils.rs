// ABOUTME: Small helpers shared across the snapshot engine
// ABOUTME: Identifier quoting, literal quoting and display sanitising

use std::time::Duration;

/// Strip control characters from a table or object name and cap it at 100
/// characters before it reaches a log line, event payload or dump comment.
///
/// Display only; SQL text always goes through [`quote_mysql_ident`].
///
/// ```
/// # use db_snapper::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("order_items"), "order_items");
/// assert_eq!(sanitize_identifier("orders\n-- DROP"), "orders-- DROP");
/// assert_eq!(sanitize_identifier(&"t".repeat(150)).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Backtick-quote a table, column or database name, doubling embedded backticks.
///
/// ```
/// use db_snapper::utils::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("order_items"), "`order_items`");
/// assert_eq!(quote_mysql_ident("odd`name"), "`odd``name`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' {
            quoted.push('`');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}

/// Quote a plain SQL string literal
///
/// Escapes single quotes and backslashes and wraps the string in single quotes.
/// Used for text the engine itself writes (progress messages, option values),
/// never for row data, which goes through the driver's quoting routine.
///
/// # Examples
///
/// ```
/// use db_snapper::utils::quote_literal;
/// assert_eq!(quote_literal("hello"), "'hello'");
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// assert_eq!(quote_literal(r"C:\dumps"), r"'C:\\dumps'");
/// assert_eq!(quote_literal(""), "''");
/// ```
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            '\n' | '\r' => quoted.push(' '),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}

/// Quote each column name and join them into a column list.
pub fn column_list<'a>(columns: impl IntoIterator<Item = &'a str>) -> String {
    columns
        .into_iter()
        .map(quote_mysql_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render an elapsed duration the way progress messages print it (`1.42s`).
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("normal_table"), "normal_table");
        assert_eq!(sanitize_identifier("table\x00name"), "tablename");
        assert_eq!(sanitize_identifier("table\nname"), "tablename");

        let long_name = "a".repeat(200);
        assert_eq!(sanitize_identifier(&long_name).len(), 100);
    }

    #[test]
    fn test_quote_mysql_ident() {
        assert_eq!(quote_mysql_ident("users"), "`users`");
        assert_eq!(quote_mysql_ident("order items"), "`order items`");
        assert_eq!(quote_mysql_ident("a`b"), "`a``b`");
    }

    #[test]
    fn test_quote_literal_flattens_newlines() {
        assert_eq!(quote_literal("line1\nline2"), "'line1 line2'");
    }

    #[test]
    fn test_column_list() {
        assert_eq!(column_list(["id", "name"]), "`id`, `name`");
        assert_eq!(column_list(Vec::<&str>::new()), "");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(1420)), "1.42s");
        assert_eq!(format_elapsed(Duration::ZERO), "0.00s");
    }
}
