// ABOUTME: Rewrites create statements so they replay on any server
// ABOUTME: Definer stripping, drop-before-create and delimiter wrapping for routines

use std::sync::OnceLock;

use regex::Regex;

use crate::source::ObjectKind;
use crate::utils::quote_mysql_ident;

/// Portable replacement for an engine-specific definer clause.
pub const CURRENT_USER_DEFINER: &str = "DEFINER=CURRENT_USER";

/// Delimiter used around trigger and routine bodies.
pub const ROUTINE_DELIMITER: &str = ";;";

fn definer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // user and host may each be backtick-quoted, single-quoted or bare
        Regex::new(
            r"(?i)DEFINER\s*=\s*(?:`(?:[^`]|``)*`|'(?:[^']|'')*'|[^\s@]+)@(?:`(?:[^`]|``)*`|'(?:[^']|'')*'|\S+)",
        )
        .expect("definer pattern is valid")
    })
}

/// Replace every `DEFINER=user@host` clause with `DEFINER=CURRENT_USER`.
///
/// `SQL SECURITY DEFINER` is left alone.
///
/// # Examples
///
/// ```
/// use db_snapper::ddl::strip_definer;
/// assert_eq!(
///     strip_definer("CREATE DEFINER=`root`@`%` TRIGGER `t` BEFORE INSERT ON `users`"),
///     "CREATE DEFINER=CURRENT_USER TRIGGER `t` BEFORE INSERT ON `users`"
/// );
/// ```
pub fn strip_definer(ddl: &str) -> String {
    definer_pattern()
        .replace_all(ddl, CURRENT_USER_DEFINER)
        .into_owned()
}

/// `DROP <KIND> IF EXISTS `name`;`
pub fn drop_statement(kind: ObjectKind, name: &str) -> String {
    format!("DROP {} IF EXISTS {};", kind.keyword(), quote_mysql_ident(name))
}

/// Terminate a create statement, wrapping trigger/routine bodies in a
/// delimiter change since they contain `;` themselves.
pub fn terminate(kind: ObjectKind, ddl: &str) -> String {
    let body = ddl.trim().trim_end_matches(';').trim_end();
    if kind.is_routine() {
        format!(
            "DELIMITER {delim}\n{body}{delim}\nDELIMITER ;",
            delim = ROUTINE_DELIMITER,
            body = body
        )
    } else {
        format!("{};", body)
    }
}

/// Full replayable block for one object: drop, then the portable create.
///
/// Only views and routines carry a definer; table DDL is emitted unchanged.
pub fn render(kind: ObjectKind, name: &str, ddl: &str) -> String {
    let create = match kind {
        ObjectKind::Table => ddl.to_string(),
        _ => strip_definer(ddl),
    };
    format!("{}\n{}", drop_statement(kind, name), terminate(kind, &create))
}
