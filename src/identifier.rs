//! SQL identifier quoting.
//!
//! An identifier is wrapped in backticks when it is a reserved word
//! (checked case-insensitively) or contains anything outside
//! `[A-Za-z0-9_]`. Output always preserves the original casing.

const RESERVED_WORDS: &[&str] = &[
    "ACCESS", "ADD", "AFTER", "ALL", "ALTER", "ANALYZE", "AND", "AS", "ASC", "AVG",
    "BEFORE", "BEGIN", "BETWEEN", "BIGINT", "BINARY", "BIT", "BLOB", "BOOLEAN", "BOTH",
    "BREAK", "BY", "CALL", "CASCADE", "CASE", "CAST", "CHAR", "CHARACTER", "CHECK", "CLOB",
    "COLLATE", "COLUMN", "COMMENT", "COMMIT", "CONDITION", "CONNECT", "CONSTRAINT",
    "CONTINUE", "CONVERT", "COUNT", "CREATE", "CROSS", "CURRENT", "CURRENT_DATE",
    "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURSOR", "DATABASE", "DATE", "DAY", "DEC",
    "DECIMAL", "DECLARE", "DEFAULT", "DELETE", "DESC", "DESCRIBE", "DISTINCT", "DO",
    "DOUBLE", "DROP", "EACH", "ELSE", "ELSEIF", "END", "ESCAPE", "EXCEPT", "EXEC",
    "EXECUTE", "EXISTS", "EXIT", "EXPLAIN", "EXTEND", "EXTERNAL", "FALSE", "FETCH",
    "FILTER", "FLOAT", "FOR", "FOREIGN", "FROM", "FULL", "FUNCTION", "GENERATED", "GLOBAL",
    "GRANT", "GROUP", "HAVING", "HOLD", "HOUR", "IDENTIFIED", "IF", "IGNORE", "ILIKE", "IN",
    "INDEX", "INNER", "INOUT", "INSENSITIVE", "INSERT", "INT", "INTEGER", "INTERSECT",
    "INTERVAL", "INTO", "IS", "ITERATE", "JOIN", "KEY", "LANGUAGE", "LEADING", "LEAVE",
    "LEFT", "LIKE", "LIMIT", "LOCAL", "LOCALTIME", "LOCALTIMESTAMP", "LOCK", "LOOP", "MATCH",
    "MAX", "MERGE", "MIN", "MINUTE", "MODIFIES", "MODULE", "MONTH", "NATURAL", "NCHAR",
    "NEW", "NO", "NOT", "NULL", "NUMERIC", "OF", "OFFSET", "OLD", "ON", "ONLY", "OPEN", "OR",
    "ORDER", "OUT", "OUTER", "OVER", "PARTITION", "PERCENT", "PLACING", "POSITION",
    "PRECISION", "PRIMARY", "PROCEDURE", "RANGE", "READS", "REAL", "RECURSIVE",
    "REFERENCES", "REGEXP", "RELEASE", "RENAME", "REPEAT", "REPLACE", "RESIGNAL",
    "RESTRICT", "RETURN", "REVOKE", "RIGHT", "RLIKE", "ROLE", "ROLLBACK", "ROW", "ROWNUM",
    "ROWS", "SAVEPOINT", "SCHEMA", "SELECT", "SENSITIVE", "SESSION", "SET", "SIGNAL",
    "SMALLINT", "SOME", "SPECIFIC", "SQL", "SQLEXCEPTION", "SQLSTATE", "SQLWARNING",
    "START", "STATIC", "SUBSTRING", "SUM", "SYSDATE", "TABLE", "TERMINATED", "THEN", "TIME",
    "TIMESTAMP", "TO", "TOP", "TRAILING", "TRIGGER", "TRUE", "UNDO", "UNION", "UNIQUE",
    "UNKNOWN", "UNLOCK", "UPDATE", "USAGE", "USER", "USING", "VALUE", "VALUES", "VARCHAR",
    "VARYING", "VIEW", "WHEN", "WHERE", "WHILE", "WITH", "WITHIN", "YEAR", "ZONE",
];

/// Whether `identifier` must be backtick-quoted.
pub fn needs_quoting(identifier: &str) -> bool {
    let upper = identifier.to_uppercase();
    if RESERVED_WORDS.binary_search(&upper.as_str()).is_ok() {
        return true;
    }
    identifier
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '_'))
}

/// Render `identifier`, quoting it only when [`needs_quoting`] says so.
pub fn format_identifier(identifier: &str) -> String {
    if needs_quoting(identifier) {
        format!("`{}`", identifier)
    } else {
        identifier.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_words_sorted_and_unique() {
        // binary_search relies on this ordering
        for pair in RESERVED_WORDS.windows(2) {
            assert!(pair[0] < pair[1], "{} >= {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_reserved_word_is_quoted() {
        assert_eq!(format_identifier("SELECT"), "`SELECT`");
        assert_eq!(format_identifier("order"), "`order`");
        assert_eq!(format_identifier("Date"), "`Date`");
    }

    #[test]
    fn test_plain_identifier_unchanged() {
        assert_eq!(format_identifier("user_id"), "user_id");
        assert_eq!(format_identifier("Customer2"), "Customer2");
        assert!(!needs_quoting("_private"));
    }

    #[test]
    fn test_special_characters_are_quoted() {
        assert_eq!(format_identifier("first name"), "`first name`");
        assert_eq!(format_identifier("rate(%)"), "`rate(%)`");
        assert_eq!(format_identifier("café"), "`café`");
        assert!(needs_quoting("a-b"));
    }
}
