//! Lexical SQL statement classification.
//!
//! Statements are classified by keyword prefix rather than parsed. Inputs
//! are single top-level statements and callers only need a read/write split
//! plus an audit label, so a tokenizer-level view is enough. Table
//! references are pulled out with regular expressions for pre-validation
//! against the engine catalog.
//!
//! Callers depend on [`StatementClassifier`] so a real parser can replace
//! [`LexicalClassifier`] without touching them.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::query::OperationKind;

/// Classification seam used by the executor and the approval workflow.
pub trait StatementClassifier: Send + Sync {
    /// Classifies a statement. Total and deterministic for every input.
    fn classify(&self, sql: &str) -> OperationKind;

    /// Tables the statement reads or writes that must already exist.
    fn referenced_tables(&self, sql: &str) -> Vec<TableRef>;

    /// Returns false when the input holds more than one statement.
    fn is_single_statement(&self, sql: &str) -> bool;
}

/// A table referenced by a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(unquote),
            name: unquote(name),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Keyword-prefix classifier backed by regular expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalClassifier;

/// Classifies with the default lexical classifier.
pub fn classify_sql(sql: &str) -> OperationKind {
    LexicalClassifier.classify(sql)
}

const IDENT: &str = r#"(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][\w$]*)"#;

/// FROM/JOIN/INTO/TABLE followed by a possibly schema-qualified identifier.
static TABLE_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(FROM|JOIN|INTO|TABLE)\s+(IF\s+(?:NOT\s+)?EXISTS\s+)?(?:ONLY\s+)?({IDENT})(?:\s*\.\s*({IDENT}))?"
    ))
    .expect("table source pattern")
});

/// Further entries of a comma-separated FROM list.
static FROM_LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\A(?:\s+(?:AS\s+)?[A-Za-z_][\w$]*)?\s*,\s*({IDENT})(?:\s*\.\s*({IDENT}))?"
    ))
    .expect("from list pattern")
});

static UPDATE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\A\s*UPDATE\s+(?:ONLY\s+|LOW_PRIORITY\s+|IGNORE\s+)*({IDENT})(?:\s*\.\s*({IDENT}))?"
    ))
    .expect("update target pattern")
});

static CTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\bWITH\s+(?:RECURSIVE\s+)?|,\s*)([A-Za-z_][\w$]*)\s*(?:\([^()]*\)\s*)?AS\s*(?:NOT\s+)?(?:MATERIALIZED\s+)?\(",
    )
    .expect("cte pattern")
});

/// `FROM` used as an argument separator inside these functions.
static FUNCTION_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:EXTRACT|TRIM|SUBSTRING|SUBSTR|POSITION|OVERLAY)\s*\([^()]*\z")
        .expect("function from pattern")
});

static DISTINCT_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDISTINCT\s*\z").expect("distinct from pattern"));

static CREATE_TABLE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bCREATE(?:\s+OR\s+REPLACE)?(?:\s+(?:GLOBAL|LOCAL|TEMP|TEMPORARY|UNLOGGED))*\s*\z")
        .expect("create table pattern")
});

static CTE_DML: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INSERT\s+INTO|UPDATE\s+\S+\s+SET|DELETE\s+FROM)\b").expect("cte dml pattern")
});

/// Statements that change state without being DDL or DML on a table.
const OTHER_WRITE_PREFIXES: &[&str] = &[
    // transaction control
    "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "END", "ABORT",
    // privileges
    "GRANT", "REVOKE",
    // remaining write forms
    "TRUNCATE", "RENAME", "REPLACE", "MERGE", "UPSERT", "COPY", "CALL", "LOCK", "UNLOCK", "SET",
    "LOAD", "DO", "CREATE", "DROP",
];

impl StatementClassifier for LexicalClassifier {
    fn classify(&self, sql: &str) -> OperationKind {
        let text = scrub(sql, false).to_uppercase();
        let mut words = text
            .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
            .filter(|w| !w.is_empty());
        let first = words.next().unwrap_or("");
        let rest: Vec<&str> = words.take(6).collect();

        // EXPLAIN ANALYZE runs the statement it explains
        if first == "EXPLAIN" {
            return match explain_target(&text) {
                Some((true, inner)) => self.classify(inner),
                _ => OperationKind::Select,
            };
        }

        // DDL
        match first {
            "CREATE" if object_is_table(&rest) => return OperationKind::CreateTable,
            "DROP" if object_is_table(&rest) => return OperationKind::DropTable,
            "ALTER" if object_is_table(&rest) => return OperationKind::AlterTable,
            "ALTER" => return OperationKind::OtherWrite,
            _ => {}
        }

        // DML
        match first {
            "INSERT" => return OperationKind::Insert,
            "UPDATE" => return OperationKind::Update,
            "DELETE" => return OperationKind::Delete,
            "WITH" => {
                let scrubbed = scrub(sql, true);
                if let Some(m) = CTE_DML.captures(&scrubbed).and_then(|c| c.get(1)) {
                    let head = m.as_str().to_uppercase();
                    return if head.starts_with("INSERT") {
                        OperationKind::Insert
                    } else if head.starts_with("UPDATE") {
                        OperationKind::Update
                    } else {
                        OperationKind::Delete
                    };
                }
            }
            _ => {}
        }

        // transaction control, privileges, other writes
        if OTHER_WRITE_PREFIXES.contains(&first) {
            return OperationKind::OtherWrite;
        }

        OperationKind::Select
    }

    fn referenced_tables(&self, sql: &str) -> Vec<TableRef> {
        let text = scrub(sql, true);
        let ctes: HashSet<String> = CTE_NAME
            .captures_iter(&text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .collect();

        let mut found: Vec<(usize, TableRef)> = Vec::new();

        if let Some(c) = UPDATE_TARGET.captures(&text) {
            if let Some(r) = table_from_captures(&c, 1) {
                found.push((c.get(0).map_or(0, |m| m.start()), r));
            }
        }

        for caps in TABLE_SOURCE.captures_iter(&text) {
            let Some(whole) = caps.get(0) else { continue };
            let keyword = caps.get(1).map_or("", |m| m.as_str()).to_uppercase();
            let prefix = &text[..whole.start()];
            let suffix = &text[whole.end()..];

            match keyword.as_str() {
                "FROM" if FUNCTION_FROM.is_match(prefix) || DISTINCT_FROM.is_match(prefix) => {
                    continue
                }
                "TABLE" if caps.get(2).is_some() || CREATE_TABLE_PREFIX.is_match(prefix) => {
                    continue
                }
                "INTO" if caps.get(2).is_some() => continue,
                _ => {}
            }
            if matches!(keyword.as_str(), "FROM" | "JOIN") && next_is_paren(suffix) {
                continue;
            }
            let Some(table) = table_from_captures(&caps, 3) else { continue };
            if keyword == "INTO" && is_file_target(&table.name) {
                continue;
            }
            found.push((whole.start(), table));

            if keyword == "FROM" {
                let mut rest = suffix;
                let mut offset = whole.end();
                while let Some(item) = FROM_LIST_ITEM.captures(rest) {
                    let Some(m) = item.get(0) else { break };
                    let after = &rest[m.end()..];
                    if !next_is_paren(after) {
                        if let Some(t) = table_from_captures(&item, 1) {
                            found.push((offset + m.start(), t));
                        }
                    }
                    offset += m.end();
                    rest = after;
                }
            }
        }

        found.sort_by_key(|(pos, _)| *pos);
        let mut seen = HashSet::new();
        found
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| t.schema.is_some() || !ctes.contains(&t.name.to_lowercase()))
            .filter(|t| seen.insert(t.to_string().to_lowercase()))
            .collect()
    }

    fn is_single_statement(&self, sql: &str) -> bool {
        scrub(sql, true)
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .count()
            <= 1
    }
}

/// True when the DDL object after CREATE/DROP is a table.
fn object_is_table(rest: &[&str]) -> bool {
    rest.iter()
        .skip_while(|w| {
            matches!(
                **w,
                "OR" | "REPLACE" | "GLOBAL" | "LOCAL" | "TEMP" | "TEMPORARY" | "UNLOGGED"
            )
        })
        .next()
        .is_some_and(|w| *w == "TABLE")
}

fn table_from_captures(caps: &regex::Captures<'_>, first: usize) -> Option<TableRef> {
    let a = caps.get(first)?.as_str();
    Some(match caps.get(first + 1) {
        Some(b) => TableRef::new(Some(a), b.as_str()),
        None => TableRef::new(None, a),
    })
}

fn next_is_paren(s: &str) -> bool {
    s.trim_start().starts_with('(')
}

fn is_file_target(name: &str) -> bool {
    name.eq_ignore_ascii_case("OUTFILE") || name.eq_ignore_ascii_case("DUMPFILE")
}

fn unquote(ident: &str) -> String {
    let trimmed = ident.trim();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('`').and_then(|s| s.strip_suffix('`')))
        .or_else(|| trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')))
        .unwrap_or(trimmed);
    inner.to_string()
}

/// Removes comments and, when `blank_literals` is set, empties string
/// literals (single-quoted and dollar-quoted). Quoted identifiers are kept.
/// Splits uppercased `EXPLAIN [options] <statement>` into whether the
/// statement is executed and the statement itself.
fn explain_target(text: &str) -> Option<(bool, &str)> {
    let rest = text.trim_start().strip_prefix("EXPLAIN")?;
    if !rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
        return None;
    }
    let mut rest = rest.trim_start();
    let mut analyze = false;

    // PostgreSQL option list: EXPLAIN (ANALYZE, BUFFERS) ...
    if let Some(inner) = rest.strip_prefix('(') {
        let close = inner.find(')')?;
        analyze = inner[..close].split(',').any(|option| {
            let mut parts = option.split_whitespace();
            matches!(parts.next(), Some("ANALYZE" | "ANALYSE"))
                && !matches!(parts.next(), Some("FALSE" | "OFF" | "0"))
        });
        rest = inner[close + 1..].trim_start();
    }

    loop {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        match &rest[..end] {
            "ANALYZE" | "ANALYSE" => analyze = true,
            "VERBOSE" | "EXTENDED" | "PARTITIONS" => {}
            word if word.starts_with("FORMAT=") => {}
            _ => break,
        }
        rest = rest[end..].trim_start();
    }
    Some((analyze, rest))
}

fn scrub(sql: &str, blank_literals: bool) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                for (_, c) in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            '\'' | '"' | '`' => {
                let quote = c;
                let keep = !(blank_literals && quote == '\'');
                out.push(quote);
                while let Some((_, c)) = chars.next() {
                    if c == '\\' && quote == '\'' {
                        if let Some((_, escaped)) = chars.next() {
                            if keep {
                                out.push(c);
                                out.push(escaped);
                            }
                        }
                        continue;
                    }
                    if c == quote {
                        if matches!(chars.peek(), Some((_, n)) if *n == quote) {
                            chars.next();
                            if keep {
                                out.push(c);
                                out.push(c);
                            }
                            continue;
                        }
                        break;
                    }
                    if keep {
                        out.push(c);
                    }
                }
                out.push(quote);
            }
            '$' => match dollar_tag(&sql[i..]) {
                Some(tag) => {
                    let body = i + tag.len();
                    let stop = sql[body..]
                        .find(tag)
                        .map_or(sql.len(), |end| body + end + tag.len());
                    if blank_literals {
                        out.push_str("''");
                    } else {
                        out.push_str(&sql[i..stop]);
                    }
                    while matches!(chars.peek(), Some((j, _)) if *j < stop) {
                        chars.next();
                    }
                }
                None => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

/// Returns the `$tag$` opening a dollar-quoted string, if `s` starts with one.
fn dollar_tag(s: &str) -> Option<&str> {
    let close = s[1..].find('$')? + 1;
    let tag = &s[1..close];
    let valid = tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !tag.starts_with(|c: char| c.is_ascii_digit());
    valid.then(|| &s[..=close])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(sql: &str) -> Vec<String> {
        LexicalClassifier
            .referenced_tables(sql)
            .into_iter()
            .map(|t| t.to_string())
            .collect()
    }

    #[test]
    fn test_classify_basic_forms() {
        assert_eq!(classify_sql("SELECT * FROM x"), OperationKind::Select);
        assert_eq!(classify_sql("DELETE FROM x WHERE id=1"), OperationKind::Delete);
        assert_eq!(classify_sql("BEGIN"), OperationKind::OtherWrite);
        assert_eq!(classify_sql("insert into t values (1)"), OperationKind::Insert);
        assert_eq!(classify_sql("  update t set a = 1"), OperationKind::Update);
    }

    #[test]
    fn test_classify_ddl() {
        assert_eq!(classify_sql("CREATE TABLE t (id int)"), OperationKind::CreateTable);
        assert_eq!(
            classify_sql("create temporary table t (id int)"),
            OperationKind::CreateTable
        );
        assert_eq!(classify_sql("DROP TABLE IF EXISTS t"), OperationKind::DropTable);
        assert_eq!(classify_sql("ALTER TABLE t ADD c int"), OperationKind::AlterTable);
        assert_eq!(classify_sql("CREATE INDEX i ON t (c)"), OperationKind::OtherWrite);
        assert_eq!(classify_sql("ALTER USER bob"), OperationKind::OtherWrite);
    }

    #[test]
    fn test_classify_transaction_and_privilege_statements() {
        for sql in ["COMMIT", "rollback", "START TRANSACTION", "GRANT SELECT ON t TO u", "REVOKE ALL ON t FROM u", "TRUNCATE t"] {
            assert_eq!(classify_sql(sql), OperationKind::OtherWrite, "{sql}");
        }
    }

    #[test]
    fn test_classify_skips_comments() {
        assert_eq!(
            classify_sql("-- cleanup\n/* old rows */ DELETE FROM logs"),
            OperationKind::Delete
        );
        assert_eq!(classify_sql("/* DELETE */ SELECT 1"), OperationKind::Select);
    }

    #[test]
    fn test_classify_unrecognized_defaults_to_select() {
        assert_eq!(classify_sql(""), OperationKind::Select);
        assert_eq!(classify_sql("SHOW TABLES"), OperationKind::Select);
        assert_eq!(classify_sql("EXPLAIN SELECT 1"), OperationKind::Select);
        assert_eq!(classify_sql("???"), OperationKind::Select);
    }

    #[test]
    fn test_classify_explain_analyze_as_explained_statement() {
        assert_eq!(classify_sql("EXPLAIN ANALYZE DELETE FROM accounts"), OperationKind::Delete);
        assert_eq!(
            classify_sql("explain analyze verbose update t set a = 1"),
            OperationKind::Update
        );
        assert_eq!(
            classify_sql("EXPLAIN (ANALYZE, BUFFERS) INSERT INTO t VALUES (1)"),
            OperationKind::Insert
        );
        assert_eq!(
            classify_sql("EXPLAIN (ANALYZE false) DELETE FROM t"),
            OperationKind::Select
        );
        assert_eq!(classify_sql("EXPLAIN DELETE FROM t"), OperationKind::Select);
        assert_eq!(classify_sql("EXPLAIN ANALYZE SELECT * FROM t"), OperationKind::Select);
    }

    #[test]
    fn test_classify_data_modifying_cte() {
        assert_eq!(
            classify_sql("WITH gone AS (DELETE FROM t WHERE id = 1 RETURNING *) SELECT * FROM gone"),
            OperationKind::Delete
        );
        assert_eq!(
            classify_sql("WITH r AS (SELECT 1) SELECT * FROM r"),
            OperationKind::Select
        );
    }

    #[test]
    fn test_classify_is_deterministic() {
        let sql = "UPDATE accounts SET balance = balance + 10 WHERE id = 1";
        assert_eq!(classify_sql(sql), classify_sql(sql));
    }

    #[test]
    fn test_tables_from_joins_and_subqueries() {
        assert_eq!(
            names("SELECT * FROM users u JOIN orders o ON o.uid = u.id WHERE u.id IN (SELECT uid FROM vip)"),
            vec!["users", "orders", "vip"]
        );
    }

    #[test]
    fn test_tables_quoted_and_qualified() {
        assert_eq!(
            names("SELECT * FROM \"Order Items\" JOIN `shop`.`carts` ON 1=1"),
            vec!["Order Items", "shop.carts"]
        );
        assert_eq!(names("select * from public.users"), vec!["public.users"]);
    }

    #[test]
    fn test_tables_for_writes() {
        assert_eq!(names("INSERT INTO audit (a) VALUES (1)"), vec!["audit"]);
        assert_eq!(names("UPDATE accounts SET balance = 1"), vec!["accounts"]);
        assert_eq!(names("DELETE FROM sessions WHERE id = 2"), vec!["sessions"]);
        assert_eq!(names("ALTER TABLE items ADD COLUMN c int"), vec!["items"]);
        assert_eq!(names("DROP TABLE items"), vec!["items"]);
    }

    #[test]
    fn test_tables_skip_new_and_optional_targets() {
        assert!(names("CREATE TABLE fresh (id int)").is_empty());
        assert!(names("DROP TABLE IF EXISTS maybe").is_empty());
        assert_eq!(
            names("CREATE TABLE copy AS SELECT * FROM source"),
            vec!["source"]
        );
    }

    #[test]
    fn test_tables_ignore_function_from_and_literals() {
        assert_eq!(
            names("SELECT EXTRACT(YEAR FROM created_at), 'from nowhere' FROM events"),
            vec!["events"]
        );
        assert!(names("SELECT * FROM generate_series(1, 3)").is_empty());
        assert_eq!(
            names("SELECT a IS DISTINCT FROM b FROM pairs"),
            vec!["pairs"]
        );
    }

    #[test]
    fn test_tables_exclude_cte_names_and_dedupe() {
        assert_eq!(
            names("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent JOIN ORDERS o ON true"),
            vec!["orders"]
        );
    }

    #[test]
    fn test_tables_comma_separated_from_list() {
        assert_eq!(
            names("SELECT * FROM users u, orders o WHERE u.id = o.uid"),
            vec!["users", "orders"]
        );
        assert_eq!(names("SELECT * FROM t WHERE x IN (1, 2)"), vec!["t"]);
    }

    #[test]
    fn test_single_statement_guard() {
        let c = LexicalClassifier;
        assert!(c.is_single_statement("SELECT 1;"));
        assert!(c.is_single_statement("SELECT ';' AS semi"));
        assert!(c.is_single_statement("SELECT 1 -- ; DROP TABLE x"));
        assert!(c.is_single_statement("DO $$ BEGIN PERFORM 1; END $$"));
        assert!(!c.is_single_statement("SELECT 1; DROP TABLE users"));
    }
}
