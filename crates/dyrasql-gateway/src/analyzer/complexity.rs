//! Static query structure analysis
//!
//! Heuristic text analysis over normalized statements, with sqlparser used
//! for table extraction when the statement parses.

use regex::Regex;
use sqlparser::ast::visit_relations;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::LazyLock;
use tracing::debug;

static JOIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bjoin\b").expect("constant pattern"));

static AGGREGATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bgroup by\b|\bhaving\b|\b(count|sum|avg|min|max|approx_distinct|approx_percentile|array_agg|map_agg|stddev|variance|group_concat)\s*\(",
    )
    .expect("constant pattern")
});

static SUBQUERY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*select\b").expect("constant pattern"));

static WHERE_CLAUSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bwhere\b(.*?)(?:\bgroup by\b|\border by\b|\blimit\b|\bhaving\b|\bunion\b|\bwindow\b|$)")
        .expect("constant pattern")
});

static PREDICATE_SPLIT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:and|or)\b").expect("constant pattern"));

static IDENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""?([a-z_][a-z0-9_]*)"?"#).expect("constant pattern"));

static FALLBACK_TABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:from|join)\s+("?[a-z_][\w]*"?(?:\."?[a-z_][\w]*"?){0,2})"#)
        .expect("constant pattern")
});

static CTE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\bwith(?:\s+recursive)?|,)\s+([a-z_]\w*)\s+as\s*\(").expect("constant pattern")
});

static UNQUOTED_SCHEMA_TABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(from|join)(\s+)([a-z_][a-z0-9_]*)\.([a-z_][a-z0-9_]*)\b(\.?)")
        .expect("constant pattern")
});

static QUOTED_SCHEMA_TABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(from|join)(\s+)("\w+")\.("\w+")(\.?)"#).expect("constant pattern")
});

/// Catalog names that are never mistaken for a schema during qualification
pub const KNOWN_CATALOGS: &[&str] = &["iceberg", "hive", "mysql", "postgresql", "mongodb", "system"];

/// Words the fallback table regex can pick up that are not tables
const NON_TABLE_WORDS: &[&str] = &["unnest", "lateral", "table", "select", "values"];

/// Structure signals feeding the complexity factor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplexitySignals {
    pub joins: u32,
    pub has_aggregation: bool,
    pub subqueries: u32,
    pub has_partition_filter: bool,
    pub has_non_partition_filter: bool,
}

/// Extract structure signals from a normalized statement
pub fn extract_signals(normalized: &str, partition_columns: &[String]) -> ComplexitySignals {
    let joins = JOIN_REGEX.find_iter(normalized).count() as u32;
    let has_aggregation = AGGREGATION_REGEX.is_match(normalized);
    let subqueries = SUBQUERY_REGEX.find_iter(normalized).count() as u32;

    let mut has_partition_filter = false;
    let mut has_non_partition_filter = false;
    for clause in WHERE_CLAUSE_REGEX.captures_iter(normalized) {
        let Some(body) = clause.get(1) else { continue };
        for predicate in PREDICATE_SPLIT_REGEX.split(body.as_str()) {
            let idents = identifiers(predicate);
            // `between ? and ?` leaves a bare literal behind
            if idents.is_empty() {
                continue;
            }
            if idents.iter().any(|i| partition_columns.iter().any(|c| c == i)) {
                has_partition_filter = true;
            } else {
                has_non_partition_filter = true;
            }
        }
    }

    let signals = ComplexitySignals {
        joins,
        has_aggregation,
        subqueries,
        has_partition_filter,
        has_non_partition_filter,
    };
    debug!("complexity signals: {:?}", signals);
    signals
}

/// Identifier-like words of a predicate (bare, qualified or quoted)
fn identifiers(predicate: &str) -> Vec<&str> {
    IDENT_REGEX
        .captures_iter(predicate)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Tables referenced by the statement, lowercased, without CTE names.
///
/// Parses `raw` with sqlparser; when that fails, falls back to a FROM/JOIN
/// regex over the normalized text.
pub fn extract_tables(raw: &str, normalized: &str) -> Vec<String> {
    let cte_names: HashSet<String> = CTE_NAME_REGEX
        .captures_iter(normalized)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();

    let candidates = match Parser::parse_sql(&GenericDialect {}, raw) {
        Ok(statements) => {
            let mut found = Vec::new();
            let _ = visit_relations(&statements, |relation| {
                found.push(clean_table_name(&relation.to_string()));
                ControlFlow::<()>::Continue(())
            });
            found
        }
        Err(e) => {
            debug!("SQL parse error: {}, falling back to regex", e);
            FALLBACK_TABLE_REGEX
                .captures_iter(normalized)
                .filter_map(|c| c.get(1).map(|m| clean_table_name(m.as_str())))
                .filter(|t| !NON_TABLE_WORDS.contains(&t.as_str()))
                .collect()
        }
    };

    let mut tables: Vec<String> = Vec::new();
    for table in candidates {
        if table.is_empty() || cte_names.contains(&table) || tables.contains(&table) {
            continue;
        }
        tables.push(table);
    }
    tables
}

fn clean_table_name(name: &str) -> String {
    name.replace('"', "").to_lowercase()
}

/// Connection keepalive probes sent by drivers and pools
pub fn is_keepalive(sql: &str) -> bool {
    let upper = sql.trim().trim_end_matches(';').trim().to_uppercase();
    matches!(
        upper.as_str(),
        "SELECT 1" | "SELECT 1 AS KEEPALIVE" | "SELECT 1 AS 1"
    ) || upper.starts_with("SELECT 'KEEP ALIVE'")
        || upper.starts_with("SELECT 'KEEPALIVE'")
}

/// Catalog and introspection statements, matched on normalized text
pub fn is_metadata_query(normalized: &str) -> bool {
    let starts_with_word = |word: &str| {
        normalized
            .strip_prefix(word)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
    };

    starts_with_word("show")
        || starts_with_word("describe")
        || starts_with_word("desc")
        || normalized.starts_with("select version()")
        || normalized.starts_with("select current_")
        || normalized.contains("system.jdbc")
        || normalized.contains("information_schema")
}

/// Prefix two-part `schema.table` references after FROM/JOIN with `catalog`.
///
/// Three-part names and names whose first part is a known catalog are left alone.
pub fn qualify_with_catalog(sql: &str, catalog: &str) -> String {
    let quoted = QUOTED_SCHEMA_TABLE_REGEX.replace_all(sql, |caps: &regex::Captures| {
        if &caps[5] == "." {
            return caps[0].to_string();
        }
        format!("{}{}{}.{}.{}", &caps[1], &caps[2], catalog, &caps[3], &caps[4])
    });

    UNQUOTED_SCHEMA_TABLE_REGEX
        .replace_all(&quoted, |caps: &regex::Captures| {
            let schema = &caps[3];
            if &caps[5] == "." || KNOWN_CATALOGS.contains(&schema.to_lowercase().as_str()) {
                return caps[0].to_string();
            }
            format!("{}{}{}.{}.{}{}", &caps[1], &caps[2], catalog, schema, &caps[4], &caps[5])
        })
        .into_owned()
}
