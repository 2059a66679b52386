//! SPARQL query rewriting for the id and row protocols.

use regex::Regex;
use std::sync::OnceLock;

fn select_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)select\s*((?:\?[A-Za-z0-9_\-+]*\s*)+)where\s*\{")
            .expect("select header pattern")
    })
}

/// Rewrite a user query for the binary-id protocol.
///
/// The first (outermost) `SELECT … WHERE {` header is reduced to project
/// only the geometry variable — by convention the last variable of the
/// projection list — so the backend emits exactly one id per result row.
/// A `LIMIT` is appended when the query has none.
pub fn prep_query(query: &str) -> String {
    let mut q = query.to_string();

    let rewrite = select_header().captures(&q).and_then(|cap| {
        let vars = cap.get(1)?.as_str();
        let last = vars.split_whitespace().last()?;
        Some((cap.get(0)?.range(), format!("SELECT {last} WHERE {{")))
    });
    if let Some((range, replacement)) = rewrite {
        q.replace_range(range, &replacement);
    }

    if !q.to_lowercase().contains("limit") {
        q.push_str(" LIMIT 18446744073709551615");
    }

    q
}

/// Narrow a user query to a single result row.
pub fn prep_query_row(query: &str, row: u64) -> String {
    format!("{query} OFFSET {row} LIMIT 1")
}
