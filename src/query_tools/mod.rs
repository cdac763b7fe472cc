use sqlformat::{FormatOptions, Indent, QueryParams};

use crate::query_ast::ParameterizedQuery;

pub fn default_sqlformat_options() -> FormatOptions<'static> {
    FormatOptions {
        joins_as_top_level: true,
        indent: Indent::Spaces(2),
        uppercase: Some(true),
        lines_between_queries: 1,
        inline: false,
        max_inline_block: 50,
        max_inline_arguments: Some(40),
        max_inline_top_level: Some(40),
        ..Default::default()
    }
}

pub fn format_sql(sql: &str) -> Option<String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(sqlformat::format(trimmed, &QueryParams::None, &default_sqlformat_options()))
}

/// Pretty SQL followed by one `-- Column <name>: <value>` line per bind parameter.
///
/// Placeholders stay as `?`; the listing is in placeholder order.
pub fn format_query(query: &ParameterizedQuery) -> String {
    let mut out = format_sql(&query.text).unwrap_or_default();
    for param in &query.params {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("-- Column {}: {}", param.column, param.value));
    }
    out
}
