//! Lowering of filter tokens to a parameterized SQL fragment.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;

use super::lexer::tokenize;
use super::types::{CompiledQuery, Filter, FilterOp, Token};

/// Where a recognized field lands in the schema.
enum FieldTarget {
    Mode,
    Status,
    Date { col: &'static str },
    Str {
        fts_col: &'static str,
        raw_col: &'static str,
    },
    Num { col: &'static str },
    Pack,
}

impl FieldTarget {
    /// Key used for the one-equality-filter-per-column rule.
    fn dedup_key(&self) -> &'static str {
        match self {
            FieldTarget::Mode => "c.mode",
            FieldTarget::Status => "c.status",
            FieldTarget::Date { col } => col,
            FieldTarget::Str { raw_col, .. } => raw_col,
            FieldTarget::Num { col } => col,
            FieldTarget::Pack => "pack",
        }
    }
}

/// The field alias table. This is part of the filter language surface;
/// changing it changes which user queries match.
fn resolve_field(field: &str) -> Option<FieldTarget> {
    let target = match field {
        "mode" => FieldTarget::Mode,
        "status" => FieldTarget::Status,

        "date" | "ranked" | "year" | "month" | "day" => FieldTarget::Date {
            col: "s.time_ranked",
        },
        "submitted" => FieldTarget::Date {
            col: "s.time_submitted",
        },

        "title" => FieldTarget::Str {
            fts_col: "title",
            raw_col: "s.title",
        },
        "artist" => FieldTarget::Str {
            fts_col: "artist",
            raw_col: "s.artist",
        },
        "creator" | "mapper" => FieldTarget::Str {
            fts_col: "creator",
            raw_col: "s.creator",
        },
        "version" | "diff" => FieldTarget::Str {
            fts_col: "version",
            raw_col: "c.version",
        },
        "source" => FieldTarget::Str {
            fts_col: "source",
            raw_col: "s.source",
        },

        "stars" | "sr" => FieldTarget::Num { col: "c.stars" },
        "bpm" => FieldTarget::Num { col: "c.bpm" },
        "length" => FieldTarget::Num {
            col: "c.length_secs",
        },
        "size" | "cs" | "keys" => FieldTarget::Num { col: "c.note_size" },
        "approach" | "ar" => FieldTarget::Num { col: "c.approach" },
        "accuracy" | "acc" | "od" => FieldTarget::Num { col: "c.accuracy" },
        "drain" | "hp" => FieldTarget::Num { col: "c.drain" },
        "taps" | "notes" | "circles" => FieldTarget::Num { col: "c.count_taps" },
        "holds" | "sliders" => FieldTarget::Num { col: "c.count_holds" },
        "spins" | "spinners" => FieldTarget::Num { col: "c.count_spins" },

        "pack" => FieldTarget::Pack,

        _ => return None,
    };
    Some(target)
}

/// Compile a filter string into a parameterized query fragment.
///
/// Compilation never fails: unknown fields and unparseable values simply
/// drop the offending filter, so a bad filter matches nothing extra instead
/// of breaking search.
pub fn compile(input: &str) -> CompiledQuery {
    let mut filters = Vec::new();
    let mut terms = Vec::new();

    for token in tokenize(input) {
        match token {
            Token::Filter(f) => {
                let is_keys = f.field == "keys";
                filters.push(f);
                // A key-count filter only makes sense for key mode.
                if is_keys {
                    filters.push(Filter {
                        field: "mode".to_string(),
                        op: FilterOp::Eq,
                        value: "keys".to_string(),
                    });
                }
            }
            Token::Term(t) => terms.push(t),
        }
    }

    // Keep only the first equality filter per resolved column; all
    // inequality filters apply together.
    let mut equality_cols: HashSet<&'static str> = HashSet::new();
    let mut active = Vec::new();
    for filter in &filters {
        let Some(target) = resolve_field(&filter.field) else {
            continue;
        };
        if filter.op.is_equality() {
            let key = target.dedup_key();
            if !equality_cols.insert(key) {
                continue;
            }
        }
        active.push((filter.clone(), target));
    }

    let mut where_clauses: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    let mut fts_parts: Vec<String> = Vec::new();
    let mut join_pack_members = false;

    for (filter, target) in active {
        let list = split_list(&filter.value);
        let mut or_clauses: Vec<String> = Vec::new();

        match target {
            FieldTarget::Mode => {
                for value in &list {
                    if let Some(mode) = crate::catalog::PlayMode::parse(value) {
                        or_clauses.push("c.mode = ?".to_string());
                        params.push(Value::Integer(mode.code()));
                    }
                }
            }
            FieldTarget::Status => {
                for value in &list {
                    if let Some(status) = crate::catalog::SetStatus::parse(value) {
                        or_clauses.push("c.status = ?".to_string());
                        params.push(Value::Integer(status.code()));
                    }
                }
            }
            FieldTarget::Date { col } => {
                compile_date_filter(col, &filter, &list, &mut where_clauses, &mut or_clauses, &mut params);
            }
            FieldTarget::Str { fts_col, raw_col } => {
                if filter.op.is_equality() {
                    let mut alternatives = Vec::new();
                    for value in &list {
                        alternatives.push(format!("{fts_col}:\"{}\"", fts_escape(value)));
                    }
                    match alternatives.len() {
                        0 => {}
                        1 => fts_parts.push(alternatives.remove(0)),
                        _ => fts_parts.push(format!("({})", alternatives.join(" OR "))),
                    }
                } else {
                    where_clauses.push(format!("{raw_col} {} ?", filter.op.sql()));
                    params.push(Value::Text(filter.value.clone()));
                }
            }
            FieldTarget::Num { col } => {
                compile_numeric_filter(col, &filter, &list, &mut where_clauses, &mut or_clauses, &mut params);
            }
            FieldTarget::Pack => {
                join_pack_members = true;
                for value in &list {
                    or_clauses
                        .push("pm.hash = (SELECT contents_hash FROM packs WHERE id = ?)".to_string());
                    params.push(Value::Text(value.clone()));
                }
            }
        }

        if !or_clauses.is_empty() {
            where_clauses.push(format!("({})", or_clauses.join(" OR ")));
        }
    }

    // Bare terms become a single quoted full-text query.
    let text_query = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", fts_escape(t)))
        .collect::<Vec<_>>()
        .join(" ");

    let mut match_parts = fts_parts;
    if !text_query.is_empty() {
        match_parts.push(text_query.clone());
    }
    let join_search = !match_parts.is_empty();
    if join_search {
        where_clauses.push("chart_search MATCH ?".to_string());
        params.push(Value::Text(match_parts.join(" AND ")));
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    CompiledQuery {
        filters,
        text_query,
        where_sql,
        params,
        join_search,
        join_pack_members,
    }
}

fn compile_date_filter(
    col: &str,
    filter: &Filter,
    list: &[String],
    where_clauses: &mut Vec<String>,
    or_clauses: &mut Vec<String>,
    params: &mut Vec<Value>,
) {
    let value = filter.value.trim();

    if let Some((first, second)) = year_span(value) {
        // A yyyy-yyyy value spans from the earlier year's start to the
        // later year's end.
        if let (Some((s1, e1)), Some((s2, e2))) = (parse_date_range(&first), parse_date_range(&second)) {
            let start = s1.min(s2);
            let end = e1.max(e2);
            where_clauses.push(format!("({col} >= ? AND {col} < ?)"));
            params.push(Value::Text(format_ts(start)));
            params.push(Value::Text(format_ts(end)));
        }
        return;
    }

    if list.len() > 1 {
        for value in list {
            if let Some((start, end)) = parse_date_range(value) {
                or_clauses.push(format!("({col} >= ? AND {col} < ?)"));
                params.push(Value::Text(format_ts(start)));
                params.push(Value::Text(format_ts(end)));
            }
        }
        return;
    }

    let Some((start, end)) = parse_date_range(value) else {
        return;
    };
    match filter.op {
        FilterOp::Lt | FilterOp::Le => {
            where_clauses.push(format!("{col} {} ?", filter.op.sql()));
            params.push(Value::Text(format_ts(start)));
        }
        FilterOp::Gt | FilterOp::Ge => {
            where_clauses.push(format!("{col} {} ?", filter.op.sql()));
            params.push(Value::Text(format_ts(end)));
        }
        FilterOp::Eq | FilterOp::Loose => {
            where_clauses.push(format!("({col} >= ? AND {col} < ?)"));
            params.push(Value::Text(format_ts(start)));
            params.push(Value::Text(format_ts(end)));
        }
    }
}

fn compile_numeric_filter(
    col: &str,
    filter: &Filter,
    list: &[String],
    where_clauses: &mut Vec<String>,
    or_clauses: &mut Vec<String>,
    params: &mut Vec<Value>,
) {
    let range: Vec<f64> = filter
        .value
        .split('-')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .filter_map(|v| v.parse::<f64>().ok())
        .take(2)
        .collect();

    if range.len() == 2 {
        let min = range[0].min(range[1]);
        let max = range[0].max(range[1]);
        match filter.op {
            FilterOp::Lt | FilterOp::Le => {
                where_clauses.push(format!("{col} {} ?", filter.op.sql()));
                params.push(Value::Real(min));
            }
            FilterOp::Gt | FilterOp::Ge => {
                where_clauses.push(format!("{col} {} ?", filter.op.sql()));
                params.push(Value::Real(max));
            }
            FilterOp::Eq | FilterOp::Loose => {
                where_clauses.push(format!("({col} BETWEEN ? AND ?)"));
                params.push(Value::Real(min));
                params.push(Value::Real(max));
            }
        }
        return;
    }

    if list.len() > 1 {
        for value in list {
            if let Some((start, end)) = widen_number(value) {
                or_clauses.push(format!("{col} BETWEEN ? AND ?"));
                params.push(Value::Real(start));
                params.push(Value::Real(end));
            }
        }
        return;
    }

    let value = filter.value.trim();
    match filter.op {
        FilterOp::Eq | FilterOp::Loose => {
            if let Some((start, end)) = widen_number(value) {
                or_clauses.push(format!("{col} BETWEEN ? AND ?"));
                params.push(Value::Real(start));
                params.push(Value::Real(end));
            }
        }
        _ => {
            if let Ok(v) = value.parse::<f64>() {
                where_clauses.push(format!("{col} {} ?", filter.op.sql()));
                params.push(Value::Real(v));
            }
        }
    }
}

/// Widen a single numeric value to the canonical sub-unit range that
/// tolerates one-decimal display rounding: `5` matches `[5.00, 5.99]`,
/// `5.5` matches `[5.50, 5.59]`.
pub fn widen_number(value: &str) -> Option<(f64, f64)> {
    let value = value.trim();
    let v: f64 = value.parse().ok()?;
    let decimals = value.split('.').nth(1).map(|d| d.len()).unwrap_or(0);
    let step = 10f64.powi(-(decimals as i32));
    let end = (v + step - 0.01).max(v);
    Some((v, end))
}

/// Parse a `yyyy`, `yyyy-mm` or `yyyy-mm-dd` value into the half-open
/// timestamp range it denotes.
pub fn parse_date_range(value: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let parts: Vec<u32> = value
        .trim()
        .split('-')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u32>())
        .collect::<Result<_, _>>()
        .ok()?;

    let (start, end) = match parts.as_slice() {
        [year] => (ymd(*year as i32, 1, 1)?, ymd(*year as i32 + 1, 1, 1)?),
        [year, month] => {
            let (ny, nm) = if *month == 12 {
                (*year as i32 + 1, 1)
            } else {
                (*year as i32, month + 1)
            };
            (ymd(*year as i32, *month, 1)?, ymd(ny, nm, 1)?)
        }
        [year, month, day] => {
            let start = ymd(*year as i32, *month, *day)?;
            (start, start + chrono::Duration::days(1))
        }
        _ => return None,
    };
    Some((start, end))
}

fn ymd(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Detect a `yyyy-yyyy` year-span value.
fn year_span(value: &str) -> Option<(String, String)> {
    let (a, b) = value.split_once('-')?;
    let is_year = |s: &str| s.len() == 4 && s.chars().all(|c| c.is_ascii_digit());
    if is_year(a) && is_year(b) {
        Some((a.to_string(), b.to_string()))
    } else {
        None
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Escape a value for inclusion inside a quoted FTS phrase.
fn fts_escape(value: &str) -> String {
    value.replace('"', "\"\"")
}
