//! Token and output types for the filter-language compiler.

use rusqlite::types::Value;

/// Comparison operator of a filter token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `:` — treated as equality throughout.
    Loose,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl FilterOp {
    pub fn is_equality(self) -> bool {
        matches!(self, FilterOp::Eq | FilterOp::Loose)
    }

    /// SQL spelling of the operator. `:` compiles to `=`.
    pub fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq | FilterOp::Loose => "=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
        }
    }
}

/// One `field<op>value` filter extracted from a query string.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

/// Lexer output: a filter or a bare search term.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Filter(Filter),
    Term(String),
}

/// Compiler output: structured filters, the residual free-text query, and a
/// ready-to-execute parameterized WHERE fragment with its join requirements.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// All filters extracted from the input, before deduplication.
    pub filters: Vec<Filter>,
    /// Quoted free-text query assembled from bare terms.
    pub text_query: String,
    /// `WHERE ...` fragment, or empty when no filter survived.
    pub where_sql: String,
    /// Bound parameter values, in clause order.
    pub params: Vec<Value>,
    /// Whether the full-text table must be joined.
    pub join_search: bool,
    /// Whether the pack membership table must be joined.
    pub join_pack_members: bool,
}

impl CompiledQuery {
    /// FROM/JOIN clauses matching this query's requirements.
    pub fn from_sql(&self) -> String {
        let mut from = String::from(
            "FROM charts c\nJOIN chart_sets s ON s.id = c.set_id",
        );
        if self.join_search {
            from.push_str("\nJOIN chart_search ON chart_search.chart_id = c.id");
        }
        if self.join_pack_members {
            from.push_str("\nJOIN pack_members pm ON pm.set_id = s.id");
        }
        from
    }
}

/// Supported result orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Full-text relevance with a recency tiebreak when a text query is
    /// present, otherwise recency descending.
    #[default]
    Auto,
    RankedDesc,
    RankedAsc,
    StarsDesc,
    StarsAsc,
    BpmDesc,
    BpmAsc,
    LengthDesc,
    LengthAsc,
}

impl SortKey {
    /// Parse a sort name; anything unrecognized falls back to `Auto`.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ranked_desc" => SortKey::RankedDesc,
            "ranked_asc" => SortKey::RankedAsc,
            "stars_desc" => SortKey::StarsDesc,
            "stars_asc" => SortKey::StarsAsc,
            "bpm_desc" => SortKey::BpmDesc,
            "bpm_asc" => SortKey::BpmAsc,
            "length_desc" => SortKey::LengthDesc,
            "length_asc" => SortKey::LengthAsc,
            _ => SortKey::Auto,
        }
    }

    /// ORDER BY expression for this sort. `uses_search` reports whether the
    /// compiled query joined the full-text table.
    pub fn order_sql(self, uses_search: bool) -> &'static str {
        match self {
            SortKey::Auto => {
                if uses_search {
                    "chart_search.rank, s.time_ranked DESC"
                } else {
                    "s.time_ranked DESC"
                }
            }
            SortKey::RankedDesc => "s.time_ranked DESC",
            SortKey::RankedAsc => "s.time_ranked ASC",
            SortKey::StarsDesc => "c.stars DESC",
            SortKey::StarsAsc => "c.stars ASC",
            SortKey::BpmDesc => "c.bpm DESC",
            SortKey::BpmAsc => "c.bpm ASC",
            SortKey::LengthDesc => "c.length_secs DESC",
            SortKey::LengthAsc => "c.length_secs ASC",
        }
    }
}
