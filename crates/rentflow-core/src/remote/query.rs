//! Select queries against the remote service

/// Row filter on one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    In(String, Vec<String>),
    Gte(String, String),
    Lte(String, String),
    /// Case-insensitive pattern, `*` as wildcard
    ILike(String, String),
}

impl Filter {
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Eq(column, _)
            | Self::In(column, _)
            | Self::Gte(column, _)
            | Self::Lte(column, _)
            | Self::ILike(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Builder for a remote `select`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the returned columns (comma separated)
    #[must_use]
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn in_list(mut self, column: impl Into<String>, values: Vec<String>) -> Self {
        self.filters.push(Filter::In(column.into(), values));
        self
    }

    #[must_use]
    pub fn gte(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Gte(column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn lte(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Lte(column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn ilike(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::ILike(column.into(), pattern.into()));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `PostgREST` query-string pairs for this query
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".to_string()),
        )];

        for filter in &self.filters {
            let value = match filter {
                Filter::Eq(_, value) => format!("eq.{value}"),
                Filter::In(_, values) => format!("in.({})", values.join(",")),
                Filter::Gte(_, value) => format!("gte.{value}"),
                Filter::Lte(_, value) => format!("lte.{value}"),
                Filter::ILike(_, pattern) => format!("ilike.{pattern}"),
            };
            pairs.push((filter.column().to_string(), value));
        }

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|order| {
                    format!(
                        "{}.{}",
                        order.column,
                        if order.ascending { "asc" } else { "desc" }
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".to_string(), order));
        }

        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }

        pairs
    }
}
