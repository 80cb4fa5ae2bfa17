//! Row selection: collections, filters, ordering and limits.
//!
//! A [`Query`] is backend-agnostic. The REST backend renders it into
//! PostgREST query parameters; the in-memory backend evaluates it
//! directly against JSON rows.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Collections the marketplace reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// User profiles.
    Profiles,
    /// Seller tickets.
    Tickets,
    /// Ticket purchases.
    Purchases,
    /// Wallet ledger.
    WalletTransactions,
    /// Purchase ratings.
    Ratings,
    /// Dispute cases.
    Cases,
    /// Replies on cases.
    CaseReplies,
    /// Buyer → seller follows.
    Subscriptions,
    /// Daily voucher drops.
    DailyVouchers,
    /// Voucher claims.
    VoucherClaims,
    /// Seller payout requests.
    Withdrawals,
    /// Seller bank accounts.
    BankDetails,
    /// Payment gateway credentials.
    PaymentSettings,
}

impl Table {
    /// Collection name on the backend.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Tickets => "tickets",
            Self::Purchases => "purchases",
            Self::WalletTransactions => "wallet_transactions",
            Self::Ratings => "ratings",
            Self::Cases => "cases",
            Self::CaseReplies => "case_replies",
            Self::Subscriptions => "subscriptions",
            Self::DailyVouchers => "daily_vouchers",
            Self::VoucherClaims => "voucher_claims",
            Self::Withdrawals => "withdrawals",
            Self::BankDetails => "bank_details",
            Self::PaymentSettings => "payment_settings",
        }
    }

    /// Resolves a collection name reported by the realtime stream.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Profiles,
            Self::Tickets,
            Self::Purchases,
            Self::WalletTransactions,
            Self::Ratings,
            Self::Cases,
            Self::CaseReplies,
            Self::Subscriptions,
            Self::DailyVouchers,
            Self::VoucherClaims,
            Self::Withdrawals,
            Self::BankDetails,
            Self::PaymentSettings,
        ]
        .into_iter()
        .find(|t| t.as_str() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `<>`
    Neq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// Member of a list.
    In,
    /// Case-insensitive substring match.
    Ilike,
    /// `IS NULL` / `IS TRUE` / `IS FALSE`.
    Is,
}

impl FilterOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Ilike => "ilike",
            Self::Is => "is",
        }
    }
}

/// One column predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Column name.
    pub column: String,
    /// Comparison.
    pub op: FilterOp,
    /// Right-hand side; an array for [`FilterOp::In`].
    pub value: Value,
}

impl Filter {
    /// Builds a filter from any serializable value.
    #[must_use]
    pub fn new(column: &str, op: FilterOp, value: impl Serialize) -> Self {
        Self {
            column: column.to_string(),
            op,
            value: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    /// Equality shorthand.
    #[must_use]
    pub fn eq(column: &str, value: impl Serialize) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    /// PostgREST `(column, "op.value")` parameter.
    #[must_use]
    pub fn to_param(&self) -> (String, String) {
        let rhs = match self.op {
            FilterOp::In => {
                let items = self
                    .value
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .map(|v| format!("\"{}\"", text(v).replace('"', "\\\"")))
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .unwrap_or_default();
                format!("({items})")
            }
            FilterOp::Ilike => format!("*{}*", text(&self.value)),
            _ => text(&self.value),
        };
        (self.column.clone(), format!("{}.{rhs}", self.op.as_str()))
    }

    /// Evaluates the predicate against a JSON row.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => loosely_equal(actual, &self.value),
            FilterOp::Neq => !loosely_equal(actual, &self.value),
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|values| values.iter().any(|v| loosely_equal(actual, v))),
            FilterOp::Ilike => text(actual)
                .to_lowercase()
                .contains(&text(&self.value).to_lowercase()),
            FilterOp::Is => match &self.value {
                Value::Null => actual.is_null(),
                other => actual == other,
            },
        }
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Column name.
    pub column: String,
    /// Ascending when `true`.
    pub ascending: bool,
}

/// A row selection against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Target collection.
    pub table: Table,
    /// Column list / embedding expression (`*` by default).
    pub select: String,
    /// Conjunction of predicates.
    pub filters: Vec<Filter>,
    /// Sort keys, applied in order.
    pub order: Vec<Order>,
    /// Maximum row count.
    pub limit: Option<usize>,
}

impl Query {
    /// Selects every column of `table`.
    #[must_use]
    pub fn from(table: Table) -> Self {
        Self {
            table,
            select: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Replaces the select expression, e.g. `*,profiles(username)`.
    #[must_use]
    pub fn select(mut self, expr: &str) -> Self {
        self.select = expr.to_string();
        self
    }

    /// Adds a predicate.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn eq(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::eq(column, value))
    }

    /// Adds a membership predicate.
    #[must_use]
    pub fn is_in<T: Serialize>(self, column: &str, values: &[T]) -> Self {
        self.filter(Filter::new(column, FilterOp::In, values))
    }

    /// Adds a sort key.
    #[must_use]
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    /// Caps the row count.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// PostgREST query parameters for this selection.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select.clone())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Applies filters, ordering and limit to an in-memory row set.
    #[must_use]
    pub fn apply(&self, rows: &[Value]) -> Vec<Value> {
        let mut selected: Vec<Value> = rows
            .iter()
            .filter(|row| self.filters.iter().all(|f| f.matches(row)))
            .cloned()
            .collect();
        if !self.order.is_empty() {
            selected.sort_by(|a, b| {
                for key in &self.order {
                    let lhs = a.get(&key.column).unwrap_or(&Value::Null);
                    let rhs = b.get(&key.column).unwrap_or(&Value::Null);
                    let ord = compare(lhs, rhs).unwrap_or(Ordering::Equal);
                    let ord = if key.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Plain-text rendering of a JSON scalar.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    a == b || compare(a, b) == Some(Ordering::Equal) || text(a) == text(b)
}

/// Orders timestamps chronologically, numbers numerically, and anything
/// else as text.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    let (ta, tb) = (text(a), text(b));
    if let (Ok(da), Ok(db)) = (
        ta.parse::<DateTime<Utc>>(),
        tb.parse::<DateTime<Utc>>(),
    ) {
        return Some(da.cmp(&db));
    }
    if let (Ok(na), Ok(nb)) = (ta.parse::<f64>(), tb.parse::<f64>()) {
        return na.partial_cmp(&nb);
    }
    Some(ta.cmp(&tb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_postgrest_params() {
        let q = Query::from(Table::WalletTransactions)
            .eq("user_id", "u-1")
            .is_in("type", &["topup", "refund"])
            .order("created_at", false)
            .limit(20);
        let params = q.to_params();
        assert!(params.contains(&("select".to_string(), "*".to_string())));
        assert!(params.contains(&("user_id".to_string(), "eq.u-1".to_string())));
        assert!(params.contains(&("type".to_string(), "in.(\"topup\",\"refund\")".to_string())));
        assert!(params.contains(&("order".to_string(), "created_at.desc".to_string())));
        assert!(params.contains(&("limit".to_string(), "20".to_string())));
    }

    #[test]
    fn orders_timestamps_chronologically() {
        let rows = vec![
            json!({ "id": 1, "created_at": "2026-01-01T10:00:00Z" }),
            json!({ "id": 2, "created_at": "2026-01-01T10:00:00.500Z" }),
            json!({ "id": 3, "created_at": "2025-12-31T23:59:59Z" }),
        ];
        let out = Query::from(Table::WalletTransactions)
            .order("created_at", false)
            .apply(&rows);
        let ids: Vec<i64> = out.iter().filter_map(|r| r.get("id")?.as_i64()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn eq_matches_numbers_and_decimal_strings() {
        let row = json!({ "price": "50" });
        assert!(Filter::eq("price", 50).matches(&row));
        assert!(!Filter::eq("price", 51).matches(&row));
    }

    #[test]
    fn range_and_ilike_filters() {
        let row = json!({ "odds": 3.5, "title": "Weekend ACCA" });
        assert!(Filter::new("odds", FilterOp::Gte, 3.5).matches(&row));
        assert!(!Filter::new("odds", FilterOp::Lt, 2).matches(&row));
        assert!(Filter::new("title", FilterOp::Ilike, "acca").matches(&row));
    }

    #[test]
    fn missing_column_is_null() {
        let row = json!({});
        assert!(Filter::new("deleted_at", FilterOp::Is, Value::Null).matches(&row));
        assert!(!Filter::eq("user_id", "x").matches(&row));
    }

    #[test]
    fn table_names_resolve() {
        assert_eq!(Table::from_name("voucher_claims"), Some(Table::VoucherClaims));
        assert_eq!(Table::from_name("ads"), None);
    }
}
