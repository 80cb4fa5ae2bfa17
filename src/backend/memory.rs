//! In-process backend with the hosted service's call contract.
//!
//! Rows live in JSON vectors per collection. The named procedures are
//! emulated with the guarantees the gateway assumes of the real ones:
//! one purchase per (ticket, buyer), one claim per voucher, balances
//! moved only together with a ledger entry. Every call is appended to a
//! call log so tests can assert which calls were made and in what order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::BoxFuture;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::{
    AccessToken, ApiErrorKind, AuthErrorCode, AuthEvent, AuthSession, AuthUser, Backend,
    BackendError, ChangeKind, Filter, Query, RowChange, Rpc, SignOutScope, SignUpResult, Table,
};
use crate::domain::{Role, UserId};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `sign_up` for an email.
    SignUp(String),
    /// `sign_in` for an email.
    SignIn(String),
    /// `sign_out`.
    SignOut,
    /// `get_user`.
    GetUser,
    /// `select` on a collection.
    Select(Table),
    /// `insert` of N rows into a collection.
    Insert(Table, usize),
    /// `update` on a collection.
    Update(Table),
    /// `delete` on a collection.
    Delete(Table),
    /// Stored procedure call.
    Rpc(Rpc),
    /// Serverless function call.
    Invoke(String),
}

#[derive(Debug, Clone)]
enum FunctionBehavior {
    Respond(Value),
    Fail(String),
}

#[derive(Debug)]
struct Account {
    id: UserId,
    password: String,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, UserId>,
    tables: HashMap<Table, Vec<Value>>,
    functions: HashMap<String, FunctionBehavior>,
    calls: Vec<BackendCall>,
    changes: Vec<RowChange>,
}

/// In-memory [`Backend`].
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    auth_tx: broadcast::Sender<AuthEvent>,
    changes_tx: broadcast::Sender<RowChange>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(256);
        let (changes_tx, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(State::default()),
            auth_tx,
            changes_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the state lock, then publishes the row changes it
    /// produced.
    fn with_state<R>(&self, call: BackendCall, f: impl FnOnce(&mut State) -> R) -> R {
        let (result, changes) = {
            let mut state = self.lock();
            state.calls.push(call);
            let result = f(&mut state);
            (result, std::mem::take(&mut state.changes))
        };
        for change in changes {
            let _ = self.changes_tx.send(change);
        }
        result
    }

    /// Creates an auth account and its profile row.
    pub fn seed_user(&self, email: &str, password: &str, role: Role) -> UserId {
        let id = UserId::new();
        let username = email.split('@').next().unwrap_or(email).to_string();
        let mut state = self.lock();
        state.accounts.insert(
            email.to_ascii_lowercase(),
            Account {
                id,
                password: password.to_string(),
            },
        );
        state.tables.entry(Table::Profiles).or_default().push(json!({
            "id": id,
            "email": email,
            "role": role.as_str(),
            "username": username,
            "approved": true,
            "suspended": false,
            "credit_balance": "0",
            "loyalty_points": 0,
            "created_at": Utc::now(),
        }));
        id
    }

    /// Creates an auth account without a profile row.
    pub fn seed_account(&self, email: &str, password: &str) -> UserId {
        let id = UserId::new();
        self.lock().accounts.insert(
            email.to_ascii_lowercase(),
            Account {
                id,
                password: password.to_string(),
            },
        );
        id
    }

    /// Opens a session for an existing account without recording a call.
    pub fn issue_token(&self, user_id: UserId) -> AccessToken {
        let token = format!("mem-{}", uuid::Uuid::new_v4().simple());
        self.lock().sessions.insert(token.clone(), user_id);
        AccessToken::new(token)
    }

    /// Invalidates a token without publishing an auth event, as when a JWT
    /// runs past its expiry.
    pub fn expire_token(&self, token: &AccessToken) {
        self.lock().sessions.remove(token.as_str());
    }

    /// Inserts a raw row, filling `id` and `created_at` when absent.
    pub fn seed_row(&self, table: Table, row: Value) -> Value {
        let mut state = self.lock();
        let row = with_defaults(row);
        state.tables.entry(table).or_default().push(row.clone());
        row
    }

    /// Patches rows directly, bypassing the call log.
    pub fn patch_rows(&self, table: Table, filters: &[Filter], patch: &Value) {
        let mut state = self.lock();
        let _ = state.update_rows(table, filters, patch);
        state.changes.clear();
    }

    /// Snapshot of a collection.
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Makes a serverless function answer with `response`.
    pub fn set_function_response(&self, function: &str, response: Value) {
        self.lock()
            .functions
            .insert(function.to_string(), FunctionBehavior::Respond(response));
    }

    /// Makes a serverless function fail with `message`.
    pub fn fail_function(&self, function: &str, message: &str) {
        self.lock()
            .functions
            .insert(function.to_string(), FunctionBehavior::Fail(message.to_string()));
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Stored procedures called so far, in order.
    #[must_use]
    pub fn rpc_calls(&self) -> Vec<Rpc> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Rpc(rpc) => Some(*rpc),
                _ => None,
            })
            .collect()
    }

    /// Serverless functions invoked so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Invoke(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn caller(&self, token: Option<&AccessToken>) -> Option<UserId> {
        token.and_then(|t| self.lock().sessions.get(t.as_str()).copied())
    }
}

fn with_defaults(mut row: Value) -> Value {
    if let Some(obj) = row.as_object_mut() {
        obj.entry("id")
            .or_insert_with(|| json!(uuid::Uuid::new_v4()));
        obj.entry("created_at").or_insert_with(|| json!(Utc::now()));
    }
    row
}

fn decimal(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        Some(Value::Number(n)) => n.to_string().parse().unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn arg<'a>(args: &'a Value, name: &str) -> Result<&'a Value, BackendError> {
    args.get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| {
            BackendError::api(
                ApiErrorKind::Other,
                400,
                Some("P0001"),
                format!("missing argument {name}"),
            )
        })
}

fn raise(message: &str) -> BackendError {
    BackendError::api(ApiErrorKind::Other, 400, Some("P0001"), message)
}

fn unique_violation(what: &str) -> BackendError {
    BackendError::api(
        ApiErrorKind::Constraint,
        409,
        Some("23505"),
        format!("duplicate key value violates unique constraint on {what}"),
    )
}

/// Columns that must be unique together, per collection.
fn unique_keys(table: Table) -> &'static [&'static [&'static str]] {
    match table {
        Table::Purchases => &[&["ticket_id", "buyer_id"]],
        Table::VoucherClaims => &[&["voucher_id"]],
        Table::Tickets => &[&["ticket_code"]],
        Table::Subscriptions => &[&["buyer_id", "seller_id"]],
        Table::Ratings => &[&["purchase_id"]],
        Table::Profiles => &[&["id"]],
        _ => &[],
    }
}

impl State {
    fn table(&self, table: Table) -> &[Value] {
        self.tables.get(&table).map_or(&[], Vec::as_slice)
    }

    fn find(&self, table: Table, id: &Value) -> Option<Value> {
        let filter = Filter::eq("id", id);
        self.table(table).iter().find(|r| filter.matches(r)).cloned()
    }

    fn insert_row(&mut self, table: Table, row: Value) -> Result<Value, BackendError> {
        let row = with_defaults(row);
        for key in unique_keys(table) {
            let clash = self.table(table).iter().any(|existing| {
                key.iter().all(|col| {
                    let v = row.get(*col).unwrap_or(&Value::Null);
                    !v.is_null() && Filter::eq(col, v).matches(existing)
                })
            });
            if clash {
                return Err(unique_violation(&format!("{table}({})", key.join(","))));
            }
        }
        self.tables.entry(table).or_default().push(row.clone());
        self.changes.push(RowChange {
            table,
            kind: ChangeKind::Insert,
            record: row.clone(),
            old_record: None,
        });
        Ok(row)
    }

    fn update_rows(&mut self, table: Table, filters: &[Filter], patch: &Value) -> Vec<Value> {
        let mut updated = Vec::new();
        let mut changes = Vec::new();
        if let Some(rows) = self.tables.get_mut(&table) {
            for row in rows.iter_mut() {
                if !filters.iter().all(|f| f.matches(row)) {
                    continue;
                }
                let old = row.clone();
                if let (Some(obj), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
                    for (k, v) in fields {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
                changes.push(RowChange {
                    table,
                    kind: ChangeKind::Update,
                    record: row.clone(),
                    old_record: Some(old),
                });
            }
        }
        self.changes.extend(changes);
        updated
    }

    fn profile_balance(&self, user_id: &Value) -> Decimal {
        self.find(Table::Profiles, user_id)
            .map(|p| decimal(p.get("credit_balance")))
            .unwrap_or_default()
    }

    /// Moves a user's balance and appends the matching ledger entry.
    fn adjust_balance(
        &mut self,
        user_id: &Value,
        amount: Decimal,
        kind: &str,
        description: &str,
        reference: Option<&Value>,
    ) -> Result<Decimal, BackendError> {
        if self.find(Table::Profiles, user_id).is_none() {
            return Err(raise("profile not found"));
        }
        let balance = self.profile_balance(user_id) + amount;
        if balance < Decimal::ZERO {
            return Err(raise("insufficient balance"));
        }
        let _ = self.update_rows(
            Table::Profiles,
            &[Filter::eq("id", user_id)],
            &json!({ "credit_balance": balance }),
        );
        self.insert_row(
            Table::WalletTransactions,
            json!({
                "user_id": user_id,
                "amount": amount,
                "type": kind,
                "status": "completed",
                "description": description,
                "reference_id": reference.map(|r| match r {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            }),
        )?;
        Ok(balance)
    }

    fn run_rpc(
        &mut self,
        caller: Option<UserId>,
        rpc: Rpc,
        args: &Value,
    ) -> Result<Value, BackendError> {
        match rpc {
            Rpc::PurchaseTicket => {
                let ticket_id = arg(args, "p_ticket_id")?;
                let buyer_id = arg(args, "p_buyer_id")?;
                let ticket = self
                    .find(Table::Tickets, ticket_id)
                    .ok_or_else(|| raise("ticket not found"))?;
                let is_free = ticket.get("is_free").and_then(Value::as_bool).unwrap_or(false);
                let price = if is_free {
                    Decimal::ZERO
                } else {
                    decimal(ticket.get("price"))
                };
                let key = [Filter::eq("ticket_id", ticket_id), Filter::eq("buyer_id", buyer_id)];
                let existing = self
                    .table(Table::Purchases)
                    .iter()
                    .find(|r| key.iter().all(|f| f.matches(r)))
                    .cloned();
                let status = if is_free { "completed" } else { "pending" };
                if let Some(existing) = existing {
                    if existing.get("payment_status").and_then(Value::as_str) == Some("completed") {
                        return Err(unique_violation("purchases(ticket_id,buyer_id)"));
                    }
                    let id = existing.get("id").cloned().unwrap_or(Value::Null);
                    let _ = self.update_rows(
                        Table::Purchases,
                        &[Filter::eq("id", &id)],
                        &json!({ "payment_status": status, "price": price }),
                    );
                    return Ok(id);
                }
                let row = self.insert_row(
                    Table::Purchases,
                    json!({
                        "ticket_id": ticket_id,
                        "buyer_id": buyer_id,
                        "seller_id": ticket.get("seller_id"),
                        "price": price,
                        "payment_status": status,
                        "payment_id": Value::Null,
                        "is_rated": false,
                    }),
                )?;
                Ok(row.get("id").cloned().unwrap_or(Value::Null))
            }
            Rpc::CompleteTicketPurchase => {
                let purchase_id = arg(args, "p_purchase_id")?;
                let payment_id = arg(args, "p_payment_id")?;
                let purchase = self
                    .find(Table::Purchases, purchase_id)
                    .ok_or_else(|| raise("purchase not found"))?;
                if purchase.get("payment_status").and_then(Value::as_str) == Some("completed") {
                    return Ok(json!(false));
                }
                let price = decimal(purchase.get("price"));
                let buyer = purchase.get("buyer_id").cloned().unwrap_or(Value::Null);
                let seller = purchase.get("seller_id").cloned().unwrap_or(Value::Null);
                let by_credit = payment_id.as_str().is_some_and(|p| p.starts_with("credit-"));
                if by_credit && price > Decimal::ZERO {
                    self.adjust_balance(&buyer, -price, "purchase", "Ticket purchase", Some(purchase_id))?;
                }
                if price > Decimal::ZERO && self.find(Table::Profiles, &seller).is_some() {
                    self.adjust_balance(&seller, price, "purchase", "Ticket sale", Some(purchase_id))?;
                }
                let _ = self.update_rows(
                    Table::Purchases,
                    &[Filter::eq("id", purchase_id)],
                    &json!({ "payment_status": "completed", "payment_id": payment_id }),
                );
                Ok(json!(true))
            }
            Rpc::CreateWalletTopUp => {
                let user_id = arg(args, "p_user_id")?;
                let amount = decimal(Some(arg(args, "p_amount")?));
                if amount <= Decimal::ZERO {
                    return Err(raise("amount must be positive"));
                }
                let row = self.insert_row(
                    Table::WalletTransactions,
                    json!({
                        "user_id": user_id,
                        "amount": amount,
                        "type": "topup",
                        "status": "pending",
                        "description": "Wallet top-up",
                    }),
                )?;
                Ok(row.get("id").cloned().unwrap_or(Value::Null))
            }
            Rpc::CompleteWalletTransaction => {
                let tx_id = arg(args, "p_transaction_id")?;
                let payment_id = arg(args, "p_payment_id")?;
                let tx = self
                    .find(Table::WalletTransactions, tx_id)
                    .ok_or_else(|| raise("transaction not found"))?;
                if tx.get("status").and_then(Value::as_str) != Some("pending") {
                    return Ok(json!(false));
                }
                let user_id = tx.get("user_id").cloned().unwrap_or(Value::Null);
                let balance = self.profile_balance(&user_id) + decimal(tx.get("amount"));
                let _ = self.update_rows(
                    Table::Profiles,
                    &[Filter::eq("id", &user_id)],
                    &json!({ "credit_balance": balance }),
                );
                let _ = self.update_rows(
                    Table::WalletTransactions,
                    &[Filter::eq("id", tx_id)],
                    &json!({ "status": "completed", "reference_id": payment_id }),
                );
                Ok(json!(true))
            }
            Rpc::ClaimDailyVoucher => {
                let voucher_id = arg(args, "p_voucher_id")?;
                let user_id = arg(args, "p_user_id")?;
                let voucher = self
                    .find(Table::DailyVouchers, voucher_id)
                    .ok_or_else(|| raise("voucher not found"))?;
                let claim = json!({
                    "voucher_id": voucher_id,
                    "user_id": user_id,
                    "claimed_at": Utc::now(),
                });
                if self.insert_row(Table::VoucherClaims, claim).is_err() {
                    return Ok(json!(false));
                }
                let value = decimal(voucher.get("value"));
                self.adjust_balance(user_id, value, "topup", "Daily voucher", Some(voucher_id))?;
                Ok(json!(true))
            }
            Rpc::AddCredits => {
                let user_id = arg(args, "p_user_id")?;
                let amount = decimal(Some(arg(args, "p_amount")?));
                let kind = args.get("p_type").and_then(Value::as_str).unwrap_or("topup");
                let description = args
                    .get("p_description")
                    .and_then(Value::as_str)
                    .unwrap_or("Credits added");
                let reference = args.get("p_reference_id").filter(|v| !v.is_null());
                let balance = self.adjust_balance(user_id, amount, kind, description, reference)?;
                Ok(json!(balance))
            }
            Rpc::ProcessTip => {
                let from = arg(args, "p_from_user_id")?;
                let to = arg(args, "p_to_user_id")?;
                let amount = decimal(Some(arg(args, "p_amount")?));
                if amount <= Decimal::ZERO {
                    return Err(raise("tip must be positive"));
                }
                self.adjust_balance(from, -amount, "purchase", "Tip sent", Some(to))?;
                self.adjust_balance(to, amount, "topup", "Tip received", Some(from))?;
                Ok(json!(true))
            }
            Rpc::GetPublicSellerStats => {
                let seller_id = arg(args, "p_seller_id")?;
                let by_seller = Filter::eq("seller_id", seller_id);
                let total_tickets = self
                    .table(Table::Tickets)
                    .iter()
                    .filter(|r| by_seller.matches(r))
                    .count();
                let sales: Vec<&Value> = self
                    .table(Table::Purchases)
                    .iter()
                    .filter(|r| {
                        by_seller.matches(r)
                            && r.get("payment_status").and_then(Value::as_str) == Some("completed")
                    })
                    .collect();
                let settled: Vec<bool> = sales
                    .iter()
                    .filter_map(|r| r.get("is_winner").and_then(Value::as_bool))
                    .collect();
                let wins = settled.iter().filter(|w| **w).count();
                let scores: Vec<f64> = self
                    .table(Table::Ratings)
                    .iter()
                    .filter(|r| by_seller.matches(r))
                    .filter_map(|r| r.get("score").and_then(Value::as_f64))
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let win_rate = if settled.is_empty() {
                    0.0
                } else {
                    wins as f64 / settled.len() as f64 * 100.0
                };
                #[allow(clippy::cast_precision_loss)]
                let average_rating = if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f64>() / scores.len() as f64
                };
                Ok(json!({
                    "seller_id": seller_id,
                    "total_tickets": total_tickets,
                    "total_sales": sales.len(),
                    "win_rate": win_rate,
                    "average_rating": average_rating,
                }))
            }
            Rpc::GetPublicLeaderboard | Rpc::GetSellerLeaderboard => {
                let column = if rpc == Rpc::GetSellerLeaderboard {
                    "seller_id"
                } else {
                    "buyer_id"
                };
                let mut counts: HashMap<String, u64> = HashMap::new();
                for row in self.table(Table::Purchases) {
                    if row.get("payment_status").and_then(Value::as_str) != Some("completed") {
                        continue;
                    }
                    if let Some(id) = row.get(column).and_then(Value::as_str) {
                        *counts.entry(id.to_string()).or_default() += 1;
                    }
                }
                let mut board: Vec<(String, u64)> = counts.into_iter().collect();
                board.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                let entries: Vec<Value> = board
                    .into_iter()
                    .take(10)
                    .map(|(id, count)| {
                        let username = self
                            .find(Table::Profiles, &json!(id))
                            .and_then(|p| p.get("username").cloned())
                            .unwrap_or(Value::Null);
                        json!({ "user_id": id, "username": username, "score": count })
                    })
                    .collect();
                Ok(Value::Array(entries))
            }
            Rpc::IsAdmin => {
                let is_admin = caller
                    .and_then(|id| self.find(Table::Profiles, &json!(id)))
                    .and_then(|p| p.get("role").and_then(Value::as_str).map(str::to_string))
                    .is_some_and(|role| role == "admin");
                Ok(json!(is_admin))
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        _metadata: Value,
    ) -> BoxFuture<'a, Result<SignUpResult, BackendError>> {
        Box::pin(async move {
            let key = email.to_ascii_lowercase();
            let session = self.with_state(BackendCall::SignUp(key.clone()), |state| {
                if state.accounts.contains_key(&key) {
                    return Err(BackendError::auth(
                        AuthErrorCode::UserAlreadyExists,
                        "User already registered",
                    ));
                }
                if password.chars().count() < 6 {
                    return Err(BackendError::auth(
                        AuthErrorCode::WeakPassword,
                        "Password should be at least 6 characters",
                    ));
                }
                let id = UserId::new();
                state.accounts.insert(
                    key,
                    Account {
                        id,
                        password: password.to_string(),
                    },
                );
                let token = format!("mem-{}", uuid::Uuid::new_v4().simple());
                state.sessions.insert(token.clone(), id);
                Ok(AuthSession {
                    access_token: AccessToken::new(token),
                    refresh_token: None,
                    expires_in: Some(3600),
                    user: AuthUser {
                        id,
                        email: email.to_string(),
                    },
                })
            })?;
            let _ = self.auth_tx.send(AuthEvent::SignedIn(session.user.id));
            Ok(SignUpResult {
                user: session.user.clone(),
                session: Some(session),
            })
        })
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<AuthSession, BackendError>> {
        Box::pin(async move {
            let key = email.to_ascii_lowercase();
            let session = self.with_state(BackendCall::SignIn(key.clone()), |state| {
                let id = state
                    .accounts
                    .get(&key)
                    .filter(|a| a.password == password)
                    .map(|a| a.id)
                    .ok_or_else(|| {
                        BackendError::auth(
                            AuthErrorCode::InvalidCredentials,
                            "Invalid login credentials",
                        )
                    })?;
                let token = format!("mem-{}", uuid::Uuid::new_v4().simple());
                state.sessions.insert(token.clone(), id);
                Ok::<_, BackendError>(AuthSession {
                    access_token: AccessToken::new(token),
                    refresh_token: Some(uuid::Uuid::new_v4().to_string()),
                    expires_in: Some(3600),
                    user: AuthUser {
                        id,
                        email: email.to_string(),
                    },
                })
            })?;
            let _ = self.auth_tx.send(AuthEvent::SignedIn(session.user.id));
            Ok(session)
        })
    }

    fn sign_out<'a>(
        &'a self,
        token: &'a AccessToken,
        scope: SignOutScope,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let user = self.with_state(BackendCall::SignOut, |state| {
                let user = state.sessions.remove(token.as_str())?;
                if scope == SignOutScope::Global {
                    state.sessions.retain(|_, id| *id != user);
                }
                Some(user)
            });
            if let Some(user) = user {
                let _ = self.auth_tx.send(AuthEvent::SignedOut(user));
            }
            Ok(())
        })
    }

    fn get_user<'a>(&'a self, token: &'a AccessToken) -> BoxFuture<'a, Result<AuthUser, BackendError>> {
        Box::pin(async move {
            self.with_state(BackendCall::GetUser, |state| {
                let id = state.sessions.get(token.as_str()).copied().ok_or_else(|| {
                    BackendError::auth(AuthErrorCode::SessionInvalid, "invalid JWT")
                })?;
                let email = state
                    .accounts
                    .iter()
                    .find(|(_, a)| a.id == id)
                    .map(|(email, _)| email.clone())
                    .unwrap_or_default();
                Ok(AuthUser { id, email })
            })
        })
    }

    fn select<'a>(
        &'a self,
        _token: Option<&'a AccessToken>,
        query: Query,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>> {
        Box::pin(async move {
            self.with_state(BackendCall::Select(query.table), |state| {
                Ok(query.apply(state.table(query.table)))
            })
        })
    }

    fn insert<'a>(
        &'a self,
        _token: Option<&'a AccessToken>,
        table: Table,
        rows: Vec<Value>,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>> {
        Box::pin(async move {
            self.with_state(BackendCall::Insert(table, rows.len()), |state| {
                // All-or-nothing, like a single bulk statement.
                let snapshot = state.tables.get(&table).cloned();
                let mut stored = Vec::with_capacity(rows.len());
                for row in rows {
                    match state.insert_row(table, row) {
                        Ok(row) => stored.push(row),
                        Err(e) => {
                            match snapshot {
                                Some(rows) => state.tables.insert(table, rows),
                                None => state.tables.remove(&table),
                            };
                            state.changes.clear();
                            return Err(e);
                        }
                    }
                }
                Ok(stored)
            })
        })
    }

    fn update<'a>(
        &'a self,
        _token: Option<&'a AccessToken>,
        table: Table,
        filters: Vec<Filter>,
        patch: Value,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>> {
        Box::pin(async move {
            self.with_state(BackendCall::Update(table), |state| {
                Ok(state.update_rows(table, &filters, &patch))
            })
        })
    }

    fn delete<'a>(
        &'a self,
        _token: Option<&'a AccessToken>,
        table: Table,
        filters: Vec<Filter>,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            self.with_state(BackendCall::Delete(table), |state| {
                let mut removed = Vec::new();
                if let Some(rows) = state.tables.get_mut(&table) {
                    rows.retain(|row| {
                        let hit = filters.iter().all(|f| f.matches(row));
                        if hit {
                            removed.push(row.clone());
                        }
                        !hit
                    });
                }
                state.changes.extend(removed.into_iter().map(|old| RowChange {
                    table,
                    kind: ChangeKind::Delete,
                    record: json!({}),
                    old_record: Some(old),
                }));
                Ok(())
            })
        })
    }

    fn rpc<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        rpc: Rpc,
        args: Value,
    ) -> BoxFuture<'a, Result<Value, BackendError>> {
        Box::pin(async move {
            let caller = self.caller(token);
            self.with_state(BackendCall::Rpc(rpc), |state| {
                let snapshot = state.tables.clone();
                let result = state.run_rpc(caller, rpc, &args);
                if result.is_err() {
                    // Procedures are atomic: a failure leaves no partial writes.
                    state.tables = snapshot;
                    state.changes.clear();
                }
                result
            })
        })
    }

    fn invoke<'a>(
        &'a self,
        _token: Option<&'a AccessToken>,
        function: &'a str,
        _body: Value,
    ) -> BoxFuture<'a, Result<Value, BackendError>> {
        Box::pin(async move {
            self.with_state(BackendCall::Invoke(function.to_string()), |state| {
                match state.functions.get(function) {
                    Some(FunctionBehavior::Respond(value)) => Ok(value.clone()),
                    Some(FunctionBehavior::Fail(message)) => Err(BackendError::Function {
                        function: function.to_string(),
                        message: message.clone(),
                    }),
                    None => Err(BackendError::Function {
                        function: function.to_string(),
                        message: "function not deployed".to_string(),
                    }),
                }
            })
        })
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    fn row_changes(&self) -> broadcast::Receiver<RowChange> {
        self.changes_tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn ticket_row(seller: UserId, price: i64, is_free: bool) -> Value {
        json!({
            "seller_id": seller,
            "title": "t",
            "description": "d",
            "betting_site": "betway",
            "price": price.to_string(),
            "is_free": is_free,
            "odds": "2.5",
            "kickoff_time": Utc::now(),
            "ticket_code": format!("CODE{}", uuid::Uuid::new_v4().simple()),
        })
    }

    #[tokio::test]
    async fn purchase_is_unique_per_ticket_and_buyer() {
        let backend = MemoryBackend::new();
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let buyer = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let ticket = backend.seed_row(Table::Tickets, ticket_row(seller, 0, true));
        let args = json!({ "p_ticket_id": ticket.get("id"), "p_buyer_id": buyer });

        let first = backend.rpc(None, Rpc::PurchaseTicket, args.clone()).await;
        assert!(first.is_ok());
        let second = backend.rpc(None, Rpc::PurchaseTicket, args).await;
        let Err(err) = second else {
            panic!("expected unique violation");
        };
        assert_eq!(err.api_kind(), Some(ApiErrorKind::Constraint));
        assert_eq!(backend.rows(Table::Purchases).len(), 1);
    }

    #[tokio::test]
    async fn failed_procedure_leaves_no_partial_writes() {
        let backend = MemoryBackend::new();
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let buyer = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let ticket = backend.seed_row(Table::Tickets, ticket_row(seller, 50, false));
        let Ok(purchase_id) = backend
            .rpc(
                None,
                Rpc::PurchaseTicket,
                json!({ "p_ticket_id": ticket.get("id"), "p_buyer_id": buyer }),
            )
            .await
        else {
            panic!("purchase failed");
        };

        let result = backend
            .rpc(
                None,
                Rpc::CompleteTicketPurchase,
                json!({ "p_purchase_id": purchase_id, "p_payment_id": "credit-x" }),
            )
            .await;
        assert!(result.is_err());
        assert!(backend.rows(Table::WalletTransactions).is_empty());
        let purchases = backend.rows(Table::Purchases);
        assert!(purchases
            .iter()
            .all(|p| p.get("payment_status").and_then(Value::as_str) == Some("pending")));
    }

    #[tokio::test]
    async fn voucher_claim_is_exclusive() {
        let backend = MemoryBackend::new();
        let a = backend.seed_user("a@x.co", "secret1", Role::Buyer);
        let b = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let voucher = backend.seed_row(
            Table::DailyVouchers,
            json!({ "code": "V1", "value": "20", "drop_date": "2026-01-01", "drop_time": "12:00:00", "is_active": true }),
        );
        let vid = voucher.get("id").cloned().unwrap_or(Value::Null);

        let first = backend
            .rpc(None, Rpc::ClaimDailyVoucher, json!({ "p_voucher_id": vid, "p_user_id": a }))
            .await;
        let second = backend
            .rpc(None, Rpc::ClaimDailyVoucher, json!({ "p_voucher_id": vid, "p_user_id": b }))
            .await;
        assert_eq!(first.ok(), Some(json!(true)));
        assert_eq!(second.ok(), Some(json!(false)));
        assert_eq!(backend.rows(Table::VoucherClaims).len(), 1);
    }

    #[tokio::test]
    async fn sign_in_rejects_wrong_password() {
        let backend = MemoryBackend::new();
        backend.seed_user("a@x.co", "secret1", Role::Buyer);
        let Err(err) = backend.sign_in("a@x.co", "nope").await else {
            panic!("expected failure");
        };
        assert_eq!(err.auth_code(), Some(AuthErrorCode::InvalidCredentials));
        assert_eq!(backend.calls(), vec![BackendCall::SignIn("a@x.co".to_string())]);
    }

    #[tokio::test]
    async fn inserts_publish_row_changes() {
        let backend = MemoryBackend::new();
        let mut rx = backend.row_changes();
        let user = UserId::new();
        let result = backend
            .insert(None, Table::Subscriptions, vec![json!({ "buyer_id": user, "seller_id": UserId::new() })])
            .await;
        assert!(result.is_ok());
        let Ok(change) = rx.recv().await else {
            panic!("expected change");
        };
        assert_eq!(change.table, Table::Subscriptions);
        assert_eq!(change.kind, ChangeKind::Insert);
    }

    #[tokio::test]
    async fn bulk_insert_is_all_or_nothing() {
        let backend = MemoryBackend::new();
        let seller = UserId::new();
        let mut dup = ticket_row(seller, 10, false);
        let first = ticket_row(seller, 10, false);
        if let Some(obj) = dup.as_object_mut() {
            obj.insert("ticket_code".to_string(), first.get("ticket_code").cloned().unwrap_or_default());
        }
        let result = backend.insert(None, Table::Tickets, vec![first, dup]).await;
        assert!(result.is_err());
        assert!(backend.rows(Table::Tickets).is_empty());
    }
}
