//! Shared harness: the full application on an ephemeral port over the
//! in-memory backend.

#![allow(dead_code, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};

use tipmarket_gateway::api;
use tipmarket_gateway::app_state::AppState;
use tipmarket_gateway::backend::{Backend, Filter, MemoryBackend, Table};
use tipmarket_gateway::config::MarketConfig;
use tipmarket_gateway::domain::{EventBus, UserId};
use tipmarket_gateway::service::Notifier;
use tipmarket_gateway::session::{MemorySessionStore, SessionStore};

/// A running gateway.
pub struct TestApp {
    pub addr: SocketAddr,
    pub backend: Arc<MemoryBackend>,
    pub state: AppState,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let dyn_backend = Arc::clone(&backend) as Arc<dyn Backend>;
        let config = MarketConfig::default();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let (notifier, _worker) = Notifier::spawn(
            Arc::clone(&dyn_backend),
            config.notify_function.clone(),
            config.notify_queue_capacity,
        );
        let state = AppState::new(
            dyn_backend,
            store,
            &config,
            EventBus::new(config.event_bus_capacity),
            notifier,
            None,
        );

        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("failed to bind ephemeral port");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("listener has no address");
        };
        let app = api::app(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            backend,
            state,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Signs in through the REST surface and returns the bearer token.
    pub async fn login(&self, email: &str, password: &str) -> String {
        let Ok(resp) = self
            .client
            .post(self.url("/api/v1/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
        else {
            panic!("login request failed");
        };
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let Ok(body) = resp.json::<Value>().await else {
            panic!("login body is not json");
        };
        let Some(token) = body["access_token"].as_str() else {
            panic!("login returned no token: {body}");
        };
        token.to_string()
    }

    pub fn set_balance(&self, user: UserId, amount: &str) {
        self.backend.patch_rows(
            Table::Profiles,
            &[Filter::eq("id", user)],
            &json!({ "credit_balance": amount }),
        );
    }

    pub fn seed_ticket(&self, seller: UserId, price: &str, code: &str) -> String {
        let row = self.backend.seed_row(
            Table::Tickets,
            json!({
                "seller_id": seller,
                "title": "Saturday treble",
                "description": "Three home wins",
                "betting_site": "betway",
                "price": price,
                "is_free": false,
                "odds": "5.2",
                "number_of_legs": 3,
                "kickoff_time": Utc::now() + chrono::Duration::days(1),
                "ticket_code": code,
            }),
        );
        let Some(id) = row["id"].as_str() else {
            panic!("seeded ticket has no id");
        };
        id.to_string()
    }
}
