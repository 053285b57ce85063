#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use boxoffice_server::config::Config;
use boxoffice_server::gateway::{NotificationPayload, SandboxGateway};
use boxoffice_server::jobs::{QueueConfig, Sleeper};
use boxoffice_server::lock::InMemoryLockStore;
use boxoffice_server::models::{Event, EventPrice, EventStatus, User};
use boxoffice_server::repository::InMemoryStore;
use boxoffice_server::services::orders::{CreateOrderInput, TicketOrderInput};
use boxoffice_server::state::{AppState, Dependencies};

pub const SERVER_KEY: &str = "test-server-key";

/// Records requested backoff delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub locks: Arc<InMemoryLockStore>,
    pub gateway: SandboxGateway,
    pub sleeper: Arc<RecordingSleeper>,
    pub config: Config,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        let config = Config {
            gateway_server_key: SERVER_KEY.to_string(),
            ..Config::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryLockStore::new());
        let gateway = SandboxGateway::new(config.gateway_server_key.clone());
        let sleeper = Arc::new(RecordingSleeper::default());

        let deps = Dependencies {
            catalog: store.clone(),
            orders: store.clone(),
            payments: store.clone(),
            lock_store: locks.clone(),
            gateway: Arc::new(gateway.clone()),
        };
        let queue = QueueConfig {
            workers: config.job_queue_workers,
            capacity: config.job_queue_capacity,
            ..QueueConfig::default()
        };
        let state = AppState::build_with(deps, &config, queue, sleeper.clone());

        Self {
            store,
            locks,
            gateway,
            sleeper,
            config,
            state,
        }
    }

    pub fn seed_event(&self) -> Uuid {
        self.seed_event_with(EventStatus::Published, ChronoDuration::days(1))
    }

    /// An event whose sales window closes `closes_in` from now.
    pub fn seed_event_with(&self, status: EventStatus, closes_in: ChronoDuration) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.store.insert_event(Event {
            id,
            name: "Jazz Night".to_string(),
            status,
            starts_at: now + ChronoDuration::days(30),
            sales_start_at: now - ChronoDuration::days(1),
            sales_end_at: now + closes_in,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn seed_price(&self, event_id: Uuid, price: i64, quota: i32) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.store.insert_price(EventPrice {
            id,
            event_id,
            name: format!("Tier {price}"),
            price,
            quota,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn seed_user(&self) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.store.insert_user(User {
            id,
            name: "Sari".to_string(),
            email: format!("{id}@example.com"),
            created_at: now,
            updated_at: now,
        });
        id
    }

    /// Waits until the queue has finished `count` jobs, successfully or not.
    pub async fn wait_for_jobs(&self, count: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stats = self.state.jobs.stats();
            if stats.succeeded + stats.exhausted >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for jobs: {stats:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// A notification signed with the harness server key.
    pub fn notification(
        &self,
        order_id: Uuid,
        transaction_id: &str,
        transaction_status: &str,
        gross_amount: &str,
    ) -> NotificationPayload {
        let order_id = order_id.to_string();
        let signature = self.gateway.sign(&order_id, "200", gross_amount);
        NotificationPayload {
            order_id: Some(order_id),
            status_code: Some("200".to_string()),
            gross_amount: Some(gross_amount.to_string()),
            signature_key: Some(signature),
            transaction_status: Some(transaction_status.to_string()),
            fraud_status: None,
            transaction_id: Some(transaction_id.to_string()),
        }
    }
}

pub fn order_input(event_id: Uuid, lines: &[(Uuid, i32)]) -> CreateOrderInput {
    CreateOrderInput {
        event_id: event_id.to_string(),
        tickets_ordered: lines
            .iter()
            .map(|(price_id, quantity)| TicketOrderInput {
                price_id: price_id.to_string(),
                quantity: *quantity,
            })
            .collect(),
    }
}
