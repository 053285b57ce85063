use std::sync::Arc;

use crate::bus::{AuditLogHandler, EventBus};
use crate::config::Config;
use crate::gateway::PaymentGateway;
use crate::jobs::{JobQueue, QueueConfig, Sleeper, TokioSleeper};
use crate::lock::{IdempotencyLock, LockStore};
use crate::repository::{CatalogRepository, OrderRepository, PaymentRepository};
use crate::scheduler::ExpirationScheduler;
use crate::services::{Fulfillment, OrderService, PaymentService};

/// External collaborators the core is wired against.
pub struct Dependencies {
    pub catalog: Arc<dyn CatalogRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub lock_store: Arc<dyn LockStore>,
    pub gateway: Arc<dyn PaymentGateway>,
}

#[derive(Clone)]
pub struct AppState {
    pub order_service: Arc<OrderService>,
    pub payment_service: Arc<PaymentService>,
    pub fulfillment: Arc<Fulfillment>,
    pub bus: Arc<EventBus>,
    pub jobs: Arc<JobQueue>,
    orders: Arc<dyn OrderRepository>,
}

impl AppState {
    /// Starts the job queue and subscribes the audit log to every event.
    pub fn build(deps: Dependencies, config: &Config) -> Self {
        Self::build_with(deps, config, config.queue_config(), Arc::new(TokioSleeper))
    }

    pub fn build_with(
        deps: Dependencies,
        config: &Config,
        queue: QueueConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        bus.subscribe_all(Arc::new(AuditLogHandler));

        let jobs = Arc::new(JobQueue::start_with_sleeper(queue, sleeper));
        let lock = IdempotencyLock::new(deps.lock_store);
        let fulfillment = Arc::new(Fulfillment::new(Arc::clone(&deps.orders), Arc::clone(&bus)));

        let order_service = Arc::new(OrderService::new(
            deps.catalog,
            Arc::clone(&deps.orders),
            lock.clone(),
            Arc::clone(&bus),
            Arc::clone(&fulfillment),
            config.order_policy(),
        ));

        let payment_service = Arc::new(PaymentService::new(
            deps.payments,
            Arc::clone(&deps.orders),
            deps.gateway,
            lock,
            Arc::clone(&bus),
            Arc::clone(&jobs),
            Arc::clone(&fulfillment),
            config.payment_policy(),
        ));

        Self {
            order_service,
            payment_service,
            fulfillment,
            bus,
            jobs,
            orders: deps.orders,
        }
    }

    pub fn expiration_scheduler(&self, config: &Config) -> ExpirationScheduler {
        ExpirationScheduler::new(
            Arc::clone(&self.orders),
            Arc::clone(&self.fulfillment),
            config.expiry_sweep_interval,
        )
    }
}
