pub mod fulfillment;
pub mod orders;
pub mod payments;

pub use fulfillment::Fulfillment;
pub use orders::{OrderPolicy, OrderService};
pub use payments::{PaymentPolicy, PaymentService};
