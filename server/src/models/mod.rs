pub mod event;
pub mod order;
pub mod payment;
pub mod ticket;
pub mod user;

pub use event::{Event, EventPrice, EventStatus};
pub use order::{Order, OrderDetails, OrderLineItem, OrderStatus};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use ticket::Ticket;
pub use user::User;
