mod billing;
mod event;
mod order;
mod pending_payment;
mod ticket;

pub use billing::*;
pub use event::*;
pub use order::*;
pub use pending_payment::*;
pub use ticket::*;
