mod bus;
mod types;

pub use bus::{EventBus, Subscription};
pub use types::{Event, Notice};
