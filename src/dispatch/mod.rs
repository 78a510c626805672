mod dispatcher;
mod slot;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;
pub use slot::{Offer, PendingSlot};
