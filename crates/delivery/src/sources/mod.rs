//! The two work sources: webhook event streams and the ERP queue.

mod erp;
mod webhook;

pub use erp::{ErpConnection, ErpQueueSource};
pub use webhook::WebhookSource;
