pub mod config_events;
pub mod metrics;
pub mod order_no;
pub mod orders;
pub mod registry;
pub mod webhook;

pub use config_events::ConfigChanged;
pub use metrics::{get_metrics, init_metrics};
pub use orders::{CloseReport, ConfirmOutcome, OrderService, SubmitOrder, SubmitReceipt};
pub use registry::{CallbackDomainResolver, ProviderRegistry, SlotState};
pub use webhook::{WebhookAck, WebhookDispatcher};
