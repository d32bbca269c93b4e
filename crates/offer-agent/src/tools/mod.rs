//! The equipment catalog tools that models can use.

mod details;
mod search;
mod webhook;

pub use details::{EquipmentDetailsInput, GetEquipmentDetailsTool};
pub use search::{SearchEquipmentInput, SearchEquipmentTool};
pub use webhook::WebhookClient;
