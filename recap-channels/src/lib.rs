pub mod traits;
pub mod types;
pub mod webhook;
pub mod whatsapp;

pub use traits::Messenger;
pub use types::{MessageId, PhoneId};
pub use webhook::{ChatEvent, InboundText, StatusReceipt};
pub use whatsapp::{MAX_MESSAGE_CHARS, WhatsAppCloudAdapter};
