pub mod alerts;
pub mod whatsapp;

pub use alerts::WebhookAlertSender;
pub use whatsapp::WhatsAppSender;
