pub mod html;
pub mod recipients;
pub mod smtp;

pub use html::HtmlDigestAssembler;
pub use recipients::{parse_recipient_list, EnvRecipientResolver, StaticRecipientResolver};
pub use smtp::{FileDelivery, SmtpConfig, SmtpDelivery};
