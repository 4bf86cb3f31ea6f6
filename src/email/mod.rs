pub mod common;
pub mod parser;

// Re-export commonly used items
pub use common::EmailMessage;
pub use parser::parse_message;
