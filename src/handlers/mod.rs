pub mod access_log_handlers;
pub mod client_handlers;
pub mod document_handlers;
pub mod health_handlers;
pub mod object_handlers;
