pub mod auth;

pub use auth::{ClientMeta, CurrentUser, auth_middleware};
