pub mod notification;
pub mod protocol;
pub mod types;
