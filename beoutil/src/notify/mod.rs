pub mod decoder;
pub mod stream;
pub mod watch;
