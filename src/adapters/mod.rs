// Adapters layer: concrete hosts (tcp, unix, client-only) and service kinds (custom, managed)

pub mod client_only;
pub mod custom;
pub mod localhost;
pub mod managed;
#[cfg(unix)]
pub mod unix;
