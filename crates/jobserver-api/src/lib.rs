pub mod routes;
pub mod server;
pub mod state;

pub use server::run;
pub use state::AppState;

pub use jobserver_core::*;
