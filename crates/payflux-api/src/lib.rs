pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod sweeps;

pub use server::{build_router, serve};
pub use state::AppState;
pub use sweeps::spawn_sweeps;
