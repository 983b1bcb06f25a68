pub mod auth;
pub mod error;
pub mod middleware;
pub mod notify;
pub mod photos;
pub mod routes;
pub mod state;
pub mod students;
pub mod users;
pub mod violations;
