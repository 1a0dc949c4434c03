//
// HTTP surface: one module per spec component, each owning its own
// `routes()` and its own `#[cfg(test)]` suite exercised through Rocket's
// local test client. `main.rs` mounts every module's routes on the bare
// issuer path (spec §6's route table has no shared prefix).
//
pub mod auth;
pub mod bundle;
pub mod client_auth;
pub mod device;
pub mod discovery;
pub mod introspect;
pub mod registration;
pub mod token;
