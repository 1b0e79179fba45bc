//! Resource declarers, one per component, composed leaf-first by [`app`].
//!
//! Each declarer takes the stack plus the handles it depends on and returns
//! a handle struct for the components declared after it.

pub mod app;
pub mod compute;
pub mod config_store;
pub mod database;
pub mod edge;
pub mod frontend;
pub mod identity;
pub mod network;
pub mod outputs;
pub mod policy;
pub mod roles;
pub mod routes;
pub mod storage;
