pub mod local_store;
pub mod rest_freeze;
