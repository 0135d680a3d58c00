pub mod api;
pub mod config;
pub mod link_repo;
pub mod link_service;
pub mod probe;
pub mod serializer;
pub mod server;
pub mod short_id;
pub mod validation;

mod orm;
