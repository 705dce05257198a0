pub mod calendar_gateway;
pub mod completion_client;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_mapper;
pub mod google_calendar_client;
pub mod storage;
pub mod task_repository;
