pub mod apply;
pub mod coordinator;
pub mod crds;
pub mod error;
pub mod finalizer;
pub mod hazelcast_controller;
pub mod hot_backup_controller;
pub mod hz_config;
pub mod naming;
pub mod observe;
pub mod resources;
pub mod rest_client;
pub mod restore;
pub mod scheduler;
pub mod settings;
pub mod validation;
