pub mod hazelcast;
pub mod hot_backup;
pub mod map;
