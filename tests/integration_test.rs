// tests/integration_test.rs

//! Integration tests exercising the shard-management handlers end to end
//! against a real Postgres-compatible metadata store. Requires
//! `TEST_DATABASE_URL` to point at a reachable, disposable test database.

mod integration {
    pub mod ddl_gc_test;
    pub mod fixtures;
    pub mod migration_test;
    pub mod shard_lifecycle_test;
}
