//! Integration tests requiring a live PostgreSQL instance.
//!
//! All tests here are `#[ignore]`d by default; run them with
//! `cargo test -- --ignored` against a database reachable via `DATABASE_URL`
//! (or the default test URL on port 15432).

mod queue_lifecycle_tests;
