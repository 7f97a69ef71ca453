//! End-to-end tests of the service provider live in `tests/`.
