//! Unit tests that cut across module boundaries.

mod ranking_test;
