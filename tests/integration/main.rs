//! End-to-end tests of the relay: webhook in, documents out.

mod helpers;
mod pipeline_test;
mod webhook_test;
