pub mod mocks;

#[allow(unused_imports)]
pub use mocks::{fixture_dataset, json_response, offline_client, online_client, MockTransport};
