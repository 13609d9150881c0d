use std::sync::Arc;

use fleet_models::build::{Build, BuildRequest};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::store::{BuildStore, MemoryStore};

static INIT: std::sync::Once = std::sync::Once::new();

pub fn setup_test_environment() {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

/// A memory store holding one fleet, one profile and one queued build.
pub fn queued_build(config_json: &str, version: &str) -> (Arc<MemoryStore>, Build) {
    let store = Arc::new(MemoryStore::new());
    let fleet = store.add_fleet("edge");
    let profile = store.add_profile(config_json, &[fleet]);
    let build = store
        .create_build(BuildRequest {
            profile_id: profile,
            fleet_id: fleet,
            version: version.to_string(),
        })
        .unwrap();
    (store, build)
}
