//! Test configuration helpers

use onesignal_cleaner::Config;
use std::path::Path;
use std::time::Duration;

/// App id used by every scenario
pub const APP_ID: &str = "appId";

/// REST API key used by every scenario
pub const API_KEY: &str = "restApiKey";

/// Config pointing at `origin`, writing artifacts into `temp_dir`
pub fn test_config(origin: &str, temp_dir: &Path) -> Config {
    let mut config = Config::default();
    config.registry.origin = origin.to_string();
    config.registry.app_id = APP_ID.to_string();
    config.registry.api_key = API_KEY.to_string();
    config.registry.connect_timeout = Duration::from_secs(5);
    config.acquisition.temp_dir = temp_dir.to_path_buf();
    config.acquisition.readiness_timeout = Duration::from_secs(30);
    config.acquisition.pause = Duration::from_secs(5);
    config
}
