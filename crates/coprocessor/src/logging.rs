use crate::config::CoprocessorConfig;

pub fn setup_logging(config: &CoprocessorConfig) {
    common::setup_logging(config.environment);
}
