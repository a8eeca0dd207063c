//! Logging setup
//!
//! The engine logs through the `log` facade. Embedders that have no logger
//! of their own can install `env_logger` through these helpers; all of them
//! are safe to call more than once.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use env_logger::{Builder, Env};

/// Install `env_logger`, honouring `RUST_LOG` and defaulting to `info`
pub fn init() {
    init_with_filter("info");
}

/// Install `env_logger` with `default_filter` unless `RUST_LOG` is set
pub fn init_with_filter(default_filter: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_filter)).try_init();
}

/// Logger for unit and integration tests; output is captured per test
pub fn init_for_tests() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
